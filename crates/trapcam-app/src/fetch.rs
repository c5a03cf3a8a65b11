// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    Anchor, Direction, FetchCompletion, FetchToken, PageRequest, PlaybackError, Seed, Window,
    WindowStore,
};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (1-based).
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1_u32 << exponent)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lane {
    Idle,
    InFlight(PageRequest),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendOutcome {
    Issued(PageRequest),
    /// A request in that direction is already pending; no new one was made.
    AlreadyInFlight(FetchToken),
    /// The window reports no more data in that direction.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Merged {
        direction: Direction,
        added: usize,
        has_more: bool,
    },
    Stale {
        direction: Direction,
        token: FetchToken,
    },
    /// Same request, same anchor and token, to be run again after `delay`.
    Retry {
        request: PageRequest,
        delay: Duration,
        cause: String,
    },
    Failed(PlaybackError),
    Rejected(PlaybackError),
}

/// Issues and tracks page requests, one lane per direction.
///
/// A lane is strictly sequential: while it holds an in-flight request every
/// further extend in that direction is answered with the pending token.
/// Results are matched against the lane's current token, so anything
/// superseded or issued before a [`reset`](Self::reset) is dropped.
#[derive(Debug, Clone)]
pub struct FetchCoordinator {
    page_size: usize,
    policy: RetryPolicy,
    last_token: u64,
    before: Lane,
    after: Lane,
}

impl FetchCoordinator {
    pub fn new(page_size: usize, policy: RetryPolicy) -> Self {
        Self {
            page_size: page_size.max(1),
            policy,
            last_token: 0,
            before: Lane::Idle,
            after: Lane::Idle,
        }
    }

    pub fn in_flight(&self, direction: Direction) -> Option<&PageRequest> {
        match self.lane(direction) {
            Lane::InFlight(request) => Some(request),
            _ => None,
        }
    }

    pub fn is_loading(&self, direction: Direction) -> bool {
        self.in_flight(direction).is_some()
    }

    /// Cause of the last surfaced failure, until the lane is used again.
    pub fn failure(&self, direction: Direction) -> Option<&str> {
        match self.lane(direction) {
            Lane::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn request_extend(&mut self, direction: Direction, window: &Window) -> ExtendOutcome {
        if let Lane::InFlight(request) = self.lane(direction) {
            debug!(%direction, token = %request.token, "extend deduplicated");
            return ExtendOutcome::AlreadyInFlight(request.token);
        }
        self.issue(direction, window)
    }

    /// Issues a fresh request even when one is pending; the pending result
    /// will be discarded when it arrives.
    pub fn supersede(&mut self, direction: Direction, window: &Window) -> ExtendOutcome {
        if let Lane::InFlight(request) = self.lane(direction) {
            debug!(%direction, token = %request.token, "superseding in-flight request");
        }
        self.issue(direction, window)
    }

    /// Forgets both lanes. Tokens keep counting up, so results that belong
    /// to the previous anchoring are recognised as stale.
    pub fn reset(&mut self) {
        self.before = Lane::Idle;
        self.after = Lane::Idle;
    }

    pub fn complete(
        &mut self,
        completion: FetchCompletion,
        store: &mut WindowStore,
    ) -> CompletionOutcome {
        let FetchCompletion {
            token,
            direction,
            outcome,
        } = completion;

        let request = match self.lane(direction) {
            Lane::InFlight(request) if request.token == token => request.clone(),
            _ => {
                warn!(%direction, %token, "discarding stale fetch result");
                return CompletionOutcome::Stale { direction, token };
            }
        };

        match outcome {
            Ok(page) => {
                *self.lane_mut(direction) = Lane::Idle;
                let total = page.total;
                match store.merge(direction, page.captures, page.has_more) {
                    Ok(summary) => {
                        store.record_total(total);
                        debug!(
                            %direction,
                            %token,
                            added = summary.added,
                            has_more = summary.has_more,
                            "page merged"
                        );
                        CompletionOutcome::Merged {
                            direction,
                            added: summary.added,
                            has_more: summary.has_more,
                        }
                    }
                    Err(error) => {
                        warn!(%direction, %token, %error, "page rejected");
                        CompletionOutcome::Rejected(error)
                    }
                }
            }
            Err(cause) if request.attempt < self.policy.max_attempts => {
                let delay = self.policy.backoff_for(request.attempt);
                let retry = PageRequest {
                    attempt: request.attempt + 1,
                    ..request
                };
                warn!(
                    %direction,
                    %token,
                    attempt = request.attempt,
                    delay_ms = delay.as_millis() as u64,
                    %cause,
                    "fetch failed; retrying"
                );
                *self.lane_mut(direction) = Lane::InFlight(retry.clone());
                CompletionOutcome::Retry {
                    request: retry,
                    delay,
                    cause,
                }
            }
            Err(cause) => {
                warn!(%direction, %token, attempts = request.attempt, %cause, "fetch failed");
                *self.lane_mut(direction) = Lane::Failed(cause.clone());
                CompletionOutcome::Failed(PlaybackError::FetchFailed { direction, cause })
            }
        }
    }

    fn issue(&mut self, direction: Direction, window: &Window) -> ExtendOutcome {
        if !window.has_more(direction) {
            return ExtendOutcome::Exhausted;
        }

        self.last_token += 1;
        let request = PageRequest {
            token: FetchToken::new(self.last_token),
            direction,
            anchor: anchor_for(direction, window),
            page_size: self.page_size,
            attempt: 1,
        };
        debug!(%direction, token = %request.token, anchor = ?request.anchor, "fetch issued");
        *self.lane_mut(direction) = Lane::InFlight(request.clone());
        ExtendOutcome::Issued(request)
    }

    fn lane(&self, direction: Direction) -> &Lane {
        match direction {
            Direction::Before => &self.before,
            Direction::After => &self.after,
        }
    }

    fn lane_mut(&mut self, direction: Direction) -> &mut Lane {
        match direction {
            Direction::Before => &mut self.before,
            Direction::After => &mut self.after,
        }
    }
}

/// Loaded windows extend from their edge capture; an empty window extends
/// from its seed.
fn anchor_for(direction: Direction, window: &Window) -> Anchor {
    if let Some(edge) = window.edge(direction) {
        return Anchor::Beyond(edge.id);
    }
    match (window.seed(), direction) {
        (Seed::Offset(offset), _) => Anchor::Offset(offset),
        (Seed::Capture(id), Direction::After) => Anchor::Starting(id),
        (Seed::Capture(id), Direction::Before) => Anchor::Beyond(id),
    }
}
