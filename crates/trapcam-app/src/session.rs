// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::time::Duration;
use tracing::{debug, info};

use crate::cursor::DEFAULT_PREFETCH_PROXIMITY;
use crate::fetch::DEFAULT_PAGE_SIZE;
use crate::filter::DEFAULT_SCORE_THRESHOLD;
use crate::{
    Capture, CaptureId, CompletionOutcome, Cursor, CursorController, CursorEffect, CursorIntent,
    Direction, ExtendOutcome, FetchCompletion, FetchCoordinator, FetchToken, FilterProjection,
    PageRequest, PlaybackError, RetryPolicy, Seed, StepDirection, Window, WindowStore,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub page_size: usize,
    pub prefetch_proximity: usize,
    pub retry: RetryPolicy,
    pub score_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            prefetch_proximity: DEFAULT_PREFETCH_PROXIMITY,
            retry: RetryPolicy::default(),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// Input from the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackCommand {
    SelectItem(CaptureId),
    StepPrevious,
    StepNext,
    /// A scroll edge was reached; load more that way if there is any.
    ExtendWindow(Direction),
    /// Re-request an edge, superseding anything pending there.
    ReloadEdge(Direction),
    AdjustThreshold(f64),
    SetThreshold(f64),
}

/// What changed as a result of a command or a fetch completion.
///
/// `FetchIssued` and `FetchRetryScheduled` are instructions for the caller:
/// run the request (after `delay` for a retry) and hand the result back
/// through [`PlaybackSession::complete_fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    FetchIssued(PageRequest),
    FetchRetryScheduled {
        request: PageRequest,
        delay: Duration,
        cause: String,
    },
    WindowExtended {
        direction: Direction,
        added: usize,
        has_more: bool,
    },
    StaleResultDiscarded {
        direction: Direction,
        token: FetchToken,
    },
    ActiveChanged {
        id: CaptureId,
        index: usize,
        total_known: usize,
    },
    CursorPending {
        target: CaptureId,
    },
    IntentDeferred(CursorIntent),
    IntentsDropped {
        direction: Direction,
        count: usize,
    },
    ThresholdChanged(f64),
    /// A surfaced condition: overlap, exhausted retries, unresolvable
    /// target, or a boundary step.
    Condition(PlaybackError),
}

impl PlaybackEvent {
    pub fn condition(&self) -> Option<&PlaybackError> {
        match self {
            Self::Condition(error) => Some(error),
            _ => None,
        }
    }
}

/// Read side for rendering.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackView<'a> {
    pub window: &'a Window,
    pub cursor: Cursor,
    pub filter: FilterProjection,
    pub loading_before: bool,
    pub loading_after: bool,
    pub failure_before: Option<&'a str>,
    pub failure_after: Option<&'a str>,
    pub queued_intents: usize,
}

impl<'a> PlaybackView<'a> {
    pub fn active_capture(&self) -> Option<&'a Capture> {
        self.cursor
            .current_index()
            .and_then(|index| self.window.get(index))
    }

    pub const fn loading(&self, direction: Direction) -> bool {
        match direction {
            Direction::Before => self.loading_before,
            Direction::After => self.loading_after,
        }
    }

    pub const fn failure(&self, direction: Direction) -> Option<&'a str> {
        match direction {
            Direction::Before => self.failure_before,
            Direction::After => self.failure_after,
        }
    }

    /// One-based position of the active capture and the best known total:
    /// absolute when the session was seeded by offset, window-relative
    /// otherwise.
    pub fn position(&self) -> Option<(u64, u64)> {
        let index = self.cursor.current_index()? as u64;
        let loaded = self.window.len() as u64;
        match (self.window.first_offset(), self.window.reported_total()) {
            (Some(first), Some(total)) => Some((first + index + 1, total.max(first + loaded))),
            (Some(first), None) => Some((first + index + 1, first + loaded)),
            (None, _) => Some((index + 1, loaded)),
        }
    }
}

/// One viewing session: the window, the fetch lanes, the cursor, and the
/// detection filter. Every operation is synchronous; fetches happen outside
/// and come back through [`complete_fetch`](Self::complete_fetch).
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    store: WindowStore,
    fetch: FetchCoordinator,
    cursor: CursorController,
    filter: FilterProjection,
}

impl PlaybackSession {
    pub fn new(seed: Seed, config: EngineConfig) -> Self {
        Self {
            store: WindowStore::new(seed),
            fetch: FetchCoordinator::new(config.page_size, config.retry),
            cursor: CursorController::new(seed, config.prefetch_proximity),
            filter: FilterProjection::new(config.score_threshold),
        }
    }

    /// Requests the first pages around the seed.
    pub fn start(&mut self) -> Vec<PlaybackEvent> {
        info!(seed = ?self.store.get().seed(), "playback session started");
        let mut events = Vec::new();
        self.extend(Direction::After, &mut events);
        self.extend(Direction::Before, &mut events);
        events
    }

    /// Discards the window and cursor and starts over at `seed`. Results of
    /// fetches issued before this call are ignored when they land.
    pub fn reseed(&mut self, seed: Seed) -> Vec<PlaybackEvent> {
        self.store.initialize(seed);
        self.fetch.reset();
        self.cursor.reset(seed);
        self.start()
    }

    pub fn window(&self) -> &Window {
        self.store.get()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor.cursor()
    }

    pub fn filter(&self) -> FilterProjection {
        self.filter
    }

    pub fn view(&self) -> PlaybackView<'_> {
        PlaybackView {
            window: self.store.get(),
            cursor: self.cursor.cursor(),
            filter: self.filter,
            loading_before: self.fetch.is_loading(Direction::Before),
            loading_after: self.fetch.is_loading(Direction::After),
            failure_before: self.fetch.failure(Direction::Before),
            failure_after: self.fetch.failure(Direction::After),
            queued_intents: self.cursor.queued(),
        }
    }

    pub fn dispatch(&mut self, command: PlaybackCommand) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        match command {
            PlaybackCommand::SelectItem(id) => {
                let effects = self.cursor.set_active(id, self.store.get());
                self.apply_cursor_effects(effects, &mut events);
            }
            PlaybackCommand::StepPrevious => {
                let effects = self.cursor.step(StepDirection::Previous, self.store.get());
                self.apply_cursor_effects(effects, &mut events);
            }
            PlaybackCommand::StepNext => {
                let effects = self.cursor.step(StepDirection::Next, self.store.get());
                self.apply_cursor_effects(effects, &mut events);
            }
            PlaybackCommand::ExtendWindow(direction) => self.extend(direction, &mut events),
            PlaybackCommand::ReloadEdge(direction) => {
                if let ExtendOutcome::Issued(request) =
                    self.fetch.supersede(direction, self.store.get())
                {
                    events.push(PlaybackEvent::FetchIssued(request));
                }
            }
            PlaybackCommand::AdjustThreshold(delta) => {
                let threshold = self.filter.nudge(delta);
                events.push(PlaybackEvent::ThresholdChanged(threshold));
            }
            PlaybackCommand::SetThreshold(value) => {
                let threshold = self.filter.set_threshold(value);
                events.push(PlaybackEvent::ThresholdChanged(threshold));
            }
        }
        events
    }

    pub fn complete_fetch(&mut self, completion: FetchCompletion) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        match self.fetch.complete(completion, &mut self.store) {
            CompletionOutcome::Merged {
                direction,
                added,
                has_more,
            } => {
                events.push(PlaybackEvent::WindowExtended {
                    direction,
                    added,
                    has_more,
                });
                let effects = self.cursor.on_window_changed(self.store.get());
                self.apply_cursor_effects(effects, &mut events);
            }
            CompletionOutcome::Stale { direction, token } => {
                events.push(PlaybackEvent::StaleResultDiscarded { direction, token });
            }
            CompletionOutcome::Retry {
                request,
                delay,
                cause,
            } => {
                events.push(PlaybackEvent::FetchRetryScheduled {
                    request,
                    delay,
                    cause,
                });
            }
            CompletionOutcome::Failed(error) | CompletionOutcome::Rejected(error) => {
                let direction = match &error {
                    PlaybackError::FetchFailed { direction, .. }
                    | PlaybackError::DuplicateItem { direction, .. } => Some(*direction),
                    _ => None,
                };
                events.push(PlaybackEvent::Condition(error));
                if let Some(direction) = direction {
                    let count = self.cursor.abandon_blocked(direction);
                    if count > 0 {
                        events.push(PlaybackEvent::IntentsDropped { direction, count });
                    }
                }
            }
        }
        events
    }

    fn extend(&mut self, direction: Direction, events: &mut Vec<PlaybackEvent>) {
        match self.fetch.request_extend(direction, self.store.get()) {
            ExtendOutcome::Issued(request) => events.push(PlaybackEvent::FetchIssued(request)),
            ExtendOutcome::AlreadyInFlight(_) | ExtendOutcome::Exhausted => {}
        }
    }

    fn apply_cursor_effects(&mut self, effects: Vec<CursorEffect>, events: &mut Vec<PlaybackEvent>) {
        for effect in effects {
            match effect {
                CursorEffect::ActiveChanged {
                    id,
                    index,
                    total_known,
                } => events.push(PlaybackEvent::ActiveChanged {
                    id,
                    index,
                    total_known,
                }),
                CursorEffect::Pending { target } => {
                    events.push(PlaybackEvent::CursorPending { target });
                }
                CursorEffect::Unresolvable { target } => {
                    events.push(PlaybackEvent::Condition(PlaybackError::UnresolvableCursor {
                        target,
                    }));
                }
                CursorEffect::AtBoundary(direction) => {
                    events.push(PlaybackEvent::Condition(PlaybackError::AtBoundary {
                        direction,
                    }));
                }
                CursorEffect::Deferred(intent) => {
                    events.push(PlaybackEvent::IntentDeferred(intent));
                }
                CursorEffect::Extend(direction) => self.extend(direction, events),
                CursorEffect::Prefetch(direction) => {
                    // A surfaced failure stays put until the user asks again.
                    if self.fetch.failure(direction).is_none() {
                        self.extend(direction, events);
                    } else {
                        debug!(%direction, "prefetch skipped after failure");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, PlaybackCommand, PlaybackEvent, PlaybackSession};
    use crate::{
        Anchor, Capture, CaptureId, Cursor, CursorIntent, Direction, FetchCompletion, Page,
        PageRequest, PlaybackError, RetryPolicy, Seed, StepDirection,
    };
    use std::time::Duration;
    use time::OffsetDateTime;

    fn capture(id: i64) -> Capture {
        Capture {
            id: CaptureId::new(id),
            timestamp: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(id),
            url: String::new(),
            width: 10,
            height: 10,
            detections_count: 0,
            detections: Vec::new(),
        }
    }

    fn page(ids: &[i64], has_more: bool) -> Page {
        Page {
            captures: ids.iter().copied().map(capture).collect(),
            has_more,
            total: None,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            page_size: 3,
            prefetch_proximity: 1,
            retry: RetryPolicy {
                max_attempts: 2,
                backoff_base: Duration::from_millis(5),
                backoff_max: Duration::from_millis(5),
            },
            score_threshold: 0.5,
        }
    }

    fn issued(events: &[PlaybackEvent]) -> Vec<PageRequest> {
        events
            .iter()
            .filter_map(|event| match event {
                PlaybackEvent::FetchIssued(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    fn only_request(events: &[PlaybackEvent], direction: Direction) -> PageRequest {
        let requests = issued(events)
            .into_iter()
            .filter(|request| request.direction == direction)
            .collect::<Vec<_>>();
        assert_eq!(requests.len(), 1, "events: {events:?}");
        requests[0].clone()
    }

    #[test]
    fn offset_seed_at_zero_only_loads_forward_and_selects_first() {
        let mut session = PlaybackSession::new(Seed::Offset(0), config());
        let events = session.start();
        let request = only_request(&events, Direction::After);
        assert_eq!(request.anchor, Anchor::Offset(0));
        assert!(issued(&events).iter().all(|r| r.direction == Direction::After));

        let events =
            session.complete_fetch(FetchCompletion::succeeded(&request, page(&[1, 2, 3], false)));
        assert!(events.contains(&PlaybackEvent::ActiveChanged {
            id: CaptureId::new(1),
            index: 0,
            total_known: 3,
        }));
        assert_eq!(session.view().active_capture().map(|c| c.id.get()), Some(1));
    }

    #[test]
    fn capture_seed_loads_both_ways_and_resolves_link() {
        let mut session = PlaybackSession::new(Seed::Capture(CaptureId::new(5)), config());
        let events = session.start();
        let after = only_request(&events, Direction::After);
        let before = only_request(&events, Direction::Before);
        assert_eq!(after.anchor, Anchor::Starting(CaptureId::new(5)));
        assert_eq!(before.anchor, Anchor::Beyond(CaptureId::new(5)));
        assert_eq!(session.cursor(), Cursor::Pending {
            target: CaptureId::new(5)
        });

        session.complete_fetch(FetchCompletion::succeeded(&before, page(&[2, 3, 4], true)));
        let events =
            session.complete_fetch(FetchCompletion::succeeded(&after, page(&[5, 6, 7], true)));
        assert!(events.contains(&PlaybackEvent::ActiveChanged {
            id: CaptureId::new(5),
            index: 3,
            total_known: 6,
        }));
    }

    #[test]
    fn step_next_into_edge_prefetches_and_extends() {
        let mut session = PlaybackSession::new(Seed::Offset(0), config());
        let request = only_request(&session.start(), Direction::After);
        session.complete_fetch(FetchCompletion::succeeded(&request, page(&[1, 2, 3], true)));
        session.dispatch(PlaybackCommand::SelectItem(CaptureId::new(2)));

        let events = session.dispatch(PlaybackCommand::StepNext);
        assert_eq!(events[0], PlaybackEvent::ActiveChanged {
            id: CaptureId::new(3),
            index: 2,
            total_known: 3,
        });
        let prefetch = only_request(&events, Direction::After);
        assert_eq!(prefetch.anchor, Anchor::Beyond(CaptureId::new(3)));

        session.complete_fetch(FetchCompletion::succeeded(&prefetch, page(&[4, 5], true)));
        let ids = session
            .window()
            .ids()
            .iter()
            .map(|id| id.get())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(session.cursor(), Cursor::Resolved {
            id: CaptureId::new(3),
            index: 2
        });
    }

    #[test]
    fn repeated_extend_issues_one_request() {
        let mut session = PlaybackSession::new(Seed::Offset(0), config());
        let first = session.start();
        let second = session.dispatch(PlaybackCommand::ExtendWindow(Direction::After));
        let third = session.dispatch(PlaybackCommand::ExtendWindow(Direction::After));
        assert_eq!(issued(&first).len(), 1);
        assert!(issued(&second).is_empty());
        assert!(issued(&third).is_empty());
    }

    #[test]
    fn final_failure_surfaces_and_drops_blocked_steps() {
        let mut session = PlaybackSession::new(Seed::Offset(0), config());
        let request = only_request(&session.start(), Direction::After);
        session.complete_fetch(FetchCompletion::succeeded(&request, page(&[1, 2], true)));
        session.dispatch(PlaybackCommand::SelectItem(CaptureId::new(1)));

        let events = session.dispatch(PlaybackCommand::StepNext);
        let prefetch = only_request(&events, Direction::After);
        let deferred = session.dispatch(PlaybackCommand::StepNext);
        assert!(deferred.contains(&PlaybackEvent::IntentDeferred(CursorIntent::Step(
            StepDirection::Next
        ))));

        let retry = match &session
            .complete_fetch(FetchCompletion::failed(&prefetch, "503"))[..]
        {
            [PlaybackEvent::FetchRetryScheduled { request, delay, .. }] => {
                assert_eq!(*delay, Duration::from_millis(5));
                request.clone()
            }
            other => panic!("expected a retry, got {other:?}"),
        };

        let events = session.complete_fetch(FetchCompletion::failed(&retry, "503"));
        assert_eq!(events, vec![
            PlaybackEvent::Condition(PlaybackError::FetchFailed {
                direction: Direction::After,
                cause: "503".to_owned(),
            }),
            PlaybackEvent::IntentsDropped {
                direction: Direction::After,
                count: 1,
            },
        ]);
        assert_eq!(session.cursor(), Cursor::Resolved {
            id: CaptureId::new(2),
            index: 1
        });
        assert_eq!(session.view().failure(Direction::After), Some("503"));

        // Prefetch stays quiet after a surfaced failure; a step asks again.
        let events = session.dispatch(PlaybackCommand::SelectItem(CaptureId::new(2)));
        assert!(issued(&events).is_empty());
        let events = session.dispatch(PlaybackCommand::StepNext);
        assert_eq!(only_request(&events, Direction::After).attempt, 1);
    }

    #[test]
    fn reseed_ignores_results_from_previous_anchor() {
        let mut session = PlaybackSession::new(Seed::Offset(0), config());
        let old = only_request(&session.start(), Direction::After);

        let events = session.reseed(Seed::Offset(30));
        let new_after = only_request(&events, Direction::After);
        assert_eq!(new_after.anchor, Anchor::Offset(30));
        assert!(new_after.token > old.token);

        let events = session.complete_fetch(FetchCompletion::succeeded(&old, page(&[1], true)));
        assert!(matches!(events[..], [PlaybackEvent::StaleResultDiscarded { .. }]));
        assert!(session.window().is_empty());
    }

    #[test]
    fn threshold_commands_report_new_value() {
        let mut session = PlaybackSession::new(Seed::Offset(0), config());
        assert_eq!(
            session.dispatch(PlaybackCommand::SetThreshold(0.8)),
            vec![PlaybackEvent::ThresholdChanged(0.8)]
        );
        let events = session.dispatch(PlaybackCommand::AdjustThreshold(0.05));
        assert_eq!(session.filter().label(), "0.85");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn position_uses_absolute_offsets_when_known() {
        let mut session = PlaybackSession::new(Seed::Offset(10), config());
        let events = session.start();
        let after = only_request(&events, Direction::After);
        session.complete_fetch(FetchCompletion::succeeded(&after, Page {
            total: Some(40),
            ..page(&[11, 12, 13], true)
        }));
        assert_eq!(session.view().position(), Some((11, 40)));

        let mut linked = PlaybackSession::new(Seed::Capture(CaptureId::new(12)), config());
        let events = linked.start();
        let after = only_request(&events, Direction::After);
        linked.complete_fetch(FetchCompletion::succeeded(&after, page(&[12, 13], true)));
        assert_eq!(linked.view().position(), Some((1, 2)));
    }
}
