// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::VecDeque;

use crate::{CaptureId, Direction, Seed, StepDirection, Window};

pub const DEFAULT_PREFETCH_PROXIMITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Unset,
    Resolved { id: CaptureId, index: usize },
    /// Waiting for a capture that is not loaded yet.
    Pending { target: CaptureId },
}

impl Cursor {
    pub const fn active_id(&self) -> Option<CaptureId> {
        match self {
            Self::Resolved { id, .. } => Some(*id),
            Self::Unset | Self::Pending { .. } => None,
        }
    }

    pub const fn current_index(&self) -> Option<usize> {
        match self {
            Self::Resolved { index, .. } => Some(*index),
            Self::Unset | Self::Pending { .. } => None,
        }
    }

    pub const fn pending_target(&self) -> Option<CaptureId> {
        match self {
            Self::Pending { target } => Some(*target),
            Self::Unset | Self::Resolved { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorIntent {
    Step(StepDirection),
    Select(CaptureId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorEffect {
    ActiveChanged {
        id: CaptureId,
        index: usize,
        total_known: usize,
    },
    Pending {
        target: CaptureId,
    },
    Unresolvable {
        target: CaptureId,
    },
    AtBoundary(StepDirection),
    /// Queued behind data that has not arrived yet.
    Deferred(CursorIntent),
    /// A queued step needs this edge loaded before it can apply.
    Extend(Direction),
    /// The cursor is close to an edge that has more data.
    Prefetch(Direction),
}

enum Applied {
    Done(Option<CursorEffect>),
    Blocked(Direction),
}

/// Owns the active capture and the queue of user intents.
///
/// Intents are applied strictly in arrival order. A step that runs off a
/// loaded edge with more data behind it blocks the queue until the window
/// grows; everything queued behind it waits too, so a later intent is never
/// shown before an earlier one.
#[derive(Debug, Clone)]
pub struct CursorController {
    cursor: Cursor,
    queue: VecDeque<CursorIntent>,
    blocked_on: Option<Direction>,
    proximity: usize,
    seed_offset: Option<u64>,
    unresolvable_reported: bool,
}

impl CursorController {
    pub fn new(seed: Seed, proximity: usize) -> Self {
        let mut controller = Self {
            cursor: Cursor::Unset,
            queue: VecDeque::new(),
            blocked_on: None,
            proximity,
            seed_offset: None,
            unresolvable_reported: false,
        };
        controller.reset(seed);
        controller
    }

    /// Offset seeds leave the cursor unset until the capture at that offset
    /// loads; capture seeds start pending on the linked capture.
    pub fn reset(&mut self, seed: Seed) {
        self.queue.clear();
        self.blocked_on = None;
        self.unresolvable_reported = false;
        match seed {
            Seed::Offset(offset) => {
                self.cursor = Cursor::Unset;
                self.seed_offset = Some(offset);
            }
            Seed::Capture(target) => {
                self.cursor = Cursor::Pending { target };
                self.seed_offset = None;
            }
        }
    }

    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub const fn blocked_on(&self) -> Option<Direction> {
        self.blocked_on
    }

    pub fn set_active(&mut self, id: CaptureId, window: &Window) -> Vec<CursorEffect> {
        self.enqueue(CursorIntent::Select(id), window)
    }

    pub fn step(&mut self, direction: StepDirection, window: &Window) -> Vec<CursorEffect> {
        self.enqueue(CursorIntent::Step(direction), window)
    }

    /// Re-resolves the cursor after a merge, then resumes queued intents.
    pub fn on_window_changed(&mut self, window: &Window) -> Vec<CursorEffect> {
        let mut effects = Vec::new();
        self.resolve_against(window, &mut effects);
        self.drain(window, &mut effects);
        effects
    }

    /// Drops every queued intent when the edge they wait on failed for good.
    /// Returns how many were dropped.
    pub fn abandon_blocked(&mut self, direction: Direction) -> usize {
        if self.blocked_on != Some(direction) {
            return 0;
        }
        self.blocked_on = None;
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    fn enqueue(&mut self, intent: CursorIntent, window: &Window) -> Vec<CursorEffect> {
        self.queue.push_back(intent);
        let mut effects = Vec::new();
        self.drain(window, &mut effects);
        if !self.queue.is_empty() {
            effects.push(CursorEffect::Deferred(intent));
        }
        effects
    }

    fn drain(&mut self, window: &Window, effects: &mut Vec<CursorEffect>) {
        while let Some(intent) = self.queue.front().copied() {
            match self.apply(intent, window) {
                Applied::Done(effect) => {
                    self.queue.pop_front();
                    self.blocked_on = None;
                    effects.extend(effect);
                }
                Applied::Blocked(direction) => {
                    self.blocked_on = Some(direction);
                    effects.push(CursorEffect::Extend(direction));
                    break;
                }
            }
        }

        if let Some(target) = self.cursor.pending_target()
            && !window.has_previous()
            && !window.has_next()
            && !self.unresolvable_reported
        {
            self.unresolvable_reported = true;
            effects.push(CursorEffect::Unresolvable { target });
        }

        self.prefetch(window, effects);
    }

    fn apply(&mut self, intent: CursorIntent, window: &Window) -> Applied {
        match intent {
            CursorIntent::Select(id) => Applied::Done(Some(self.select(id, window))),
            CursorIntent::Step(direction) => {
                let Cursor::Resolved { index, .. } = self.cursor else {
                    return Applied::Done(Some(CursorEffect::AtBoundary(direction)));
                };
                let target = match direction {
                    StepDirection::Previous => index.checked_sub(1),
                    StepDirection::Next => Some(index + 1).filter(|next| *next < window.len()),
                };
                match target.and_then(|target| window.get(target).map(|c| (c.id, target))) {
                    Some((id, target)) => Applied::Done(Some(self.resolve(id, target, window))),
                    None if window.has_more(direction.fetch_direction()) => {
                        Applied::Blocked(direction.fetch_direction())
                    }
                    None => Applied::Done(Some(CursorEffect::AtBoundary(direction))),
                }
            }
        }
    }

    fn select(&mut self, id: CaptureId, window: &Window) -> CursorEffect {
        self.seed_offset = None;
        match window.position(id) {
            Some(index) => self.resolve(id, index, window),
            None => {
                self.cursor = Cursor::Pending { target: id };
                self.unresolvable_reported = false;
                CursorEffect::Pending { target: id }
            }
        }
    }

    fn resolve(&mut self, id: CaptureId, index: usize, window: &Window) -> CursorEffect {
        self.cursor = Cursor::Resolved { id, index };
        self.seed_offset = None;
        self.unresolvable_reported = false;
        CursorEffect::ActiveChanged {
            id,
            index,
            total_known: window.len(),
        }
    }

    fn resolve_against(&mut self, window: &Window, effects: &mut Vec<CursorEffect>) {
        match self.cursor {
            Cursor::Resolved { id, index } => {
                if let Some(current) = window.position(id)
                    && current != index
                {
                    effects.push(self.resolve(id, current, window));
                }
            }
            Cursor::Pending { target } => {
                if let Some(index) = window.position(target) {
                    effects.push(self.resolve(target, index, window));
                }
            }
            Cursor::Unset => {
                if let Some(index) = self.seed_index(window)
                    && let Some(capture) = window.get(index)
                {
                    effects.push(self.resolve(capture.id, index, window));
                }
            }
        }
    }

    /// Index of the seed offset inside the window, falling back to the last
    /// capture when the offset lies past the end of the data.
    fn seed_index(&self, window: &Window) -> Option<usize> {
        let offset = self.seed_offset?;
        let first = window.first_offset()?;
        let index = usize::try_from(offset.checked_sub(first)?).ok()?;
        if index < window.len() {
            Some(index)
        } else if !window.has_next() && !window.is_empty() {
            Some(window.len() - 1)
        } else {
            None
        }
    }

    fn prefetch(&self, window: &Window, effects: &mut Vec<CursorEffect>) {
        let Cursor::Resolved { index, .. } = self.cursor else {
            return;
        };
        let to_end = window.len().saturating_sub(index + 1);
        if index < self.proximity && window.has_previous() {
            effects.push(CursorEffect::Prefetch(Direction::Before));
        }
        if to_end < self.proximity && window.has_next() {
            effects.push(CursorEffect::Prefetch(Direction::After));
        }
    }
}
