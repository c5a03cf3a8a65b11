// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{Capture, CaptureId, Direction, PlaybackError, Seed};

/// The contiguous run of captures loaded so far.
///
/// Positions are tracked as slots: prepends take decreasing slot numbers,
/// appends increasing ones, so a capture's index is its slot minus the front
/// slot and never needs a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    seed: Seed,
    captures: VecDeque<Capture>,
    slots: HashMap<CaptureId, i64>,
    front_slot: i64,
    has_previous: bool,
    has_next: bool,
    first_offset: Option<u64>,
    reported_total: Option<u64>,
}

impl Window {
    fn empty(seed: Seed) -> Self {
        let (has_previous, first_offset) = match seed {
            Seed::Offset(offset) => (offset > 0, Some(offset)),
            Seed::Capture(_) => (true, None),
        };
        Self {
            seed,
            captures: VecDeque::new(),
            slots: HashMap::new(),
            front_slot: 0,
            has_previous,
            has_next: true,
            first_offset,
            reported_total: None,
        }
    }

    pub const fn seed(&self) -> Seed {
        self.seed
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    pub const fn has_previous(&self) -> bool {
        self.has_previous
    }

    pub const fn has_next(&self) -> bool {
        self.has_next
    }

    pub const fn has_more(&self, direction: Direction) -> bool {
        match direction {
            Direction::Before => self.has_previous,
            Direction::After => self.has_next,
        }
    }

    /// Absolute offset of the first loaded capture, known when the session
    /// was seeded by offset.
    pub const fn first_offset(&self) -> Option<u64> {
        self.first_offset
    }

    /// Size of the whole sequence as last reported by the data source.
    pub const fn reported_total(&self) -> Option<u64> {
        self.reported_total
    }

    pub fn get(&self, index: usize) -> Option<&Capture> {
        self.captures.get(index)
    }

    pub fn first(&self) -> Option<&Capture> {
        self.captures.front()
    }

    pub fn last(&self) -> Option<&Capture> {
        self.captures.back()
    }

    /// The capture at the given edge.
    pub fn edge(&self, direction: Direction) -> Option<&Capture> {
        match direction {
            Direction::Before => self.first(),
            Direction::After => self.last(),
        }
    }

    pub fn contains(&self, id: CaptureId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn position(&self, id: CaptureId) -> Option<usize> {
        self.slots
            .get(&id)
            .map(|slot| (slot - self.front_slot) as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capture> {
        self.captures.iter()
    }

    pub fn ids(&self) -> Vec<CaptureId> {
        self.captures.iter().map(|capture| capture.id).collect()
    }

    /// Largest detection count among loaded captures, at least 1 so it can
    /// be used as a divisor.
    pub fn max_detections(&self) -> u32 {
        self.captures
            .iter()
            .map(|capture| capture.detections_count)
            .max()
            .unwrap_or(0)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub direction: Direction,
    pub added: usize,
    pub has_more: bool,
}

/// Sole owner and mutator of the [`Window`]. Pure data: no I/O, never blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStore {
    window: Window,
}

impl WindowStore {
    pub fn new(seed: Seed) -> Self {
        Self {
            window: Window::empty(seed),
        }
    }

    /// Drops every loaded capture and re-anchors at `seed`. Does not fetch.
    pub fn initialize(&mut self, seed: Seed) {
        self.window = Window::empty(seed);
    }

    pub fn get(&self) -> &Window {
        &self.window
    }

    /// Owned copy for readers that outlive the next merge.
    pub fn snapshot(&self) -> Window {
        self.window.clone()
    }

    /// Prepends (`Before`) or appends (`After`) a page. Any id already in the
    /// window, or repeated inside the page, rejects the whole merge and
    /// leaves the window untouched.
    pub fn merge(
        &mut self,
        direction: Direction,
        captures: Vec<Capture>,
        has_more: bool,
    ) -> Result<MergeSummary, PlaybackError> {
        let mut incoming = HashSet::with_capacity(captures.len());
        for capture in &captures {
            if self.window.contains(capture.id) || !incoming.insert(capture.id) {
                return Err(PlaybackError::DuplicateItem {
                    id: capture.id,
                    direction,
                });
            }
        }

        let added = captures.len();
        let window = &mut self.window;
        match direction {
            Direction::Before => {
                for capture in captures.into_iter().rev() {
                    window.front_slot -= 1;
                    window.slots.insert(capture.id, window.front_slot);
                    window.captures.push_front(capture);
                }
                window.has_previous = has_more;
                window.first_offset = window
                    .first_offset
                    .map(|offset| offset.saturating_sub(added as u64));
            }
            Direction::After => {
                let mut slot = window.front_slot + window.captures.len() as i64;
                for capture in captures {
                    window.slots.insert(capture.id, slot);
                    window.captures.push_back(capture);
                    slot += 1;
                }
                window.has_next = has_more;
            }
        }

        Ok(MergeSummary {
            direction,
            added,
            has_more,
        })
    }

    /// Stores the reported sequence size. Once the window holds the tail of
    /// the sequence its first offset is re-based on that size, which also
    /// corrects an offset seed that pointed past the end.
    pub fn record_total(&mut self, total: Option<u64>) {
        let Some(total) = total else {
            return;
        };
        let window = &mut self.window;
        window.reported_total = Some(total);
        if !window.has_next && window.first_offset.is_some() {
            window.first_offset = Some(total.saturating_sub(window.captures.len() as u64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WindowStore;
    use crate::{Capture, CaptureId, Direction, PlaybackError, Seed};
    use time::OffsetDateTime;

    fn capture(id: i64) -> Capture {
        Capture {
            id: CaptureId::new(id),
            timestamp: OffsetDateTime::UNIX_EPOCH + time::Duration::minutes(id),
            url: format!("https://example.test/captures/{id}.jpg"),
            width: 640,
            height: 480,
            detections_count: 0,
            detections: Vec::new(),
        }
    }

    fn captures(ids: std::ops::RangeInclusive<i64>) -> Vec<Capture> {
        ids.map(capture).collect()
    }

    #[test]
    fn empty_window_flags_follow_seed() {
        let at_start = WindowStore::new(Seed::Offset(0));
        assert!(!at_start.get().has_previous());
        assert!(at_start.get().has_next());
        assert!(at_start.get().is_empty());

        let mid = WindowStore::new(Seed::Offset(40));
        assert!(mid.get().has_previous());
        assert_eq!(mid.get().first_offset(), Some(40));

        let linked = WindowStore::new(Seed::Capture(CaptureId::new(7)));
        assert!(linked.get().has_previous());
        assert_eq!(linked.get().first_offset(), None);
    }

    #[test]
    fn merges_keep_order_and_positions() -> Result<(), PlaybackError> {
        let mut store = WindowStore::new(Seed::Offset(10));
        store.merge(Direction::After, captures(10..=12), true)?;
        store.merge(Direction::Before, captures(7..=9), true)?;
        store.merge(Direction::After, captures(13..=14), false)?;
        store.merge(Direction::Before, captures(5..=6), false)?;

        let window = store.get();
        let ids = window.ids().iter().map(|id| id.get()).collect::<Vec<_>>();
        assert_eq!(ids, (5..=14).collect::<Vec<_>>());
        for (index, capture) in window.iter().enumerate() {
            assert_eq!(window.position(capture.id), Some(index));
        }
        assert!(!window.has_previous());
        assert!(!window.has_next());
        assert_eq!(window.first_offset(), Some(5));
        Ok(())
    }

    #[test]
    fn overlapping_merge_is_rejected_without_mutation() -> Result<(), PlaybackError> {
        let mut store = WindowStore::new(Seed::Offset(0));
        store.merge(Direction::After, captures(1..=3), true)?;
        let before = store.clone();

        let error = store
            .merge(Direction::After, captures(3..=5), false)
            .expect_err("overlap should be rejected");
        assert_eq!(
            error,
            PlaybackError::DuplicateItem {
                id: CaptureId::new(3),
                direction: Direction::After,
            }
        );
        assert_eq!(store, before);
        assert!(store.get().has_next());
        Ok(())
    }

    #[test]
    fn page_with_repeated_id_is_rejected() {
        let mut store = WindowStore::new(Seed::Offset(0));
        let error = store
            .merge(Direction::After, vec![capture(1), capture(1)], false)
            .expect_err("repeated id inside a page");
        assert!(matches!(error, PlaybackError::DuplicateItem { .. }));
        assert!(store.get().is_empty());
    }

    #[test]
    fn empty_page_only_updates_flag() -> Result<(), PlaybackError> {
        let mut store = WindowStore::new(Seed::Offset(3));
        let summary = store.merge(Direction::Before, Vec::new(), false)?;
        assert_eq!(summary.added, 0);
        assert!(!store.get().has_previous());
        assert!(store.get().is_empty());
        Ok(())
    }

    #[test]
    fn initialize_discards_loaded_captures() -> Result<(), PlaybackError> {
        let mut store = WindowStore::new(Seed::Offset(0));
        store.merge(Direction::After, captures(1..=4), false)?;
        store.record_total(Some(4));

        store.initialize(Seed::Capture(CaptureId::new(2)));
        let window = store.get();
        assert!(window.is_empty());
        assert!(!window.contains(CaptureId::new(2)));
        assert_eq!(window.reported_total(), None);
        assert_eq!(window.seed(), Seed::Capture(CaptureId::new(2)));
        Ok(())
    }

    #[test]
    fn tail_of_sequence_rebases_first_offset_on_total() -> Result<(), PlaybackError> {
        let mut store = WindowStore::new(Seed::Offset(100));
        store.merge(Direction::Before, captures(8..=10), true)?;
        store.record_total(Some(10));
        assert_eq!(store.get().first_offset(), Some(97));

        store.merge(Direction::After, Vec::new(), false)?;
        store.record_total(Some(10));
        assert_eq!(store.get().first_offset(), Some(7));

        let mut linked = WindowStore::new(Seed::Capture(CaptureId::new(9)));
        linked.merge(Direction::After, captures(9..=10), false)?;
        linked.record_total(Some(10));
        assert_eq!(linked.get().first_offset(), None);
        Ok(())
    }

    #[test]
    fn max_detections_is_never_zero() -> Result<(), PlaybackError> {
        let mut store = WindowStore::new(Seed::Offset(0));
        assert_eq!(store.get().max_detections(), 1);

        let mut busy = capture(1);
        busy.detections_count = 12;
        store.merge(Direction::After, vec![busy, capture(2)], false)?;
        assert_eq!(store.get().max_detections(), 12);
        Ok(())
    }
}
