// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use std::thread;
use std::time::Duration;

use crate::{Anchor, Capture, Direction, Page, PageRequest};

/// The data-source collaborator: runs one page request against wherever the
/// captures live. Transport concerns (auth, timeouts) belong to implementors.
pub trait PageSource {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page>;
}

impl<T: PageSource + ?Sized> PageSource for &T {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        (**self).fetch_page(request)
    }
}

impl<T: PageSource + ?Sized> PageSource for std::sync::Arc<T> {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        (**self).fetch_page(request)
    }
}

/// An ordered sequence held in memory. Backs demo mode and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    captures: Vec<Capture>,
    latency: Duration,
}

impl MemorySource {
    /// Captures are sorted by timestamp, then id, to establish the canonical
    /// order.
    pub fn new(mut captures: Vec<Capture>) -> Self {
        captures.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Self {
            captures,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Half-open range of the page, or `None` when an anchor capture is
    /// unknown.
    fn page_bounds(&self, request: &PageRequest) -> Option<(usize, usize)> {
        let len = self.captures.len();
        let position = |id| self.captures.iter().position(|capture| capture.id == id);
        let pivot = match request.anchor {
            Anchor::Offset(offset) => usize::try_from(offset).unwrap_or(usize::MAX).min(len),
            Anchor::Beyond(id) => match request.direction {
                Direction::Before => position(id)?,
                Direction::After => position(id)? + 1,
            },
            Anchor::Starting(id) => position(id)?,
        };
        let bounds = match request.direction {
            Direction::Before => (pivot.saturating_sub(request.page_size), pivot),
            Direction::After => (pivot, pivot.saturating_add(request.page_size).min(len)),
        };
        Some(bounds)
    }
}

impl PageSource for MemorySource {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let Some((start, end)) = self.page_bounds(request) else {
            return Ok(Page {
                total: Some(self.captures.len() as u64),
                ..Page::empty()
            });
        };
        let has_more = match request.direction {
            Direction::Before => start > 0,
            Direction::After => end < self.captures.len(),
        };
        Ok(Page {
            captures: self.captures[start..end].to_vec(),
            has_more,
            total: Some(self.captures.len() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MemorySource, PageSource};
    use crate::{Anchor, Capture, CaptureId, Direction, FetchToken, PageRequest};
    use anyhow::Result;
    use time::OffsetDateTime;

    fn source(count: i64) -> MemorySource {
        MemorySource::new(
            (1..=count)
                .rev()
                .map(|id| Capture {
                    id: CaptureId::new(id),
                    timestamp: OffsetDateTime::UNIX_EPOCH + time::Duration::minutes(id),
                    url: String::new(),
                    width: 1,
                    height: 1,
                    detections_count: 0,
                    detections: Vec::new(),
                })
                .collect(),
        )
    }

    fn request(direction: Direction, anchor: Anchor, page_size: usize) -> PageRequest {
        PageRequest {
            token: FetchToken::new(1),
            direction,
            anchor,
            page_size,
            attempt: 1,
        }
    }

    fn ids(source: &MemorySource, request: &PageRequest) -> Result<(Vec<i64>, bool)> {
        let page = source.fetch_page(request)?;
        Ok((
            page.captures.iter().map(|capture| capture.id.get()).collect(),
            page.has_more,
        ))
    }

    #[test]
    fn new_sorts_into_canonical_order() {
        let source = source(3);
        let order = source
            .captures()
            .iter()
            .map(|capture| capture.id.get())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn offset_anchor_splits_before_and_after() -> Result<()> {
        let source = source(10);
        assert_eq!(
            ids(&source, &request(Direction::After, Anchor::Offset(4), 3))?,
            (vec![5, 6, 7], true)
        );
        assert_eq!(
            ids(&source, &request(Direction::Before, Anchor::Offset(4), 3))?,
            (vec![2, 3, 4], true)
        );
        assert_eq!(
            ids(&source, &request(Direction::Before, Anchor::Offset(2), 3))?,
            (vec![1, 2], false)
        );
        assert_eq!(
            ids(&source, &request(Direction::After, Anchor::Offset(8), 3))?,
            (vec![9, 10], false)
        );
        Ok(())
    }

    #[test]
    fn item_anchors_exclude_or_include_the_anchor() -> Result<()> {
        let source = source(10);
        let anchor = CaptureId::new(5);
        assert_eq!(
            ids(&source, &request(Direction::After, Anchor::Beyond(anchor), 2))?,
            (vec![6, 7], true)
        );
        assert_eq!(
            ids(&source, &request(Direction::Before, Anchor::Beyond(anchor), 2))?,
            (vec![3, 4], true)
        );
        assert_eq!(
            ids(&source, &request(Direction::After, Anchor::Starting(anchor), 2))?,
            (vec![5, 6], true)
        );
        Ok(())
    }

    #[test]
    fn unknown_anchor_returns_exhausted_empty_page() -> Result<()> {
        let source = source(3);
        let page = source.fetch_page(&request(
            Direction::After,
            Anchor::Starting(CaptureId::new(404)),
            5,
        ))?;
        assert!(page.captures.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total, Some(3));
        Ok(())
    }
}
