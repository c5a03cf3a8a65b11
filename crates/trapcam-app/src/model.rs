// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::ids::*;

/// Which edge of the window a fetch extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Before,
    After,
}

impl Direction {
    pub const ALL: [Self; 2] = [Self::Before, Self::After];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single user step through the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepDirection {
    Previous,
    Next,
}

impl StepDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Previous => "previous",
            Self::Next => "next",
        }
    }

    pub const fn fetch_direction(self) -> Direction {
        match self {
            Self::Previous => Direction::Before,
            Self::Next => Direction::After,
        }
    }
}

impl fmt::Display for StepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Accepts the `[x1, y1, x2, y2]` layout used by the capture API.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [x1, y1, x2, y2] => Some(Self {
                x1: *x1,
                y1: *y1,
                x2: *x2,
                y2: *y2,
            }),
            _ => None,
        }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub bbox: Option<BoundingBox>,
    pub score: f64,
    pub label: String,
    pub occurrence_id: Option<OccurrenceId>,
}

impl Detection {
    /// Determination name with its rounded score, the bare name when the
    /// determination carries no score, or the detection id when nothing has
    /// been determined yet.
    pub fn label_for(
        id: DetectionId,
        determination: Option<&str>,
        determination_score: Option<f64>,
    ) -> String {
        match (determination, determination_score) {
            (Some(name), Some(score)) if score > 0.0 => {
                format!("{name} ({}%)", (score * 100.0).round() as i64)
            }
            (Some(name), _) => name.to_owned(),
            (None, _) => id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: CaptureId,
    pub timestamp: OffsetDateTime,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub detections_count: u32,
    pub detections: Vec<Detection>,
}

impl Capture {
    pub fn time_label(&self) -> String {
        self.timestamp
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default()
    }

    pub fn date_time_label(&self) -> String {
        self.timestamp
            .format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .unwrap_or_default()
    }
}

/// Where a viewing session starts. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seed {
    /// Start near the Nth capture of the sequence.
    Offset(u64),
    /// Deep link into a specific capture.
    Capture(CaptureId),
}

/// Position a page is requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anchor {
    /// Absolute position. `After` pages start at it, `Before` pages end just
    /// before it.
    Offset(u64),
    /// A capture already at the window edge; the page excludes it.
    Beyond(CaptureId),
    /// A deep-link target; an `After` page starts with it.
    Starting(CaptureId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub token: FetchToken,
    pub direction: Direction,
    pub anchor: Anchor,
    pub page_size: usize,
    /// 1 for the first try, incremented on each retry of the same request.
    pub attempt: u32,
}

/// Captures are always in canonical (ascending) order, whichever direction
/// was requested. `has_more` reports whether data exists past this page in
/// the requested direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub captures: Vec<Capture>,
    pub has_more: bool,
    pub total: Option<u64>,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            captures: Vec::new(),
            has_more: false,
            total: None,
        }
    }
}

/// Result of running a [`PageRequest`], posted back into the event loop.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCompletion {
    pub token: FetchToken,
    pub direction: Direction,
    pub outcome: Result<Page, String>,
}

impl FetchCompletion {
    pub fn succeeded(request: &PageRequest, page: Page) -> Self {
        Self {
            token: request.token,
            direction: request.direction,
            outcome: Ok(page),
        }
    }

    pub fn failed(request: &PageRequest, cause: impl Into<String>) -> Self {
        Self {
            token: request.token,
            direction: request.direction,
            outcome: Err(cause.into()),
        }
    }
}
