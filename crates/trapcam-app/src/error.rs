// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use thiserror::Error;

use crate::{CaptureId, Direction, StepDirection};

/// Conditions the playback engine surfaces to its caller. None of them end
/// the session; the window stays readable after any one of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// An overlapping page was offered to the window. The merge is refused
    /// as a whole.
    #[error("capture {id} is already in the window; overlapping {direction} page rejected")]
    DuplicateItem { id: CaptureId, direction: Direction },

    /// Retries are exhausted for one direction. Loaded captures stay usable
    /// and the same anchor is reused on the next attempt.
    #[error("loading captures {direction} failed: {cause}")]
    FetchFailed { direction: Direction, cause: String },

    /// A requested capture never showed up and there is nothing left to load.
    #[error("capture {target} is not part of this session")]
    UnresolvableCursor { target: CaptureId },

    /// Informational: a step hit the true end of the data.
    #[error("no {direction} capture")]
    AtBoundary { direction: StepDirection },
}

impl PlaybackError {
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }
}
