// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{Capture, Detection};

pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.6;
pub const THRESHOLD_STEP: f64 = 0.05;

/// Minimum detection score shown for a capture. Has no effect on which
/// captures are loaded or selected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterProjection {
    threshold: f64,
}

impl Default for FilterProjection {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

impl FilterProjection {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: clamp_threshold(threshold),
        }
    }

    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) -> f64 {
        self.threshold = clamp_threshold(threshold);
        self.threshold
    }

    pub fn nudge(&mut self, delta: f64) -> f64 {
        // Round to the slider granularity so repeated nudges don't drift.
        let next = ((self.threshold + delta) / THRESHOLD_STEP).round() * THRESHOLD_STEP;
        self.set_threshold(next)
    }

    pub fn is_visible(&self, detection: &Detection) -> bool {
        detection.score >= self.threshold
    }

    pub fn visible<'a>(&self, capture: &'a Capture) -> impl Iterator<Item = &'a Detection> {
        let filter = *self;
        capture
            .detections
            .iter()
            .filter(move |detection| filter.is_visible(detection))
    }

    pub fn visible_count(&self, capture: &Capture) -> usize {
        self.visible(capture).count()
    }

    pub fn label(&self) -> String {
        format!("{:.2}", self.threshold)
    }
}

fn clamp_threshold(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_SCORE_THRESHOLD;
    }
    value.clamp(0.0, 1.0)
}
