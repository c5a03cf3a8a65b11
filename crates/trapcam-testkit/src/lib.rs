// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use time::{Date, Duration, Month, OffsetDateTime, Time};
use trapcam_app::{
    BoundingBox, Capture, CaptureId, Detection, DetectionId, Direction, FetchCompletion,
    MemorySource, OccurrenceId, Page, PageRequest, PageSource, PlaybackCommand, PlaybackEvent,
    PlaybackSession,
};

const SPECIES: [&str; 16] = [
    "Actias luna",
    "Antheraea polyphemus",
    "Automeris io",
    "Catocala ultronia",
    "Ceratomia catalpae",
    "Citheronia regalis",
    "Dryocampa rubicunda",
    "Haploa clymene",
    "Halysidota tessellaris",
    "Hyalophora cecropia",
    "Hypoprepia fucosa",
    "Lophocampa caryae",
    "Malacosoma americana",
    "Paonias excaecata",
    "Pyrrharctia isabella",
    "Spilosoma virginica",
];

const FRAME_WIDTH: u32 = 4096;
const FRAME_HEIGHT: u32 = 2160;
const REFERENCE_YEAR: i32 = 2024;

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1_u64 << 53) as f64
    }
}

/// Deterministic captures from a single trap night.
#[derive(Debug, Clone)]
pub struct CaptureFaker {
    rng: DeterministicRng,
    seed: u64,
    next_capture: i64,
    next_detection: i64,
    clock: OffsetDateTime,
}

impl CaptureFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
            seed: normalized,
            next_capture: 1,
            next_detection: 1,
            clock: reference_night(),
        }
    }

    pub const fn seed(&self) -> u64 {
        self.seed
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    /// Next capture in sequence: ids count up and timestamps move forward by
    /// ten seconds to three minutes.
    pub fn capture(&mut self) -> Capture {
        let id = CaptureId::new(self.next_capture);
        self.next_capture += 1;
        self.clock += Duration::seconds(10 + self.rng.int_n(171) as i64);

        let count = self.rng.int_n(6);
        let detections = (0..count).map(|_| self.detection()).collect::<Vec<_>>();
        Capture {
            id,
            timestamp: self.clock,
            url: format!("https://captures.example.org/night/{:06}.jpg", id.get()),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            detections_count: detections.len() as u32,
            detections,
        }
    }

    pub fn captures(&mut self, count: usize) -> Vec<Capture> {
        (0..count).map(|_| self.capture()).collect()
    }

    pub fn detection(&mut self) -> Detection {
        let id = DetectionId::new(self.next_detection);
        self.next_detection += 1;

        let x1 = self.rng.int_n((FRAME_WIDTH - 200) as usize) as f64;
        let y1 = self.rng.int_n((FRAME_HEIGHT - 200) as usize) as f64;
        let bbox = BoundingBox {
            x1,
            y1,
            x2: x1 + 40.0 + self.rng.int_n(160) as f64,
            y2: y1 + 40.0 + self.rng.int_n(160) as f64,
        };
        let score = (self.rng.unit() * 100.0).round() / 100.0;
        let determined = self.rng.int_n(4) != 0;
        let species = SPECIES[self.rng.int_n(SPECIES.len())];
        let label = if determined {
            Detection::label_for(id, Some(species), Some(score))
        } else {
            Detection::label_for(id, None, None)
        };
        Detection {
            id,
            bbox: Some(bbox),
            score,
            label,
            occurrence_id: determined.then(|| OccurrenceId::new(id.get() * 10)),
        }
    }
}

pub fn reference_night() -> OffsetDateTime {
    evening_utc(REFERENCE_YEAR, Month::June, 14)
}

pub fn species() -> &'static [&'static str] {
    &SPECIES
}

fn evening_utc(year: i32, month: Month, day: u8) -> OffsetDateTime {
    let date = Date::from_calendar_date(year, month, day).unwrap_or(Date::MIN);
    date.with_time(Time::from_hms(21, 0, 0).unwrap_or(Time::MIDNIGHT))
        .assume_utc()
}

/// A [`MemorySource`] that records every request and can be told to fail.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    inner: MemorySource,
    calls: AtomicUsize,
    requests: Mutex<Vec<PageRequest>>,
    failures: Mutex<VecDeque<(Direction, String)>>,
}

impl ScriptedSource {
    pub fn new(captures: Vec<Capture>) -> Self {
        Self::from_memory(MemorySource::new(captures))
    }

    pub fn from_memory(inner: MemorySource) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn captures(&self) -> &[Capture] {
        self.inner.captures()
    }

    /// The next `times` fetches in `direction` fail with `cause`.
    pub fn fail_next(&self, direction: Direction, times: usize, cause: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..times {
            failures.push_back((direction, cause.to_owned()));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PageSource for ScriptedSource {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let failure = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let position = failures
                .iter()
                .position(|(direction, _)| *direction == request.direction);
            position.and_then(|index| failures.remove(index))
        };
        if let Some((_, cause)) = failure {
            bail!(cause);
        }
        self.inner.fetch_page(request)
    }
}

/// Runs a session's fetches inline, in issue order. Retry delays are not
/// slept. Requests can be pulled off the queue and completed by hand to
/// simulate reordering.
#[derive(Debug)]
pub struct SyncDriver<S> {
    source: S,
    pending: VecDeque<PageRequest>,
    log: Vec<PlaybackEvent>,
}

impl<S: PageSource> SyncDriver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            pending: VecDeque::new(),
            log: Vec::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Every event seen so far, in order.
    pub fn log(&self) -> &[PlaybackEvent] {
        &self.log
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn start(&mut self, session: &mut PlaybackSession) -> Vec<PlaybackEvent> {
        let events = session.start();
        self.absorb(events)
    }

    pub fn dispatch(
        &mut self,
        session: &mut PlaybackSession,
        command: PlaybackCommand,
    ) -> Vec<PlaybackEvent> {
        let events = session.dispatch(command);
        self.absorb(events)
    }

    /// Queues any fetch the events ask for and returns them unchanged.
    pub fn absorb(&mut self, events: Vec<PlaybackEvent>) -> Vec<PlaybackEvent> {
        for event in &events {
            match event {
                PlaybackEvent::FetchIssued(request)
                | PlaybackEvent::FetchRetryScheduled { request, .. } => {
                    self.pending.push_back(request.clone());
                }
                _ => {}
            }
        }
        self.log.extend(events.iter().cloned());
        events
    }

    /// Removes the oldest queued request in `direction` without running it.
    pub fn take(&mut self, direction: Direction) -> Option<PageRequest> {
        let index = self
            .pending
            .iter()
            .position(|request| request.direction == direction)?;
        self.pending.remove(index)
    }

    /// Runs `request` against the source and feeds the result back.
    pub fn complete(
        &mut self,
        session: &mut PlaybackSession,
        request: &PageRequest,
    ) -> Vec<PlaybackEvent> {
        let completion = match self.source.fetch_page(request) {
            Ok(page) => FetchCompletion::succeeded(request, page),
            Err(error) => FetchCompletion::failed(request, format!("{error:#}")),
        };
        let events = session.complete_fetch(completion);
        self.absorb(events)
    }

    pub fn run_one(&mut self, session: &mut PlaybackSession) -> Option<Vec<PlaybackEvent>> {
        let request = self.pending.pop_front()?;
        Some(self.complete(session, &request))
    }

    pub fn run_until_idle(&mut self, session: &mut PlaybackSession) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Some(batch) = self.run_one(session) {
            events.extend(batch);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::{CaptureFaker, ScriptedSource, SyncDriver, reference_night, species};
    use anyhow::Result;
    use trapcam_app::{
        Anchor, CaptureId, Direction, EngineConfig, FetchToken, PageRequest, PageSource,
        PlaybackSession, Seed,
    };

    #[test]
    fn new_deterministic_seed() {
        let mut left = CaptureFaker::new(42);
        let mut right = CaptureFaker::new(42);
        assert_eq!(left.captures(5), right.captures(5));
    }

    #[test]
    fn zero_seed_is_normalized() {
        assert_eq!(CaptureFaker::new(0).seed(), 1);
    }

    #[test]
    fn captures_move_forward_through_the_night() {
        let mut faker = CaptureFaker::new(7);
        let captures = faker.captures(40);

        assert!(captures[0].timestamp > reference_night());
        for pair in captures.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
            assert_eq!(pair[1].id.get(), pair[0].id.get() + 1);
        }
        for capture in &captures {
            assert_eq!(capture.detections_count as usize, capture.detections.len());
            assert!(capture.detections.len() <= 5);
        }
    }

    #[test]
    fn detections_have_boxes_scores_and_labels() {
        let mut faker = CaptureFaker::new(3);
        for _ in 0..50 {
            let detection = faker.detection();
            assert!((0.0..=1.0).contains(&detection.score));
            let bbox = detection.bbox.expect("faked detections carry a box");
            assert!(bbox.width() >= 40.0);
            assert!(bbox.height() >= 40.0);
            match detection.occurrence_id {
                Some(_) => assert!(species().iter().any(|name| detection.label.starts_with(name))),
                None => assert_eq!(detection.label, detection.id.to_string()),
            }
        }
    }

    #[test]
    fn scripted_source_counts_and_fails_on_request() -> Result<()> {
        let source = ScriptedSource::new(CaptureFaker::new(1).captures(5));
        source.fail_next(Direction::After, 1, "gateway timeout");
        let request = PageRequest {
            token: FetchToken::new(1),
            direction: Direction::After,
            anchor: Anchor::Offset(0),
            page_size: 2,
            attempt: 1,
        };

        let error = source
            .fetch_page(&request)
            .expect_err("first call is scripted to fail");
        assert_eq!(error.to_string(), "gateway timeout");

        let page = source.fetch_page(&request)?;
        assert_eq!(page.captures.len(), 2);
        assert_eq!(source.calls(), 2);
        assert_eq!(source.requests().len(), 2);
        Ok(())
    }

    #[test]
    fn driver_loads_initial_pages() {
        let source = ScriptedSource::new(CaptureFaker::new(9).captures(12));
        let mut driver = SyncDriver::new(&source);
        let mut session = PlaybackSession::new(Seed::Offset(4), EngineConfig {
            page_size: 3,
            ..EngineConfig::default()
        });

        driver.start(&mut session);
        driver.run_until_idle(&mut session);

        assert_eq!(driver.pending(), 0);
        assert_eq!(source.calls(), 2);
        assert_eq!(session.window().len(), 6);
        assert_eq!(session.cursor().active_id(), Some(CaptureId::new(5)));
        assert!(!driver.log().is_empty());
    }
}
