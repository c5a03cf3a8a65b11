// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use trapcam_app::{FetchCompletion, Page, PageRequest, PageSource};
use trapcam_tui::InternalEvent;

pub type SharedSource = Arc<dyn PageSource + Send + Sync>;

/// Runs each page request on its own worker thread so the event loop keeps
/// drawing while the source is slow.
pub struct SourceRuntime {
    source: SharedSource,
}

impl SourceRuntime {
    pub fn new(source: SharedSource) -> Self {
        Self { source }
    }
}

impl trapcam_tui::PlaybackRuntime for SourceRuntime {
    fn fetch_page(&mut self, request: &PageRequest) -> Result<Page> {
        self.source.fetch_page(request)
    }

    fn spawn_fetch(
        &mut self,
        request: PageRequest,
        delay: Duration,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let source = Arc::clone(&self.source);
        let name = format!("fetch-{}-{}", request.direction.as_str(), request.token.get());
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let completion = match source.fetch_page(&request) {
                    Ok(page) => {
                        debug!(
                            token = request.token.get(),
                            direction = request.direction.as_str(),
                            captures = page.captures.len(),
                            "page fetched"
                        );
                        FetchCompletion::succeeded(&request, page)
                    }
                    Err(error) => {
                        warn!(
                            token = request.token.get(),
                            attempt = request.attempt,
                            "page fetch failed: {error:#}"
                        );
                        FetchCompletion::failed(&request, format!("{error:#}"))
                    }
                };
                // The receiver is gone once the viewer exits; late results are dropped.
                let _ = tx.send(InternalEvent::FetchCompleted(completion));
            })
            .context("spawn fetch worker")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SourceRuntime;
    use anyhow::{Result, bail};
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use trapcam_app::{
        Anchor, Direction, FetchCompletion, FetchToken, MemorySource, Page, PageRequest,
        PageSource,
    };
    use trapcam_testkit::CaptureFaker;
    use trapcam_tui::{InternalEvent, PlaybackRuntime};

    struct BrokenSource;

    impl PageSource for BrokenSource {
        fn fetch_page(&self, _request: &PageRequest) -> Result<Page> {
            bail!("connection reset")
        }
    }

    fn request(token: u64) -> PageRequest {
        PageRequest {
            token: FetchToken::new(token),
            direction: Direction::After,
            anchor: Anchor::Offset(0),
            page_size: 4,
            attempt: 1,
        }
    }

    fn completion(rx: &mpsc::Receiver<InternalEvent>) -> Result<FetchCompletion> {
        match rx.recv_timeout(Duration::from_secs(5))? {
            InternalEvent::FetchCompleted(completion) => Ok(completion),
            other => bail!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn spawned_fetch_posts_completion() -> Result<()> {
        let source = MemorySource::new(CaptureFaker::new(3).captures(10));
        let mut runtime = SourceRuntime::new(Arc::new(source));
        let (tx, rx) = mpsc::channel();

        runtime.spawn_fetch(request(7), Duration::ZERO, tx)?;
        let completion = completion(&rx)?;
        assert_eq!(completion.token, FetchToken::new(7));
        assert_eq!(completion.direction, Direction::After);
        let page = completion.outcome.map_err(anyhow::Error::msg)?;
        assert_eq!(page.captures.len(), 4);
        assert!(page.has_more);
        Ok(())
    }

    #[test]
    fn failed_fetch_posts_cause() -> Result<()> {
        let mut runtime = SourceRuntime::new(Arc::new(BrokenSource));
        let (tx, rx) = mpsc::channel();

        runtime.spawn_fetch(request(2), Duration::ZERO, tx)?;
        let completion = completion(&rx)?;
        assert_eq!(completion.outcome, Err("connection reset".to_owned()));
        Ok(())
    }

    #[test]
    fn retry_delay_is_waited_out_before_fetching() -> Result<()> {
        let source = MemorySource::new(CaptureFaker::new(3).captures(2));
        let mut runtime = SourceRuntime::new(Arc::new(source));
        let (tx, rx) = mpsc::channel();

        let started = Instant::now();
        runtime.spawn_fetch(request(1), Duration::from_millis(40), tx)?;
        completion(&rx)?;
        assert!(started.elapsed() >= Duration::from_millis(40));
        Ok(())
    }

    #[test]
    fn blocking_fetch_delegates_to_source() -> Result<()> {
        let source = MemorySource::new(CaptureFaker::new(3).captures(3));
        let mut runtime = SourceRuntime::new(Arc::new(source));
        let page = runtime.fetch_page(&request(1))?;
        assert_eq!(page.captures.len(), 3);
        assert!(!page.has_more);
        Ok(())
    }
}
