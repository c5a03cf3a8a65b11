// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;
use trapcam_app::{
    Anchor, BoundingBox, Capture, CaptureId, Detection, DetectionId, Direction, OccurrenceId,
    Page, PageRequest, PageSource, SessionId,
};
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking client for a paginated capture listing:
/// `GET <base>/captures/?event=<session>&ordering=timestamp&...` answering
/// `{count, next, previous, results}`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    token: Option<String>,
    session: Option<SessionId>,
    timeout: Duration,
    http: HttpClient,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("api.base_url must not be empty");
        }
        let base_url = Url::parse(trimmed)
            .with_context(|| format!("api.base_url {trimmed:?} is not a valid URL"))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            bail!("api.base_url {trimmed:?} must be an http:// or https:// URL");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            token: None,
            session: None,
            timeout,
            http,
        })
    }

    pub fn with_token(mut self, token: Option<&str>) -> Self {
        self.token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned);
        self
    }

    pub fn with_session(mut self, session: Option<SessionId>) -> Self {
        self.session = session;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Listing URL for `request`, or `None` when the page is empty by
    /// construction (a backward page from offset zero).
    pub fn page_url(&self, request: &PageRequest) -> Result<Option<Url>> {
        let limit = request.page_size.max(1) as u64;
        let mut params = Vec::<(&str, String)>::new();
        match (request.anchor, request.direction) {
            (Anchor::Offset(offset), Direction::After) => {
                params.push(("offset", offset.to_string()));
                params.push(("limit", limit.to_string()));
            }
            (Anchor::Offset(offset), Direction::Before) => {
                let start = offset.saturating_sub(limit);
                if offset == start {
                    return Ok(None);
                }
                params.push(("offset", start.to_string()));
                params.push(("limit", (offset - start).to_string()));
            }
            (Anchor::Beyond(id), Direction::After) => {
                params.push(("after", id.to_string()));
                params.push(("limit", limit.to_string()));
            }
            (Anchor::Beyond(id), Direction::Before) => {
                params.push(("before", id.to_string()));
                params.push(("limit", limit.to_string()));
            }
            (Anchor::Starting(id), _) => {
                params.push(("from", id.to_string()));
                params.push(("limit", limit.to_string()));
            }
        }

        let mut url = self.captures_url()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(session) = self.session {
                query.append_pair("event", &session.to_string());
            }
            query.append_pair("ordering", "timestamp");
            for (key, value) in &params {
                query.append_pair(key, value);
            }
        }
        Ok(Some(url))
    }

    /// Cheap reachability and auth check: asks for a single capture.
    pub fn ping(&self) -> Result<u64> {
        let mut url = self.captures_url()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(session) = self.session {
                query.append_pair("event", &session.to_string());
            }
            query.append_pair("limit", "1");
        }
        let listing = self.get_listing(url)?;
        Ok(listing.count.unwrap_or(listing.results.len() as u64))
    }

    fn captures_url(&self) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("api.base_url cannot carry a path"))?
            .pop_if_empty()
            .push("captures")
            .push("");
        Ok(url)
    }

    fn get_listing(&self, url: Url) -> Result<CaptureListing> {
        debug!(%url, "requesting captures");
        let mut builder = self.http.get(url.clone());
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Token {token}"));
        }
        let response = builder
            .send()
            .map_err(|error| connection_error(self.base_url.as_str(), error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }

        response
            .json::<CaptureListing>()
            .with_context(|| format!("decode capture listing from {url}"))
    }
}

impl PageSource for ApiClient {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let Some(url) = self.page_url(request)? else {
            return Ok(Page::empty());
        };
        let listing = self.get_listing(url)?;
        if let (Anchor::Offset(offset), Direction::Before) = (request.anchor, request.direction)
            && listing.results.is_empty()
            && let Some(count) = listing.count
            && count < offset
        {
            debug!(offset, count, "offset is past the end; reading the tail");
            return self.fetch_page(&PageRequest {
                anchor: Anchor::Offset(count),
                ..request.clone()
            });
        }
        let has_more = match request.direction {
            Direction::Before => listing.previous.is_some(),
            Direction::After => listing.next.is_some(),
        };
        let captures = listing
            .results
            .into_iter()
            .map(ServerCapture::into_capture)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            captures,
            has_more,
            total: listing.count,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CaptureListing {
    count: Option<u64>,
    next: Option<String>,
    previous: Option<String>,
    #[serde(default)]
    results: Vec<ServerCapture>,
}

#[derive(Debug, Deserialize)]
struct ServerCapture {
    id: i64,
    timestamp: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    detections_count: Option<u32>,
    #[serde(default)]
    detections: Vec<ServerDetection>,
}

#[derive(Debug, Deserialize)]
struct ServerDetection {
    id: i64,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    occurrence: Option<ServerOccurrence>,
}

#[derive(Debug, Deserialize)]
struct ServerOccurrence {
    id: i64,
    #[serde(default)]
    determination: Option<ServerTaxon>,
    #[serde(default)]
    determination_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ServerTaxon {
    name: String,
}

impl ServerCapture {
    fn into_capture(self) -> Result<Capture> {
        let timestamp = parse_timestamp(&self.timestamp)
            .with_context(|| format!("capture {} has timestamp {:?}", self.id, self.timestamp))?;
        let detections = self
            .detections
            .into_iter()
            .map(ServerDetection::into_detection)
            .collect::<Vec<_>>();
        Ok(Capture {
            id: CaptureId::new(self.id),
            timestamp,
            url: self.url.unwrap_or_default(),
            width: self.width.unwrap_or_default(),
            height: self.height.unwrap_or_default(),
            detections_count: self
                .detections_count
                .unwrap_or(detections.len() as u32),
            detections,
        })
    }
}

impl ServerDetection {
    fn into_detection(self) -> Detection {
        let id = DetectionId::new(self.id);
        let (label, occurrence_id) = match &self.occurrence {
            Some(occurrence) => (
                Detection::label_for(
                    id,
                    occurrence
                        .determination
                        .as_ref()
                        .map(|taxon| taxon.name.as_str()),
                    occurrence.determination_score,
                ),
                Some(OccurrenceId::new(occurrence.id)),
            ),
            None => (Detection::label_for(id, None, None), None),
        };
        Detection {
            id,
            bbox: self.bbox.as_deref().and_then(BoundingBox::from_slice),
            score: self.score.unwrap_or_default(),
            label,
            occurrence_id,
        }
    }
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.fff]` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(parsed);
    }
    let naive = PrimitiveDateTime::parse(
        raw,
        format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
        ),
    )
    .map_err(|error| anyhow!("unrecognized timestamp {raw:?}: {error}"))?;
    Ok(naive.assume_utc())
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("request to {base_url} timed out -- raise [api].timeout if the server is slow");
    }
    anyhow!(
        "cannot reach {} -- check [api].base_url and your network ({})",
        base_url,
        error
    )
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    detail: Option<String>,
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(detail) = parsed.detail
        && !detail.is_empty()
    {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return anyhow!(
                "server error ({}): {} -- check [api].token",
                status.as_u16(),
                detail
            );
        }
        return anyhow!("server error ({}): {}", status.as_u16(), detail);
    }

    if body.len() < 100 && !body.contains('{') && !body.trim().is_empty() {
        return anyhow!("server error ({}): {}", status.as_u16(), body.trim());
    }

    anyhow!("server returned {}", status.as_u16())
}
