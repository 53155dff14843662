//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the scheduler, including:
//! - Building HTTP clients with proper user agent strings
//! - Streaming bodies under a hard size cap
//! - Enforcing a wall-clock deadline per fetch
//! - Classifying every outcome into success, transient or permanent failure

use crate::config::Config;
use crate::state::FailureKind;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::{Duration, Instant};
use url::Url;

/// A response that came back 2xx
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,

    /// Body, at most `max_content_length` bytes
    pub body: Vec<u8>,

    /// The body was cut at the cap
    pub truncated: bool,

    pub elapsed: Duration,
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchOutcome {
    Success(FetchedPage),

    Failure {
        kind: FailureKind,
        status: Option<u16>,
        /// Parsed `Retry-After`, only for rate limiting
        retry_after: Option<Duration>,
        message: String,
    },
}

impl FetchOutcome {
    fn failure(kind: FailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            status,
            retry_after: None,
            message: message.into(),
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// The User-Agent is `CrawlerName/Version (+ContactURL; ContactEmail)`.
///
/// # Example
///
/// ```no_run
/// use roamer::config::load_config;
/// use roamer::crawler::build_http_client;
/// use std::path::Path;
///
/// let config = load_config(Path::new("roamer.toml")).unwrap();
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    let timeout = config.crawler.request_timeout();

    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a URL under a hard wall-clock deadline
///
/// Exceeding the deadline is reported as `FailureKind::Timeout` no matter
/// which phase (connect, headers, body) was running.
pub async fn fetch_with_deadline(
    client: &Client,
    url: &Url,
    max_content_length: usize,
    deadline: Duration,
) -> FetchOutcome {
    match tokio::time::timeout(deadline, fetch_url(client, url, max_content_length)).await {
        Ok(outcome) => outcome,
        Err(_) => FetchOutcome::failure(
            FailureKind::Timeout,
            None,
            format!("no complete response within {:?}", deadline),
        ),
    }
}

/// Fetches a URL and classifies the response
///
/// # Classification
///
/// | Condition | Outcome |
/// |-----------|---------|
/// | HTTP 2xx | Success (body capped, truncation flagged) |
/// | HTTP 429 | RateLimited, with `Retry-After` if present |
/// | HTTP 5xx | ServerError (transient) |
/// | Other HTTP status | ClientError (permanent) |
/// | Timeout | Timeout (transient) |
/// | Connection/DNS/TLS/body error | Connection (transient) |
/// | Too many redirects | ClientError (permanent) |
pub async fn fetch_url(client: &Client, url: &Url, max_content_length: usize) -> FetchOutcome {
    let started = Instant::now();

    let mut response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(e) => return classify_error(&e),
    };

    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        return FetchOutcome::Failure {
            kind: FailureKind::RateLimited,
            status: Some(status.as_u16()),
            retry_after,
            message: "rate limited".to_string(),
        };
    }

    if status.is_server_error() {
        return FetchOutcome::failure(
            FailureKind::ServerError,
            Some(status.as_u16()),
            format!("server error {}", status),
        );
    }

    if !status.is_success() {
        return FetchOutcome::failure(
            FailureKind::ClientError,
            Some(status.as_u16()),
            format!("unexpected status {}", status),
        );
    }

    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let declared = response.content_length().unwrap_or(0) as usize;
    let mut body = Vec::with_capacity(declared.min(max_content_length));
    let mut truncated = false;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = max_content_length - body.len();
                if chunk.len() > remaining {
                    body.extend_from_slice(&chunk[..remaining]);
                    truncated = true;
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => return classify_error(&e),
        }
    }

    FetchOutcome::Success(FetchedPage {
        final_url,
        status: status.as_u16(),
        content_type,
        body,
        truncated,
        elapsed: started.elapsed(),
    })
}

/// Maps a transport-level error onto a failure kind
fn classify_error(e: &reqwest::Error) -> FetchOutcome {
    let kind = if e.is_timeout() {
        FailureKind::Timeout
    } else if e.is_redirect() {
        FailureKind::ClientError
    } else if e.is_builder() {
        FailureKind::InvalidUrl
    } else {
        FailureKind::Connection
    };

    FetchOutcome::failure(kind, e.status().map(|s| s.as_u16()), e.to_string())
}

/// Parses a `Retry-After` value: delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let ahead = at.with_timezone(&Utc) - now;
    Some(ahead.to_std().unwrap_or(Duration::ZERO))
}
