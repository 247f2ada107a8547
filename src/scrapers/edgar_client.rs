//! Rate-limited, retrying HTTP client for SEC-style document sources.
//!
//! The regulator's fair-access policy is a hard contract: at most ten
//! request starts per second across the whole process, and an
//! identification header on every request. The limiter is a token bucket
//! with burst 1, so consecutive starts are always spaced by at least the
//! configured interval no matter how many workers share the client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::errors::PipelineError;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Retries exhausted on 5xx / connect / timeout failures.
    #[error("transient failure after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },

    /// 4xx other than 429. Never retried.
    #[error("permanent HTTP failure {status} for {url}")]
    PermanentHttp { status: u16, url: String },

    /// Caller-initiated cooperative cancellation.
    #[error("fetch cancelled")]
    Cancelled,
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transient { reason, .. } => PipelineError::TransientFetch(reason),
            FetchError::PermanentHttp { status, url } => {
                PipelineError::PermanentFetch { status, url }
            }
            FetchError::Cancelled => PipelineError::Cancelled,
        }
    }
}

/// The raw fetch result. No parsing happens here.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub body: Vec<u8>,
    pub status: u16,
    pub final_url: String,
}

impl FetchedDocument {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Token bucket with burst 1: a single slot clock shared by every caller.
/// Each acquire claims the next free start time and sleeps until it.
struct SlotClock {
    next_start: Mutex<Instant>,
    interval: Duration,
}

impl SlotClock {
    fn new(interval: Duration) -> Self {
        Self {
            next_start: Mutex::new(Instant::now()),
            interval,
        }
    }

    async fn acquire(&self) {
        let wait = {
            let mut slot = self.next_start.lock().await;
            let now = Instant::now();
            let start_at = (*slot).max(now);
            *slot = start_at + self.interval;
            start_at.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[derive(Clone)]
pub struct EdgarClient {
    client: Client,
    limiter: Arc<SlotClock>,
    max_retries: u32,
    backoff_min: Duration,
    backoff_max: Duration,
    cancel: Option<watch::Receiver<bool>>,
}

impl EdgarClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let mut headers = HeaderMap::new();
        // reqwest negotiates gzip/deflate itself; the identification header
        // is the part the source actually polices.
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_str(&settings.identification_header)
                .context("identification header is not a valid header value")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            limiter: Arc::new(SlotClock::new(settings.request_interval())),
            max_retries: settings.max_retries.max(1),
            backoff_min: settings.backoff_min,
            backoff_max: settings.backoff_max,
            cancel: None,
        })
    }

    /// Attach a cancellation signal; an in-flight fetch aborts as soon as
    /// the watch flips to `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn cancelled(&self) {
        match self.cancel.clone() {
            Some(mut rx) => loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Sender dropped without cancelling: never resolves.
                    std::future::pending::<()>().await;
                }
            },
            None => std::future::pending().await,
        }
    }

    /// Fetch one URL under the global rate cap, retrying transient
    /// failures with exponential backoff bounded by the configured window.
    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let mut attempt = 0u32;
        let mut backoff = self.backoff_min;

        loop {
            if self.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            tokio::select! {
                _ = self.limiter.acquire() => {}
                _ = self.cancelled() => return Err(FetchError::Cancelled),
            }

            attempt += 1;
            let outcome = tokio::select! {
                resp = self.client.get(url).send() => resp,
                _ = self.cancelled() => return Err(FetchError::Cancelled),
            };

            let retry_delay = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let delay = retry_after(response.headers()).unwrap_or(backoff);
                        warn!(%url, attempt, delay_secs = delay.as_secs(), "rate limited by source (429)");
                        Some(delay)
                    } else if status.is_client_error() {
                        return Err(FetchError::PermanentHttp {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    } else if status.is_server_error() {
                        warn!(%url, attempt, status = status.as_u16(), "server error, will retry");
                        None
                    } else {
                        let final_url = response.url().to_string();
                        let body = response.bytes().await.map_err(|e| FetchError::Transient {
                            attempts: attempt,
                            reason: format!("body read failed: {e}"),
                        })?;
                        debug!(%url, bytes = body.len(), "fetched document");
                        return Ok(FetchedDocument {
                            body: body.to_vec(),
                            status: status.as_u16(),
                            final_url,
                        });
                    }
                }
                Err(err) => {
                    warn!(%url, attempt, error = %err, "request failed, will retry");
                    None
                }
            };

            if attempt >= self.max_retries {
                return Err(FetchError::Transient {
                    attempts: attempt,
                    reason: format!("retries exhausted for {url}"),
                });
            }

            let delay = retry_delay.unwrap_or(backoff);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.cancelled() => return Err(FetchError::Cancelled),
            }
            backoff = (backoff * 2).min(self.backoff_max);
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slot_clock_spaces_starts_by_interval() {
        let clock = SlotClock::new(Duration::from_millis(100));
        let begin = Instant::now();

        for _ in 0..5 {
            clock.acquire().await;
        }

        // Five starts: first immediate, four spaced 100ms apart.
        assert!(Instant::now() - begin >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_clock_is_global_across_concurrent_callers() {
        let clock = Arc::new(SlotClock::new(Duration::from_millis(100)));
        let begin = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let clock = Arc::clone(&clock);
            handles.push(tokio::spawn(async move {
                clock.acquire().await;
                Instant::now()
            }));
        }

        let mut starts = Vec::new();
        for handle in handles {
            starts.push(handle.await.unwrap());
        }
        starts.sort();

        // No 1-second window contains more than 10 starts, and consecutive
        // starts are never closer than the interval.
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert!(starts[9] - begin >= Duration::from_millis(900));
    }

    #[test]
    fn retry_after_header_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn cancelled_client_refuses_to_fetch() {
        let settings = Settings {
            identification_header: "FinTrain Pipeline data@example.com".into(),
            rate_limit_per_second: 10,
            max_retries: 3,
            backoff_min: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            tokenization_secret: "s".into(),
            vault_key_hex: None,
            audit_db_path: ":memory:".into(),
            training_db_path: ":memory:".into(),
            token_vault_db_path: ":memory:".into(),
            retention_overrides: None,
            embedding_provider: None,
            ingest_workers: 1,
            ingest_queue_depth: 8,
        };
        let (tx, rx) = watch::channel(false);
        let client = EdgarClient::new(&settings).unwrap().with_cancellation(rx);
        tx.send(true).unwrap();

        let err = client.fetch("https://example.invalid/doc").await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
