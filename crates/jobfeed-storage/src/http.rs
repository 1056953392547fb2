//! JSON-over-HTTP client with bounded concurrency, optional request pacing and
//! exponential backoff on retryable failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Request pacing: at most `burst` requests back to back, then one per `refill_every`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerConfig {
    pub burst: u32,
    pub refill_every: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
    pub pacer: Option<PacerConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            concurrency: 4,
            backoff: BackoffPolicy::default(),
            pacer: None,
        }
    }
}

/// Token bucket shared by every attempt made through one client, retries included.
#[derive(Debug)]
pub struct RequestPacer {
    config: PacerConfig,
    state: Mutex<PacerState>,
}

#[derive(Debug, Clone, Copy)]
struct PacerState {
    available: u32,
    last_refill: Instant,
}

impl PacerState {
    fn refill(&mut self, config: PacerConfig, now: Instant) {
        if config.refill_every.is_zero() {
            self.available = config.burst;
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = u32::try_from(elapsed.as_nanos() / config.refill_every.as_nanos())
            .unwrap_or(u32::MAX);
        if earned == 0 {
            return;
        }
        self.available = self.available.saturating_add(earned).min(config.burst);
        // Keep the fractional interval unless the bucket is full.
        self.last_refill = if self.available == config.burst {
            now
        } else {
            self.last_refill + config.refill_every * earned
        };
    }

    /// Take a token, or report how long until the next one.
    fn take(&mut self, config: PacerConfig, now: Instant) -> Result<(), Duration> {
        self.refill(config, now);
        if self.available > 0 {
            self.available -= 1;
            return Ok(());
        }
        let since = now.saturating_duration_since(self.last_refill);
        Err(config.refill_every.saturating_sub(since))
    }
}

impl RequestPacer {
    pub fn new(config: PacerConfig) -> Self {
        let config = PacerConfig {
            burst: config.burst.max(1),
            ..config
        };
        Self {
            config,
            state: Mutex::new(PacerState {
                available: config.burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> PacerConfig {
        self.config
    }

    pub async fn acquire(&self) {
        loop {
            let wait = match self.state.lock().await.take(self.config, Instant::now()) {
                Ok(()) => return,
                Err(wait) => wait,
            };
            debug!(wait_ms = wait.as_millis() as u64, "request paced");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request limiter closed")]
    LimiterClosed,
}

#[derive(Debug)]
pub struct JsonHttpClient {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    pacer: Option<Arc<RequestPacer>>,
    backoff: BackoffPolicy,
}

impl JsonHttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let pacer = config.pacer.map(|c| Arc::new(RequestPacer::new(c)));

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            pacer,
            backoff: config.backoff,
        })
    }

    pub fn pacer_config(&self) -> Option<PacerConfig> {
        self.pacer.as_ref().map(|p| p.config())
    }

    /// POST `body` as JSON, retrying 5xx/429 and transport failures per the backoff policy.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        body: &B,
    ) -> Result<HttpResponse, FetchError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        let span = info_span!("http_post", url);
        async {
            let mut attempt = 0usize;
            loop {
                if let Some(pacer) = &self.pacer {
                    pacer.acquire().await;
                }
                let mut request = self.client.post(url).json(body);
                if let Some(token) = bearer_token {
                    request = request.bearer_auth(token);
                }

                match request.send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success() {
                            let body = resp.bytes().await?.to_vec();
                            return Ok(HttpResponse { status, body });
                        }

                        if classify_status(status) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            debug!(status = status.as_u16(), attempt, "retrying http post");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }

                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            debug!(error = %err, attempt, "retrying http post");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(FetchError::Request(err));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn only_server_errors_and_throttling_are_retried() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }

    fn pacer_config() -> PacerConfig {
        PacerConfig {
            burst: 2,
            refill_every: Duration::from_millis(100),
        }
    }

    #[test]
    fn pacer_spends_burst_then_reports_wait() {
        let config = pacer_config();
        let t0 = Instant::now();
        let mut state = PacerState {
            available: config.burst,
            last_refill: t0,
        };

        assert_eq!(state.take(config, t0), Ok(()));
        assert_eq!(state.take(config, t0), Ok(()));
        assert_eq!(
            state.take(config, t0 + Duration::from_millis(40)),
            Err(Duration::from_millis(60))
        );
        assert_eq!(state.take(config, t0 + Duration::from_millis(100)), Ok(()));
        assert!(state.take(config, t0 + Duration::from_millis(150)).is_err());
    }

    #[test]
    fn pacer_refill_is_capped_at_burst() {
        let config = pacer_config();
        let t0 = Instant::now();
        let mut state = PacerState {
            available: 0,
            last_refill: t0,
        };
        state.refill(config, t0 + Duration::from_secs(10));
        assert_eq!(state.available, 2);
    }

    #[tokio::test]
    async fn client_carries_configured_pacer() {
        let client = JsonHttpClient::new(HttpClientConfig {
            pacer: Some(PacerConfig {
                burst: 0,
                refill_every: Duration::from_millis(100),
            }),
            ..HttpClientConfig::default()
        })
        .expect("client");
        assert_eq!(client.pacer_config().map(|c| c.burst), Some(1));
        assert!(JsonHttpClient::new(HttpClientConfig::default())
            .expect("client")
            .pacer_config()
            .is_none());
    }
}
