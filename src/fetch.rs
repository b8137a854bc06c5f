use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;

/// Anything that can turn a URL into an HTML body.
pub trait PageSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Minimum spacing between any two requests.
    pub delay: Duration,
    pub timeout: Duration,
    /// Total attempts per URL, first one included.
    pub max_retries: u32,
    /// Backoff unit; attempt N waits N times this.
    pub backoff: Duration,
    pub user_agent: String,
}

/// Hands out request slots at most one per `delay`, shared by all workers.
struct Pacer {
    delay: Duration,
    next: Mutex<Instant>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next: Mutex::new(Instant::now()),
        }
    }

    async fn wait(&self) {
        let mut next = self.next.lock().await;
        tokio::time::sleep_until(*next).await;
        *next = Instant::now() + self.delay;
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    pacer: Pacer,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(policy: &FetchPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(&policy.user_agent)
            .build()?;
        Ok(Self {
            client,
            pacer: Pacer::new(policy.delay),
            max_retries: policy.max_retries.max(1),
            backoff: policy.backoff,
        })
    }
}

/// Statuses worth waiting out.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let target = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let attempts = self.max_retries;
        let mut last = String::new();

        for attempt in 1..=attempts {
            self.pacer.wait().await;
            match self.client.get(target.clone()).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    debug!("GET {url} -> 200");
                    return resp.text().await.map_err(|source| FetchError::Transport {
                        url: url.to_string(),
                        source,
                    });
                }
                Ok(resp) if is_transient(resp.status()) => {
                    last = format!("HTTP {}", resp.status().as_u16());
                }
                Ok(resp) => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Err(e) if e.is_builder() => return Err(FetchError::InvalidUrl(url.to_string())),
                Err(e) => last = e.to_string(),
            }

            if attempt < attempts {
                let backoff = self.backoff.mul_f64(f64::from(attempt));
                warn!(
                    "{url}: {last} (attempt {attempt}/{attempts}), backing off {:.1}s",
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last,
        })
    }
}
