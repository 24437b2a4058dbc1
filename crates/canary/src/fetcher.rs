//! HTTP Fetcher (C1). A single timed GET/HEAD with no retry of its own:
//! polling itself is the retry (§4.1). Retries, where the canary wants them
//! at all, live one layer up in the supervisor's endpoint-restart backoff
//! (`retry.rs`).

use std::time::{Duration, Instant};

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCategory {
    Manifest,
    Tracking,
    Segment,
}

impl FetchCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchCategory::Manifest => "manifest",
            FetchCategory::Tracking => "tracking",
            FetchCategory::Segment => "segment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Head,
}

impl From<FetchMethod> for Method {
    fn from(m: FetchMethod) -> Self {
        match m {
            FetchMethod::Get => Method::GET,
            FetchMethod::Head => Method::HEAD,
        }
    }
}

/// A completed fetch: raw bytes (empty for HEAD / 4xx+ with no body read),
/// status, and whether the body was gzip-decoded by the transport.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: reqwest::StatusCode,
    pub bytes: bytes_shim::Bytes,
    pub content_length: Option<u64>,
}

/// Result of one `fetch` call, paired with its latency. §4.1: every call
/// produces exactly one metric tick of category-tagged error-or-latency.
pub struct FetchOutcome {
    pub result: Result<FetchResponse, FetchError>,
    pub latency_ms: u64,
}

pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self { client, timeout, user_agent: user_agent.into() }
    }

    pub async fn fetch(
        &self,
        url: &reqwest::Url,
        method: FetchMethod,
        category: FetchCategory,
        token: &CancellationToken,
    ) -> FetchOutcome {
        let start = Instant::now();
        let request = self
            .client
            .request(method.into(), url.clone())
            .header(reqwest::header::USER_AGENT, self.user_agent.clone())
            .timeout(self.timeout);

        let response = tokio::select! {
            _ = token.cancelled() => {
                return FetchOutcome {
                    result: Err(FetchError::Cancelled),
                    latency_ms: start.elapsed().as_millis() as u64,
                };
            }
            response = request.send() => response,
        };

        let latency_ms = start.elapsed().as_millis() as u64;

        let result = match response {
            Ok(resp) => {
                let status = resp.status();
                let content_length = resp.content_length();
                if status.as_u16() >= 400 {
                    Err(FetchError::HttpStatus {
                        status,
                        url: url.to_string(),
                        category: category.as_str(),
                    })
                } else {
                    let bytes = tokio::select! {
                        _ = token.cancelled() => return FetchOutcome {
                            result: Err(FetchError::Cancelled),
                            latency_ms,
                        },
                        bytes = resp.bytes() => bytes,
                    };
                    match bytes {
                        Ok(b) => {
                            trace!(url = %url, category = category.as_str(), bytes = b.len(), "fetched");
                            Ok(FetchResponse { status, bytes: b, content_length })
                        }
                        Err(e) => Err(FetchError::from_reqwest(e)),
                    }
                }
            }
            Err(e) => Err(FetchError::from_reqwest(e)),
        };

        FetchOutcome { result, latency_ms }
    }
}

/// Thin re-export so this module doesn't need to name `reqwest`/`bytes`
/// crates at every call site; kept separate to make the dependency obvious.
mod bytes_shim {
    pub use reqwest::Bytes;
}
