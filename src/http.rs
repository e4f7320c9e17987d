//! HTTP client for the activity API with quota handling.
//!
//! Every request carries the bearer credential and the `appid` header. The
//! API signals quota exhaustion with an error envelope rather than a status
//! code:
//!
//! ```json
//! { "fault": { "faultstring": "...", "detail": { "errorcode": "policies.ratelimit.QuotaViolation" } } }
//! ```
//!
//! When that envelope shows up the calling task sleeps for the configured
//! cooldown and repeats the same request, as many times as it takes. Only
//! the task that hit the quota sleeps; siblings keep going. Transport errors
//! are never retried here.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;

use crate::config::ImportConfig;
use crate::error::{PegasusError, Result};

/// Error code the API uses for quota violations
const QUOTA_VIOLATION: &str = "policies.ratelimit.QuotaViolation";

/// Longest body excerpt kept in an API error message
const ERROR_BODY_LIMIT: usize = 512;

/// Error envelope, parsed defensively from every response body
#[derive(Debug, Default, Deserialize)]
struct FaultEnvelope {
    #[serde(default)]
    fault: Option<Fault>,
}

#[derive(Debug, Default, Deserialize)]
struct Fault {
    #[serde(default, rename = "faultstring")]
    message: String,
    #[serde(default)]
    detail: FaultDetail,
}

#[derive(Debug, Default, Deserialize)]
struct FaultDetail {
    #[serde(default, rename = "errorcode")]
    code: String,
}

/// Returns the fault message if `body` is a quota-violation envelope.
fn quota_violation(body: &[u8]) -> Option<String> {
    let envelope: FaultEnvelope = serde_json::from_slice(body).ok()?;
    envelope
        .fault
        .filter(|f| f.detail.code == QUOTA_VIOLATION)
        .map(|f| f.message)
}

/// Authenticated GET client that waits out quota violations
pub struct RateLimitedClient {
    client: Client,
    base_url: String,
    auth_header: String,
    app_id: String,
    cooldown: Duration,
    quota_hits: AtomicU32,
}

impl RateLimitedClient {
    /// Create a client from the import configuration
    pub fn new(config: &ImportConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {}", config.access_token),
            app_id: config.app_id.clone(),
            cooldown: config.quota_cooldown,
            quota_hits: AtomicU32::new(0),
        })
    }

    /// Number of quota violations seen so far
    pub fn quota_hits(&self) -> u32 {
        self.quota_hits.load(Ordering::Relaxed)
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `path` with `query` and return the raw body.
    ///
    /// May sleep for the quota cooldown any number of times before
    /// returning; callers must not assume bounded latency.
    pub async fn request(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let url = self.build_url(path);

        loop {
            let response = self
                .client
                .get(&url)
                .header(AUTHORIZATION, &self.auth_header)
                .header("appid", &self.app_id)
                .header(ACCEPT, "application/json")
                .query(query)
                .send()
                .await?;

            let status = response.status();
            let body = response.bytes().await?;

            if let Some(message) = quota_violation(&body) {
                let hits = self.quota_hits.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "[RateLimitedClient] {} hit quota ({}), sleeping for {:?} (hit #{})",
                    path, message, self.cooldown, hits
                );
                tokio::time::sleep(self.cooldown).await;
                continue;
            }

            if !status.is_success() {
                let text = String::from_utf8_lossy(&body);
                let message: String = text.chars().take(ERROR_BODY_LIMIT).collect();
                return Err(PegasusError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            debug!("[RateLimitedClient] {} -> {} ({} bytes)", path, status, body.len());
            return Ok(body.to_vec());
        }
    }
}
