//! Import configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::{PegasusError, Result};

/// Default API root; listing and GPS paths are appended to it
pub const DEFAULT_BASE_URL: &str = "https://api.nike.com/v1/me/sport";

/// Default snapshot file
pub const DEFAULT_OUTPUT: &str = "output.json";

/// What to do with a run whose GPS detail request fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetailFailurePolicy {
    /// Drop the whole run from this import (historical behaviour)
    #[default]
    DropRecord,
    /// Keep the summary with an empty trace
    KeepSummary,
}

/// Configuration for an import run
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// API root URL
    pub base_url: String,
    /// Bearer credential
    pub access_token: String,
    /// Value of the `appid` header
    pub app_id: String,
    /// Snapshot file read at start and rewritten at the end
    pub output_path: PathBuf,
    /// Activities requested per page (default: 50)
    pub page_size: u32,
    /// Only activities of this type are imported (default: "RUN")
    pub activity_type: String,
    /// Zone start times are expressed in
    pub reference_timezone: Tz,
    /// Sleep after a quota violation before retrying (default: 1 hour)
    pub quota_cooldown: Duration,
    /// Per-request transport timeout (default: 30s)
    pub request_timeout: Duration,
    /// Cap on in-flight GPS requests per page; `None` dispatches the whole page
    pub max_concurrent_details: Option<usize>,
    pub detail_failure_policy: DetailFailurePolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: String::new(),
            app_id: String::new(),
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            page_size: 50,
            activity_type: "RUN".to_string(),
            reference_timezone: chrono_tz::America::New_York,
            quota_cooldown: Duration::from_secs(60 * 60),
            request_timeout: Duration::from_secs(30),
            max_concurrent_details: None,
            detail_failure_policy: DetailFailurePolicy::DropRecord,
        }
    }
}

impl ImportConfig {
    /// Reject settings that cannot produce a working import.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(PegasusError::config("access token is required"));
        }
        if self.page_size == 0 {
            return Err(PegasusError::config("page size must be at least 1"));
        }
        if self.max_concurrent_details == Some(0) {
            return Err(PegasusError::config("detail concurrency must be at least 1"));
        }
        if self.base_url.trim().is_empty() {
            return Err(PegasusError::config("base URL is required"));
        }
        Ok(())
    }
}
