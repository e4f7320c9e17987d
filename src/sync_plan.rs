//! Full vs. incremental sync planning.
//!
//! The remote date filter is day-granular, and activities recorded near
//! midnight in a non-UTC zone can land on either side of a day boundary.
//! Incremental windows therefore pad one day on both ends.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::time_utils::api_date;

/// Whether a run walks every page or only a date window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// The window an import run requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    pub mode: SyncMode,
    /// Start of the window, `None` for a full import
    pub since: Option<DateTime<Utc>>,
    /// End of the window, `None` for a full import
    pub until: Option<DateTime<Utc>>,
}

impl SyncPlan {
    /// Plan from the previous snapshot's watermark.
    ///
    /// No watermark means a full import. Otherwise the window is
    /// `[watermark - 1 day, now + 1 day]`.
    pub fn plan(watermark: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match watermark {
            None => Self {
                mode: SyncMode::Full,
                since: None,
                until: None,
            },
            Some(w) => Self {
                mode: SyncMode::Incremental,
                since: Some(w - Duration::days(1)),
                until: Some(now + Duration::days(1)),
            },
        }
    }

    pub fn is_full(&self) -> bool {
        self.mode == SyncMode::Full
    }

    /// `(startDate, endDate)` query values, `None` for a full import.
    pub fn date_filter(&self) -> Option<(String, String)> {
        match (self.since, self.until) {
            (Some(since), Some(until)) => Some((api_date(&since), api_date(&until))),
            _ => None,
        }
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date_filter() {
            Some((since, until)) => write!(f, "{} sync from {} to {}", self.mode, since, until),
            None => write!(f, "{} sync (all pages)", self.mode),
        }
    }
}
