//! Upload lifecycle: which dataset is live and for how much longer.
//!
//! The functions here are pure; [`crate::dashboard::Dashboard`] feeds them
//! the stored file's modification time and applies the resulting transition.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::dataset::UploadedDataset;
use crate::error::{DashboardError, IngestWarning};
use crate::ingest::Ingested;

/// Lifecycle state of the upload slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// No dataset; an upload is required
    Empty,
    /// Dataset present and inside its validity window
    Active,
    /// Dataset present but past its validity window
    Expired,
}

/// Whether the instant `uploaded_at + window` still counts as valid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryBoundary {
    /// Valid while `elapsed <= window`
    Inclusive,
    /// Valid while `elapsed < window`
    Exclusive,
}

impl FromStr for ExpiryBoundary {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inclusive" => Ok(ExpiryBoundary::Inclusive),
            "exclusive" => Ok(ExpiryBoundary::Exclusive),
            other => Err(DashboardError::Config(format!(
                "unknown expiry boundary '{}'",
                other
            ))),
        }
    }
}

/// The dataset currently held in memory, with what ingestion reported
#[derive(Clone, Debug)]
pub struct ActiveUpload {
    pub dataset: Arc<UploadedDataset>,
    pub warnings: Vec<IngestWarning>,
    /// Size of the stored file the dataset was parsed from
    pub byte_len: u64,
}

/// Per-process session state
///
/// Holds at most one dataset; its timestamp travels with it, so a dataset
/// without a timestamp cannot be represented. The timestamp and byte length
/// are a cache of the stored file's modification time and size.
///
/// The last expiry notice outlives the dataset it describes and is only
/// forgotten when a new upload arrives or the session is reset.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    active: Option<ActiveUpload>,
    last_expiry: Option<ExpiryNotice>,
}

impl SessionState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_upload(ingested: Ingested) -> Self {
        Self {
            active: Some(ActiveUpload {
                dataset: Arc::new(ingested.dataset),
                warnings: ingested.warnings,
                byte_len: ingested.byte_len,
            }),
            last_expiry: None,
        }
    }

    pub fn active(&self) -> Option<&ActiveUpload> {
        self.active.as_ref()
    }

    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        self.active.as_ref().map(|a| a.dataset.uploaded_at)
    }

    /// Whether the cached dataset was parsed from a file with this mtime and size
    pub fn matches(&self, modified: DateTime<Utc>, byte_len: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.dataset.uploaded_at == modified && a.byte_len == byte_len)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }

    /// Notice for the most recent expiry, until the next upload or reset
    pub fn last_expiry(&self) -> Option<&ExpiryNotice> {
        self.last_expiry.as_ref()
    }

    /// Drop the dataset, keeping any expiry notice
    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Drop the dataset and remember why
    pub fn expire(&mut self, notice: ExpiryNotice) {
        self.active = None;
        self.last_expiry = Some(notice);
    }
}

/// Describes an upload discarded because its window ran out
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExpiryNotice {
    pub uploaded_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Result of resolving the session before a read
#[derive(Clone, Debug)]
pub enum Access {
    /// Data may be shown
    Active {
        dataset: Arc<UploadedDataset>,
        warnings: Vec<IngestWarning>,
        remaining: Duration,
    },
    /// Nothing to show; present the upload prompt
    UploadRequired { notice: Option<ExpiryNotice> },
}

impl Access {
    pub fn state(&self) -> UploadState {
        match self {
            Access::Active { .. } => UploadState::Active,
            Access::UploadRequired { notice: Some(_) } => UploadState::Expired,
            Access::UploadRequired { notice: None } => UploadState::Empty,
        }
    }

    pub fn dataset(&self) -> Option<&Arc<UploadedDataset>> {
        match self {
            Access::Active { dataset, .. } => Some(dataset),
            Access::UploadRequired { .. } => None,
        }
    }

    /// Remaining validity in hours, rounded to one decimal; zero when inactive
    pub fn remaining_hours(&self) -> f64 {
        match self {
            Access::Active { remaining, .. } => remaining_hours(*remaining),
            Access::UploadRequired { .. } => 0.0,
        }
    }
}

/// Time elapsed since upload; a timestamp in the future counts as just uploaded
pub fn elapsed_since(uploaded_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let elapsed = now - uploaded_at;
    if elapsed < Duration::zero() {
        Duration::zero()
    } else {
        elapsed
    }
}

/// Classify an upload made at `uploaded_at` as seen at `now`
///
/// # Examples
/// ```
/// use chrono::{Duration, Utc};
/// use prodboard::session::{classify, ExpiryBoundary, UploadState};
///
/// let t0 = Utc::now();
/// let window = Duration::hours(16);
/// assert_eq!(classify(t0, t0 + Duration::hours(17), window, ExpiryBoundary::Inclusive), UploadState::Expired);
/// assert_eq!(classify(t0, t0 + window, window, ExpiryBoundary::Inclusive), UploadState::Active);
/// assert_eq!(classify(t0, t0 + window, window, ExpiryBoundary::Exclusive), UploadState::Expired);
/// ```
pub fn classify(
    uploaded_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
    boundary: ExpiryBoundary,
) -> UploadState {
    let elapsed = elapsed_since(uploaded_at, now);
    let valid = match boundary {
        ExpiryBoundary::Inclusive => elapsed <= window,
        ExpiryBoundary::Exclusive => elapsed < window,
    };
    if valid {
        UploadState::Active
    } else {
        UploadState::Expired
    }
}

/// Validity left at `now`, never negative
pub fn remaining(uploaded_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> Duration {
    let left = window - elapsed_since(uploaded_at, now);
    if left < Duration::zero() {
        Duration::zero()
    } else {
        left
    }
}

/// Hours in `duration`, rounded to one decimal place
pub fn remaining_hours(duration: Duration) -> f64 {
    let hours = duration.num_milliseconds() as f64 / 3_600_000.0;
    (hours * 10.0).round() / 10.0
}
