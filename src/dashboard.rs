use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::chart::{self, ChartSeries};
use crate::config::DashboardConfig;
use crate::dataset::{CellValue, UploadedDataset};
use crate::error::{DashboardError, IngestWarning, Result};
use crate::filter::{self, Facet, FilterSelection, FilteredRows};
use crate::ingest;
use crate::kpi::{self, KpiSummary};
use crate::session::{self, Access, ExpiryNotice, SessionState, UploadState};

/// Returned to the uploader after a successful upload
#[derive(Clone, Debug, Serialize)]
pub struct UploadReport {
    pub sheet_name: String,
    pub rows: usize,
    pub uploaded_at: DateTime<Utc>,
    pub remaining_hours: f64,
    pub warnings: Vec<IngestWarning>,
}

/// Session status for display next to the upload prompt
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub state: UploadState,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub remaining_hours: f64,
    pub expiry: Option<ExpiryNotice>,
}

/// A row of the filtered table with its derived metrics
#[derive(Clone, Debug, Serialize)]
pub struct TableRow {
    pub cells: Vec<CellValue>,
    pub performance_pct: Option<f64>,
    pub change_pct: Option<f64>,
}

/// Distinct values per facet; `None` when the sheet has no such column
#[derive(Clone, Debug, Serialize)]
pub struct FacetOptions {
    pub months: Option<BTreeSet<String>>,
    pub machines: Option<BTreeSet<String>>,
    pub sizes: Option<BTreeSet<String>>,
}

impl FacetOptions {
    pub fn of(dataset: &UploadedDataset) -> Self {
        Self {
            months: filter::facet_values(dataset, Facet::Month),
            machines: filter::facet_values(dataset, Facet::Machine),
            sizes: filter::facet_values(dataset, Facet::Size),
        }
    }
}

/// Everything the rendering surface needs for one pass
#[derive(Clone, Debug, Serialize)]
pub struct DashboardView {
    pub sheet_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub remaining_hours: f64,
    pub warnings: Vec<IngestWarning>,
    pub facets: FacetOptions,
    pub selection: FilterSelection,
    pub kpis: KpiSummary,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
    pub charts: Vec<ChartSeries>,
}

/// The upload-lifecycle and metrics pipeline
///
/// Holds configuration only. Session state is owned by the caller and
/// passed to each handler, which updates it in place.
#[derive(Clone, Debug)]
pub struct Dashboard {
    config: DashboardConfig,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Validate and store an upload, making it the active dataset
    ///
    /// On any error `state` and the stored file are left as they were.
    pub fn upload(
        &self,
        state: &mut SessionState,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<UploadReport> {
        let ingested = ingest::store_upload(bytes, &self.config)?;
        for warning in &ingested.warnings {
            warn!("upload: {}", warning);
        }

        let uploaded_at = ingested.dataset.uploaded_at;
        let report = UploadReport {
            sheet_name: ingested.dataset.sheet_name.clone(),
            rows: ingested.dataset.len(),
            uploaded_at,
            remaining_hours: session::remaining_hours(session::remaining(
                uploaded_at,
                now,
                self.config.expiry_window(),
            )),
            warnings: ingested.warnings.clone(),
        };

        *state = SessionState::with_upload(ingested);
        info!(
            "session active: {} rows from '{}'",
            report.rows, report.sheet_name
        );
        Ok(report)
    }

    /// Resolve the session before any read
    ///
    /// The stored file's modification time decides validity. The cached
    /// dataset is reused only while its timestamp and size match the file;
    /// an expired file is deleted and the session emptied. The expiry
    /// notice is returned on the pass that detects it and kept in `state`
    /// for [`Dashboard::status`] until the next upload or reset.
    pub fn resolve(&self, state: &mut SessionState, now: DateTime<Utc>) -> Result<Access> {
        let path = self.config.upload_path();
        let stamp = ingest::stored_stamp(&path).map_err(|e| DashboardError::upload_io(&path, e))?;

        let Some(stamp) = stamp else {
            if !state.is_empty() {
                info!("stored upload disappeared, session cleared");
            }
            state.clear();
            return Ok(Access::UploadRequired { notice: None });
        };
        let uploaded_at = stamp.modified;

        let window = self.config.expiry_window();
        if session::classify(uploaded_at, now, window, self.config.expiry_boundary)
            == UploadState::Expired
        {
            info!(
                "upload from {} expired after {:?}, clearing",
                uploaded_at, self.config.expiry
            );
            let notice = ExpiryNotice {
                uploaded_at,
                expired_at: uploaded_at + window,
            };
            state.expire(notice.clone());
            if let Err(e) = ingest::remove_stored(&path) {
                warn!("failed to remove expired upload {}: {}", path.display(), e);
            }
            return Ok(Access::UploadRequired {
                notice: Some(notice),
            });
        }

        if !state.matches(uploaded_at, stamp.len) {
            if !state.is_empty() {
                info!("stored upload changed on disk, reloading");
            }
            state.clear();
            *state = SessionState::with_upload(ingest::load_stored(&path, &self.config)?);
        }

        match state.active() {
            Some(active) => Ok(Access::Active {
                dataset: active.dataset.clone(),
                warnings: active.warnings.clone(),
                remaining: session::remaining(uploaded_at, now, window),
            }),
            None => Ok(Access::UploadRequired { notice: None }),
        }
    }

    /// Drop the active dataset and delete the stored file, whatever the state
    pub fn reset(&self, state: &mut SessionState) -> Result<()> {
        *state = SessionState::empty();
        let path = self.config.upload_path();
        ingest::remove_stored(&path).map_err(|e| DashboardError::upload_io(&path, e))?;
        info!("session reset");
        Ok(())
    }

    /// Current state for display, resolving it first
    ///
    /// `expiry` carries the last expiry notice even after the pass that
    /// detected it, so a background refresh does not swallow it.
    pub fn status(&self, state: &mut SessionState, now: DateTime<Utc>) -> Result<StatusReport> {
        let access = self.resolve(state, now)?;
        Ok(StatusReport {
            state: access.state(),
            uploaded_at: access.dataset().map(|d| d.uploaded_at),
            remaining_hours: access.remaining_hours(),
            expiry: match access {
                Access::UploadRequired { .. } => state.last_expiry().cloned(),
                Access::Active { .. } => None,
            },
        })
    }

    /// Filter, aggregate and shape one dashboard pass
    pub fn view(&self, access: &Access, selection: &FilterSelection) -> Option<DashboardView> {
        let Access::Active {
            dataset, warnings, ..
        } = access
        else {
            return None;
        };

        let rows = filter::apply(dataset, selection);
        Some(DashboardView {
            sheet_name: dataset.sheet_name.clone(),
            uploaded_at: dataset.uploaded_at,
            remaining_hours: access.remaining_hours(),
            warnings: warnings.clone(),
            facets: FacetOptions::of(dataset),
            selection: selection.clone(),
            kpis: kpi::compute(&rows),
            columns: dataset.columns.clone(),
            rows: table_rows(&rows),
            charts: chart::shape(&rows, selection, self.config.chart_layout),
        })
    }
}

fn table_rows(rows: &FilteredRows<'_>) -> Vec<TableRow> {
    rows.iter()
        .map(|row| TableRow {
            cells: row.cells().to_vec(),
            performance_pct: row.performance_pct(),
            change_pct: row.change_pct(),
        })
        .collect()
}
