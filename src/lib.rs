/*!
# Production Dashboard

Spreadsheet-driven production dashboard, built in Rust.

## Overview

An operator uploads an `.xlsx` workbook of production records; viewers filter
the records by month, machine and pipe size and see KPI tiles, a row table
and expected-vs-recorded chart series. Uploads stay valid for a configured
window (16 hours by default) and then have to be replaced.

## Architecture

### Ingestion & Validation
- Upload bytes are parsed first and only then written to a temporary file
  that is atomically renamed into the single upload slot
- The `POWERBI SUMMARY` worksheet is read, falling back to the first sheet
- `EXPECTED`, `RECORDED`, `EXPECTED WEIGHT`, `ACHIEVED TOTAL WEIGHT` and
  `TOTAL HOURS` are coerced to numbers; anything else becomes missing

### Session / Expiry
- `Empty`, `Active` and `Expired` states, resolved lazily on every read
- The stored file's modification time is the upload timestamp, so a restart
  neither loses a valid upload nor revives an expired one

### Filter & Aggregation
- Conjunctive month/machine/size filters; absent facet columns are skipped
- KPI means, sums and ratios with an explicit undefined value
- Long-form chart series, aggregated or split per machine

## Modules

- **config**: Runtime configuration (JSON file + `PRODBOARD_*` variables)
- **error**: Error and warning types
- **dataset**: Cell values, the uploaded dataset and derived row metrics
- **ingest**: Workbook parsing and upload slot storage
- **session**: Upload lifecycle state machine
- **filter**: Facet selection and filtering
- **kpi**: KPI computation
- **chart**: Chart series shaping
- **export**: CSV and XLSX export of the filtered rows
- **auth**: Admin credential checks
- **dashboard**: The pipeline tying the above together
- **web**: HTTP interface (feature `web`)

## REST API Endpoints

- `GET /api/status` - Upload state and remaining validity
- `GET /api/dashboard` - KPIs, rows and chart series for a selection
- `GET /api/facets` - Distinct facet values
- `POST /api/login` - Admin login
- `POST /api/upload` - Replace the dataset (multipart field `spreadsheet`)
- `POST /api/reset` - Drop the dataset
- `GET /api/export` - Filtered rows as CSV or XLSX
*/

pub mod auth;
pub mod chart;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod error;
pub mod export;
pub mod filter;
pub mod ingest;
pub mod kpi;
pub mod session;
#[cfg(feature = "web")]
pub mod web;

/// Re-export the types most callers need
pub use config::DashboardConfig;
pub use dashboard::{Dashboard, DashboardView, StatusReport, UploadReport};
pub use error::{DashboardError, IngestWarning};
pub use filter::{FilterRequest, FilterSelection};
pub use session::{Access, SessionState, UploadState};
