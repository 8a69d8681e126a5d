use serde::Serialize;
use thiserror::Error;

/// Failures that abort a single dashboard interaction.
///
/// None of these are fatal for the process: callers report them to the user
/// and keep serving the previous state.
#[derive(Error, Debug)]
pub enum DashboardError {
    /// The uploaded bytes could not be written to the storage slot
    #[error("failed to store upload at {path}: {source}")]
    UploadIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The stored or uploaded file is not a readable workbook
    #[error("failed to parse spreadsheet: {0}")]
    Parse(String),

    /// The upload surface handed over zero bytes
    #[error("no file data received")]
    EmptyUpload,

    /// The admin credential check rejected the request
    #[error("admin credentials required")]
    Unauthorized,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl DashboardError {
    pub(crate) fn upload_io(path: &std::path::Path, source: std::io::Error) -> Self {
        DashboardError::UploadIo {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Non-fatal conditions found while ingesting a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestWarning {
    /// The configured worksheet was not found; `used` was read instead
    MissingWorksheet { requested: String, used: String },
    /// An expected numeric column is absent; metrics built on it are undefined
    MissingColumn { column: String },
}

impl std::fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestWarning::MissingWorksheet { requested, used } => write!(
                f,
                "worksheet '{}' not found, loaded first sheet '{}' instead",
                requested, used
            ),
            IngestWarning::MissingColumn { column } => {
                write!(f, "column '{}' not found, dependent metrics are undefined", column)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
