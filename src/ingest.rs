use calamine::{Data, Reader, Xlsx};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use crate::config::DashboardConfig;
use crate::dataset::{CellValue, UploadedDataset};
use crate::error::{DashboardError, IngestWarning, Result};

/// Outcome of a successful ingestion
#[derive(Clone, Debug)]
pub struct Ingested {
    pub dataset: UploadedDataset,
    pub warnings: Vec<IngestWarning>,
    /// Length of the workbook bytes that were parsed
    pub byte_len: u64,
}

/// Modification time and size of the stored upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoredStamp {
    pub modified: DateTime<Utc>,
    pub len: u64,
}

/// Parse workbook bytes into a coerced dataset
///
/// Reads the configured worksheet, or the first worksheet when it is absent
/// and fallback is enabled. The first non-empty row supplies the headers.
///
/// # Arguments
/// * `bytes` - Raw `.xlsx` contents
/// * `config` - Worksheet name and fallback policy
/// * `uploaded_at` - Timestamp stamped on the resulting dataset
///
/// # Returns
/// * `Result<Ingested>` - The dataset plus non-fatal warnings, or `Parse`
pub fn parse_workbook(
    bytes: &[u8],
    config: &DashboardConfig,
    uploaded_at: DateTime<Utc>,
) -> Result<Ingested> {
    let mut workbook =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| DashboardError::Parse(e.to_string()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut warnings = Vec::new();

    let sheet_name = if sheet_names.iter().any(|s| s == &config.worksheet) {
        config.worksheet.clone()
    } else if config.fallback_to_first_sheet {
        let first = sheet_names
            .first()
            .cloned()
            .ok_or_else(|| DashboardError::Parse("workbook contains no worksheets".to_string()))?;
        warn!(
            "worksheet '{}' not found, falling back to '{}'",
            config.worksheet, first
        );
        warnings.push(IngestWarning::MissingWorksheet {
            requested: config.worksheet.clone(),
            used: first.clone(),
        });
        first
    } else {
        return Err(DashboardError::Parse(format!(
            "worksheet '{}' not found",
            config.worksheet
        )));
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| DashboardError::Parse(format!("failed to read sheet '{}': {}", sheet_name, e)))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(convert_cell).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.is_missing()));

    let columns = match rows.next() {
        Some(header) => header_names(&header),
        None => Vec::new(),
    };
    let body: Vec<Vec<CellValue>> = rows.collect();

    let mut dataset = UploadedDataset::new(columns, body, sheet_name, uploaded_at);
    for column in dataset.coerce_numeric_columns() {
        warnings.push(IngestWarning::MissingColumn {
            column: column.to_string(),
        });
    }

    debug!(
        "parsed sheet '{}': {} columns, {} rows",
        dataset.sheet_name,
        dataset.columns.len(),
        dataset.len()
    );

    Ok(Ingested {
        dataset,
        warnings,
        byte_len: bytes.len() as u64,
    })
}

/// Validate `bytes` and atomically replace the upload slot with them
///
/// Parsing happens before anything touches the disk, so a corrupt upload
/// leaves the previous file in place. The bytes are written to a temporary
/// file in the same directory and renamed over `config.upload_path()`.
pub fn store_upload(bytes: &[u8], config: &DashboardConfig) -> Result<Ingested> {
    if bytes.is_empty() {
        return Err(DashboardError::EmptyUpload);
    }

    // Validate first; the timestamp is replaced with the file's mtime below
    let mut ingested = parse_workbook(bytes, config, Utc::now())?;

    let path = config.upload_path();
    fs::create_dir_all(&config.data_dir).map_err(|e| DashboardError::upload_io(&path, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".upload-")
        .suffix(".xlsx")
        .tempfile_in(&config.data_dir)
        .map_err(|e| DashboardError::upload_io(&path, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| DashboardError::upload_io(&path, e))?;
    tmp.persist(&path)
        .map_err(|e| DashboardError::upload_io(&path, e.error))?;

    let modified = stored_stamp(&path)
        .map_err(|e| DashboardError::upload_io(&path, e))?
        .map_or_else(Utc::now, |stamp| stamp.modified);
    ingested.dataset.uploaded_at = modified;

    info!(
        "stored upload ({} bytes, {} rows) at {}",
        bytes.len(),
        ingested.dataset.len(),
        path.display()
    );
    Ok(ingested)
}

/// Read and parse the file currently in the upload slot
pub fn load_stored(path: &Path, config: &DashboardConfig) -> Result<Ingested> {
    let modified = stored_stamp(path)
        .map_err(|e| DashboardError::upload_io(path, e))?
        .map_or_else(Utc::now, |stamp| stamp.modified);
    let bytes = fs::read(path).map_err(|e| DashboardError::upload_io(path, e))?;
    parse_workbook(&bytes, config, modified)
}

/// Modification time and size of `path`, or `None` when the file does not exist
pub fn stored_stamp(path: &Path) -> std::io::Result<Option<StoredStamp>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(StoredStamp {
            modified: DateTime::<Utc>::from(meta.modified()?),
            len: meta.len(),
        })),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove the upload slot; a missing file is not an error
pub fn remove_stored(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) if s.trim().is_empty() => CellValue::Missing,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        _ => CellValue::Missing,
    }
}

/// Header text for each column; blank headers get a positional placeholder
fn header_names(header: &[CellValue]) -> Vec<String> {
    header
        .iter()
        .enumerate()
        .map(|(idx, cell)| match cell.display() {
            name if name.is_empty() => format!("Unnamed: {}", idx),
            name => name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn workbook_bytes(sheet: &str) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let ws = workbook.add_worksheet();
        ws.set_name(sheet).unwrap();
        ws.write_string(0, 0, " MACHINE ").unwrap();
        ws.write_string(0, 1, "EXPECTED").unwrap();
        ws.write_string(1, 0, "M1").unwrap();
        ws.write_string(1, 1, "oops").unwrap();
        ws.write_string(2, 0, "M2").unwrap();
        ws.write_number(2, 1, 40.0).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn reads_named_sheet_and_trims_headers() {
        let config = DashboardConfig::default();
        let bytes = workbook_bytes("POWERBI SUMMARY");
        let ingested = parse_workbook(&bytes, &config, Utc::now()).unwrap();

        assert_eq!(ingested.dataset.columns, vec!["MACHINE", "EXPECTED"]);
        assert_eq!(ingested.dataset.len(), 2);
        assert_eq!(ingested.byte_len, bytes.len() as u64);
        assert_eq!(ingested.dataset.rows[0][1], CellValue::Missing);
        assert_eq!(ingested.dataset.rows[1][1], CellValue::Number(40.0));
        assert!(ingested
            .warnings
            .iter()
            .all(|w| matches!(w, IngestWarning::MissingColumn { .. })));
    }

    #[test]
    fn falls_back_to_first_sheet_with_warning() {
        let config = DashboardConfig::default();
        let ingested = parse_workbook(&workbook_bytes("Sheet1"), &config, Utc::now()).unwrap();

        assert_eq!(ingested.dataset.sheet_name, "Sheet1");
        assert!(ingested.warnings.contains(&IngestWarning::MissingWorksheet {
            requested: "POWERBI SUMMARY".to_string(),
            used: "Sheet1".to_string(),
        }));
    }

    #[test]
    fn missing_sheet_without_fallback_fails() {
        let config = DashboardConfig {
            fallback_to_first_sheet: false,
            ..DashboardConfig::default()
        };
        let err = parse_workbook(&workbook_bytes("Sheet1"), &config, Utc::now()).unwrap_err();
        assert!(matches!(err, DashboardError::Parse(_)));
    }

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        let config = DashboardConfig::default();
        let err = parse_workbook(b"definitely not a zip", &config, Utc::now()).unwrap_err();
        assert!(matches!(err, DashboardError::Parse(_)));
    }

    #[test]
    fn blank_headers_get_placeholders() {
        let names = header_names(&[CellValue::Text("A".into()), CellValue::Missing]);
        assert_eq!(names, vec!["A".to_string(), "Unnamed: 1".to_string()]);
    }

    #[test]
    fn missing_file_has_no_mtime() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(stored_stamp(&dir.path().join("nope.xlsx")).unwrap(), None);
        assert!(remove_stored(&dir.path().join("nope.xlsx")).is_ok());
    }
}
