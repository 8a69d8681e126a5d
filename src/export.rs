use rust_xlsxwriter::{Format, Workbook};

use crate::dataset::{CHANGE_PCT, CellValue, PERFORMANCE_PCT};
use crate::error::{DashboardError, Result};
use crate::filter::FilteredRows;

/// Worksheet name used for exported workbooks
pub const EXPORT_SHEET: &str = "FILTERED DATA";

/// Header row of an export: the sheet's columns plus the derived ones
fn export_header(rows: &FilteredRows<'_>) -> Vec<String> {
    let mut header = rows.dataset().columns.clone();
    header.push(PERFORMANCE_PCT.to_string());
    header.push(CHANGE_PCT.to_string());
    header
}

/// Cells of each exported row, derived metrics appended
fn export_rows(rows: &FilteredRows<'_>) -> Vec<Vec<CellValue>> {
    rows.iter()
        .map(|row| {
            let mut cells = row.cells().to_vec();
            for derived in [row.performance_pct(), row.change_pct()] {
                cells.push(derived.map(CellValue::Number).unwrap_or(CellValue::Missing));
            }
            cells
        })
        .collect()
}

/// Convert the filtered rows to CSV
///
/// Missing cells and undefined derived metrics are written as empty fields.
/// Fields containing commas, quotes or newlines are quoted.
///
/// # Arguments
/// * `rows` - The filtered subset to export
///
/// # Returns
/// * `String` - CSV content including a header row
pub fn to_csv(rows: &FilteredRows<'_>) -> String {
    let mut csv_content = String::new();

    push_csv_line(&mut csv_content, export_header(rows).iter().map(String::as_str));
    for cells in export_rows(rows) {
        let fields: Vec<String> = cells
            .iter()
            .map(|cell| match cell {
                CellValue::Number(n) => n.to_string(),
                CellValue::Text(s) => s.clone(),
                CellValue::Missing => String::new(),
            })
            .collect();
        push_csv_line(&mut csv_content, fields.iter().map(String::as_str));
    }

    csv_content
}

fn push_csv_line<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, value) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains(',') || value.contains('"') || value.contains('\n') {
            let escaped = value.replace('"', "\"\"");
            out.push_str(&format!("\"{}\"", escaped));
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

/// Convert the filtered rows to an XLSX workbook
///
/// # Arguments
/// * `rows` - The filtered subset to export
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content or an `Export` error
pub fn to_xlsx(rows: &FilteredRows<'_>) -> Result<Vec<u8>> {
    let xlsx_err = |e: rust_xlsxwriter::XlsxError| DashboardError::Export(e.to_string());

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(EXPORT_SHEET).map_err(xlsx_err)?;

    let bold = Format::new().set_bold();
    for (col, name) in export_header(rows).iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, name, &bold)
            .map_err(xlsx_err)?;
    }

    for (r, cells) in export_rows(rows).iter().enumerate() {
        let row = (r + 1) as u32;
        for (c, cell) in cells.iter().enumerate() {
            let col = c as u16;
            match cell {
                CellValue::Number(n) => {
                    worksheet.write_number(row, col, *n).map_err(xlsx_err)?;
                }
                CellValue::Text(s) => {
                    worksheet.write_string(row, col, s).map_err(xlsx_err)?;
                }
                CellValue::Missing => {}
            }
        }
    }

    workbook.save_to_buffer().map_err(xlsx_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::UploadedDataset;
    use chrono::Utc;

    fn sample() -> UploadedDataset {
        UploadedDataset::new(
            vec!["MACHINE".into(), "EXPECTED".into(), "RECORDED".into()],
            vec![
                vec![
                    CellValue::Text("M1, north".into()),
                    CellValue::Number(100.0),
                    CellValue::Number(90.0),
                ],
                vec![
                    CellValue::Text("M2".into()),
                    CellValue::Number(0.0),
                    CellValue::Number(5.0),
                ],
            ],
            "POWERBI SUMMARY",
            Utc::now(),
        )
    }

    #[test]
    fn csv_includes_derived_columns_and_escapes() {
        let ds = sample();
        let csv = to_csv(&FilteredRows::all(&ds));
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "MACHINE,EXPECTED,RECORDED,PERFORMANCE (%),% CHANGE");
        assert_eq!(lines[1], "\"M1, north\",100,90,90,-10");
        // Zero EXPECTED leaves the derived fields empty
        assert_eq!(lines[2], "M2,0,5,,");
    }

    #[test]
    fn xlsx_export_reads_back() {
        use calamine::{Reader, Xlsx};

        let ds = sample();
        let bytes = to_xlsx(&FilteredRows::all(&ds)).unwrap();
        let mut workbook = Xlsx::new(std::io::Cursor::new(bytes)).unwrap();
        let range = workbook.worksheet_range(EXPORT_SHEET).unwrap();

        assert_eq!(range.get_size(), (3, 5));
    }
}
