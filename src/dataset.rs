use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

pub const MONTH: &str = "MONTH";
pub const MACHINE: &str = "MACHINE";
pub const PIPE: &str = "PIPE";
pub const EXPECTED: &str = "EXPECTED";
pub const RECORDED: &str = "RECORDED";
pub const EXPECTED_WEIGHT: &str = "EXPECTED WEIGHT";
pub const ACHIEVED_TOTAL_WEIGHT: &str = "ACHIEVED TOTAL WEIGHT";
pub const TOTAL_HOURS: &str = "TOTAL HOURS";

/// Derived column names, used by exports and the row table
pub const PERFORMANCE_PCT: &str = "PERFORMANCE (%)";
pub const CHANGE_PCT: &str = "% CHANGE";

/// Columns coerced to numbers on ingestion
pub const NUMERIC_COLUMNS: [&str; 5] = [
    EXPECTED,
    RECORDED,
    EXPECTED_WEIGHT,
    ACHIEVED_TOTAL_WEIGHT,
    TOTAL_HOURS,
];

/// A single worksheet cell after ingestion
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Missing,
}

impl CellValue {
    /// Numeric value, if the cell holds a finite number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// Coerce to a number the way a lenient spreadsheet reader would:
    /// numbers stay, numeric text is parsed, everything else becomes missing.
    pub fn coerce_numeric(&self) -> CellValue {
        match self {
            CellValue::Number(n) if n.is_finite() => CellValue::Number(*n),
            CellValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => CellValue::Number(n),
                _ => CellValue::Missing,
            },
            _ => CellValue::Missing,
        }
    }

    /// Text used for facet matching and display.
    ///
    /// Whole numbers drop their fractional part so a size typed as `2`
    /// reads `2` rather than `2.0`.
    pub fn display(&self) -> String {
        match self {
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Missing => String::new(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            CellValue::Text(s) => serializer.serialize_str(s),
            _ => serializer.serialize_none(),
        }
    }
}

/// Rows read from one worksheet of an uploaded workbook
#[derive(Clone, Debug)]
pub struct UploadedDataset {
    /// Trimmed header names, in sheet order
    pub columns: Vec<String>,

    /// Data rows; every row has exactly `columns.len()` cells
    pub rows: Vec<Vec<CellValue>>,

    /// Worksheet the rows were read from
    pub sheet_name: String,

    /// Modification time of the stored upload
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedDataset {
    pub fn new(
        columns: Vec<String>,
        mut rows: Vec<Vec<CellValue>>,
        sheet_name: impl Into<String>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        for row in rows.iter_mut() {
            row.resize(columns.len(), CellValue::Missing);
        }
        Self {
            columns,
            rows,
            sheet_name: sheet_name.into(),
            uploaded_at,
        }
    }

    /// Index of `name` among the headers (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Coerce every present numeric column in place and report absent ones
    ///
    /// # Returns
    /// * `Vec<&'static str>` - Numeric columns missing from the header row
    pub fn coerce_numeric_columns(&mut self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for name in NUMERIC_COLUMNS {
            match self.column_index(name) {
                Some(idx) => {
                    for row in self.rows.iter_mut() {
                        row[idx] = row[idx].coerce_numeric();
                    }
                }
                None => missing.push(name),
            }
        }
        missing
    }

    /// Borrow a row through a name-aware view
    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|cells| RowRef {
            dataset: self,
            cells,
        })
    }
}

/// A row of an [`UploadedDataset`] with lookup by column name
#[derive(Clone, Copy)]
pub struct RowRef<'a> {
    dataset: &'a UploadedDataset,
    cells: &'a [CellValue],
}

impl<'a> RowRef<'a> {
    pub fn get(&self, column: &str) -> Option<&'a CellValue> {
        self.dataset
            .column_index(column)
            .and_then(|idx| self.cells.get(idx))
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(CellValue::as_number)
    }

    pub fn cells(&self) -> &'a [CellValue] {
        self.cells
    }

    /// `RECORDED / EXPECTED × 100`, undefined when either is missing or EXPECTED is zero
    pub fn performance_pct(&self) -> Option<f64> {
        let expected = self.number(EXPECTED)?;
        let recorded = self.number(RECORDED)?;
        ratio_pct(recorded, expected)
    }

    /// `(RECORDED − EXPECTED) / EXPECTED × 100`, undefined under the same conditions
    pub fn change_pct(&self) -> Option<f64> {
        let expected = self.number(EXPECTED)?;
        let recorded = self.number(RECORDED)?;
        ratio_pct(recorded - expected, expected)
    }
}

/// `numerator / denominator × 100`, or `None` for a zero denominator or a
/// non-finite result.
pub fn ratio_pct(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return None;
    }
    let pct = numerator / denominator * 100.0;
    pct.is_finite().then_some(pct)
}
