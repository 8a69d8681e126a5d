use serde::Serialize;

use crate::dataset::{
    ACHIEVED_TOTAL_WEIGHT, EXPECTED, EXPECTED_WEIGHT, RECORDED, TOTAL_HOURS, ratio_pct,
};
use crate::filter::FilteredRows;

/// A KPI value that may be undefined
///
/// Undefined covers missing columns, empty subsets and zero denominators.
/// It serialises as `null` so clients can tell it apart from a real zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metric {
    Value(f64),
    Undefined,
}

impl Metric {
    fn from_option(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Metric::Value(v),
            _ => Metric::Undefined,
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::Undefined => None,
        }
    }

    /// Display placeholder: undefined shows as 0
    pub fn or_zero(self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Value(v) => write!(f, "{:.2}", v),
            Metric::Undefined => write!(f, "n/a"),
        }
    }
}

/// Summary metrics over a filtered subset
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KpiSummary {
    pub row_count: usize,
    pub avg_expected: Metric,
    pub avg_recorded: Metric,
    pub total_expected_weight: Metric,
    pub avg_expected_weight: Metric,
    pub total_achieved_weight: Metric,
    pub avg_achieved_weight: Metric,
    pub total_hours: Metric,
    /// avg(RECORDED) / avg(EXPECTED) × 100
    pub performance_pct: Metric,
    /// (avg(RECORDED) − avg(EXPECTED)) / avg(EXPECTED) × 100
    pub change_pct: Metric,
    /// avg(ACHIEVED TOTAL WEIGHT) / avg(EXPECTED WEIGHT) × 100
    pub achievement_pct: Metric,
}

/// Running sum/count of the non-missing values of one column
#[derive(Default)]
struct ColumnStats {
    present: bool,
    sum: f64,
    count: usize,
}

impl ColumnStats {
    fn collect(rows: &FilteredRows<'_>, column: &str) -> Self {
        let mut stats = ColumnStats {
            present: rows.dataset().has_column(column),
            ..Default::default()
        };
        if stats.present {
            for value in rows.iter().filter_map(|row| row.number(column)) {
                stats.sum += value;
                stats.count += 1;
            }
        }
        stats
    }

    fn sum(&self) -> Metric {
        if self.present {
            Metric::Value(self.sum)
        } else {
            Metric::Undefined
        }
    }

    fn mean(&self) -> Metric {
        if self.count == 0 {
            Metric::Undefined
        } else {
            Metric::Value(self.sum / self.count as f64)
        }
    }
}

/// Compute the KPI tiles for `rows`
///
/// Means skip missing cells. Sums over a present column with no values are
/// 0; sums over an absent column are undefined. Ratios are undefined when
/// either side is undefined or the denominator is zero.
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use prodboard::dataset::{CellValue, UploadedDataset};
/// use prodboard::filter::FilteredRows;
/// use prodboard::kpi::compute;
///
/// let ds = UploadedDataset::new(
///     vec!["EXPECTED".into(), "RECORDED".into()],
///     vec![vec![CellValue::Number(100.0), CellValue::Number(90.0)]],
///     "POWERBI SUMMARY",
///     Utc::now(),
/// );
/// let kpis = compute(&FilteredRows::all(&ds));
/// assert_eq!(kpis.performance_pct.value(), Some(90.0));
/// ```
pub fn compute(rows: &FilteredRows<'_>) -> KpiSummary {
    let expected = ColumnStats::collect(rows, EXPECTED);
    let recorded = ColumnStats::collect(rows, RECORDED);
    let expected_weight = ColumnStats::collect(rows, EXPECTED_WEIGHT);
    let achieved_weight = ColumnStats::collect(rows, ACHIEVED_TOTAL_WEIGHT);
    let hours = ColumnStats::collect(rows, TOTAL_HOURS);

    let avg_expected = expected.mean();
    let avg_recorded = recorded.mean();
    let avg_expected_weight = expected_weight.mean();
    let avg_achieved_weight = achieved_weight.mean();

    KpiSummary {
        row_count: rows.len(),
        avg_expected,
        avg_recorded,
        total_expected_weight: expected_weight.sum(),
        avg_expected_weight,
        total_achieved_weight: achieved_weight.sum(),
        avg_achieved_weight,
        total_hours: hours.sum(),
        performance_pct: ratio(avg_recorded, avg_expected, ratio_pct),
        change_pct: ratio(avg_recorded, avg_expected, |num, den| ratio_pct(num - den, den)),
        achievement_pct: ratio(avg_achieved_weight, avg_expected_weight, ratio_pct),
    }
}

fn ratio<F>(numerator: Metric, denominator: Metric, f: F) -> Metric
where
    F: Fn(f64, f64) -> Option<f64>,
{
    match (numerator, denominator) {
        (Metric::Value(num), Metric::Value(den)) => Metric::from_option(f(num, den)),
        _ => Metric::Undefined,
    }
}
