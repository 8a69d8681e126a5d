use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::dataset::{EXPECTED, MACHINE, PIPE, RECORDED, RowRef};
use crate::error::DashboardError;
use crate::filter::{BLANK_FACET, FilterSelection, FilteredRows, facet_key};

/// How series are split when the subset spans several machines
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartLayout {
    /// One chart summing every selected machine, grouped by size
    ///
    /// The chart is a bar chart for one machine when exactly one machine is
    /// selected, and a line chart otherwise. The choice follows the
    /// selection, not the machines left after the other facets apply.
    Aggregate,
    /// One chart per machine, grouped by size
    PerMachine,
}

impl FromStr for ChartLayout {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "aggregate" => Ok(ChartLayout::Aggregate),
            "per_machine" => Ok(ChartLayout::PerMachine),
            other => Err(DashboardError::Config(format!("unknown chart layout '{}'", other))),
        }
    }
}

/// Rendering hint for the chart surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Grouped bars, one group per size
    Bar,
    /// One line per series across sizes
    Line,
}

/// Series a point belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SeriesKind {
    #[serde(rename = "EXPECTED")]
    Expected,
    #[serde(rename = "RECORDED")]
    Recorded,
}

impl SeriesKind {
    pub fn column(self) -> &'static str {
        match self {
            SeriesKind::Expected => EXPECTED,
            SeriesKind::Recorded => RECORDED,
        }
    }
}

/// One long-form `(category, series, value)` triple
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub category: String,
    pub series: SeriesKind,
    pub value: f64,
}

/// Data for one chart
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSeries {
    pub title: String,
    /// Machine the chart is restricted to, when it covers exactly one
    pub machine: Option<String>,
    pub kind: ChartKind,
    pub points: Vec<SeriesPoint>,
}

/// Reshape filtered rows into long-form chart series
///
/// Categories are sizes (`PIPE`), summed within each chart and sorted.
/// A series whose column is absent from the sheet is left out.
/// `selection` is the facet selection that produced `rows`.
pub fn shape(
    rows: &FilteredRows<'_>,
    selection: &FilterSelection,
    layout: ChartLayout,
) -> Vec<ChartSeries> {
    if rows.is_empty() {
        return Vec::new();
    }

    let dataset = rows.dataset();
    let series: Vec<SeriesKind> = [SeriesKind::Expected, SeriesKind::Recorded]
        .into_iter()
        .filter(|s| dataset.has_column(s.column()))
        .collect();

    match layout {
        ChartLayout::Aggregate => {
            let single = dataset
                .has_column(MACHINE)
                .then_some(&selection.machines)
                .filter(|selected| selected.len() == 1);
            let (title, machine, kind) = if let Some(selected) = single {
                let m = selected.iter().next().cloned();
                (
                    format!(
                        "Size-wise Expected vs Recorded Output - Machine {}",
                        m.as_deref().unwrap_or(BLANK_FACET)
                    ),
                    m,
                    ChartKind::Bar,
                )
            } else {
                (
                    "Size-wise Expected vs Recorded Output (All Machines)".to_string(),
                    None,
                    ChartKind::Line,
                )
            };
            vec![ChartSeries {
                title,
                machine,
                kind,
                points: size_points(rows.iter(), &series),
            }]
        }
        ChartLayout::PerMachine => rows
            .iter()
            .map(|row| key_of(&row, MACHINE))
            .collect::<BTreeSet<String>>()
            .into_iter()
            .map(|machine| {
                let points = size_points(
                    rows.iter().filter(|row| key_of(row, MACHINE) == machine),
                    &series,
                );
                ChartSeries {
                    title: format!("Size-wise Expected vs Recorded Output - Machine {}", machine),
                    machine: Some(machine),
                    kind: ChartKind::Bar,
                    points,
                }
            })
            .collect(),
    }
}

fn key_of(row: &RowRef<'_>, column: &str) -> String {
    row.get(column)
        .map(facet_key)
        .unwrap_or_else(|| BLANK_FACET.to_string())
}

fn size_points<'a>(
    rows: impl Iterator<Item = RowRef<'a>>,
    series: &[SeriesKind],
) -> Vec<SeriesPoint> {
    let mut totals: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in rows {
        let sums = totals
            .entry(key_of(&row, PIPE))
            .or_insert_with(|| vec![0.0; series.len()]);
        for (slot, kind) in sums.iter_mut().zip(series) {
            if let Some(value) = row.number(kind.column()) {
                *slot += value;
            }
        }
    }

    totals
        .into_iter()
        .flat_map(|(category, sums)| {
            series
                .iter()
                .zip(sums)
                .map(move |(kind, value)| SeriesPoint {
                    category: category.clone(),
                    series: *kind,
                    value,
                })
        })
        .collect()
}
