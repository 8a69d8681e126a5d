use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::dataset::{CellValue, MACHINE, MONTH, PIPE, RowRef, UploadedDataset};

/// Facet value given to rows whose facet cell is empty
pub const BLANK_FACET: &str = "(blank)";

/// Categorical columns the dashboard filters on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Month,
    Machine,
    Size,
}

impl Facet {
    pub const ALL: [Facet; 3] = [Facet::Month, Facet::Machine, Facet::Size];

    /// Worksheet column backing this facet
    pub fn column(self) -> &'static str {
        match self {
            Facet::Month => MONTH,
            Facet::Machine => MACHINE,
            Facet::Size => PIPE,
        }
    }
}

/// Facet key of a cell
pub fn facet_key(cell: &CellValue) -> String {
    match cell.display() {
        key if key.is_empty() => BLANK_FACET.to_string(),
        key => key,
    }
}

/// Distinct values of `facet`, sorted; `None` when the column is absent
pub fn facet_values(dataset: &UploadedDataset, facet: Facet) -> Option<BTreeSet<String>> {
    let idx = dataset.column_index(facet.column())?;
    Some(dataset.rows.iter().map(|row| facet_key(&row[idx])).collect())
}

/// Selected values per facet
///
/// An empty set selects nothing. A facet whose column is absent from the
/// dataset is ignored whatever its set holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FilterSelection {
    pub months: BTreeSet<String>,
    pub machines: BTreeSet<String>,
    pub sizes: BTreeSet<String>,
}

impl FilterSelection {
    /// Every available value of every facet present in `dataset`
    pub fn all(dataset: &UploadedDataset) -> Self {
        let values = |facet| facet_values(dataset, facet).unwrap_or_default();
        Self {
            months: values(Facet::Month),
            machines: values(Facet::Machine),
            sizes: values(Facet::Size),
        }
    }

    pub fn get(&self, facet: Facet) -> &BTreeSet<String> {
        match facet {
            Facet::Month => &self.months,
            Facet::Machine => &self.machines,
            Facet::Size => &self.sizes,
        }
    }

    pub fn get_mut(&mut self, facet: Facet) -> &mut BTreeSet<String> {
        match facet {
            Facet::Month => &mut self.months,
            Facet::Machine => &mut self.machines,
            Facet::Size => &mut self.sizes,
        }
    }
}

/// A partial selection as it arrives from a client
///
/// `None` for a facet means "not specified" and resolves to every value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FilterRequest {
    pub months: Option<Vec<String>>,
    pub machines: Option<Vec<String>>,
    pub sizes: Option<Vec<String>>,
}

impl FilterRequest {
    /// Parse comma-separated lists; an empty string selects nothing
    pub fn from_lists(months: Option<&str>, machines: Option<&str>, sizes: Option<&str>) -> Self {
        let split = |list: Option<&str>| {
            list.map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            })
        };
        Self {
            months: split(months),
            machines: split(machines),
            sizes: split(sizes),
        }
    }

    /// Fill unspecified facets with all of `dataset`'s values
    pub fn resolve(&self, dataset: &UploadedDataset) -> FilterSelection {
        let mut selection = FilterSelection::all(dataset);
        for (facet, requested) in [
            (Facet::Month, &self.months),
            (Facet::Machine, &self.machines),
            (Facet::Size, &self.sizes),
        ] {
            if let Some(values) = requested {
                *selection.get_mut(facet) = values.iter().cloned().collect();
            }
        }
        selection
    }
}

/// Rows of a dataset that passed a [`FilterSelection`]
#[derive(Clone)]
pub struct FilteredRows<'a> {
    dataset: &'a UploadedDataset,
    indices: Vec<usize>,
}

impl<'a> FilteredRows<'a> {
    /// Every row, unfiltered
    pub fn all(dataset: &'a UploadedDataset) -> Self {
        Self {
            dataset,
            indices: (0..dataset.len()).collect(),
        }
    }

    pub fn dataset(&self) -> &'a UploadedDataset {
        self.dataset
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'a>> + '_ {
        let dataset = self.dataset;
        self.indices.iter().filter_map(move |&idx| dataset.row(idx))
    }
}

/// Keep the rows whose month, machine and size are all selected
///
/// Facets run in that order; a facet whose column is absent is skipped
/// rather than treated as matching nothing.
pub fn apply<'a>(dataset: &'a UploadedDataset, selection: &FilterSelection) -> FilteredRows<'a> {
    let active: Vec<(usize, &BTreeSet<String>)> = Facet::ALL
        .iter()
        .filter_map(|&facet| {
            dataset
                .column_index(facet.column())
                .map(|idx| (idx, selection.get(facet)))
        })
        .collect();

    let indices = dataset
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            active
                .iter()
                .all(|(idx, selected)| selected.contains(&facet_key(&row[*idx])))
        })
        .map(|(i, _)| i)
        .collect();

    FilteredRows { dataset, indices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn sample() -> UploadedDataset {
        UploadedDataset::new(
            vec!["MONTH".into(), "MACHINE".into(), "PIPE".into(), "EXPECTED".into()],
            vec![
                vec![text("Jan"), text("M1"), text("2in"), CellValue::Number(100.0)],
                vec![text("Jan"), text("M2"), text("3in"), CellValue::Number(200.0)],
                vec![text("Feb"), text("M1"), CellValue::Number(4.0), CellValue::Number(300.0)],
                vec![CellValue::Missing, text("M2"), text("2in"), CellValue::Number(400.0)],
            ],
            "POWERBI SUMMARY",
            Utc::now(),
        )
    }

    #[test]
    fn default_selection_keeps_every_row() {
        let ds = sample();
        let selection = FilterSelection::all(&ds);
        assert_eq!(apply(&ds, &selection).len(), ds.len());
        assert!(selection.months.contains(BLANK_FACET));
        assert!(selection.sizes.contains("4"));
    }

    #[test]
    fn facets_combine_conjunctively() {
        let ds = sample();
        let mut selection = FilterSelection::all(&ds);
        selection.months = ["Jan".to_string()].into_iter().collect();
        selection.machines = ["M1".to_string()].into_iter().collect();

        let rows = apply(&ds, &selection);
        assert_eq!(rows.indices(), &[0]);
    }

    #[test]
    fn empty_set_selects_nothing() {
        let ds = sample();
        let mut selection = FilterSelection::all(&ds);
        selection.sizes.clear();
        assert!(apply(&ds, &selection).is_empty());
    }

    #[test]
    fn absent_month_column_is_skipped() {
        let ds = UploadedDataset::new(
            vec!["MACHINE".into(), "PIPE".into()],
            vec![vec![text("M1"), text("2in")], vec![text("M2"), text("3in")]],
            "POWERBI SUMMARY",
            Utc::now(),
        );
        let mut selection = FilterSelection::all(&ds);
        assert!(selection.months.is_empty());
        selection.machines = ["M2".to_string()].into_iter().collect();

        let rows = apply(&ds, &selection);
        assert_eq!(rows.indices(), &[1]);
        assert_eq!(facet_values(&ds, Facet::Month), None);
    }

    #[test]
    fn request_resolves_unspecified_facets_to_all() {
        let ds = sample();
        let request = FilterRequest::from_lists(None, Some("M2, "), Some(""));
        let selection = request.resolve(&ds);

        assert_eq!(selection.months, FilterSelection::all(&ds).months);
        assert_eq!(selection.machines.len(), 1);
        assert!(selection.sizes.is_empty());
    }
}
