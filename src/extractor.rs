//! Positional reconstruction of logical tables from raw page grids.
//!
//! Every layout version has a fixed map from canonical table key to a raw
//! grid (or, for table 4, a pair of grids split over the page break) and a
//! row/column window inside it. Nothing here looks at header text: positions
//! are trusted as-is.

use crate::classifier::classify;
use crate::schema::{FilingDocument, LayoutVersion, LogicalTable, RawGrid, TableKey};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Header used for table 6.1, whose two physical header rows do not survive extraction.
pub const PAYMENT_COLUMNS: [&str; 9] = [
    "Description",
    "Total Tax Payable",
    "Integrated Tax paid through ITC",
    "Central Tax paid through ITC",
    "State/UT Tax paid through ITC",
    "Cess paid through ITC",
    "Tax paid in cash",
    "Interest paid in cash",
    "Late fee paid in cash",
];

const INFO_COLUMNS: [&str; 2] = ["Particulars", "Details"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSource {
    Single(usize),
    /// A table continued on the next page; the second fragment's first row
    /// was taken for a header and belongs to the data.
    Split { first: usize, second: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSpec {
    /// The first row of the window is the header.
    FirstRow,
    /// Fixed header; every row of the window is data.
    Fixed(&'static [&'static str]),
}

/// Half-open window into the physical rows (header included) of a raw grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub first_row: usize,
    pub end_row: Option<usize>,
    pub first_col: usize,
    pub end_col: Option<usize>,
}

impl Window {
    pub const fn columns(first_col: usize, end_col: usize) -> Self {
        Self {
            first_row: 0,
            end_row: None,
            first_col,
            end_col: Some(end_col),
        }
    }

    pub const fn all() -> Self {
        Self {
            first_row: 0,
            end_row: None,
            first_col: 0,
            end_col: None,
        }
    }

    pub const fn from_row(self, first_row: usize) -> Self {
        Self { first_row, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TablePosition {
    pub key: TableKey,
    pub source: GridSource,
    pub window: Window,
    pub header: HeaderSpec,
}

const fn single(key: TableKey, grid: usize, window: Window, header: HeaderSpec) -> TablePosition {
    TablePosition {
        key,
        source: GridSource::Single(grid),
        window,
        header,
    }
}

const fn period(grid: usize) -> TablePosition {
    single(TableKey::Period, grid, Window::columns(0, 2), HeaderSpec::Fixed(&INFO_COLUMNS))
}

const fn taxpayer(grid: usize) -> TablePosition {
    single(TableKey::Taxpayer, grid, Window::columns(0, 2), HeaderSpec::Fixed(&INFO_COLUMNS))
}

const fn outward_liability(grid: usize) -> TablePosition {
    single(TableKey::OutwardLiability, grid, Window::columns(0, 6), HeaderSpec::FirstRow)
}

const fn eligible_credit(first: usize) -> TablePosition {
    TablePosition {
        key: TableKey::EligibleCredit,
        source: GridSource::Split {
            first,
            second: first + 1,
        },
        window: Window::columns(0, 5),
        header: HeaderSpec::FirstRow,
    }
}

const fn tax_payment(grid: usize) -> TablePosition {
    single(
        TableKey::TaxPayment,
        grid,
        Window::columns(0, 9).from_row(2),
        HeaderSpec::Fixed(&PAYMENT_COLUMNS),
    )
}

const fn plain(key: TableKey, grid: usize) -> TablePosition {
    single(key, grid, Window::all(), HeaderSpec::FirstRow)
}

const LEGACY_POSITIONS: [TablePosition; 8] = [
    period(0),
    taxpayer(1),
    outward_liability(2),
    plain(TableKey::InterStateSupplies, 3),
    eligible_credit(4),
    plain(TableKey::ExemptInward, 6),
    plain(TableKey::InterestLateFee, 7),
    tax_payment(8),
];

const REVISED_POSITIONS: [TablePosition; 9] = [
    period(0),
    taxpayer(1),
    outward_liability(2),
    plain(TableKey::EcoSupplies, 3),
    plain(TableKey::InterStateSupplies, 4),
    eligible_credit(5),
    plain(TableKey::ExemptInward, 7),
    plain(TableKey::InterestLateFee, 8),
    tax_payment(9),
];

const REVISED_WITH_BREAKUP_POSITIONS: [TablePosition; 10] = [
    period(0),
    taxpayer(1),
    outward_liability(2),
    plain(TableKey::EcoSupplies, 3),
    plain(TableKey::InterStateSupplies, 4),
    eligible_credit(5),
    plain(TableKey::ExemptInward, 7),
    plain(TableKey::InterestLateFee, 8),
    tax_payment(9),
    plain(TableKey::InterestBreakup, 10),
];

/// The position map of `layout`, in output order.
pub fn table_positions(layout: LayoutVersion) -> &'static [TablePosition] {
    match layout {
        LayoutVersion::Legacy => &LEGACY_POSITIONS,
        LayoutVersion::Revised => &REVISED_POSITIONS,
        LayoutVersion::RevisedWithBreakup => &REVISED_WITH_BREAKUP_POSITIONS,
    }
}

/// Canonical keys a return of `layout` is expected to carry.
pub fn expected_keys(layout: LayoutVersion) -> impl Iterator<Item = TableKey> {
    table_positions(layout).iter().map(|p| p.key)
}

/// Pads or truncates `row` to `width` cells.
fn realign(row: &[String], width: usize) -> Vec<String> {
    let mut aligned: Vec<String> = row.iter().take(width).cloned().collect();
    aligned.resize(width, String::new());
    aligned
}

/// Joins a table split across a page break.
///
/// The second fragment's header row is really its first data row: it is put
/// back in front of that fragment's rows, every second-fragment row is
/// realigned to the first fragment's columns, and the result carries the
/// first fragment's header.
pub fn repair_split_table(first: &RawGrid, second: &RawGrid) -> RawGrid {
    let width = first.width();
    let mut rows = first.rows.clone();
    rows.extend(second.physical_rows().map(|row| realign(row, width)));
    RawGrid::new(first.page, first.header.clone(), rows)
}

fn apply_window(position: &TablePosition, grid: &RawGrid) -> Option<LogicalTable> {
    let window = position.window;
    let physical: Vec<&Vec<String>> = grid.physical_rows().collect();
    let end_row = window.end_row.unwrap_or(physical.len()).min(physical.len());
    if window.first_row >= end_row {
        return None;
    }

    let width = grid.width();
    let end_col = window.end_col.unwrap_or(width);
    let slice = |row: &Vec<String>| -> Vec<String> {
        (window.first_col..end_col)
            .map(|col| row.get(col).cloned().unwrap_or_default())
            .collect()
    };

    let mut rows: Vec<Vec<String>> = physical[window.first_row..end_row]
        .iter()
        .map(|row| slice(row))
        .collect();

    let header = match position.header {
        HeaderSpec::FirstRow => rows.remove(0),
        HeaderSpec::Fixed(columns) => columns.iter().map(|c| c.to_string()).collect(),
    };

    Some(LogicalTable::new(position.key, header, rows))
}

/// Slices `grids` into logical tables according to `layout`'s position map.
/// Keys whose grids are missing are left out.
pub fn extract_tables(grids: &[RawGrid], layout: LayoutVersion) -> BTreeMap<TableKey, LogicalTable> {
    let mut tables = BTreeMap::new();

    for position in table_positions(layout) {
        let grid = match position.source {
            GridSource::Single(index) => grids.get(index).cloned(),
            GridSource::Split { first, second } => match (grids.get(first), grids.get(second)) {
                (Some(a), Some(b)) => Some(repair_split_table(a, b)),
                (Some(a), None) => {
                    warn!(
                        "Table {} continuation grid {} missing; using the first fragment only",
                        position.key, second
                    );
                    Some(a.clone())
                }
                _ => None,
            },
        };

        let Some(grid) = grid else {
            debug!("Table {} not present ({} grids available)", position.key, grids.len());
            continue;
        };

        match apply_window(position, &grid) {
            Some(table) => {
                tables.insert(position.key, table);
            }
            None => debug!("Table {} window is empty", position.key),
        }
    }

    tables
}

/// Classifies and extracts one return.
pub fn extract_document(source: impl Into<String>, grids: &[RawGrid]) -> FilingDocument {
    let source = source.into();
    let layout = classify(&source, grids.len());
    let tables = extract_tables(grids, layout);
    debug!("{}: extracted {} tables using {}", source, tables.len(), layout);

    let mut document = FilingDocument {
        source,
        layout,
        raw_grid_count: grids.len(),
        tables,
        period: None,
    };
    match document.read_period() {
        Ok(period) => document.period = Some(period),
        Err(e) => warn!("{}: return period unreadable: {}", document.source, e),
    }
    document
}
