//! Folds the logical tables of every return in a [`FilerPeriodSet`] into one
//! [`MergedReturn`].

use crate::error::{ReconcileError, Result};
use crate::extractor::expected_keys;
use crate::schema::{FilerPeriodSet, LayoutVersion, LogicalTable, MergedReturn, TableKey};
use crate::utils::{format_amount, parse_amount_or_zero};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Cell-wise sum of `tables`.
///
/// The result is as tall as the tallest table, and each row as wide as the
/// widest table's row at that index. Column 0 (the label column) and the
/// header take the text of the first table that has the cell. Every other
/// cell is the sum of what the tables parse to at that position, written as
/// a number, with unparseable or missing cells counting as zero.
pub fn sum_tables(tables: &[&LogicalTable]) -> Option<LogicalTable> {
    let base = tables.first()?;
    let height = tables.iter().map(|t| t.height()).max().unwrap_or(0);

    for table in &tables[1..] {
        if table.height() != base.height() || table.width() != base.width() {
            debug!(
                "Table {}: shape {}x{} differs from {}x{}",
                base.key,
                table.height(),
                table.width(),
                base.height(),
                base.width()
            );
        }
    }

    let header_width = tables.iter().map(|t| t.header.len()).max().unwrap_or(0);
    let header = (0..header_width)
        .map(|col| first_text(tables.iter().map(|t| t.header.get(col))))
        .collect();

    let rows = (0..height)
        .map(|row| {
            let width = tables
                .iter()
                .filter_map(|t| t.rows.get(row))
                .map(Vec::len)
                .max()
                .unwrap_or(0);
            (0..width)
                .map(|col| {
                    if col == 0 {
                        first_text(tables.iter().map(|t| t.rows.get(row).and_then(|r| r.first())))
                    } else {
                        format_amount(cell_sum(tables, row, col))
                    }
                })
                .collect()
        })
        .collect();

    Some(LogicalTable::new(base.key, header, rows))
}

fn first_text<'a>(mut cells: impl Iterator<Item = Option<&'a String>>) -> String {
    cells.find_map(|cell| cell.cloned()).unwrap_or_default()
}

/// Sum of one position over `tables`, added in ascending order so the
/// result does not depend on the order of the tables.
fn cell_sum(tables: &[&LogicalTable], row: usize, col: usize) -> f64 {
    let mut values: Vec<f64> = tables
        .iter()
        .filter_map(|t| t.cell(row, col))
        .map(parse_amount_or_zero)
        .collect();
    values.sort_by(f64::total_cmp);
    values.iter().sum()
}

/// The one layout every return in the set shares.
pub fn common_layout(set: &FilerPeriodSet) -> Result<LayoutVersion> {
    let first = set.documents.first().ok_or_else(|| ReconcileError::NotFound {
        filer: set.filer.clone(),
        details: "no returns in the period set".to_string(),
    })?;

    match set.documents.iter().find(|d| d.layout != first.layout) {
        Some(other) => Err(ReconcileError::InconsistentLayout {
            document: other.source.clone(),
            expected: first.layout,
            found: other.layout,
        }),
        None => Ok(first.layout),
    }
}

/// Merges every return of `set`.
///
/// Identity tables come from the first return of the set, or from the
/// earliest return that has them when the first one does not. A table
/// missing from some returns is summed over the others; missing from the
/// only return in the set it is a [`ReconcileError::TableNotFound`].
pub fn merge_period_set(set: &FilerPeriodSet) -> Result<MergedReturn> {
    let layout = common_layout(set)?;
    let mut tables = BTreeMap::new();

    for key in expected_keys(layout) {
        let holders: Vec<&LogicalTable> = set.documents.iter().filter_map(|d| d.table(key)).collect();

        if holders.is_empty() {
            if let [only] = set.documents.as_slice() {
                return Err(ReconcileError::TableNotFound {
                    key,
                    document: only.source.clone(),
                });
            }
            warn!("Table {} missing from all {} returns of {}", key, set.documents.len(), set.filer);
            continue;
        }
        if holders.len() < set.documents.len() {
            warn!(
                "Table {} missing from {} of {} returns of {}; they contribute zero",
                key,
                set.documents.len() - holders.len(),
                set.documents.len(),
                set.filer
            );
        }

        let merged = if key.is_info() {
            match set.documents[0].table(key) {
                Some(first) => first.clone(),
                None => {
                    debug!("Table {} missing from the first return of {}; using a later one", key, set.filer);
                    holders[0].clone()
                }
            }
        } else {
            match sum_tables(&holders) {
                Some(table) => table,
                None => continue,
            }
        };
        tables.insert(key, merged);
    }

    info!(
        "Merged {} returns of {} into {} tables ({})",
        set.documents.len(),
        set.filer,
        tables.len(),
        layout
    );

    Ok(MergedReturn {
        layout,
        document_count: set.documents.len(),
        tables,
    })
}

/// Keys the merged return is expected to carry but does not.
pub fn missing_keys(merged: &MergedReturn) -> Vec<TableKey> {
    expected_keys(merged.layout)
        .filter(|key| !merged.tables.contains_key(key))
        .collect()
}
