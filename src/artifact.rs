//! The merged workbook handed to the report renderer, and its reader.
//!
//! Sheet `GSTR-3B_merged` holds the layout marker in A1 and then, for every
//! table, a `Table <section>` title row, the header row, the data rows and
//! one blank row. The record sheets follow with one row per return.

use crate::error::{ReconcileError, Result};
use crate::metrics::{InterestRecord, LateFeeRecord, MonthlyCreditBlock, ReconciliationReport};
use crate::schema::{LayoutVersion, LogicalTable, MergedReturn, TableKey};
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;
use umya_spreadsheet::{Spreadsheet, Worksheet};

pub const MERGED_FILE_NAME: &str = "GSTR-3B_merged.xlsx";
pub const RESULT_POINTS_FILE_NAME: &str = "GSTR-3B_result_points.json";

pub const MERGED_SHEET: &str = "GSTR-3B_merged";
pub const INTEREST_SHEET: &str = "Interest Calculation";
pub const LATE_FEE_SHEET: &str = "Late Fee Record";
pub const CREDIT_SHEET: &str = "Monthly ITC";

const TITLE_PREFIX: &str = "Table ";
const DOCUMENT_COUNT_LABEL: &str = "Returns merged";
const DATE_FORMAT: &str = "%d-%m-%Y";

const INTEREST_HEADERS: [&str; 9] = [
    "Financial Year",
    "Month",
    "Filing Date",
    "Due Date",
    "Days Late",
    "Tax Paid in Cash",
    "Calculated Interest",
    "Interest Paid in Cash",
    "Interest Due",
];

const LATE_FEE_HEADERS: [&str; 7] = [
    "Financial Year",
    "Month",
    "Filing Date",
    "Due Date",
    "Days Late",
    "Calculated Late Fee",
    "Applicable Late Fee",
];

const CREDIT_HEADERS: [&str; 5] = ["Financial Year", "Month", "Filing Date", "Due Date", "Ineligible"];

fn artifact_error(context: &str, e: impl std::fmt::Display) -> ReconcileError {
    ReconcileError::ArtifactError(format!("{}: {}", context, e))
}

fn put_text(sheet: &mut Worksheet, col: u32, row: u32, text: &str) {
    let cell = sheet.get_cell_mut((col, row));
    match text.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => {
            cell.set_value_number(number);
        }
        _ => {
            cell.set_value(text.to_string());
        }
    }
}

fn put_number(sheet: &mut Worksheet, col: u32, row: u32, value: f64) {
    sheet.get_cell_mut((col, row)).set_value_number(value);
}

fn put_row<S: AsRef<str>>(sheet: &mut Worksheet, row: u32, cells: &[S]) {
    for (idx, cell) in cells.iter().enumerate() {
        put_text(sheet, idx as u32 + 1, row, cell.as_ref());
    }
}

fn put_date(sheet: &mut Worksheet, col: u32, row: u32, date: NaiveDate) {
    sheet
        .get_cell_mut((col, row))
        .set_value(date.format(DATE_FORMAT).to_string());
}

fn write_merged_sheet(sheet: &mut Worksheet, merged: &MergedReturn) {
    sheet.get_cell_mut((1, 1)).set_value(merged.layout.marker().to_string());
    sheet.get_cell_mut((2, 1)).set_value(DOCUMENT_COUNT_LABEL.to_string());
    put_number(sheet, 3, 1, merged.document_count as f64);

    let mut row = 2u32;
    for (key, table) in &merged.tables {
        sheet
            .get_cell_mut((1, row))
            .set_value(format!("{}{}", TITLE_PREFIX, key.section()));
        row += 1;
        put_row(sheet, row, &table.header);
        row += 1;
        for data in &table.rows {
            put_row(sheet, row, data);
            row += 1;
        }
        row += 1;
    }
}

fn write_interest_sheet(sheet: &mut Worksheet, records: &[InterestRecord]) {
    put_row(sheet, 1, &INTEREST_HEADERS);
    for (idx, record) in records.iter().enumerate() {
        let row = idx as u32 + 2;
        put_text(sheet, 1, row, &record.financial_year);
        put_text(sheet, 2, row, &record.return_month);
        put_date(sheet, 3, row, record.filing_date);
        put_date(sheet, 4, row, record.due_date);
        put_number(sheet, 5, row, record.days_late as f64);
        put_number(sheet, 6, row, record.cash_paid);
        put_number(sheet, 7, row, record.calculated_interest);
        put_number(sheet, 8, row, record.interest_paid);
        put_number(sheet, 9, row, record.interest_due);
    }
}

fn write_late_fee_sheet(sheet: &mut Worksheet, records: &[LateFeeRecord]) {
    put_row(sheet, 1, &LATE_FEE_HEADERS);
    for (idx, record) in records.iter().enumerate() {
        let row = idx as u32 + 2;
        put_text(sheet, 1, row, &record.financial_year);
        put_text(sheet, 2, row, &record.return_month);
        put_date(sheet, 3, row, record.filing_date);
        put_date(sheet, 4, row, record.due_date);
        put_number(sheet, 5, row, record.days_late as f64);
        put_number(sheet, 6, row, record.calculated_fee);
        put_number(sheet, 7, row, record.applicable_fee);
    }
}

/// One block per return: a header row, then the availed-credit rows with
/// the period columns filled on the first row only.
fn write_credit_sheet(sheet: &mut Worksheet, blocks: &[MonthlyCreditBlock]) {
    let offset = CREDIT_HEADERS.len() as u32;
    let mut row = 1u32;

    for block in blocks {
        put_row(sheet, row, &CREDIT_HEADERS);
        for (idx, cell) in block.header.iter().enumerate() {
            put_text(sheet, offset + idx as u32 + 1, row, cell);
        }
        row += 1;

        put_text(sheet, 1, row, &block.financial_year);
        put_text(sheet, 2, row, &block.return_month);
        put_date(sheet, 3, row, block.filing_date);
        put_date(sheet, 4, row, block.cutoff_date);
        put_text(sheet, 5, row, if block.ineligible { "Yes" } else { "No" });

        for data in &block.rows {
            for (idx, cell) in data.iter().enumerate() {
                put_text(sheet, offset + idx as u32 + 1, row, cell);
            }
            row += 1;
        }
        if block.rows.is_empty() {
            row += 1;
        }
        row += 1;
    }
}

/// Builds the whole workbook in memory.
pub fn build_workbook(merged: &MergedReturn, report: &ReconciliationReport) -> Result<Spreadsheet> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();

    let sheet = book
        .new_sheet(MERGED_SHEET)
        .map_err(|e| artifact_error("creating merged sheet", e))?;
    write_merged_sheet(sheet, merged);

    let sheet = book
        .new_sheet(INTEREST_SHEET)
        .map_err(|e| artifact_error("creating interest sheet", e))?;
    write_interest_sheet(sheet, &report.interest_records);

    let sheet = book
        .new_sheet(LATE_FEE_SHEET)
        .map_err(|e| artifact_error("creating late fee sheet", e))?;
    write_late_fee_sheet(sheet, &report.late_fee_records);

    let sheet = book
        .new_sheet(CREDIT_SHEET)
        .map_err(|e| artifact_error("creating credit sheet", e))?;
    write_credit_sheet(sheet, &report.credit_blocks);

    Ok(book)
}

/// Writes through a temporary file in the target directory, then renames it
/// over `path`. On failure nothing is left at `path`.
fn persist_atomically(path: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let temp = tempfile::Builder::new()
        .prefix(".pending-")
        .suffix(".part")
        .tempfile_in(dir)?;
    write(temp.path())?;
    temp.persist(path).map_err(|e| ReconcileError::IoError(e.error))?;
    Ok(())
}

/// Writes the merged workbook to `path`.
pub fn write_artifact(path: &Path, merged: &MergedReturn, report: &ReconciliationReport) -> Result<()> {
    let book = build_workbook(merged, report)?;
    persist_atomically(path, |temp| {
        umya_spreadsheet::writer::xlsx::write(&book, temp).map_err(|e| artifact_error("writing workbook", e))
    })?;
    info!("Wrote {} ({} tables)", path.display(), merged.tables.len());
    Ok(())
}

/// Writes the report (result points, records, skipped returns) as JSON.
pub fn write_report_json(path: &Path, report: &ReconciliationReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    persist_atomically(path, |temp| Ok(std::fs::write(temp, json)?))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn cell_text(sheet: &Worksheet, col: u32, row: u32) -> String {
    sheet
        .get_cell((col, row))
        .map(|cell| cell.get_value().trim().to_string())
        .unwrap_or_default()
}

fn read_row(sheet: &Worksheet, row: u32, width: u32) -> Vec<String> {
    (1..=width).map(|col| cell_text(sheet, col, row)).collect()
}

/// Trims trailing blank rows and blank columns, then pads every row to the
/// table's width.
fn normalize(key: TableKey, mut header: Vec<String>, mut rows: Vec<Vec<String>>) -> LogicalTable {
    while rows.last().map(|r| r.iter().all(String::is_empty)).unwrap_or(false) {
        rows.pop();
    }

    let used = |cells: &Vec<String>| cells.iter().rposition(|c| !c.is_empty()).map(|i| i + 1).unwrap_or(0);
    let width = rows.iter().map(used).chain(std::iter::once(used(&header))).max().unwrap_or(0);

    header.resize(width, String::new());
    for row in &mut rows {
        row.resize(width, String::new());
    }
    LogicalTable::new(key, header, rows)
}

/// Reads a merged workbook back. The A1 marker gives the layout; tables are
/// found by their title rows.
pub fn load_merged_return(path: &Path) -> Result<MergedReturn> {
    if !path.exists() {
        return Err(ReconcileError::NotFound {
            filer: path.display().to_string(),
            details: "merged workbook does not exist".to_string(),
        });
    }

    let book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| artifact_error("reading workbook", e))?;
    let sheet = book
        .get_sheet_by_name(MERGED_SHEET)
        .ok_or_else(|| ReconcileError::ArtifactError(format!("sheet '{}' not found", MERGED_SHEET)))?;

    let marker = cell_text(sheet, 1, 1);
    let layout = LayoutVersion::from_marker(&marker)
        .ok_or_else(|| ReconcileError::ArtifactError(format!("unknown layout marker '{}'", marker)))?;
    let document_count = cell_text(sheet, 3, 1).parse::<f64>().map(|n| n as usize).unwrap_or(0);

    let highest_row = sheet.get_highest_row();
    let highest_col = sheet.get_highest_column();

    let titles: Vec<(u32, TableKey)> = (2..=highest_row)
        .filter_map(|row| {
            let text = cell_text(sheet, 1, row);
            let key = text.strip_prefix(TITLE_PREFIX).and_then(TableKey::from_section)?;
            Some((row, key))
        })
        .collect();

    let mut tables = BTreeMap::new();
    for (idx, &(title_row, key)) in titles.iter().enumerate() {
        let end = titles.get(idx + 1).map(|(row, _)| *row).unwrap_or(highest_row + 1);
        let header_row = title_row + 1;
        if header_row >= end {
            continue;
        }

        let header = read_row(sheet, header_row, highest_col);
        let rows = (header_row + 1..end).map(|row| read_row(sheet, row, highest_col)).collect();
        tables.insert(key, normalize(key, header, rows));
    }

    debug!("Loaded {} tables from {} ({})", tables.len(), path.display(), layout);
    Ok(MergedReturn {
        layout,
        document_count,
        tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::metrics::compute_report;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn sample() -> MergedReturn {
        let period = LogicalTable::new(
            TableKey::Period,
            strings(&["Particulars", "Details"]),
            vec![strings(&["Year", "2022-23"]), strings(&["Period", "April"])],
        );
        let credit = LogicalTable::new(
            TableKey::EligibleCredit,
            strings(&["Details", "Integrated tax", "Central tax", "State/UT tax", "Cess"]),
            vec![
                strings(&["A. ITC Available", "", "", "", ""]),
                strings(&["(1) Import of goods", "300", "0", "1000.5", "0"]),
            ],
        );
        MergedReturn {
            layout: LayoutVersion::Revised,
            document_count: 2,
            tables: [period, credit].into_iter().map(|t| (t.key, t)).collect(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filer").join(MERGED_FILE_NAME);
        let merged = sample();
        let report = compute_report(&ReconcilerConfig::default(), "filer", &merged, &[]);

        write_artifact(&path, &merged, &report).unwrap();
        let loaded = load_merged_return(&path).unwrap();

        assert_eq!(loaded.layout, LayoutVersion::Revised);
        assert_eq!(loaded.document_count, 2);
        assert_eq!(loaded.tables, merged.tables);
    }

    #[test]
    fn test_workbook_sheets() {
        let merged = sample();
        let report = compute_report(&ReconcilerConfig::default(), "filer", &merged, &[]);
        let book = build_workbook(&merged, &report).unwrap();

        for name in [MERGED_SHEET, INTEREST_SHEET, LATE_FEE_SHEET, CREDIT_SHEET] {
            assert!(book.get_sheet_by_name(name).is_some(), "missing sheet {}", name);
        }
        let sheet = book.get_sheet_by_name(MERGED_SHEET).unwrap();
        assert_eq!(cell_text(sheet, 1, 1), "NEW_FORMAT");
        assert_eq!(cell_text(sheet, 1, 2), "Table 1");
        assert_eq!(cell_text(sheet, 1, 3), "Particulars");
        // Two data rows, one spacer, then the next title.
        assert_eq!(cell_text(sheet, 1, 7), "Table 4");
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let path = blocker.join(MERGED_FILE_NAME);

        let merged = sample();
        let report = compute_report(&ReconcilerConfig::default(), "filer", &merged, &[]);
        assert!(write_artifact(&path, &merged, &report).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESULT_POINTS_FILE_NAME);
        let merged = sample();
        let report = compute_report(&ReconcilerConfig::default(), "filer", &merged, &[]);

        write_report_json(&path, &report).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["filer"], "filer");
        assert_eq!(json["result_points"]["import_of_goods_credit"]["status"], "available");
        assert_eq!(json["result_points"]["total_tax_payable"]["status"], "unavailable");
    }

    #[test]
    fn test_missing_workbook_is_not_found() {
        let err = load_merged_return(Path::new("/nonexistent/GSTR-3B_merged.xlsx")).unwrap_err();
        assert!(matches!(err, ReconcileError::NotFound { .. }));
    }
}
