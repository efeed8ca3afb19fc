use crate::error::MetricError;
use crate::utils::{parse_amount, parse_amount_or_zero, parse_filing_date};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Range};

/// One of the four parallel tax components tracked throughout a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaxHead {
    #[schemars(description = "Integrated tax (IGST)")]
    Igst,
    #[schemars(description = "Central tax (CGST)")]
    Cgst,
    #[schemars(description = "State/UT tax (SGST)")]
    Sgst,
    #[schemars(description = "Compensation cess")]
    Cess,
}

impl TaxHead {
    pub const ALL: [TaxHead; 4] = [TaxHead::Igst, TaxHead::Cgst, TaxHead::Sgst, TaxHead::Cess];

    /// Position of the head within every per-head column or row block.
    pub fn index(self) -> usize {
        match self {
            TaxHead::Igst => 0,
            TaxHead::Cgst => 1,
            TaxHead::Sgst => 2,
            TaxHead::Cess => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaxHead::Igst => "igst",
            TaxHead::Cgst => "cgst",
            TaxHead::Sgst => "sgst",
            TaxHead::Cess => "cess",
        }
    }
}

impl fmt::Display for TaxHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaxHead::Igst => "IGST",
            TaxHead::Cgst => "CGST",
            TaxHead::Sgst => "SGST",
            TaxHead::Cess => "CESS",
        })
    }
}

/// A value per tax head, always kept in IGST, CGST, SGST, Cess order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaxHeads {
    pub igst: f64,
    pub cgst: f64,
    pub sgst: f64,
    pub cess: f64,
}

impl TaxHeads {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Builds a value by evaluating `f` for every head.
    pub fn try_from_fn<E>(mut f: impl FnMut(TaxHead) -> std::result::Result<f64, E>) -> std::result::Result<Self, E> {
        Ok(Self {
            igst: f(TaxHead::Igst)?,
            cgst: f(TaxHead::Cgst)?,
            sgst: f(TaxHead::Sgst)?,
            cess: f(TaxHead::Cess)?,
        })
    }

    pub fn from_fn(mut f: impl FnMut(TaxHead) -> f64) -> Self {
        Self {
            igst: f(TaxHead::Igst),
            cgst: f(TaxHead::Cgst),
            sgst: f(TaxHead::Sgst),
            cess: f(TaxHead::Cess),
        }
    }

    pub fn get(&self, head: TaxHead) -> f64 {
        match head {
            TaxHead::Igst => self.igst,
            TaxHead::Cgst => self.cgst,
            TaxHead::Sgst => self.sgst,
            TaxHead::Cess => self.cess,
        }
    }

    pub fn get_mut(&mut self, head: TaxHead) -> &mut f64 {
        match head {
            TaxHead::Igst => &mut self.igst,
            TaxHead::Cgst => &mut self.cgst,
            TaxHead::Sgst => &mut self.sgst,
            TaxHead::Cess => &mut self.cess,
        }
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self::from_fn(|head| f(self.get(head)))
    }

    pub fn total(&self) -> f64 {
        self.igst + self.cgst + self.sgst + self.cess
    }
}

impl Add for TaxHeads {
    type Output = TaxHeads;

    fn add(self, rhs: TaxHeads) -> TaxHeads {
        TaxHeads::from_fn(|head| self.get(head) + rhs.get(head))
    }
}

impl AddAssign for TaxHeads {
    fn add_assign(&mut self, rhs: TaxHeads) {
        *self = *self + rhs;
    }
}

/// The structural version of the government-issued return template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayoutVersion {
    #[schemars(description = "Original template without table 3.1.1 (9 table regions)")]
    Legacy,
    #[schemars(description = "Template with table 3.1.1 for e-commerce operator supplies (10 table regions)")]
    Revised,
    #[schemars(
        description = "Revised template with the trailing interest-computation breakup table (11 table regions)"
    )]
    RevisedWithBreakup,
}

impl LayoutVersion {
    pub const NEWEST: LayoutVersion = LayoutVersion::RevisedWithBreakup;

    /// Marker written to cell A1 of the merged artifact.
    pub fn marker(self) -> &'static str {
        match self {
            LayoutVersion::Legacy => "OLD_FORMAT",
            LayoutVersion::Revised => "NEW_FORMAT",
            LayoutVersion::RevisedWithBreakup => "NEW_FORMAT_WITH_BREAKUP",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.trim() {
            "OLD_FORMAT" => Some(LayoutVersion::Legacy),
            "NEW_FORMAT" => Some(LayoutVersion::Revised),
            "NEW_FORMAT_WITH_BREAKUP" => Some(LayoutVersion::RevisedWithBreakup),
            _ => None,
        }
    }
}

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Canonical identifier of a logical table in the return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum TableKey {
    /// 1: financial year and return period.
    Period,
    /// 2: GSTIN, legal name, trade name, ARN and date of ARN.
    Taxpayer,
    /// 3.1: details of outward supplies and inward supplies liable to reverse charge.
    OutwardLiability,
    /// 3.1.1: supplies notified under section 9(5).
    EcoSupplies,
    /// 3.2: inter-state supplies.
    InterStateSupplies,
    /// 4: eligible ITC.
    EligibleCredit,
    /// 5: exempt, nil-rated and non-GST inward supplies.
    ExemptInward,
    /// 5.1: interest and late fee.
    InterestLateFee,
    /// 6.1: payment of tax.
    TaxPayment,
    /// Breakup of tax liability declared, for interest computation.
    InterestBreakup,
}

impl TableKey {
    pub const ALL: [TableKey; 10] = [
        TableKey::Period,
        TableKey::Taxpayer,
        TableKey::OutwardLiability,
        TableKey::EcoSupplies,
        TableKey::InterStateSupplies,
        TableKey::EligibleCredit,
        TableKey::ExemptInward,
        TableKey::InterestLateFee,
        TableKey::TaxPayment,
        TableKey::InterestBreakup,
    ];

    pub fn section(self) -> &'static str {
        match self {
            TableKey::Period => "1",
            TableKey::Taxpayer => "2",
            TableKey::OutwardLiability => "3.1",
            TableKey::EcoSupplies => "3.1.1",
            TableKey::InterStateSupplies => "3.2",
            TableKey::EligibleCredit => "4",
            TableKey::ExemptInward => "5",
            TableKey::InterestLateFee => "5.1",
            TableKey::TaxPayment => "6.1",
            TableKey::InterestBreakup => "IB",
        }
    }

    pub fn from_section(section: &str) -> Option<Self> {
        let section = section.trim();
        Self::ALL.into_iter().find(|key| key.section() == section)
    }

    /// Identity tables are copied from the first return, never summed.
    pub fn is_info(self) -> bool {
        matches!(self, TableKey::Period | TableKey::Taxpayer)
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// One rectangular table region detected on a page. The first physical row
/// of the region is kept separately as the inferred header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGrid {
    /// 1-indexed page the region was found on.
    pub page: u32,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawGrid {
    pub fn new(page: u32, header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { page, header, rows }
    }

    /// Builds a grid from physical rows, promoting the first one to header.
    pub fn from_rows(page: u32, mut rows: Vec<Vec<String>>) -> Self {
        if rows.is_empty() {
            return Self::new(page, Vec::new(), Vec::new());
        }
        let header = rows.remove(0);
        Self::new(page, header, rows)
    }

    /// Number of physical rows, header included.
    pub fn row_count(&self) -> usize {
        self.rows.len() + 1
    }

    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0)
    }

    /// Physical rows with the header back in first position.
    pub fn physical_rows(&self) -> impl Iterator<Item = &Vec<String>> {
        std::iter::once(&self.header).chain(self.rows.iter())
    }
}

/// A named table reconstructed from one or more raw grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalTable {
    pub key: TableKey,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl LogicalTable {
    pub fn new(key: TableKey, header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { key, header, rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(col)).map(String::as_str)
    }

    /// Cell text, failing when the position does not exist.
    pub fn text(&self, row: usize, col: usize) -> std::result::Result<&str, MetricError> {
        self.cell(row, col).ok_or(MetricError::MissingCell {
            key: self.key,
            row,
            col,
        })
    }

    /// Numeric cell value; the position must exist and hold a number.
    pub fn number(&self, row: usize, col: usize) -> std::result::Result<f64, MetricError> {
        let text = self.text(row, col)?;
        parse_amount(text).ok_or_else(|| MetricError::NotNumeric {
            key: self.key,
            row,
            col,
            value: text.to_string(),
        })
    }

    /// Numeric cell value where blanks and text count as zero; the position must exist.
    pub fn coerced(&self, row: usize, col: usize) -> std::result::Result<f64, MetricError> {
        self.text(row, col).map(parse_amount_or_zero)
    }

    /// Row index counted from the end (`1` is the last row).
    pub fn from_end(&self, back: usize) -> std::result::Result<usize, MetricError> {
        self.height()
            .checked_sub(back)
            .ok_or(MetricError::MissingCell {
                key: self.key,
                row: 0,
                col: 0,
            })
    }

    /// Coerced sum of `col` over `rows`.
    pub fn column_sum(&self, rows: Range<usize>, col: usize) -> std::result::Result<f64, MetricError> {
        rows.map(|row| self.coerced(row, col)).sum()
    }

    /// Coerced sum of a whole column, skipping rows too short to reach it.
    pub fn full_column_sum(&self, col: usize) -> f64 {
        self.rows
            .iter()
            .filter_map(|row| row.get(col))
            .map(|value| parse_amount_or_zero(value))
            .sum()
    }

    /// Coerced sum of every cell of `row` from `first_col` on.
    pub fn row_sum_from(&self, row: usize, first_col: usize) -> std::result::Result<f64, MetricError> {
        let cells = self.rows.get(row).ok_or(MetricError::MissingCell {
            key: self.key,
            row,
            col: first_col,
        })?;
        Ok(cells
            .iter()
            .skip(first_col)
            .map(|value| parse_amount_or_zero(value))
            .sum())
    }
}

/// One uploaded return for one filer and one return period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingDocument {
    /// File name (or other label) the return was loaded from.
    pub source: String,
    pub layout: LayoutVersion,
    pub raw_grid_count: usize,
    pub tables: BTreeMap<TableKey, LogicalTable>,
    /// Read once at extraction; `None` when the info tables do not yield one.
    #[serde(default)]
    pub period: Option<ReturnPeriod>,
}

impl FilingDocument {
    pub fn table(&self, key: TableKey) -> Option<&LogicalTable> {
        self.tables.get(&key)
    }

    pub fn read_period(&self) -> std::result::Result<ReturnPeriod, MetricError> {
        ReturnPeriod::read(self.table(TableKey::Period), self.table(TableKey::Taxpayer))
    }
}

/// Period identity of a single return, read from its info tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReturnPeriod {
    pub financial_year: String,
    pub return_month: String,
    pub filing_date: NaiveDate,
}

impl ReturnPeriod {
    /// Year and month from the period table; the filing date is the last
    /// cell of the taxpayer table.
    pub fn read(
        period: Option<&LogicalTable>,
        taxpayer: Option<&LogicalTable>,
    ) -> std::result::Result<Self, MetricError> {
        let period = period.ok_or(MetricError::MissingTable(TableKey::Period))?;
        let taxpayer = taxpayer.ok_or(MetricError::MissingTable(TableKey::Taxpayer))?;

        let financial_year = period.text(0, 1)?.trim().to_string();
        let return_month = period.text(1, 1)?.trim().to_string();

        let last_row = taxpayer.from_end(1)?;
        let filing_text = taxpayer
            .rows
            .get(last_row)
            .and_then(|row| row.last())
            .ok_or(MetricError::MissingCell {
                key: TableKey::Taxpayer,
                row: last_row,
                col: 0,
            })?;
        let filing_date = parse_filing_date(filing_text).map_err(|e| MetricError::Invalid(e.to_string()))?;

        Ok(Self {
            financial_year,
            return_month,
            filing_date,
        })
    }
}

/// The subset of one return's tables needed for date-dependent metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestMatrix {
    pub source: String,
    #[serde(default)]
    pub return_period: Option<ReturnPeriod>,
    pub period: Option<LogicalTable>,
    pub taxpayer: Option<LogicalTable>,
    pub liability: Option<LogicalTable>,
    pub credit: Option<LogicalTable>,
    pub payment: Option<LogicalTable>,
}

impl InterestMatrix {
    pub fn from_document(document: &FilingDocument) -> Self {
        let table = |key| document.table(key).cloned();
        Self {
            source: document.source.clone(),
            return_period: document.period.clone(),
            period: table(TableKey::Period),
            taxpayer: table(TableKey::Taxpayer),
            liability: table(TableKey::OutwardLiability),
            credit: table(TableKey::EligibleCredit),
            payment: table(TableKey::TaxPayment),
        }
    }
}

/// All returns of one filer folded into a single run.
#[derive(Debug, Clone, Default)]
pub struct FilerPeriodSet {
    pub filer: String,
    pub documents: Vec<FilingDocument>,
}

impl FilerPeriodSet {
    pub fn new(filer: impl Into<String>) -> Self {
        Self {
            filer: filer.into(),
            documents: Vec::new(),
        }
    }

    pub fn push(&mut self, document: FilingDocument) {
        self.documents.push(document);
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn interest_matrices(&self) -> Vec<InterestMatrix> {
        self.documents.iter().map(InterestMatrix::from_document).collect()
    }
}

/// Cell-wise sum of every return in a [`FilerPeriodSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedReturn {
    pub layout: LayoutVersion,
    pub document_count: usize,
    pub tables: BTreeMap<TableKey, LogicalTable>,
}

impl MergedReturn {
    pub fn table(&self, key: TableKey) -> std::result::Result<&LogicalTable, MetricError> {
        self.tables.get(&key).ok_or(MetricError::MissingTable(key))
    }
}
