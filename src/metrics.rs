//! Result points derived from a merged return and the per-return interest
//! matrices.
//!
//! Every point is computed on its own: a missing table or a bad cell makes
//! that point [`ResultPoint::Unavailable`] and nothing else. The
//! date-dependent points walk the returns one by one, and a return whose
//! period or filing date cannot be read is skipped for that point only.

use crate::config::ReconcilerConfig;
use crate::error::{MetricError, ReconcileError};
use crate::rules::{DueDateRules, DuePurpose};
use crate::schema::{InterestMatrix, LayoutVersion, LogicalTable, MergedReturn, ReturnPeriod, TableKey, TaxHead, TaxHeads};
use crate::utils::{days_late, round2};
use chrono::NaiveDate;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

type MetricResult<T> = std::result::Result<T, MetricError>;

// Row positions in table 3.1.
const OUTWARD_TAXABLE: usize = 0;
const OUTWARD_ZERO_RATED: usize = 1;
const OUTWARD_NIL_EXEMPT: usize = 2;
const INWARD_REVERSE_CHARGE: usize = 3;
const OUTWARD_NON_GST: usize = 4;
const TAXABLE_VALUE_COL: usize = 1;
const FIRST_TAX_COL: usize = 2;

// Row positions in table 4.
const IMPORT_OF_GOODS: usize = 1;
const REVERSE_CHARGE_CREDIT: usize = 3;
const ISD_CREDIT: usize = 4;
const NET_CREDIT: usize = 9;
/// Rows A(1)..A(5): credit availed in the period.
const AVAILED_ROWS: std::ops::Range<usize> = 1..6;
/// A(1), A(2), A(4), A(5): the credit a proportional reversal applies to.
const REVERSIBLE_ROWS: [usize; 4] = [1, 2, 4, 5];

// Columns in table 6.1.
const PAYABLE_COL: usize = 1;
const CASH_TAX_COL: usize = 6;
const CASH_INTEREST_COL: usize = 7;
const CASH_LATE_FEE_COL: usize = 8;

/// The closed catalogue of result points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultPointKey {
    EstimatedItcReversal,
    ReverseChargeItcGap,
    ReverseChargePaymentGap,
    ReverseChargeTaxTotal,
    OutwardAndReverseChargeTax,
    ExemptAndNonGstValue,
    AdjustedTurnover,
    TaxableTurnoverAce,
    ImportOfGoodsCredit,
    IsdCredit,
    NetCreditAvailable,
    TotalTaxPayable,
    AnnualReturnLateFee,
    IneligibleCreditLateFiling,
    InterestDue,
    LateFeeTotal,
    LateFeePaidInCash,
    CashLiabilityShortfall,
}

impl ResultPointKey {
    pub const ALL: [ResultPointKey; 18] = [
        ResultPointKey::EstimatedItcReversal,
        ResultPointKey::ReverseChargeItcGap,
        ResultPointKey::ReverseChargePaymentGap,
        ResultPointKey::ReverseChargeTaxTotal,
        ResultPointKey::OutwardAndReverseChargeTax,
        ResultPointKey::ExemptAndNonGstValue,
        ResultPointKey::AdjustedTurnover,
        ResultPointKey::TaxableTurnoverAce,
        ResultPointKey::ImportOfGoodsCredit,
        ResultPointKey::IsdCredit,
        ResultPointKey::NetCreditAvailable,
        ResultPointKey::TotalTaxPayable,
        ResultPointKey::AnnualReturnLateFee,
        ResultPointKey::IneligibleCreditLateFiling,
        ResultPointKey::InterestDue,
        ResultPointKey::LateFeeTotal,
        ResultPointKey::LateFeePaidInCash,
        ResultPointKey::CashLiabilityShortfall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultPointKey::EstimatedItcReversal => "estimated_itc_reversal",
            ResultPointKey::ReverseChargeItcGap => "reverse_charge_itc_gap",
            ResultPointKey::ReverseChargePaymentGap => "reverse_charge_payment_gap",
            ResultPointKey::ReverseChargeTaxTotal => "reverse_charge_tax_total",
            ResultPointKey::OutwardAndReverseChargeTax => "outward_and_reverse_charge_tax",
            ResultPointKey::ExemptAndNonGstValue => "exempt_and_non_gst_value",
            ResultPointKey::AdjustedTurnover => "adjusted_turnover",
            ResultPointKey::TaxableTurnoverAce => "taxable_turnover_ace",
            ResultPointKey::ImportOfGoodsCredit => "import_of_goods_credit",
            ResultPointKey::IsdCredit => "isd_credit",
            ResultPointKey::NetCreditAvailable => "net_credit_available",
            ResultPointKey::TotalTaxPayable => "total_tax_payable",
            ResultPointKey::AnnualReturnLateFee => "annual_return_late_fee",
            ResultPointKey::IneligibleCreditLateFiling => "ineligible_credit_late_filing",
            ResultPointKey::InterestDue => "interest_due",
            ResultPointKey::LateFeeTotal => "late_fee_total",
            ResultPointKey::LateFeePaidInCash => "late_fee_paid_in_cash",
            ResultPointKey::CashLiabilityShortfall => "cash_liability_shortfall",
        }
    }

    /// Whether the point carries one value per tax head.
    pub fn is_per_head(self) -> bool {
        matches!(
            self,
            ResultPointKey::EstimatedItcReversal
                | ResultPointKey::ReverseChargeItcGap
                | ResultPointKey::ReverseChargePaymentGap
                | ResultPointKey::ImportOfGoodsCredit
                | ResultPointKey::IsdCredit
                | ResultPointKey::TotalTaxPayable
                | ResultPointKey::IneligibleCreditLateFiling
                | ResultPointKey::InterestDue
                | ResultPointKey::CashLiabilityShortfall
        )
    }
}

impl fmt::Display for ResultPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MetricValue {
    PerHead(TaxHeads),
    Amount(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultPoint {
    Available { value: MetricValue },
    Unavailable { reason: String },
}

impl ResultPoint {
    pub fn value(&self) -> Option<&MetricValue> {
        match self {
            ResultPoint::Available { value } => Some(value),
            ResultPoint::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ResultPoint::Available { .. })
    }
}

/// Every computed point, keyed by the closed catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ResultPoints(BTreeMap<ResultPointKey, ResultPoint>);

impl ResultPoints {
    pub fn insert(&mut self, key: ResultPointKey, point: ResultPoint) {
        self.0.insert(key, point);
    }

    pub fn get(&self, key: ResultPointKey) -> Option<&ResultPoint> {
        self.0.get(&key)
    }

    pub fn per_head(&self, key: ResultPointKey) -> Option<TaxHeads> {
        match self.get(key)?.value()? {
            MetricValue::PerHead(heads) => Some(*heads),
            MetricValue::Amount(_) => None,
        }
    }

    pub fn amount(&self, key: ResultPointKey) -> Option<f64> {
        match self.get(key)?.value()? {
            MetricValue::Amount(value) => Some(*value),
            MetricValue::PerHead(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResultPointKey, &ResultPoint)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flat renderer-facing view: per-head points expand to `<key>_<head>`,
    /// unavailable points map to `None`. Every catalogue key is present.
    pub fn to_flat_map(&self) -> BTreeMap<String, Option<f64>> {
        let mut flat = BTreeMap::new();

        for key in ResultPointKey::ALL {
            let value = self.get(key).and_then(ResultPoint::value);
            if key.is_per_head() {
                for head in TaxHead::ALL {
                    let cell = match value {
                        Some(MetricValue::PerHead(heads)) => Some(heads.get(head)),
                        _ => None,
                    };
                    flat.insert(format!("{}_{}", key.as_str(), head.as_str()), cell);
                }
            } else {
                let cell = match value {
                    Some(MetricValue::Amount(amount)) => Some(*amount),
                    _ => None,
                };
                flat.insert(key.as_str().to_string(), cell);
            }
        }

        flat
    }
}

/// Who filed, as printed on the first return of the set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FilerIdentity {
    pub financial_year: String,
    pub gstin: String,
    pub legal_name: String,
    pub trade_name: String,
}

/// One row of the "Interest Calculation" sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InterestRecord {
    pub financial_year: String,
    pub return_month: String,
    pub filing_date: NaiveDate,
    pub due_date: NaiveDate,
    pub days_late: i64,
    pub cash_paid: f64,
    pub calculated_interest: f64,
    pub interest_paid: f64,
    /// Calculated less paid; may be negative.
    pub interest_due: f64,
}

/// One row of the "Late Fee Record" sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LateFeeRecord {
    pub financial_year: String,
    pub return_month: String,
    pub filing_date: NaiveDate,
    pub due_date: NaiveDate,
    pub days_late: i64,
    pub calculated_fee: f64,
    pub applicable_fee: f64,
}

/// One return's availed-credit rows, as listed on the "Monthly ITC" sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyCreditBlock {
    pub financial_year: String,
    pub return_month: String,
    pub filing_date: NaiveDate,
    pub cutoff_date: NaiveDate,
    pub ineligible: bool,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A return left out of one date-dependent point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedDocument {
    pub source: String,
    pub metric: ResultPointKey,
    pub reason: String,
}

/// Everything one run derives for a filer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReconciliationReport {
    pub filer: String,
    pub layout: LayoutVersion,
    pub document_count: usize,
    pub identity: FilerIdentity,
    pub result_points: ResultPoints,
    pub interest_records: Vec<InterestRecord>,
    pub late_fee_records: Vec<LateFeeRecord>,
    pub credit_blocks: Vec<MonthlyCreditBlock>,
    pub skipped: Vec<SkippedDocument>,
}

/// Running total over the returns of a set.
struct Accumulated<T, R> {
    total: T,
    records: Vec<R>,
    skipped: Vec<SkippedDocument>,
}

impl<T: Copy, R> Accumulated<T, R> {
    /// Available unless there were returns and none of them could be evaluated.
    fn point(&self, wrap: impl FnOnce(T) -> MetricValue) -> MetricResult<MetricValue> {
        match self.skipped.first() {
            Some(first) if self.records.is_empty() => Err(MetricError::Invalid(format!(
                "no return could be evaluated ({}: {})",
                first.source, first.reason
            ))),
            _ => Ok(wrap(self.total)),
        }
    }
}

fn accumulate<T, R>(
    metric: ResultPointKey,
    matrices: &[InterestMatrix],
    mut evaluate: impl FnMut(&InterestMatrix) -> MetricResult<(R, T)>,
) -> Accumulated<T, R>
where
    T: AddAssign + Default,
{
    let mut acc = Accumulated {
        total: T::default(),
        records: Vec::new(),
        skipped: Vec::new(),
    };

    for matrix in matrices {
        match evaluate(matrix) {
            Ok((record, contribution)) => {
                acc.total += contribution;
                acc.records.push(record);
            }
            Err(e) => {
                warn!("{}: skipped for {}: {}", matrix.source, metric, e);
                acc.skipped.push(SkippedDocument {
                    source: matrix.source.clone(),
                    metric,
                    reason: e.to_string(),
                });
            }
        }
    }

    acc
}

fn invalid(e: ReconcileError) -> MetricError {
    MetricError::Invalid(e.to_string())
}

fn required(table: &Option<LogicalTable>, key: TableKey) -> MetricResult<&LogicalTable> {
    table.as_ref().ok_or(MetricError::MissingTable(key))
}

/// Period identity and filing date of one return, as read at extraction
/// when available.
pub fn return_period(matrix: &InterestMatrix) -> MetricResult<ReturnPeriod> {
    match &matrix.return_period {
        Some(period) => Ok(period.clone()),
        None => ReturnPeriod::read(matrix.period.as_ref(), matrix.taxpayer.as_ref()),
    }
}

/// Filer identity from the merged info tables; absent cells read as empty.
pub fn filer_identity(merged: &MergedReturn) -> FilerIdentity {
    let cell = |key: TableKey, row: usize| -> String {
        merged
            .table(key)
            .ok()
            .and_then(|t| t.cell(row, 1))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    FilerIdentity {
        financial_year: cell(TableKey::Period, 0),
        gstin: cell(TableKey::Taxpayer, 0),
        legal_name: cell(TableKey::Taxpayer, 1),
        trade_name: cell(TableKey::Taxpayer, 2),
    }
}

/// Payment-table rows of `head` in the (A) and (B) blocks.
fn head_rows(head: TaxHead) -> [usize; 2] {
    [1 + head.index(), 6 + head.index()]
}

fn head_sum(table: &LogicalTable, head: TaxHead, col: usize) -> MetricResult<f64> {
    head_rows(head)
        .into_iter()
        .map(|row| table.coerced(row, col))
        .sum()
}

pub struct MetricsEngine<'a> {
    config: &'a ReconcilerConfig,
    rules: DueDateRules,
}

impl<'a> MetricsEngine<'a> {
    pub fn new(config: &'a ReconcilerConfig) -> Self {
        Self {
            config,
            rules: config.due_date_rules(),
        }
    }

    /// Computes every point of the catalogue.
    pub fn compute(&self, filer: &str, merged: &MergedReturn, matrices: &[InterestMatrix]) -> ReconciliationReport {
        let mut points = ResultPoints::default();
        let mut record = |key: ResultPointKey, result: MetricResult<MetricValue>| {
            let point = match result {
                Ok(value) => {
                    debug!("{}: {:?}", key, value);
                    ResultPoint::Available { value }
                }
                Err(e) => {
                    warn!("Result point {} unavailable for {}: {}", key, filer, e);
                    ResultPoint::Unavailable { reason: e.to_string() }
                }
            };
            points.insert(key, point);
        };

        record(ResultPointKey::EstimatedItcReversal, self.estimated_itc_reversal(merged));
        record(ResultPointKey::ReverseChargeItcGap, self.reverse_charge_itc_gap(merged));
        record(ResultPointKey::ReverseChargePaymentGap, self.reverse_charge_payment_gap(merged));
        record(ResultPointKey::ReverseChargeTaxTotal, self.reverse_charge_tax_total(merged));
        record(ResultPointKey::OutwardAndReverseChargeTax, self.outward_and_reverse_charge_tax(merged));
        record(ResultPointKey::ExemptAndNonGstValue, self.exempt_and_non_gst_value(merged));
        record(ResultPointKey::AdjustedTurnover, self.adjusted_turnover(merged));
        record(ResultPointKey::TaxableTurnoverAce, self.taxable_turnover_ace(merged));
        record(ResultPointKey::ImportOfGoodsCredit, self.credit_row(merged, IMPORT_OF_GOODS));
        record(ResultPointKey::IsdCredit, self.credit_row(merged, ISD_CREDIT));
        record(ResultPointKey::NetCreditAvailable, self.net_credit_available(merged));
        record(ResultPointKey::TotalTaxPayable, self.total_tax_payable(merged));
        record(ResultPointKey::AnnualReturnLateFee, self.annual_return_late_fee(merged));
        record(ResultPointKey::LateFeePaidInCash, self.late_fee_paid_in_cash(merged));

        let ineligible = self.ineligible_credit(matrices);
        record(
            ResultPointKey::IneligibleCreditLateFiling,
            ineligible.point(|t| MetricValue::PerHead(t.map(round2))),
        );

        let interest = self.interest(matrices);
        record(
            ResultPointKey::InterestDue,
            interest.point(|t| MetricValue::PerHead(t.map(round2))),
        );

        let late_fee = self.late_fee(matrices);
        record(ResultPointKey::LateFeeTotal, late_fee.point(|t| MetricValue::Amount(round2(t))));

        let shortfall = self.cash_shortfall(matrices);
        record(
            ResultPointKey::CashLiabilityShortfall,
            shortfall.point(|t| MetricValue::PerHead(t.map(round2))),
        );

        let skipped: Vec<SkippedDocument> = [ineligible.skipped, interest.skipped, late_fee.skipped, shortfall.skipped]
            .into_iter()
            .flatten()
            .collect();

        info!(
            "{}: {} of {} result points available, {} return evaluations skipped",
            filer,
            points.iter().filter(|(_, p)| p.is_available()).count(),
            ResultPointKey::ALL.len(),
            skipped.len()
        );

        ReconciliationReport {
            filer: filer.to_string(),
            layout: merged.layout,
            document_count: merged.document_count,
            identity: filer_identity(merged),
            result_points: points,
            interest_records: interest.records,
            late_fee_records: late_fee.records,
            credit_blocks: ineligible.records,
            skipped,
        }
    }

    // Turnover figures from the taxable-value column of table 3.1.

    fn taxable_value(&self, liability: &LogicalTable, row: usize) -> MetricResult<f64> {
        liability.coerced(row, TAXABLE_VALUE_COL)
    }

    /// a + b + c + e: turnover the reversal ratio and the annual late fee use.
    fn total_turnover(&self, liability: &LogicalTable) -> MetricResult<f64> {
        Ok(self.taxable_value(liability, OUTWARD_TAXABLE)?
            + self.taxable_value(liability, OUTWARD_ZERO_RATED)?
            + self.taxable_value(liability, OUTWARD_NIL_EXEMPT)?
            + self.taxable_value(liability, OUTWARD_NON_GST)?)
    }

    pub fn estimated_itc_reversal(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let credit = merged.table(TableKey::EligibleCredit)?;

        let exempt = self.taxable_value(liability, OUTWARD_NIL_EXEMPT)?
            + self.taxable_value(liability, OUTWARD_NON_GST)?;
        let turnover = self.total_turnover(liability)?;
        let ratio = if turnover != 0.0 { exempt / turnover } else { 0.0 };

        let heads = TaxHeads::try_from_fn(|head| -> MetricResult<f64> {
            let availed: f64 = REVERSIBLE_ROWS
                .iter()
                .map(|&row| credit.coerced(row, 1 + head.index()))
                .sum::<MetricResult<f64>>()?;
            Ok(round2(ratio * availed))
        })?;
        Ok(MetricValue::PerHead(heads))
    }

    pub fn reverse_charge_itc_gap(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let credit = merged.table(TableKey::EligibleCredit)?;

        let heads = TaxHeads::try_from_fn(|head| -> MetricResult<f64> {
            let declared = liability.coerced(INWARD_REVERSE_CHARGE, FIRST_TAX_COL + head.index())?;
            let claimed = credit.coerced(REVERSE_CHARGE_CREDIT, 1 + head.index())?;
            Ok(round2(declared - claimed))
        })?;
        Ok(MetricValue::PerHead(heads))
    }

    pub fn reverse_charge_payment_gap(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let payment = merged.table(TableKey::TaxPayment)?;
        let first_reverse_row = payment.from_end(TaxHead::ALL.len())?;

        let heads = TaxHeads::try_from_fn(|head| -> MetricResult<f64> {
            let declared = liability.coerced(INWARD_REVERSE_CHARGE, FIRST_TAX_COL + head.index())?;
            let payable = payment.coerced(first_reverse_row + head.index(), PAYABLE_COL)?;
            Ok(round2(declared - payable))
        })?;
        Ok(MetricValue::PerHead(heads))
    }

    pub fn reverse_charge_tax_total(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let total = liability.row_sum_from(INWARD_REVERSE_CHARGE, FIRST_TAX_COL)?;
        Ok(MetricValue::Amount(round2(total)))
    }

    pub fn outward_and_reverse_charge_tax(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let total = [OUTWARD_TAXABLE, OUTWARD_ZERO_RATED, INWARD_REVERSE_CHARGE]
            .iter()
            .map(|&row| liability.row_sum_from(row, FIRST_TAX_COL))
            .sum::<MetricResult<f64>>()?;
        Ok(MetricValue::Amount(round2(total)))
    }

    pub fn exempt_and_non_gst_value(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let total = self.taxable_value(liability, OUTWARD_NIL_EXEMPT)? + self.taxable_value(liability, OUTWARD_NON_GST)?;
        Ok(MetricValue::Amount(round2(total)))
    }

    /// a + b + d + e − c.
    pub fn adjusted_turnover(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let total = self.taxable_value(liability, OUTWARD_TAXABLE)?
            + self.taxable_value(liability, OUTWARD_ZERO_RATED)?
            + self.taxable_value(liability, INWARD_REVERSE_CHARGE)?
            + self.taxable_value(liability, OUTWARD_NON_GST)?
            - self.taxable_value(liability, OUTWARD_NIL_EXEMPT)?;
        Ok(MetricValue::Amount(round2(total)))
    }

    /// a + c + e.
    pub fn taxable_turnover_ace(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let total = self.taxable_value(liability, OUTWARD_TAXABLE)?
            + self.taxable_value(liability, OUTWARD_NIL_EXEMPT)?
            + self.taxable_value(liability, OUTWARD_NON_GST)?;
        Ok(MetricValue::Amount(round2(total)))
    }

    fn credit_row(&self, merged: &MergedReturn, row: usize) -> MetricResult<MetricValue> {
        let credit = merged.table(TableKey::EligibleCredit)?;
        let heads = TaxHeads::try_from_fn(|head| credit.coerced(row, 1 + head.index()).map(round2))?;
        Ok(MetricValue::PerHead(heads))
    }

    pub fn net_credit_available(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let credit = merged.table(TableKey::EligibleCredit)?;
        Ok(MetricValue::Amount(round2(credit.row_sum_from(NET_CREDIT, 1)?)))
    }

    pub fn total_tax_payable(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let payment = merged.table(TableKey::TaxPayment)?;
        let heads = TaxHeads::try_from_fn(|head| head_sum(payment, head, PAYABLE_COL).map(round2))?;
        Ok(MetricValue::PerHead(heads))
    }

    pub fn annual_return_late_fee(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let liability = merged.table(TableKey::OutwardLiability)?;
        let turnover = self.total_turnover(liability)?;
        let fee = if turnover > self.config.annual_return_turnover_threshold {
            round2(self.config.annual_return_late_fee_rate * turnover)
        } else {
            0.0
        };
        Ok(MetricValue::Amount(fee))
    }

    pub fn late_fee_paid_in_cash(&self, merged: &MergedReturn) -> MetricResult<MetricValue> {
        let payment = merged.table(TableKey::TaxPayment)?;
        Ok(MetricValue::Amount(round2(payment.full_column_sum(CASH_LATE_FEE_COL))))
    }

    fn due_date(&self, period: &ReturnPeriod, purpose: DuePurpose) -> MetricResult<NaiveDate> {
        self.rules
            .due_date(&period.financial_year, &period.return_month, purpose)
            .map_err(invalid)
    }

    /// Availed credit of returns filed after the credit cutoff of their year.
    fn ineligible_credit(&self, matrices: &[InterestMatrix]) -> Accumulated<TaxHeads, MonthlyCreditBlock> {
        accumulate(ResultPointKey::IneligibleCreditLateFiling, matrices, |matrix| {
            let period = return_period(matrix)?;
            let credit = required(&matrix.credit, TableKey::EligibleCredit)?;
            let cutoff = self.due_date(&period, DuePurpose::IneligibleCredit)?;
            let ineligible = period.filing_date > cutoff;

            let contribution = if ineligible {
                info!(
                    "{}: credit for {} {} is ineligible, filed {} after cutoff {}",
                    matrix.source, period.return_month, period.financial_year, period.filing_date, cutoff
                );
                TaxHeads::try_from_fn(|head| credit.column_sum(AVAILED_ROWS, 1 + head.index()))?
            } else {
                TaxHeads::zero()
            };

            let end = AVAILED_ROWS.end.min(credit.height());
            let rows = credit.rows.get(AVAILED_ROWS.start..end).unwrap_or_default().to_vec();

            let block = MonthlyCreditBlock {
                financial_year: period.financial_year,
                return_month: period.return_month,
                filing_date: period.filing_date,
                cutoff_date: cutoff,
                ineligible,
                header: credit.header.clone(),
                rows,
            };
            Ok((block, contribution))
        })
    }

    /// Interest on tax paid in cash after the due date, per head, counting
    /// only heads where more is due than was paid.
    fn interest(&self, matrices: &[InterestMatrix]) -> Accumulated<TaxHeads, InterestRecord> {
        let rate = self.config.interest_rate;
        let year = self.config.days_in_year;

        accumulate(ResultPointKey::InterestDue, matrices, |matrix| {
            let period = return_period(matrix)?;
            let payment = required(&matrix.payment, TableKey::TaxPayment)?;
            let due_date = self.due_date(&period, DuePurpose::Interest)?;
            let late = days_late(period.filing_date, due_date);

            let cash_paid = payment.full_column_sum(CASH_TAX_COL);
            let interest_paid = payment.full_column_sum(CASH_INTEREST_COL);
            let calculated = if late > 0 {
                cash_paid * late as f64 / year * rate
            } else {
                0.0
            };

            let mut due = TaxHeads::zero();
            if late > 0 {
                for head in TaxHead::ALL {
                    let head_cash = head_sum(payment, head, CASH_TAX_COL)?;
                    let head_paid = head_sum(payment, head, CASH_INTEREST_COL)?;
                    let head_due = round2(head_cash * late as f64 / year * rate - head_paid);
                    if head_due > 0.0 {
                        *due.get_mut(head) = head_due;
                    }
                }
            }

            let record = InterestRecord {
                financial_year: period.financial_year,
                return_month: period.return_month,
                filing_date: period.filing_date,
                due_date,
                days_late: late,
                cash_paid: round2(cash_paid),
                calculated_interest: round2(calculated),
                interest_paid: round2(interest_paid),
                interest_due: round2(calculated - interest_paid),
            };
            Ok((record, due))
        })
    }

    fn late_fee(&self, matrices: &[InterestMatrix]) -> Accumulated<f64, LateFeeRecord> {
        accumulate(ResultPointKey::LateFeeTotal, matrices, |matrix| {
            let period = return_period(matrix)?;
            let due_date = self.due_date(&period, DuePurpose::LateFee)?;
            let late = days_late(period.filing_date, due_date);
            let (calculated, applicable) = late_fee_for(late, self.config.late_fee_per_day, self.config.late_fee_cap);

            let record = LateFeeRecord {
                financial_year: period.financial_year,
                return_month: period.return_month,
                filing_date: period.filing_date,
                due_date,
                days_late: late,
                calculated_fee: calculated,
                applicable_fee: applicable,
            };
            Ok((record, applicable))
        })
    }

    /// Cash that should have been paid on returns above the cash-payment
    /// threshold, per head, counting only shortfalls.
    fn cash_shortfall(&self, matrices: &[InterestMatrix]) -> Accumulated<TaxHeads, ()> {
        accumulate(ResultPointKey::CashLiabilityShortfall, matrices, |matrix| {
            let liability = required(&matrix.liability, TableKey::OutwardLiability)?;
            let taxable = liability.coerced(OUTWARD_TAXABLE, TAXABLE_VALUE_COL)?;

            let mut shortfall = TaxHeads::zero();
            if taxable <= self.config.cash_payment_threshold {
                return Ok(((), shortfall));
            }

            let payment = required(&matrix.payment, TableKey::TaxPayment)?;
            for head in TaxHead::ALL {
                let row = 1 + head.index();
                match (payment.coerced(row, PAYABLE_COL), payment.coerced(row, CASH_TAX_COL)) {
                    (Ok(payable), Ok(paid)) => {
                        let minimum = round2(self.config.cash_payment_ratio * payable);
                        if paid < minimum {
                            debug!("{}: {} paid in cash {} below {}", matrix.source, head, paid, minimum);
                            *shortfall.get_mut(head) = round2(minimum - paid);
                        }
                    }
                    (payable, paid) => {
                        debug!(
                            "{}: {} cash check skipped ({:?}, {:?})",
                            matrix.source,
                            head,
                            payable.err(),
                            paid.err()
                        );
                    }
                }
            }
            Ok(((), shortfall))
        })
    }
}

/// Per-day fee and the fee after the cap, for `days_late` days.
pub fn late_fee_for(days_late: i64, per_day: f64, cap: f64) -> (f64, f64) {
    let calculated = per_day * days_late.max(0) as f64;
    (calculated, calculated.min(cap))
}

/// Computes the full report with the default engine.
pub fn compute_report(
    config: &ReconcilerConfig,
    filer: &str,
    merged: &MergedReturn,
    matrices: &[InterestMatrix],
) -> ReconciliationReport {
    MetricsEngine::new(config).compute(filer, merged, matrices)
}
