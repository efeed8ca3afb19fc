//! Due-date calendar for monthly returns.
//!
//! Interest and late fee share the monthly rule: the return is due on a fixed
//! day of the month after the return month, with a handful of notified
//! extensions. Credit eligibility uses an annual cutoff instead: 30 November
//! after the end of the financial year.

use crate::error::{ReconcileError, Result};
use crate::utils::{financial_year_start, first_of_next_month, parse_month, return_month_start, with_day};
use chrono::NaiveDate;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DUE_DAY: u32 = 20;

/// Notified extensions of the monthly due day: (financial year, month, day).
const MONTHLY_DUE_DAY_EXCEPTIONS: [(&str, u32, u32); 3] =
    [("2022-23", 4, 24), ("2023-24", 5, 30), ("2024-25", 12, 22)];

/// Financial years whose credit cutoff was moved: (financial year, cutoff year).
const CREDIT_CUTOFF_EXCEPTIONS: [(&str, i32); 1] = [("2019-20", 2021)];

const CREDIT_CUTOFF_MONTH: u32 = 11;
const CREDIT_CUTOFF_DAY: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DuePurpose {
    Interest,
    LateFee,
    IneligibleCredit,
}

impl DuePurpose {
    fn label(self) -> &'static str {
        match self {
            DuePurpose::Interest => "Interest",
            DuePurpose::LateFee => "Late fee",
            DuePurpose::IneligibleCredit => "Ineligible ITC",
        }
    }
}

/// An extra monthly due-day extension supplied through configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DueDayOverride {
    #[schemars(description = "Financial year in YYYY-YY form, e.g. '2024-25'")]
    pub financial_year: String,

    #[schemars(description = "Calendar month number of the return period (1-12)")]
    pub return_month: u32,

    #[schemars(description = "Due day in the month following the return month")]
    pub day: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DueDateRules {
    overrides: Vec<DueDayOverride>,
}

impl DueDateRules {
    pub fn new(overrides: Vec<DueDayOverride>) -> Self {
        Self { overrides }
    }

    /// Due day of month for `purpose`. For the credit cutoff this is the day
    /// within November; for the monthly purposes it is the day within the
    /// month after the return month.
    pub fn due_day(&self, financial_year: &str, return_month: &str, purpose: DuePurpose) -> Result<u32> {
        if purpose == DuePurpose::IneligibleCredit {
            return Ok(CREDIT_CUTOFF_DAY);
        }

        let month = parse_month(return_month)?;
        let fy = financial_year.trim();

        let configured = self
            .overrides
            .iter()
            .find(|o| o.financial_year.trim() == fy && o.return_month == month)
            .map(|o| o.day);

        let notified = MONTHLY_DUE_DAY_EXCEPTIONS
            .iter()
            .find(|(year, m, _)| *year == fy && *m == month)
            .map(|(_, _, day)| *day);

        let day = configured.or(notified).unwrap_or(DEFAULT_DUE_DAY);
        debug!(
            "{} calculation: due day {} of next month for {}, {}",
            purpose.label(),
            day,
            return_month,
            financial_year
        );
        Ok(day)
    }

    pub fn due_date(&self, financial_year: &str, return_month: &str, purpose: DuePurpose) -> Result<NaiveDate> {
        match purpose {
            DuePurpose::IneligibleCredit => credit_cutoff(financial_year),
            DuePurpose::Interest | DuePurpose::LateFee => {
                let day = self.due_day(financial_year, return_month, purpose)?;
                let period_start = return_month_start(return_month, financial_year)?;
                with_day(first_of_next_month(period_start)?, day)
            }
        }
    }
}

/// Last date on which credit of `financial_year` may still be claimed.
pub fn credit_cutoff(financial_year: &str) -> Result<NaiveDate> {
    let fy = financial_year.trim();
    let year = match CREDIT_CUTOFF_EXCEPTIONS.iter().find(|(y, _)| *y == fy) {
        Some((_, year)) => *year,
        None => financial_year_start(fy)? + 1,
    };
    debug!("Ineligible ITC cutoff for {}: 30 November {}", fy, year);

    NaiveDate::from_ymd_opt(year, CREDIT_CUTOFF_MONTH, CREDIT_CUTOFF_DAY)
        .ok_or_else(|| ReconcileError::DateError(format!("Invalid credit cutoff year {}", year)))
}
