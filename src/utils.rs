use crate::error::{ReconcileError, Result};
use chrono::{Datelike, NaiveDate};

/// First day of the month following `date`'s month.
pub fn first_of_next_month(date: NaiveDate) -> Result<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ReconcileError::DateError(format!("No month after {}", date)))
}

/// Moves `date` to `day` within the same month.
pub fn with_day(date: NaiveDate, day: u32) -> Result<NaiveDate> {
    date.with_day(day).ok_or_else(|| {
        ReconcileError::DateError(format!(
            "Day {} does not exist in {}",
            day,
            date.format("%B %Y")
        ))
    })
}

/// Parses "2022-23" (or "2022-2023") into its starting calendar year.
pub fn financial_year_start(financial_year: &str) -> Result<i32> {
    let start = financial_year
        .trim()
        .split('-')
        .next()
        .unwrap_or_default()
        .trim();

    start.parse::<i32>().map_err(|_| {
        ReconcileError::DateError(format!(
            "Invalid financial year format: {}. Expected YYYY-YY",
            financial_year
        ))
    })
}

/// Calendar month number for a return period label.
///
/// Accepts full names and three-letter abbreviations; anything before the
/// last '-' is ignored, so "2023-24 - May" resolves to May.
pub fn parse_month(return_month: &str) -> Result<u32> {
    let name = return_month
        .rsplit('-')
        .next()
        .unwrap_or(return_month)
        .trim()
        .to_lowercase();

    let month = match name.as_str() {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => {
            return Err(ReconcileError::DateError(format!(
                "Unknown return month: {}",
                return_month
            )))
        }
    };

    Ok(month)
}

/// First day of the return month. April to December fall in the financial
/// year's starting calendar year, January to March in the following one.
pub fn return_month_start(return_month: &str, financial_year: &str) -> Result<NaiveDate> {
    let month = parse_month(return_month)?;
    let fy_start = financial_year_start(financial_year)?;
    let year = if month >= 4 { fy_start } else { fy_start + 1 };

    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ReconcileError::DateError(format!("Invalid return period {}-{:02}", year, month)))
}

/// Parses a filing date as printed on the return (dd/mm/yyyy).
pub fn parse_filing_date(text: &str) -> Result<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d-%m-%Y"))
        .map_err(|_| {
            ReconcileError::DateError(format!(
                "Invalid filing date format: {}. Expected DD/MM/YYYY",
                text
            ))
        })
}

/// Whole days `filing` is past `due`, never negative.
pub fn days_late(filing: NaiveDate, due: NaiveDate) -> i64 {
    (filing - due).num_days().max(0)
}

/// Parses an amount cell, dropping everything except digits, '.' and '-'
/// (thousands separators, currency symbols, stray whitespace and newlines).
pub fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Like [`parse_amount`], with anything unparseable counting as zero.
pub fn parse_amount_or_zero(text: &str) -> f64 {
    parse_amount(text).unwrap_or(0.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Renders a summed cell the way the merged artifact stores it.
pub fn format_amount(value: f64) -> String {
    let rounded = round2(value);
    if rounded == 0.0 {
        return "0".to_string();
    }
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        format!("{}", rounded)
    }
}
