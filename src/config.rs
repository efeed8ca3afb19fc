use crate::error::{ReconcileError, Result};
use crate::locator::DEFAULT_GRID_TOLERANCE;
use crate::rules::{DueDateRules, DueDayOverride};
use crate::utils::financial_year_start;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Run settings and the numeric rules applied to every return.
///
/// Every field has a default, so `{}` is a valid configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReconcilerConfig {
    #[schemars(description = "Directory holding one sub-directory per filer, each with a return-type folder of PDFs")]
    pub input_root: PathBuf,

    #[schemars(description = "Directory receiving one sub-directory of artifacts per filer")]
    pub output_root: PathBuf,

    #[schemars(description = "Name of the per-filer folder holding the monthly returns, e.g. 'GSTR-3B'")]
    pub return_folder: String,

    #[schemars(description = "Annual interest rate on tax paid late in cash (0.18 = 18%)")]
    pub interest_rate: f64,

    #[schemars(description = "Day count of the year used to pro-rate interest")]
    pub days_in_year: f64,

    #[schemars(description = "Late fee charged per day of delay")]
    pub late_fee_per_day: f64,

    #[schemars(description = "Maximum late fee for a single return")]
    pub late_fee_cap: f64,

    #[schemars(
        description = "Taxable value of outward supplies (table 3.1 row a) above which part of the liability must be paid in cash"
    )]
    pub cash_payment_threshold: f64,

    #[schemars(description = "Share of each head's payable tax that must be paid in cash above the threshold (0.01 = 1%)")]
    pub cash_payment_ratio: f64,

    #[schemars(description = "Turnover (table 3.1 rows a+b+c+e) above which the annual return late fee applies")]
    pub annual_return_turnover_threshold: f64,

    #[schemars(description = "Annual return late fee as a share of turnover (0.0025 = 0.25%)")]
    pub annual_return_late_fee_rate: f64,

    #[schemars(description = "Extra due-day extensions, applied before the notified ones")]
    pub due_day_overrides: Vec<DueDayOverride>,

    #[schemars(description = "Distance in points within which ruling lines are snapped together")]
    pub grid_tolerance: f32,

    #[schemars(description = "Also write the result points as JSON next to the merged workbook")]
    pub write_result_points: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("uploaded_files"),
            output_root: PathBuf::from("reports"),
            return_folder: "GSTR-3B".to_string(),
            interest_rate: 0.18,
            days_in_year: 365.0,
            late_fee_per_day: 100.0,
            late_fee_cap: 5000.0,
            cash_payment_threshold: 5_000_000.0,
            cash_payment_ratio: 0.01,
            annual_return_turnover_threshold: 20_000_000.0,
            annual_return_late_fee_rate: 0.0025,
            due_day_overrides: Vec::new(),
            grid_tolerance: DEFAULT_GRID_TOLERANCE,
            write_result_points: true,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("interest_rate", self.interest_rate),
            ("late_fee_per_day", self.late_fee_per_day),
            ("late_fee_cap", self.late_fee_cap),
            ("cash_payment_threshold", self.cash_payment_threshold),
            ("cash_payment_ratio", self.cash_payment_ratio),
            ("annual_return_turnover_threshold", self.annual_return_turnover_threshold),
            ("annual_return_late_fee_rate", self.annual_return_late_fee_rate),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ReconcileError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.days_in_year.is_nan() || self.days_in_year <= 0.0 {
            return Err(ReconcileError::InvalidConfig(format!(
                "days_in_year must be positive, got {}",
                self.days_in_year
            )));
        }

        if self.grid_tolerance.is_nan() || self.grid_tolerance <= 0.0 {
            return Err(ReconcileError::InvalidConfig(format!(
                "grid_tolerance must be positive, got {}",
                self.grid_tolerance
            )));
        }

        if self.return_folder.trim().is_empty() {
            return Err(ReconcileError::InvalidConfig("return_folder must not be empty".to_string()));
        }

        for (idx, o) in self.due_day_overrides.iter().enumerate() {
            financial_year_start(&o.financial_year).map_err(|e| {
                ReconcileError::InvalidConfig(format!("Due-day override #{}: {}", idx, e))
            })?;
            if !(1..=12).contains(&o.return_month) {
                return Err(ReconcileError::InvalidConfig(format!(
                    "Due-day override #{} has return month {}; expected 1-12",
                    idx, o.return_month
                )));
            }
            if !(1..=31).contains(&o.day) {
                return Err(ReconcileError::InvalidConfig(format!(
                    "Due-day override #{} has day {}; expected 1-31",
                    idx, o.day
                )));
            }
        }

        Ok(())
    }

    pub fn due_date_rules(&self) -> DueDateRules {
        DueDateRules::new(self.due_day_overrides.clone())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReconcilerConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}
