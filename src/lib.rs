//! # Periodic Filing Reconciler
//!
//! Reconciles a filer's monthly GSTR-3B returns: tables are recovered from
//! the PDF page layout, summed across periods, and turned into a catalogue of
//! compliance figures (interest due, late fees, credit that became
//! ineligible, reverse-charge gaps).
//!
//! ## Pipeline
//!
//! - **Locator** ([`locator`]): ruling lines and text runs of each page become
//!   raw cell grids.
//! - **Classifier** ([`classifier`]): the grid count picks the layout version.
//! - **Extractor** ([`extractor`]): fixed position maps slice the grids into
//!   named logical tables, repairing the table split over a page break.
//! - **Aggregator** ([`aggregator`]): numeric cells are summed across returns;
//!   identity tables are kept from the first return.
//! - **Metrics** ([`metrics`]): every result point is computed on its own and
//!   may be unavailable without affecting the others. Due dates and cutoffs
//!   come from [`rules`].
//! - **Artifact** ([`artifact`]): the merged workbook and the JSON export.
//!
//! ## Example
//!
//! ```rust,ignore
//! use periodic_filing_reconciler::*;
//!
//! let config = ReconcilerConfig::from_json_file("reconciler.json")?;
//! let outcome = reconcile(config, "27AAAAA0000A1Z5")?;
//!
//! for (key, value) in outcome.report.result_points.to_flat_map() {
//!     println!("{key}: {value:?}");
//! }
//! println!("workbook written to {}", outcome.artifact.display());
//! ```

pub mod aggregator;
pub mod artifact;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod locator;
pub mod metrics;
pub mod pipeline;
pub mod rules;
pub mod schema;
pub mod utils;

pub use aggregator::{merge_period_set, missing_keys, sum_tables};
pub use artifact::{load_merged_return, write_artifact, write_report_json};
pub use classifier::{classify, layout_for_grid_count};
pub use config::ReconcilerConfig;
pub use error::{MetricError, ReconcileError, Result};
pub use extractor::{extract_document, extract_tables, repair_split_table};
pub use locator::{GridLocator, PdfGridLocator};
pub use metrics::{
    compute_report, late_fee_for, FilerIdentity, InterestRecord, LateFeeRecord, MetricValue, MetricsEngine,
    MonthlyCreditBlock, ReconciliationReport, ResultPoint, ResultPointKey, ResultPoints, SkippedDocument,
};
pub use pipeline::{ReconcileOutcome, Reconciler, UnreadableDocument};
pub use rules::{credit_cutoff, DueDateRules, DueDayOverride, DuePurpose};
pub use schema::*;

/// Reconciles one filer with the PDF locator and writes its artifacts.
pub fn reconcile(config: ReconcilerConfig, filer: &str) -> Result<ReconcileOutcome> {
    Reconciler::new(config)?.run_filer(filer)
}
