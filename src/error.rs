use crate::schema::{LayoutVersion, TableKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("No returns found for filer {filer}: {details}")]
    NotFound { filer: String, details: String },

    #[error("Table {key} missing from the only return in the set ({document})")]
    TableNotFound { key: TableKey, document: String },

    #[error("Return {document} uses layout {found}, but the set was classified as {expected}")]
    InconsistentLayout {
        document: String,
        expected: LayoutVersion,
        found: LayoutVersion,
    },

    #[error("Failed to read PDF {document}: {details}")]
    PdfError { document: String, details: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Why a single result point could not be computed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("table {0} not present in the merged return")]
    MissingTable(TableKey),

    #[error("cell ({row}, {col}) of table {key} is out of range")]
    MissingCell { key: TableKey, row: usize, col: usize },

    #[error("cell ({row}, {col}) of table {key} is not numeric: {value:?}")]
    NotNumeric {
        key: TableKey,
        row: usize,
        col: usize,
        value: String,
    },

    #[error("{0}")]
    Invalid(String),
}
