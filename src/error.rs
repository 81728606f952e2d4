use chrono::{DateTime, Utc};
use thiserror::Error;

/// Fatal input-integrity failures raised at the ingestion boundary.
#[derive(Error, Debug, PartialEq)]
pub enum TrailError {
    #[error(
        "multiple offender ids encountered in {table} extract: expected {expected}, found {found}"
    )]
    MixedSubjects {
        table: &'static str,
        expected: String,
        found: String,
    },
    #[error("multiple serial numbers encountered in extract: expected {expected}, found {found}")]
    MixedSerialNumbers { expected: String, found: String },
    #[error("invalid timestamp {value:?} in {field}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("missing required field {field} in {table} row")]
    MissingField {
        table: &'static str,
        field: &'static str,
    },
    #[error("report window start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}
