//! Shared domain types for the appforge build pipeline.
//!
//! The server side (`appforge::pipeline`) writes these records and the client
//! side (`appforge::client`) reads them back over HTTP, so both sides agree on
//! one serialized shape.

mod id;
mod job;
mod status;
mod step;

pub use id::JobId;
pub use job::BuildJob;
pub use status::JobStatus;
pub use step::{BuildStep, StepName, StepStatus, upsert_steps};

/// Error returned when parsing one of the string-encoded enums fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: {value}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
