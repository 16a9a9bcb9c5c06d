//! Typed error kinds raised by the analysis steps.
//!
//! Functions in this crate return `anyhow::Error`; the kinds below are what they wrap when
//! the failure is the caller's to fix. Use `err.downcast_ref::<ScdrError>()` to inspect.

use thiserror::Error;

/// Failure kinds with a caller-facing meaning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScdrError {
    /// A step ran before the step it depends on.
    #[error("{message} Run {step} first.")]
    Precondition {
        /// Name of the step that has to run first
        step: &'static str,
        /// What is missing
        message: String,
    },

    /// A parameter is outside of its valid domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ScdrError {
    pub(crate) fn precondition(step: &'static str, message: impl Into<String>) -> ScdrError {
        ScdrError::Precondition {
            step,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> ScdrError {
        ScdrError::InvalidParameter(message.into())
    }

    /// The prerequisite step name, if this is a precondition violation.
    pub fn missing_step(&self) -> Option<&'static str> {
        match self {
            ScdrError::Precondition { step, .. } => Some(step),
            ScdrError::InvalidParameter(_) => None,
        }
    }
}
