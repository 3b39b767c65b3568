//! Phase model errors.

use thiserror::Error;

/// Result type for phase model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building or evaluating a phase model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Non-physical input (non-positive temperature, site fraction <= 0, ...).
    #[error("Non-physical value for {what}: {value}")]
    NonPhysical { what: &'static str, value: f64 },

    /// Degree-of-freedom vector has the wrong length for this phase.
    #[error("Phase {phase}: expected {expected} degrees of freedom, got {actual}")]
    DofLength {
        phase: String,
        expected: usize,
        actual: usize,
    },

    /// Component index outside the nonvacant element list.
    #[error("Component index {index} out of range ({len} elements)")]
    ComponentIndex { index: usize, len: usize },

    /// Property name the phase family does not provide.
    #[error("Phase {phase} has no property '{name}'")]
    UnknownProperty { phase: String, name: String },

    /// Inconsistent phase definition (unknown constituent, bad site ratio, ...).
    #[error("Invalid definition of phase {phase}: {what}")]
    InvalidDefinition { phase: String, what: String },

    /// Database file could not be read or parsed.
    #[error("Database error: {message}")]
    Database { message: String },
}
