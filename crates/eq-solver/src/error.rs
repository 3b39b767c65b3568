//! Error types for equilibrium solving.

use eq_models::ModelError;
use thiserror::Error;

/// Errors that can occur while setting up or running an equilibrium solve.
///
/// Failing to converge is not an error; it is reported through the
/// `converged` flag of the result.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Condition error: {what}")]
    Condition { what: String },

    #[error(
        "Conditions do not obey the Gibbs phase rule: {equations} equations for {free_variables} free variables"
    )]
    PhaseRule {
        equations: usize,
        free_variables: usize,
    },

    #[error("Singular phase matrix for {phase}")]
    SingularPhaseMatrix { phase: String },

    #[error("Invalid state: {what}")]
    InvalidState { what: String },

    #[error("Property error: {what}")]
    Property { what: String },

    #[error("Numeric error: {what}")]
    Numeric { what: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

pub type SolverResult<T> = Result<T, SolverError>;
