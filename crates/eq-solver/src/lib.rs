//! eq-solver: multi-phase, multi-component equilibrium solver.
//!
//! Given composition sets (candidate phase instances backed by a [`PhaseRecord`])
//! and a set of [`Conditions`], the solver finds the stable phases, their amounts
//! and site fractions, and the chemical potentials.
//!
//! - `composition_set`: candidate phase instances
//! - `conditions`: condition names and values
//! - `system_spec`: free/fixed partitions and the Gibbs phase rule
//! - `minimizer`: the two-step Newton iteration (`find_solution`)
//! - `solver`: facade, starting-point hooks, result packing
//! - `properties`: derived properties and dot derivatives
//! - `batch`: parallel solving of independent condition points
//!
//! [`PhaseRecord`]: eq_models::PhaseRecord

pub mod batch;
pub mod composition_set;
pub mod conditions;
pub mod config;
mod equilibrium_system;
pub mod error;
pub mod minimizer;
pub mod properties;
pub mod solver;
pub mod system_spec;

pub use batch::{BatchOutcome, BatchPoint, solve_batch};
pub use composition_set::CompositionSet;
pub use conditions::{ConditionKey, Conditions, MIN_COMPOSITION};
pub use config::SolverConfig;
pub use error::{SolverError, SolverResult};
pub use minimizer::{IterationReport, Progress, find_solution};
pub use properties::{ComputableProperty, DotDeltas, DotDerivative, ModelProperty, PhaseSelector};
pub use solver::{
    EquilibriumResult, MergeMiscibilityGaps, NoHook, Solver, StartingPointHook, pack_dof,
};
pub use system_spec::{CompsetStatus, SolverState, SystemSpecification};
