//! Numerical settings of the equilibrium solver.

use serde::{Deserialize, Serialize};

/// Solver configuration.
///
/// Every tolerance the minimizer uses lives here so it can be tuned per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum minimizer iterations
    pub max_iterations: usize,
    /// Floor applied to site fractions after every internal update
    pub min_site_fraction: f64,
    /// Mass balance residual below which the system counts as feasible
    pub mass_residual_tol: f64,
    /// Composition sets with driving force above `-driving_force_tol` are activated
    pub driving_force_tol: f64,
    /// Largest internal dof step at convergence
    pub internal_dof_tol: f64,
    /// Largest phase amount step at convergence
    pub phase_amount_tol: f64,
    /// Largest relative state variable / chemical potential step at convergence
    pub statevar_rel_tol: f64,
    /// Drop composition sets whose amount settled at zero
    pub remove_metastable: bool,
    /// Singular value cutoff of the least-squares solve, relative to the largest
    /// singular value (default: machine epsilon times the matrix dimension)
    pub lstsq_rcond: Option<f64>,
    /// Run the per-phase internal updates on the rayon pool
    pub parallel_internal_updates: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            min_site_fraction: 1e-16,
            mass_residual_tol: 1e-10,
            driving_force_tol: 1e-5,
            internal_dof_tol: 1e-13,
            phase_amount_tol: 1e-10,
            statevar_rel_tol: 1e-3,
            remove_metastable: true,
            lstsq_rcond: None,
            parallel_internal_updates: false,
        }
    }
}
