//! Phase record capability trait.

use crate::error::{ModelError, ModelResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Potential-like state variable carried at the front of every dof vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateVariable {
    /// Pressure [Pa]
    #[serde(rename = "P")]
    Pressure,
    /// Temperature [K]
    #[serde(rename = "T")]
    Temperature,
}

impl StateVariable {
    pub fn name(&self) -> &'static str {
        match self {
            StateVariable::Pressure => "P",
            StateVariable::Temperature => "T",
        }
    }
}

impl fmt::Display for StateVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StateVariable {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P" => Ok(StateVariable::Pressure),
            "T" => Ok(StateVariable::Temperature),
            other => Err(ModelError::Database {
                message: format!("unknown state variable '{other}'"),
            }),
        }
    }
}

/// Energy-model bundle for one phase.
///
/// Every method takes the full dof vector `x = [state variables..., site fractions...]`.
/// Gradients and Hessians are taken with respect to that same ordering. Masses are
/// reported per component of `nonvacant_elements()`, normalized per mole of atoms.
///
/// Implementations must be thread-safe (Send + Sync): one record is shared by every
/// composition set of the phase, possibly across worker threads.
pub trait PhaseRecord: Send + Sync {
    /// Phase name (shared by all composition sets of this phase).
    fn phase_name(&self) -> &str;

    /// Ordered state variables at the front of the dof vector.
    fn state_variables(&self) -> &[StateVariable];

    /// Ordered non-vacant elements of the system.
    fn nonvacant_elements(&self) -> &[String];

    /// Number of internal degrees of freedom (site fractions).
    fn phase_dof(&self) -> usize;

    /// Number of internal constraints (one per sublattice for site-fraction sums).
    fn num_internal_cons(&self) -> usize;

    /// Molar Gibbs energy.
    fn obj(&self, x: &[f64]) -> ModelResult<f64>;

    /// Gradient of the Gibbs energy.
    fn grad(&self, x: &[f64]) -> ModelResult<DVector<f64>>;

    /// Hessian of the Gibbs energy.
    fn hess(&self, x: &[f64]) -> ModelResult<DMatrix<f64>>;

    /// Amount of component `comp_idx` in one mole of phase.
    fn mass_obj(&self, x: &[f64], comp_idx: usize) -> ModelResult<f64>;

    /// Gradient of the amount of component `comp_idx`.
    fn mass_grad(&self, x: &[f64], comp_idx: usize) -> ModelResult<DVector<f64>>;

    /// Internal constraint residuals (zero when satisfied).
    fn internal_cons_func(&self, x: &[f64]) -> ModelResult<DVector<f64>>;

    /// Jacobian of the internal constraints, `num_internal_cons x dof_len`.
    fn internal_cons_jac(&self, x: &[f64]) -> ModelResult<DMatrix<f64>>;

    /// Named scalar property (e.g. `GM`, `HM`, `SM`, `CPM`).
    fn prop(&self, name: &str, x: &[f64]) -> ModelResult<f64>;

    /// Gradient of a named scalar property.
    fn prop_grad(&self, name: &str, x: &[f64]) -> ModelResult<DVector<f64>>;

    fn num_statevars(&self) -> usize {
        self.state_variables().len()
    }

    fn num_components(&self) -> usize {
        self.nonvacant_elements().len()
    }

    /// Length of the full dof vector.
    fn dof_len(&self) -> usize {
        self.num_statevars() + self.phase_dof()
    }

    /// Validate the dof vector length.
    fn check_dof(&self, x: &[f64]) -> ModelResult<()> {
        if x.len() != self.dof_len() {
            return Err(ModelError::DofLength {
                phase: self.phase_name().to_string(),
                expected: self.dof_len(),
                actual: x.len(),
            });
        }
        Ok(())
    }

    /// Amounts of every component.
    fn masses(&self, x: &[f64]) -> ModelResult<DVector<f64>> {
        let n = self.num_components();
        let mut out = DVector::zeros(n);
        for comp_idx in 0..n {
            out[comp_idx] = self.mass_obj(x, comp_idx)?;
        }
        Ok(out)
    }

    /// Mass Jacobian, `num_components x dof_len`.
    fn mass_jac(&self, x: &[f64]) -> ModelResult<DMatrix<f64>> {
        let n = self.num_components();
        let mut out = DMatrix::zeros(n, self.dof_len());
        for comp_idx in 0..n {
            let row = self.mass_grad(x, comp_idx)?;
            out.row_mut(comp_idx).copy_from(&row.transpose());
        }
        Ok(out)
    }
}
