//! Composition sets: candidate phase instances.

use crate::error::{SolverError, SolverResult};
use eq_models::{PhaseRecord, StateVariable};
use nalgebra::DVector;
use std::fmt;
use std::sync::Arc;

/// One instance of a phase that may be present at equilibrium.
///
/// Several composition sets may share the same phase record (miscibility gaps).
#[derive(Clone)]
pub struct CompositionSet {
    phase_record: Arc<dyn PhaseRecord>,
    /// `[state variables..., site fractions...]`
    pub dof: DVector<f64>,
    /// Phase amount
    pub np: f64,
    /// Stability pinned externally; the solver never removes it or changes its amount.
    pub fixed: bool,
}

impl CompositionSet {
    /// Create a composition set from a full dof vector.
    pub fn new(phase_record: Arc<dyn PhaseRecord>, dof: Vec<f64>, np: f64) -> SolverResult<Self> {
        phase_record.check_dof(&dof)?;
        if !(np.is_finite() && np >= 0.0) {
            return Err(SolverError::InvalidState {
                what: format!(
                    "phase amount of {} must be finite and non-negative, got {np}",
                    phase_record.phase_name()
                ),
            });
        }
        Ok(Self {
            phase_record,
            dof: DVector::from_vec(dof),
            np,
            fixed: false,
        })
    }

    /// Create a composition set from state variables and site fractions.
    pub fn from_parts(
        phase_record: Arc<dyn PhaseRecord>,
        state_variables: &[f64],
        site_fractions: &[f64],
        np: f64,
    ) -> SolverResult<Self> {
        let dof = state_variables
            .iter()
            .chain(site_fractions)
            .copied()
            .collect();
        Self::new(phase_record, dof, np)
    }

    /// Mark the composition set as externally pinned.
    pub fn pinned(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn phase_record(&self) -> &Arc<dyn PhaseRecord> {
        &self.phase_record
    }

    pub fn phase_name(&self) -> &str {
        self.phase_record.phase_name()
    }

    pub fn num_statevars(&self) -> usize {
        self.phase_record.num_statevars()
    }

    pub fn state_variable_names(&self) -> &[StateVariable] {
        self.phase_record.state_variables()
    }

    pub fn state_variables(&self) -> &[f64] {
        &self.dof.as_slice()[..self.num_statevars()]
    }

    pub fn site_fractions(&self) -> &[f64] {
        &self.dof.as_slice()[self.num_statevars()..]
    }

    /// Overwrite site fractions, amount and state variables at once.
    pub fn update(
        &mut self,
        site_fractions: &[f64],
        np: f64,
        state_variables: &[f64],
    ) -> SolverResult<()> {
        let nsv = self.num_statevars();
        if site_fractions.len() != self.phase_record.phase_dof() || state_variables.len() != nsv {
            return Err(SolverError::InvalidState {
                what: format!(
                    "update of {} expects {} state variables and {} site fractions",
                    self.phase_name(),
                    nsv,
                    self.phase_record.phase_dof()
                ),
            });
        }
        self.dof.rows_mut(0, nsv).copy_from_slice(state_variables);
        self.dof
            .rows_mut(nsv, site_fractions.len())
            .copy_from_slice(site_fractions);
        self.np = np;
        Ok(())
    }

    /// Molar Gibbs energy at the current dof.
    pub fn energy(&self) -> SolverResult<f64> {
        Ok(self.phase_record.obj(self.dof.as_slice())?)
    }

    /// Amount of every component in one mole of this phase.
    pub fn masses(&self) -> SolverResult<DVector<f64>> {
        Ok(self.phase_record.masses(self.dof.as_slice())?)
    }

    /// `μ·M − G`: positive when the phase lies below the tangent plane of the
    /// chemical potentials and wants to become stable, zero for stable phases.
    pub fn driving_force(&self, chemical_potentials: &DVector<f64>) -> SolverResult<f64> {
        Ok(chemical_potentials.dot(&self.masses()?) - self.energy()?)
    }
}

impl fmt::Debug for CompositionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionSet")
            .field("phase", &self.phase_name())
            .field("np", &self.np)
            .field("fixed", &self.fixed)
            .field("dof", &self.dof.as_slice())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eq_models::{CefPhase, Sublattice, TemperatureFunction};

    fn record() -> Arc<dyn PhaseRecord> {
        let mut phase = CefPhase::new(
            "FCC",
            vec!["A".into(), "B".into()],
            vec![Sublattice {
                site_ratio: 1.0,
                constituents: vec!["A".into(), "B".into()],
            }],
        )
        .unwrap();
        phase
            .add_endmember(&["A"], TemperatureFunction::constant(-100.0))
            .unwrap();
        phase
            .add_endmember(&["B"], TemperatureFunction::constant(-300.0))
            .unwrap();
        Arc::new(phase)
    }

    #[test]
    fn accessors_split_dof() {
        let cs = CompositionSet::from_parts(record(), &[101_325.0, 1000.0], &[0.4, 0.6], 0.5)
            .unwrap();
        assert_eq!(cs.state_variables(), &[101_325.0, 1000.0]);
        assert_eq!(cs.site_fractions(), &[0.4, 0.6]);
        assert_eq!(cs.phase_name(), "FCC");
        assert!(!cs.fixed);
        assert!(cs.clone().pinned().fixed);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(CompositionSet::new(record(), vec![1.0, 2.0], 1.0).is_err());
        assert!(CompositionSet::new(record(), vec![1.0, 2.0, 0.5, 0.5], -1.0).is_err());
        let mut cs =
            CompositionSet::from_parts(record(), &[101_325.0, 1000.0], &[0.4, 0.6], 0.5).unwrap();
        assert!(cs.update(&[1.0], 1.0, &[101_325.0, 1000.0]).is_err());
        cs.update(&[0.1, 0.9], 0.25, &[101_325.0, 900.0]).unwrap();
        assert_eq!(cs.site_fractions(), &[0.1, 0.9]);
        assert_eq!(cs.np, 0.25);
    }

    #[test]
    fn driving_force_vanishes_on_tangent() {
        let cs =
            CompositionSet::from_parts(record(), &[101_325.0, 1000.0], &[0.4, 0.6], 0.5).unwrap();
        // Chemical potentials of this very composition lie on its tangent plane
        let g = cs.energy().unwrap();
        let mu = DVector::from_vec(vec![g, g]);
        assert!(cs.driving_force(&mu).unwrap().abs() < 1e-9);
        let below = DVector::from_vec(vec![g - 10.0, g - 10.0]);
        assert!(cs.driving_force(&below).unwrap() < 0.0);
    }
}
