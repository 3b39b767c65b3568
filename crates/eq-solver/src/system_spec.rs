//! Partitioning of conditions into free and fixed variables.

use crate::composition_set::CompositionSet;
use crate::conditions::{ConditionKey, Conditions};
use crate::error::{SolverError, SolverResult};
use eq_core::numeric::ensure_finite;
use eq_models::StateVariable;
use nalgebra::DVector;

/// Immutable-per-solve snapshot of which variables are free and which are fixed.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemSpecification {
    state_variables: Vec<StateVariable>,
    elements: Vec<String>,
    prescribed_system_amount: f64,
    prescribed_elemental_amounts: Vec<f64>,
    prescribed_element_indices: Vec<usize>,
    free_chemical_potential_indices: Vec<usize>,
    fixed_chemical_potential_indices: Vec<usize>,
    fixed_chemical_potential_values: Vec<f64>,
    free_statevar_indices: Vec<usize>,
    fixed_statevar_indices: Vec<usize>,
    fixed_statevar_values: Vec<f64>,
    fixed_stable_compset_indices: Vec<usize>,
}

impl SystemSpecification {
    /// Build the specification for a composition-set list and a condition set.
    ///
    /// Every composition set must carry the same state variables and elements as the
    /// first one. Unknown elements and state variables, out-of-range values and
    /// condition sets that violate the Gibbs phase rule are rejected.
    pub fn new(compsets: &[CompositionSet], conditions: &Conditions) -> SolverResult<Self> {
        let first = compsets.first().ok_or_else(|| SolverError::InvalidState {
            what: "at least one composition set is required".into(),
        })?;
        let state_variables = first.state_variable_names().to_vec();
        let elements = first.phase_record().nonvacant_elements().to_vec();
        for cs in &compsets[1..] {
            if cs.state_variable_names() != state_variables.as_slice() {
                return Err(SolverError::InvalidState {
                    what: format!(
                        "{} carries state variables {:?}, expected {:?}",
                        cs.phase_name(),
                        cs.state_variable_names(),
                        state_variables
                    ),
                });
            }
            if cs.phase_record().nonvacant_elements() != elements.as_slice() {
                return Err(SolverError::InvalidState {
                    what: format!(
                        "{} carries elements {:?}, expected {:?}",
                        cs.phase_name(),
                        cs.phase_record().nonvacant_elements(),
                        elements
                    ),
                });
            }
        }

        let element_index = |el: &str| {
            elements
                .iter()
                .position(|e| e == el)
                .ok_or_else(|| SolverError::Condition {
                    what: format!("element {el} is not in the active elements {elements:?}"),
                })
        };

        let prescribed_system_amount = conditions.system_amount_value();
        if !(prescribed_system_amount.is_finite() && prescribed_system_amount > 0.0) {
            return Err(SolverError::Condition {
                what: format!("system amount N must be positive, got {prescribed_system_amount}"),
            });
        }

        let mut prescribed_element_indices = Vec::new();
        let mut prescribed_elemental_amounts = Vec::new();
        let mut fixed_chemical_potential_indices = Vec::new();
        let mut fixed_chemical_potential_values = Vec::new();
        let mut fixed_statevar_indices = Vec::new();
        let mut fixed_statevar_values = Vec::new();
        for (key, value) in conditions.iter() {
            ensure_finite(value, "condition value").map_err(|e| SolverError::Condition {
                what: format!("{key}: {e}"),
            })?;
            match key {
                ConditionKey::MoleFraction(el) => {
                    if !(0.0..=1.0).contains(&value) {
                        return Err(SolverError::Condition {
                            what: format!("{key} = {value} is outside [0, 1]"),
                        });
                    }
                    prescribed_element_indices.push(element_index(el)?);
                    prescribed_elemental_amounts.push(value * prescribed_system_amount);
                }
                ConditionKey::ChemicalPotential(el) => {
                    fixed_chemical_potential_indices.push(element_index(el)?);
                    fixed_chemical_potential_values.push(value);
                }
                ConditionKey::StateVariable(sv) => {
                    let idx = state_variables.iter().position(|s| s == sv).ok_or_else(|| {
                        SolverError::Condition {
                            what: format!("state variable {sv} is not carried by the phases"),
                        }
                    })?;
                    fixed_statevar_indices.push(idx);
                    fixed_statevar_values.push(value);
                }
                ConditionKey::SystemAmount => {}
            }
        }

        let total_fraction: f64 = prescribed_elemental_amounts.iter().sum::<f64>()
            / prescribed_system_amount;
        if total_fraction > 1.0 + 1e-12 {
            return Err(SolverError::Condition {
                what: format!("mole fractions sum to {total_fraction}, more than 1"),
            });
        }

        let free_chemical_potential_indices = (0..elements.len())
            .filter(|i| !fixed_chemical_potential_indices.contains(i))
            .collect();
        let free_statevar_indices = (0..state_variables.len())
            .filter(|i| !fixed_statevar_indices.contains(i))
            .collect();
        let fixed_stable_compset_indices = compsets
            .iter()
            .enumerate()
            .filter(|(_, cs)| cs.fixed)
            .map(|(i, _)| i)
            .collect();

        let spec = Self {
            state_variables,
            elements,
            prescribed_system_amount,
            prescribed_elemental_amounts,
            prescribed_element_indices,
            free_chemical_potential_indices,
            fixed_chemical_potential_indices,
            fixed_chemical_potential_values,
            free_statevar_indices,
            fixed_statevar_indices,
            fixed_statevar_values,
            fixed_stable_compset_indices,
        };
        // Free-stable phases add one row and one column each, so zero of them is
        // representative of any active set.
        spec.check_phase_rule(0)?;
        Ok(spec)
    }

    pub fn num_statevars(&self) -> usize {
        self.state_variables.len()
    }

    pub fn num_components(&self) -> usize {
        self.elements.len()
    }

    pub fn state_variables(&self) -> &[StateVariable] {
        &self.state_variables
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn prescribed_system_amount(&self) -> f64 {
        self.prescribed_system_amount
    }

    pub fn prescribed_elemental_amounts(&self) -> &[f64] {
        &self.prescribed_elemental_amounts
    }

    pub fn prescribed_element_indices(&self) -> &[usize] {
        &self.prescribed_element_indices
    }

    pub fn num_fixed_components(&self) -> usize {
        self.prescribed_element_indices.len()
    }

    pub fn free_chemical_potential_indices(&self) -> &[usize] {
        &self.free_chemical_potential_indices
    }

    pub fn fixed_chemical_potential_indices(&self) -> &[usize] {
        &self.fixed_chemical_potential_indices
    }

    pub fn free_statevar_indices(&self) -> &[usize] {
        &self.free_statevar_indices
    }

    pub fn fixed_statevar_indices(&self) -> &[usize] {
        &self.fixed_statevar_indices
    }

    /// `(index, value)` of every state variable fixed by a condition.
    pub fn fixed_statevars(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.fixed_statevar_indices
            .iter()
            .copied()
            .zip(self.fixed_statevar_values.iter().copied())
    }

    pub fn fixed_stable_compset_indices(&self) -> &[usize] {
        &self.fixed_stable_compset_indices
    }

    /// Index of an element in the component ordering.
    pub fn element_index(&self, element: &str) -> Option<usize> {
        self.elements.iter().position(|e| e == element)
    }

    /// Index of a state variable in the dof ordering.
    pub fn statevar_index(&self, sv: StateVariable) -> Option<usize> {
        self.state_variables.iter().position(|s| *s == sv)
    }

    /// Zeros, with fixed chemical potentials taken from the conditions.
    pub fn initial_chemical_potentials(&self) -> DVector<f64> {
        let mut mu = DVector::zeros(self.num_components());
        for (&idx, &value) in self
            .fixed_chemical_potential_indices
            .iter()
            .zip(&self.fixed_chemical_potential_values)
        {
            mu[idx] = value;
        }
        mu
    }

    /// Number of equations and free variables for a given count of free-stable phases.
    pub fn system_size(&self, num_free_stable: usize) -> (usize, usize) {
        let equations = num_free_stable
            + self.fixed_stable_compset_indices.len()
            + self.num_fixed_components()
            + 1;
        let free_variables = self.free_chemical_potential_indices.len()
            + num_free_stable
            + self.free_statevar_indices.len();
        (equations, free_variables)
    }

    /// Fail unless the equilibrium system is square.
    pub fn check_phase_rule(&self, num_free_stable: usize) -> SolverResult<()> {
        let (equations, free_variables) = self.system_size(num_free_stable);
        if equations != free_variables {
            return Err(SolverError::PhaseRule {
                equations,
                free_variables,
            });
        }
        Ok(())
    }

    /// Fresh iteration state for a composition-set list.
    ///
    /// Composition sets with a positive amount that are not pinned start as free-stable.
    pub fn new_state(&self, compsets: &[CompositionSet], min_phase_amount: f64) -> SolverState {
        let free_stable_compset_indices = compsets
            .iter()
            .enumerate()
            .filter(|(_, cs)| !cs.fixed && cs.np > min_phase_amount)
            .map(|(i, _)| i)
            .collect();
        SolverState {
            iterations: 0,
            converged: false,
            chemical_potentials: self.initial_chemical_potentials(),
            delta_statevars: DVector::zeros(self.num_statevars()),
            free_stable_compset_indices,
            fixed_stable_compset_indices: self.fixed_stable_compset_indices.clone(),
            iterations_since_phase_change: 0,
            freeze_internal_dof: false,
            mass_residual: f64::INFINITY,
        }
    }
}

/// Role of a composition set in the current active set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompsetStatus {
    /// Not part of the equilibrium system; amount stays at zero.
    Candidate,
    /// Stable with a free amount.
    StableFree,
    /// Stable with an externally pinned amount.
    StableFixed,
}

/// Mutable state of one minimizer run.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverState {
    pub iterations: usize,
    pub converged: bool,
    pub chemical_potentials: DVector<f64>,
    /// State-variable step of the last global update, applied to every composition set.
    pub delta_statevars: DVector<f64>,
    /// Sorted indices of free-stable composition sets.
    pub free_stable_compset_indices: Vec<usize>,
    pub fixed_stable_compset_indices: Vec<usize>,
    pub iterations_since_phase_change: usize,
    /// Skip Step A in the next iteration because the active set just changed.
    pub freeze_internal_dof: bool,
    pub mass_residual: f64,
}

impl SolverState {
    pub fn status(&self, compset_idx: usize) -> CompsetStatus {
        if self.fixed_stable_compset_indices.contains(&compset_idx) {
            CompsetStatus::StableFixed
        } else if self.free_stable_compset_indices.contains(&compset_idx) {
            CompsetStatus::StableFree
        } else {
            CompsetStatus::Candidate
        }
    }

    /// Free-stable composition sets followed by pinned ones: the phase-row order of
    /// the equilibrium system.
    pub fn stable_compset_indices(&self) -> Vec<usize> {
        self.free_stable_compset_indices
            .iter()
            .chain(&self.fixed_stable_compset_indices)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eq_models::{CefPhase, PhaseRecord, Sublattice, TemperatureFunction};
    use std::sync::Arc;

    fn binary(name: &str) -> Arc<dyn PhaseRecord> {
        let mut phase = CefPhase::new(
            name,
            vec!["A".into(), "B".into()],
            vec![Sublattice {
                site_ratio: 1.0,
                constituents: vec!["A".into(), "B".into()],
            }],
        )
        .unwrap();
        phase
            .add_endmember(&["A"], TemperatureFunction::constant(0.0))
            .unwrap();
        phase
            .add_endmember(&["B"], TemperatureFunction::constant(0.0))
            .unwrap();
        Arc::new(phase)
    }

    fn compsets() -> Vec<CompositionSet> {
        vec![
            CompositionSet::from_parts(binary("ALPHA"), &[101_325.0, 1000.0], &[0.5, 0.5], 1.0)
                .unwrap(),
            CompositionSet::from_parts(binary("BETA"), &[101_325.0, 1000.0], &[0.5, 0.5], 0.0)
                .unwrap(),
        ]
    }

    fn binary_conditions() -> Conditions {
        Conditions::from_pairs([("T", 1000.0), ("P", 101_325.0), ("N", 2.0), ("X_B", 0.3)])
            .unwrap()
    }

    #[test]
    fn partitions_variables() {
        let spec = SystemSpecification::new(&compsets(), &binary_conditions()).unwrap();
        assert_eq!(spec.num_statevars(), 2);
        assert_eq!(spec.num_components(), 2);
        assert_eq!(spec.prescribed_element_indices(), &[1]);
        assert!((spec.prescribed_elemental_amounts()[0] - 0.6).abs() < 1e-15);
        assert_eq!(spec.prescribed_system_amount(), 2.0);
        assert_eq!(spec.free_chemical_potential_indices(), &[0, 1]);
        assert!(spec.free_statevar_indices().is_empty());
        assert_eq!(spec.fixed_statevar_indices(), &[1, 0]);
        assert!(spec.fixed_stable_compset_indices().is_empty());
        assert_eq!(spec.system_size(2), (4, 4));
    }

    #[test]
    fn fixed_chemical_potentials_seed_initial_vector() {
        let conds = Conditions::from_pairs([("T", 1000.0), ("P", 101_325.0), ("MU_A", -5000.0)])
            .unwrap();
        let spec = SystemSpecification::new(&compsets(), &conds).unwrap();
        assert_eq!(spec.fixed_chemical_potential_indices(), &[0]);
        assert_eq!(spec.free_chemical_potential_indices(), &[1]);
        let mu = spec.initial_chemical_potentials();
        assert_eq!(mu.as_slice(), &[-5000.0, 0.0]);
    }

    #[test]
    fn rejects_unknown_names_and_bad_values() {
        let cs = compsets();
        let unknown = Conditions::from_pairs([("T", 1000.0), ("P", 1e5), ("X_ZN", 0.1)]).unwrap();
        assert!(matches!(
            SystemSpecification::new(&cs, &unknown),
            Err(SolverError::Condition { .. })
        ));
        let out_of_range =
            Conditions::from_pairs([("T", 1000.0), ("P", 1e5), ("X_B", 1.5)]).unwrap();
        assert!(SystemSpecification::new(&cs, &out_of_range).is_err());
        let negative_n =
            Conditions::from_pairs([("T", 1000.0), ("P", 1e5), ("X_B", 0.5), ("N", -1.0)])
                .unwrap();
        assert!(SystemSpecification::new(&cs, &negative_n).is_err());
        assert!(SystemSpecification::new(&[], &binary_conditions()).is_err());
        let nan_mu =
            Conditions::from_pairs([("T", 1000.0), ("P", 1e5), ("MU_B", f64::NAN)]).unwrap();
        match SystemSpecification::new(&cs, &nan_mu) {
            Err(SolverError::Condition { what }) => {
                assert!(what.starts_with("MU_B"), "{what}");
                assert!(what.contains("Non-finite"), "{what}");
            }
            other => panic!("expected a condition error, got {other:?}"),
        }
    }

    #[test]
    fn phase_rule_violations_are_errors() {
        let cs = compsets();
        // Binary with no composition condition: one free variable too many
        let under = Conditions::from_pairs([("T", 1000.0), ("P", 1e5)]).unwrap();
        assert!(matches!(
            SystemSpecification::new(&cs, &under),
            Err(SolverError::PhaseRule {
                equations: 1,
                free_variables: 2
            })
        ));
        // Temperature left free without a pinned phase
        let free_t = Conditions::from_pairs([("P", 1e5), ("X_B", 0.5)]).unwrap();
        assert!(matches!(
            SystemSpecification::new(&cs, &free_t),
            Err(SolverError::PhaseRule { .. })
        ));
        // A pinned phase balances the free temperature
        let mut pinned = compsets();
        pinned[1].fixed = true;
        let spec = SystemSpecification::new(&pinned, &free_t).unwrap();
        assert_eq!(spec.free_statevar_indices(), &[1]);
        assert_eq!(spec.fixed_stable_compset_indices(), &[1]);
    }

    #[test]
    fn new_state_classifies_compsets() {
        let mut cs = compsets();
        cs.push(cs[0].clone().pinned());
        let conds = Conditions::from_pairs([("T", 1000.0), ("X_B", 0.5)]).unwrap();
        let spec = SystemSpecification::new(&cs, &conds).unwrap();
        let state = spec.new_state(&cs, 1e-16);
        assert_eq!(state.status(0), CompsetStatus::StableFree);
        assert_eq!(state.status(1), CompsetStatus::Candidate);
        assert_eq!(state.status(2), CompsetStatus::StableFixed);
        assert_eq!(state.stable_compset_indices(), vec![0, 2]);
        assert_eq!(state.delta_statevars.len(), 2);
    }
}
