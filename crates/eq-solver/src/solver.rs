//! Solver facade: starting-point hooks, minimizer run, pruning and packing.

use crate::composition_set::CompositionSet;
use crate::conditions::Conditions;
use crate::config::SolverConfig;
use crate::error::SolverResult;
use crate::minimizer::{Progress, find_solution};
use crate::system_spec::SystemSpecification;
use nalgebra::DVector;
use std::fmt;
use tracing::{debug, instrument};

/// Outcome of one equilibrium solve.
#[derive(Clone, Debug, PartialEq)]
pub struct EquilibriumResult {
    pub converged: bool,
    pub iterations: usize,
    /// State variables once, then the site fractions of every remaining composition
    /// set, then all phase amounts.
    pub x: DVector<f64>,
    pub chemical_potentials: DVector<f64>,
}

/// Strategy applied to the starting composition sets before the minimizer runs.
///
/// Hooks may reorder, merge or drop composition sets and adjust the initial chemical
/// potentials. The system specification is rebuilt afterwards.
pub trait StartingPointHook: Send + Sync {
    fn apply(
        &self,
        compsets: &mut Vec<CompositionSet>,
        chemical_potentials: &mut DVector<f64>,
        conditions: &Conditions,
    ) -> SolverResult<()>;
}

/// Leaves the starting point untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHook;

impl StartingPointHook for NoHook {
    fn apply(
        &self,
        _compsets: &mut Vec<CompositionSet>,
        _chemical_potentials: &mut DVector<f64>,
        _conditions: &Conditions,
    ) -> SolverResult<()> {
        Ok(())
    }
}

/// Collapses composition sets of the same phase into one, so the solver never
/// returns a miscibility gap.
///
/// Composition sets with zero amount are dropped unless pinned. The merged set keeps
/// the sum of the amounts and the count-normalized average of the dof.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeMiscibilityGaps;

impl StartingPointHook for MergeMiscibilityGaps {
    fn apply(
        &self,
        compsets: &mut Vec<CompositionSet>,
        _chemical_potentials: &mut DVector<f64>,
        _conditions: &Conditions,
    ) -> SolverResult<()> {
        let mut merged: Vec<(CompositionSet, usize)> = Vec::new();
        for cs in compsets.drain(..) {
            if cs.np == 0.0 && !cs.fixed {
                continue;
            }
            match merged
                .iter_mut()
                .find(|(m, _)| m.phase_name() == cs.phase_name())
            {
                Some((target, count)) => {
                    target.np += cs.np;
                    target.dof += &cs.dof;
                    target.fixed |= cs.fixed;
                    *count += 1;
                }
                None => merged.push((cs, 1)),
            }
        }
        for (cs, count) in merged.iter_mut() {
            cs.dof /= *count as f64;
        }
        debug!(remaining = merged.len(), "merged miscibility gaps");
        compsets.extend(merged.into_iter().map(|(cs, _)| cs));
        Ok(())
    }
}

/// Equilibrium solver facade.
pub struct Solver {
    config: SolverConfig,
    hook: Box<dyn StartingPointHook>,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            hook: Box::new(NoHook),
        }
    }

    /// Solver that merges composition sets of the same phase before solving.
    pub fn no_miscibility_gap(config: SolverConfig) -> Self {
        Self::new(config).with_hook(MergeMiscibilityGaps)
    }

    pub fn with_hook(mut self, hook: impl StartingPointHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve for equilibrium starting from `compsets`, which are updated in place.
    ///
    /// When `remove_metastable` is set, composition sets whose amount settled at zero
    /// and that are not pinned are removed from the list.
    pub fn solve(
        &self,
        compsets: &mut Vec<CompositionSet>,
        conditions: &Conditions,
    ) -> SolverResult<EquilibriumResult> {
        self.solve_with_progress(compsets, conditions, None)
    }

    #[instrument(skip_all, fields(compsets = compsets.len(), conditions = conditions.len()))]
    pub fn solve_with_progress(
        &self,
        compsets: &mut Vec<CompositionSet>,
        conditions: &Conditions,
        progress: Option<Progress<'_>>,
    ) -> SolverResult<EquilibriumResult> {
        let conditions = conditions.adjusted();
        let spec = SystemSpecification::new(compsets, &conditions)?;
        let mut chemical_potentials = spec.initial_chemical_potentials();
        self.hook.apply(compsets, &mut chemical_potentials, &conditions)?;
        let spec = SystemSpecification::new(compsets, &conditions)?;

        let nsv = spec.num_statevars();
        for cs in compsets.iter_mut() {
            for (idx, value) in spec.fixed_statevars() {
                cs.dof[idx] = value;
            }
            for y in cs.dof.rows_mut(nsv, cs.dof.len() - nsv).iter_mut() {
                *y = y.clamp(self.config.min_site_fraction, 1.0);
            }
        }

        let mut state = spec.new_state(compsets, self.config.min_site_fraction);
        let fixed_mu = spec.initial_chemical_potentials();
        for &i in spec.fixed_chemical_potential_indices() {
            chemical_potentials[i] = fixed_mu[i];
        }
        state.chemical_potentials = chemical_potentials;

        find_solution(compsets, &spec, &mut state, &self.config, progress)?;

        if self.config.remove_metastable {
            let before = compsets.len();
            compsets.retain(|cs| cs.fixed || cs.np > 0.0);
            debug!(removed = before - compsets.len(), "removed metastable composition sets");
        }

        Ok(EquilibriumResult {
            converged: state.converged,
            iterations: state.iterations,
            x: pack_dof(compsets),
            chemical_potentials: state.chemical_potentials,
        })
    }
}

impl Default for Solver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl fmt::Debug for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// State variables of the first composition set, every composition set's site
/// fractions, then every phase amount.
pub fn pack_dof(compsets: &[CompositionSet]) -> DVector<f64> {
    let mut x: Vec<f64> = compsets
        .first()
        .map(|cs| cs.state_variables().to_vec())
        .unwrap_or_default();
    for cs in compsets {
        x.extend_from_slice(cs.site_fractions());
    }
    x.extend(compsets.iter().map(|cs| cs.np));
    DVector::from_vec(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eq_models::{CefPhase, PhaseRecord, Sublattice, TemperatureFunction};
    use std::sync::Arc;

    fn record(name: &str) -> Arc<dyn PhaseRecord> {
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

    #[test]
    fn pack_dof_layout() {
        let a = record("A1");
        let cs = vec![
            CompositionSet::from_parts(a.clone(), &[1e5, 300.0], &[0.2, 0.8], 0.25).unwrap(),
            CompositionSet::from_parts(a, &[1e5, 300.0], &[0.6, 0.4], 0.75).unwrap(),
        ];
        let x = pack_dof(&cs);
        assert_eq!(
            x.as_slice(),
            &[1e5, 300.0, 0.2, 0.8, 0.6, 0.4, 0.25, 0.75]
        );
        assert!(pack_dof(&[]).is_empty());
    }

    #[test]
    fn merge_hook_keeps_pinned_zero_amount_sets() {
        let a = record("A1");
        let b = record("B2");
        let mut cs = vec![
            CompositionSet::from_parts(a.clone(), &[1e5, 300.0], &[0.2, 0.8], 0.0).unwrap(),
            CompositionSet::from_parts(b, &[1e5, 300.0], &[0.5, 0.5], 0.0)
                .unwrap()
                .pinned(),
            CompositionSet::from_parts(a, &[1e5, 300.0], &[0.4, 0.6], 1.0).unwrap(),
        ];
        let mut mu = DVector::zeros(2);
        MergeMiscibilityGaps
            .apply(&mut cs, &mut mu, &Conditions::new())
            .unwrap();
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[0].phase_name(), "B2");
        assert!(cs[0].fixed);
        assert_eq!(cs[1].site_fractions(), &[0.4, 0.6]);
    }
}
