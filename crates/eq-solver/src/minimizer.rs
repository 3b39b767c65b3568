//! Two-step Newton minimizer over a dynamic set of composition sets.

use crate::composition_set::CompositionSet;
use crate::config::SolverConfig;
use crate::equilibrium_system::{EquilibriumSystem, PhaseLinearization, StableEntry, lstsq};
use crate::error::SolverResult;
use crate::system_spec::{SolverState, SystemSpecification};
use eq_core::numeric::relative_change;
use nalgebra::DVector;
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, info, trace, warn};

/// Diagnostics of one minimizer iteration, handed to the progress callback.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationReport {
    /// 1-based iteration number
    pub iteration: usize,
    /// Mass balance satisfied before the global step of this iteration
    pub feasible: bool,
    pub mass_residual: f64,
    pub largest_internal_dof_change: f64,
    pub largest_phase_amount_change: f64,
    /// Largest relative change of a chemical potential or state variable
    pub largest_statevar_change: f64,
    /// Free-stable composition sets after this iteration's active-set update
    pub free_stable_compset_indices: Vec<usize>,
    /// Phase amounts after the global step
    pub phase_amounts: Vec<f64>,
    pub chemical_potentials: DVector<f64>,
    /// Smallest and largest site fraction over all composition sets after Step A
    pub site_fraction_range: (f64, f64),
}

/// Progress callback invoked once per iteration.
pub type Progress<'a> = &'a mut dyn FnMut(&IterationReport);

/// Run the minimizer until convergence or `config.max_iterations`.
///
/// Composition sets are updated in place (dof and amounts); chemical potentials, the
/// active set and the convergence flag are left in `state`. Not converging is not an
/// error: inspect `state.converged`.
pub fn find_solution(
    compsets: &mut [CompositionSet],
    spec: &SystemSpecification,
    state: &mut SolverState,
    config: &SolverConfig,
    mut progress: Option<Progress<'_>>,
) -> SolverResult<()> {
    let nsv = spec.num_statevars();
    state.converged = false;

    for iteration in 1..=config.max_iterations {
        state.iterations = iteration;

        // Step A: internal equilibrium of every composition set
        // A change of the active set freezes internal dof for exactly one iteration
        let freeze = std::mem::take(&mut state.freeze_internal_dof);
        let mu = &state.chemical_potentials;
        let delta_statevars = &state.delta_statevars;
        let update = |cs: &mut CompositionSet| {
            internal_update(cs, mu, delta_statevars, freeze, config.min_site_fraction)
        };
        let updates: Vec<(PhaseLinearization, f64)> = if config.parallel_internal_updates {
            compsets
                .par_iter_mut()
                .map(update)
                .collect::<SolverResult<_>>()?
        } else {
            compsets
                .iter_mut()
                .map(update)
                .collect::<SolverResult<_>>()?
        };
        let largest_internal_dof_change = updates.iter().map(|(_, d)| *d).fold(0.0, f64::max);
        let linearizations: Vec<PhaseLinearization> =
            updates.into_iter().map(|(lin, _)| lin).collect();

        let mut current_elemental_amounts = DVector::zeros(spec.num_components());
        for (cs, lin) in compsets.iter().zip(&linearizations) {
            current_elemental_amounts.axpy(cs.np, &lin.masses, 1.0);
        }
        let current_system_amount: f64 = compsets.iter().map(|cs| cs.np).sum();

        // Step B: global update of potentials, amounts and state variables
        let num_free_stable = state.free_stable_compset_indices.len();
        spec.check_phase_rule(num_free_stable)?;
        let entries: Vec<StableEntry<'_>> = state
            .stable_compset_indices()
            .into_iter()
            .enumerate()
            .map(|(pos, idx)| StableEntry {
                linearization: &linearizations[idx],
                np: compsets[idx].np,
                amount_column: (pos < num_free_stable).then_some(pos),
            })
            .collect();
        let system = EquilibriumSystem::assemble(spec, &entries)?;
        let mut rhs = system.rhs_with_fixed_potentials(spec, &state.chemical_potentials);

        let mut mass_residual = 0.0;
        for (k, (&el, &prescribed)) in spec
            .prescribed_element_indices()
            .iter()
            .zip(spec.prescribed_elemental_amounts())
            .enumerate()
        {
            let residual = current_elemental_amounts[el] - prescribed;
            mass_residual += residual.abs();
            rhs[system.num_phase_rows + k] -= residual;
        }
        let residual = current_system_amount - spec.prescribed_system_amount();
        mass_residual += residual.abs();
        let last = system.nrows() - 1;
        rhs[last] -= residual;
        state.mass_residual = mass_residual;

        let soln = lstsq(system.free_matrix(spec), &rhs, config.lstsq_rcond)?;

        let mut largest_statevar_change = 0.0_f64;
        let free_mu = spec.free_chemical_potential_indices();
        for (i, &c) in free_mu.iter().enumerate() {
            let old = state.chemical_potentials[c];
            largest_statevar_change = largest_statevar_change.max(relative_change(old, soln[i]));
            state.chemical_potentials[c] = soln[i];
        }
        let mut offset = free_mu.len();

        let mut largest_phase_amount_change = 0.0_f64;
        let max_amount = spec.prescribed_system_amount();
        for (i, &idx) in state.free_stable_compset_indices.iter().enumerate() {
            let cs = &mut compsets[idx];
            let old = cs.np;
            cs.np = (old + soln[offset + i]).clamp(0.0, max_amount);
            largest_phase_amount_change = largest_phase_amount_change.max((cs.np - old).abs());
        }
        offset += num_free_stable;

        state.delta_statevars.fill(0.0);
        for (i, &sv) in spec.free_statevar_indices().iter().enumerate() {
            state.delta_statevars[sv] = soln[offset + i];
        }
        if let Some(first) = compsets.first() {
            for sv in 0..nsv {
                let old = first.dof[sv];
                let change = relative_change(old, old + state.delta_statevars[sv]);
                largest_statevar_change = largest_statevar_change.max(change);
            }
        }
        for cs in compsets.iter_mut() {
            let mut block = cs.dof.rows_mut(0, nsv);
            block += &state.delta_statevars;
        }
        trace!(chemical_potentials = ?state.chemical_potentials.as_slice(), "global step");

        // Active-set management waits for mass balance
        let feasible = mass_residual < config.mass_residual_tol;
        let mut converged = false;
        if feasible {
            let mut new_free: BTreeSet<usize> = BTreeSet::new();
            for (idx, (cs, lin)) in compsets.iter().zip(&linearizations).enumerate() {
                if cs.fixed {
                    continue;
                }
                let driving_force = state.chemical_potentials.dot(&lin.masses) - lin.energy;
                if cs.np > config.min_site_fraction || driving_force > -config.driving_force_tol {
                    new_free.insert(idx);
                }
            }
            let new_free: Vec<usize> = new_free.into_iter().collect();
            if new_free != state.free_stable_compset_indices {
                debug!(
                    old = ?state.free_stable_compset_indices,
                    new = ?new_free,
                    "active set changed"
                );
                state.freeze_internal_dof = true;
                state.iterations_since_phase_change = 0;
                state.free_stable_compset_indices = new_free;
            } else {
                converged = largest_internal_dof_change < config.internal_dof_tol
                    && largest_phase_amount_change < config.phase_amount_tol
                    && largest_statevar_change < config.statevar_rel_tol;
            }
        } else {
            state.iterations_since_phase_change += 1;
        }

        debug!(
            iteration,
            feasible,
            mass_residual,
            largest_internal_dof_change,
            largest_phase_amount_change,
            largest_statevar_change,
            "minimizer iteration"
        );
        if let Some(report) = progress.as_deref_mut() {
            report(&IterationReport {
                iteration,
                feasible,
                mass_residual,
                largest_internal_dof_change,
                largest_phase_amount_change,
                largest_statevar_change,
                free_stable_compset_indices: state.free_stable_compset_indices.clone(),
                phase_amounts: compsets.iter().map(|cs| cs.np).collect(),
                chemical_potentials: state.chemical_potentials.clone(),
                site_fraction_range: site_fraction_range(compsets),
            });
        }

        if converged {
            state.converged = true;
            info!(iterations = iteration, "equilibrium converged");
            return Ok(());
        }
    }

    warn!(
        iterations = config.max_iterations,
        mass_residual = state.mass_residual,
        "equilibrium did not converge"
    );
    Ok(())
}

/// Step A for one composition set: Newton step on the site fractions, clipped to
/// `[min_site_fraction, 1]`, then re-linearization at the new point.
///
/// Returns the linearization and the largest applied site-fraction change.
fn internal_update(
    cs: &mut CompositionSet,
    chemical_potentials: &DVector<f64>,
    delta_statevars: &DVector<f64>,
    freeze: bool,
    min_site_fraction: f64,
) -> SolverResult<(PhaseLinearization, f64)> {
    let lin = PhaseLinearization::of(cs)?;
    if freeze {
        return Ok((lin, 0.0));
    }
    let step = lin.internal_step(chemical_potentials, delta_statevars)?;
    let nsv = cs.num_statevars();
    let mut largest = 0.0_f64;
    for (i, dy) in step.iter().enumerate() {
        let old = cs.dof[nsv + i];
        let new = (old + dy).clamp(min_site_fraction, 1.0);
        largest = largest.max((new - old).abs());
        cs.dof[nsv + i] = new;
    }
    Ok((PhaseLinearization::of(cs)?, largest))
}

fn site_fraction_range(compsets: &[CompositionSet]) -> (f64, f64) {
    compsets
        .iter()
        .flat_map(|cs| cs.site_fractions().iter().copied())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| {
            (lo.min(y), hi.max(y))
        })
}
