//! Parallel solving of independent condition points.

use crate::composition_set::CompositionSet;
use crate::conditions::Conditions;
use crate::error::SolverResult;
use crate::solver::{EquilibriumResult, Solver};
use rayon::prelude::*;
use tracing::debug;

/// One condition point with its own starting composition sets.
#[derive(Clone, Debug)]
pub struct BatchPoint {
    pub compsets: Vec<CompositionSet>,
    pub conditions: Conditions,
}

/// Solved point: the composition sets after the solve and the solver outcome.
#[derive(Debug)]
pub struct BatchOutcome {
    pub compsets: Vec<CompositionSet>,
    pub result: SolverResult<EquilibriumResult>,
}

/// Solve every point on the rayon pool, returning outcomes in input order.
///
/// Points share nothing but the phase records, so a failure at one point does not
/// affect the others.
pub fn solve_batch(solver: &Solver, points: Vec<BatchPoint>) -> Vec<BatchOutcome> {
    debug!(points = points.len(), "solving batch");
    points
        .into_par_iter()
        .map(|mut point| {
            let result = solver.solve(&mut point.compsets, &point.conditions);
            BatchOutcome {
                compsets: point.compsets,
                result,
            }
        })
        .collect()
}
