//! Conversion of a validated problem into solver inputs.

use crate::schema::{DatabaseSource, Problem};
use crate::{ProjectError, ProjectResult};
use eq_core::constants::ONE_ATM_PA;
use eq_models::{ModelError, PhaseDef, PhaseRecord, StateVariable};
use eq_solver::{ComputableProperty, CompositionSet, Conditions, Solver};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Starting value of a state variable that is neither a condition nor given in
/// `initial_state`.
pub fn default_state_value(sv: StateVariable) -> f64 {
    match sv {
        StateVariable::Pressure => ONE_ATM_PA,
        StateVariable::Temperature => 298.15,
    }
}

/// Everything needed to run one problem.
#[derive(Debug)]
pub struct SolverInputs {
    pub compsets: Vec<CompositionSet>,
    pub conditions: Conditions,
    pub solver: Solver,
    pub properties: Vec<ComputableProperty>,
}

/// Build phase records, starting composition sets, conditions and the solver.
pub fn prepare(problem: &Problem) -> ProjectResult<SolverInputs> {
    let DatabaseSource::Inline(db) = &problem.database else {
        return Err(ProjectError::UnresolvedDatabase);
    };
    let conditions = Conditions::from_pairs(problem.conditions.iter().map(|(k, v)| (k, *v)))?;

    let mut records: BTreeMap<&str, Arc<dyn PhaseRecord>> = BTreeMap::new();
    let mut compsets = Vec::with_capacity(problem.starting_points.len());
    for point in &problem.starting_points {
        let def = db
            .phase(&point.phase)
            .ok_or_else(|| ModelError::Database {
                message: format!("phase {} not in database", point.phase),
            })?;
        let record = match records.get(point.phase.as_str()) {
            Some(record) => record.clone(),
            None => {
                let record: Arc<dyn PhaseRecord> = Arc::new(def.build(&db.elements)?);
                records.insert(&point.phase, record.clone());
                record
            }
        };

        let state_variables: Vec<f64> = record
            .state_variables()
            .iter()
            .map(|&sv| {
                conditions
                    .state_variable(sv)
                    .or_else(|| problem.initial_state.get(sv.name()).copied())
                    .unwrap_or_else(|| default_state_value(sv))
            })
            .collect();
        let site_fractions = match &point.site_fractions {
            Some(y) => y.clone(),
            None => uniform_site_fractions(def),
        };
        let cs = CompositionSet::from_parts(record, &state_variables, &site_fractions, point.amount)?;
        compsets.push(if point.fixed { cs.pinned() } else { cs });
    }

    let solver = if problem.no_miscibility_gap {
        Solver::no_miscibility_gap(problem.solver.clone())
    } else {
        Solver::new(problem.solver.clone())
    };
    let properties = problem
        .properties
        .iter()
        .map(|p| p.parse::<ComputableProperty>())
        .collect::<Result<_, _>>()?;

    Ok(SolverInputs {
        compsets,
        conditions,
        solver,
        properties,
    })
}

/// Equal occupation of every sublattice.
pub fn uniform_site_fractions(phase: &PhaseDef) -> Vec<f64> {
    phase
        .sublattices
        .iter()
        .flat_map(|s| {
            let n = s.constituents.len();
            std::iter::repeat_n(1.0 / n as f64, n)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eq_models::SublatticeDef;

    #[test]
    fn uniform_occupation_per_sublattice() {
        let phase = PhaseDef {
            name: "SIGMA".into(),
            sublattices: vec![
                SublatticeDef {
                    site_ratio: 2.0,
                    constituents: vec!["A".into(), "B".into()],
                },
                SublatticeDef {
                    site_ratio: 1.0,
                    constituents: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                },
            ],
            endmembers: vec![],
            interactions: vec![],
        };
        assert_eq!(
            uniform_site_fractions(&phase),
            vec![0.5, 0.5, 0.25, 0.25, 0.25, 0.25]
        );
    }
}
