//! Derived properties of converged equilibria and their dot derivatives.
//!
//! A property string is either a model attribute (`GM`, `HM(FCC)`, `HM(FCC#2)`) or a
//! dot derivative `NUM.DEN` of a model attribute with respect to one of the conditions
//! of the solve (`HM.T`, `GM.X_B`, `SM(LIQUID).MU_A`).

use crate::composition_set::CompositionSet;
use crate::conditions::{ConditionKey, Conditions};
use crate::equilibrium_system::{EquilibriumSystem, PhaseLinearization, StableEntry, lstsq};
use crate::error::{SolverError, SolverResult};
use crate::system_spec::SystemSpecification;
use nalgebra::DVector;
use std::fmt;
use std::str::FromStr;

/// Phase instance selected by name and 1-based occurrence (`FCC#2`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PhaseSelector {
    pub phase: String,
    pub multiplicity: usize,
}

impl PhaseSelector {
    /// Index of the selected composition set, if present.
    pub fn find(&self, compsets: &[CompositionSet]) -> Option<usize> {
        compsets
            .iter()
            .enumerate()
            .filter(|(_, cs)| cs.phase_name() == self.phase)
            .nth(self.multiplicity.checked_sub(1)?)
            .map(|(i, _)| i)
    }
}

impl fmt::Display for PhaseSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.multiplicity == 1 {
            f.write_str(&self.phase)
        } else {
            write!(f, "{}#{}", self.phase, self.multiplicity)
        }
    }
}

/// A named attribute of the phase records (`GM`, `HM`, `SM`, `CPM`, ...).
///
/// Without a phase selector the property is the amount-weighted sum over all
/// composition sets; with one it is the molar value of that phase instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelProperty {
    pub name: String,
    pub phase: Option<PhaseSelector>,
}

impl ModelProperty {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: None,
        }
    }

    pub fn of_phase(mut self, phase: impl Into<String>, multiplicity: usize) -> Self {
        self.phase = Some(PhaseSelector {
            phase: phase.into(),
            multiplicity,
        });
        self
    }

    fn per_phase(&self, cs: &CompositionSet) -> SolverResult<f64> {
        Ok(cs.phase_record().prop(&self.name, cs.dof.as_slice())?)
    }

    fn per_phase_grad(&self, cs: &CompositionSet) -> SolverResult<DVector<f64>> {
        Ok(cs.phase_record().prop_grad(&self.name, cs.dof.as_slice())?)
    }

    /// Value at the current state; `None` when the selected phase instance is absent.
    pub fn compute(&self, compsets: &[CompositionSet]) -> SolverResult<Option<f64>> {
        match &self.phase {
            None => {
                let mut total = 0.0;
                for cs in compsets {
                    total += cs.np * self.per_phase(cs)?;
                }
                Ok(Some(total))
            }
            Some(selector) => selector
                .find(compsets)
                .map(|idx| self.per_phase(&compsets[idx]))
                .transpose(),
        }
    }
}

impl fmt::Display for ModelProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            Some(selector) => write!(f, "{}({selector})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ModelProperty {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |why: &str| SolverError::Property {
            what: format!("invalid property '{s}': {why}"),
        };
        let (name, phase) = match s.find('(') {
            Some(open) => {
                let inner = s[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("missing closing parenthesis"))?;
                (&s[..open], Some(inner.trim()))
            }
            None => (s, None),
        };
        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("bad property name"));
        }
        let mut property = ModelProperty::new(name);
        if let Some(phase) = phase {
            let (phase_name, multiplicity) = match phase.split_once('#') {
                Some((p, k)) => {
                    let k: usize = k.trim().parse().map_err(|_| invalid("bad multiplicity"))?;
                    if k == 0 {
                        return Err(invalid("multiplicity starts at 1"));
                    }
                    (p.trim(), k)
                }
                None => (phase, 1),
            };
            if phase_name.is_empty() {
                return Err(invalid("empty phase name"));
            }
            property = property.of_phase(phase_name, multiplicity);
        }
        Ok(property)
    }
}

/// Sensitivity of a model property to one of the conditions of the solve.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DotDerivative {
    pub numerator: ModelProperty,
    pub denominator: ConditionKey,
}

/// Response of the equilibrium to a unit change of one condition.
#[derive(Clone, Debug, PartialEq)]
pub struct DotDeltas {
    pub chemical_potentials: DVector<f64>,
    /// Per composition set, zero for composition sets with a fixed or zero amount
    pub phase_amounts: Vec<f64>,
    pub statevars: DVector<f64>,
    /// Per composition set; `None` when it is not part of the stable set
    pub site_fractions: Vec<Option<DVector<f64>>>,
}

impl DotDerivative {
    /// Linear response of the converged state to the denominator condition.
    ///
    /// Reuses the global equilibrium system with the denominator moved to the
    /// right-hand side and every residual term dropped.
    pub fn deltas(
        &self,
        compsets: &[CompositionSet],
        conditions: &Conditions,
    ) -> SolverResult<DotDeltas> {
        if !conditions.contains(&self.denominator) {
            return Err(SolverError::Property {
                what: format!(
                    "{} is not a condition of this equilibrium and cannot be a denominator",
                    self.denominator
                ),
            });
        }
        let spec = SystemSpecification::new(compsets, conditions)?;
        let state = spec.new_state(compsets, 0.0);
        let stable = state.stable_compset_indices();
        let num_free_stable = state.free_stable_compset_indices.len();

        let linearizations = stable
            .iter()
            .map(|&idx| PhaseLinearization::of(&compsets[idx]))
            .collect::<SolverResult<Vec<_>>>()?;
        let entries: Vec<StableEntry<'_>> = stable
            .iter()
            .zip(&linearizations)
            .enumerate()
            .map(|(pos, (&idx, lin))| StableEntry {
                linearization: lin,
                np: compsets[idx].np,
                amount_column: (pos < num_free_stable).then_some(pos),
            })
            .collect();
        let system = EquilibriumSystem::assemble(&spec, &entries)?;

        let mut delta_mu = DVector::zeros(spec.num_components());
        let mut delta_sv = DVector::zeros(spec.num_statevars());
        let mut rhs = DVector::zeros(system.nrows());
        let mass_row = |el: usize| {
            spec.prescribed_element_indices()
                .iter()
                .position(|&e| e == el)
                .map(|k| system.num_phase_rows + k)
        };
        match &self.denominator {
            ConditionKey::StateVariable(sv) => {
                let idx = spec.statevar_index(*sv).ok_or_else(|| SolverError::Property {
                    what: format!("state variable {sv} is not carried by the phases"),
                })?;
                rhs -= system.statevar.column(idx);
                delta_sv[idx] = 1.0;
            }
            ConditionKey::ChemicalPotential(el) => {
                let idx = element_index(&spec, el)?;
                rhs -= system.chempot.column(idx);
                delta_mu[idx] = 1.0;
            }
            ConditionKey::MoleFraction(el) => {
                let row = mass_row(element_index(&spec, el)?).ok_or_else(|| {
                    SolverError::Property {
                        what: format!("X_{el} is not a prescribed composition"),
                    }
                })?;
                rhs[row] = spec.prescribed_system_amount();
            }
            ConditionKey::SystemAmount => {
                let n = spec.prescribed_system_amount();
                for (k, amount) in spec.prescribed_elemental_amounts().iter().enumerate() {
                    rhs[system.num_phase_rows + k] = amount / n;
                }
                let last = system.nrows() - 1;
                rhs[last] = 1.0;
            }
        }

        let soln = lstsq(system.free_matrix(&spec), &rhs, None)?;
        let free_mu = spec.free_chemical_potential_indices();
        for (i, &c) in free_mu.iter().enumerate() {
            delta_mu[c] = soln[i];
        }
        let mut phase_amounts = vec![0.0; compsets.len()];
        for (i, &idx) in state.free_stable_compset_indices.iter().enumerate() {
            phase_amounts[idx] = soln[free_mu.len() + i];
        }
        let offset = free_mu.len() + num_free_stable;
        for (i, &sv) in spec.free_statevar_indices().iter().enumerate() {
            delta_sv[sv] = soln[offset + i];
        }

        let mut site_fractions = vec![None; compsets.len()];
        for (&idx, sens) in stable.iter().zip(&system.sensitivities) {
            let dy = &sens.c_statevars * &delta_sv + sens.c_component.tr_mul(&delta_mu);
            site_fractions[idx] = Some(dy);
        }

        Ok(DotDeltas {
            chemical_potentials: delta_mu,
            phase_amounts,
            statevars: delta_sv,
            site_fractions,
        })
    }

    /// Chain rule over every stable composition set (Sundman et al. 2015, Eq. 73).
    pub fn compute(
        &self,
        compsets: &[CompositionSet],
        conditions: &Conditions,
    ) -> SolverResult<Option<f64>> {
        let selected = match &self.numerator.phase {
            Some(selector) => match selector.find(compsets) {
                Some(idx) => Some(idx),
                None => return Ok(None),
            },
            None => None,
        };
        let deltas = self.deltas(compsets, conditions)?;
        let mut total = None;
        for (idx, cs) in compsets.iter().enumerate() {
            if selected.is_some_and(|s| s != idx) {
                continue;
            }
            let Some(dy) = &deltas.site_fractions[idx] else {
                continue;
            };
            let grad = self.numerator.per_phase_grad(cs)?;
            let nsv = cs.num_statevars();
            let local = grad.rows(0, nsv).dot(&deltas.statevars)
                + grad.rows(nsv, grad.len() - nsv).dot(dy);
            let term = if selected.is_some() {
                local
            } else {
                deltas.phase_amounts[idx] * self.numerator.per_phase(cs)? + cs.np * local
            };
            *total.get_or_insert(0.0) += term;
        }
        Ok(total)
    }
}

impl fmt::Display for DotDerivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.numerator, self.denominator)
    }
}

fn element_index(spec: &SystemSpecification, el: &str) -> SolverResult<usize> {
    spec.element_index(el).ok_or_else(|| SolverError::Property {
        what: format!("element {el} is not in the system"),
    })
}

/// Any property that can be evaluated on a converged equilibrium.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComputableProperty {
    Model(ModelProperty),
    Dot(DotDerivative),
}

impl ComputableProperty {
    /// Evaluate on converged composition sets.
    ///
    /// `conditions` must be the conditions of the solve; they define which variables
    /// are held fixed by a dot derivative. Returns `None` when the selected phase
    /// instance is absent.
    pub fn compute(
        &self,
        compsets: &[CompositionSet],
        conditions: &Conditions,
    ) -> SolverResult<Option<f64>> {
        match self {
            ComputableProperty::Model(p) => p.compute(compsets),
            ComputableProperty::Dot(d) => d.compute(compsets, conditions),
        }
    }
}

impl fmt::Display for ComputableProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputableProperty::Model(p) => write!(f, "{p}"),
            ComputableProperty::Dot(d) => write!(f, "{d}"),
        }
    }
}

impl FromStr for ComputableProperty {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((num, den)) => {
                let denominator =
                    den.parse::<ConditionKey>()
                        .map_err(|_| SolverError::Property {
                            what: format!("'{den}' cannot be the denominator of a dot derivative"),
                        })?;
                Ok(ComputableProperty::Dot(DotDerivative {
                    numerator: num.parse()?,
                    denominator,
                }))
            }
            None => Ok(ComputableProperty::Model(s.parse()?)),
        }
    }
}
