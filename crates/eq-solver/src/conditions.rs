//! Externally prescribed conditions of an equilibrium calculation.

use crate::error::{SolverError, SolverResult};
use eq_core::units::{Pressure, Temperature, kelvin, pascal};
use eq_models::StateVariable;
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Smallest mole fraction the solver works with; positive values below it are raised.
pub const MIN_COMPOSITION: f64 = 1e-10;

/// Name of a condition: `X_<EL>`, `MU_<EL>`, `T`, `P` or `N`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConditionKey {
    MoleFraction(String),
    ChemicalPotential(String),
    StateVariable(StateVariable),
    SystemAmount,
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionKey::MoleFraction(el) => write!(f, "X_{el}"),
            ConditionKey::ChemicalPotential(el) => write!(f, "MU_{el}"),
            ConditionKey::StateVariable(sv) => write!(f, "{sv}"),
            ConditionKey::SystemAmount => f.write_str("N"),
        }
    }
}

impl FromStr for ConditionKey {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "N" {
            return Ok(ConditionKey::SystemAmount);
        }
        if let Ok(sv) = s.parse::<StateVariable>() {
            return Ok(ConditionKey::StateVariable(sv));
        }
        let element = |rest: &str| -> SolverResult<String> {
            if rest.is_empty() {
                Err(SolverError::Condition {
                    what: format!("condition '{s}' names no element"),
                })
            } else {
                Ok(rest.to_string())
            }
        };
        if let Some(rest) = s.strip_prefix("X_") {
            return Ok(ConditionKey::MoleFraction(element(rest)?));
        }
        if let Some(rest) = s.strip_prefix("MU_") {
            return Ok(ConditionKey::ChemicalPotential(element(rest)?));
        }
        Err(SolverError::Condition {
            what: format!("unrecognized condition '{s}'"),
        })
    }
}

/// Ordered condition set.
///
/// Insertion order matters: the order of the mole-fraction conditions is the order
/// of the prescribed-element rows of the equilibrium system.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conditions {
    values: IndexMap<ConditionKey, f64>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `(name, value)` pairs such as `("X_B", 0.4)`.
    pub fn from_pairs<I, S>(pairs: I) -> SolverResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut conditions = Self::new();
        for (name, value) in pairs {
            conditions.insert(name.as_ref().parse()?, value);
        }
        Ok(conditions)
    }

    /// Insert or replace a condition, returning the previous value.
    pub fn insert(&mut self, key: ConditionKey, value: f64) -> Option<f64> {
        self.values.insert(key, value)
    }

    pub fn with(mut self, key: ConditionKey, value: f64) -> Self {
        self.insert(key, value);
        self
    }

    pub fn temperature(self, t: Temperature) -> Self {
        self.with(
            ConditionKey::StateVariable(StateVariable::Temperature),
            kelvin(t),
        )
    }

    pub fn pressure(self, p: Pressure) -> Self {
        self.with(ConditionKey::StateVariable(StateVariable::Pressure), pascal(p))
    }

    pub fn mole_fraction(self, element: &str, x: f64) -> Self {
        self.with(ConditionKey::MoleFraction(element.to_string()), x)
    }

    pub fn chemical_potential(self, element: &str, mu: f64) -> Self {
        self.with(ConditionKey::ChemicalPotential(element.to_string()), mu)
    }

    pub fn system_amount(self, n: f64) -> Self {
        self.with(ConditionKey::SystemAmount, n)
    }

    pub fn get(&self, key: &ConditionKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn contains(&self, key: &ConditionKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn state_variable(&self, sv: StateVariable) -> Option<f64> {
        self.get(&ConditionKey::StateVariable(sv))
    }

    /// Total system amount, 1 when not prescribed.
    pub fn system_amount_value(&self) -> f64 {
        self.get(&ConditionKey::SystemAmount).unwrap_or(1.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConditionKey, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy with positive mole fractions raised to [`MIN_COMPOSITION`].
    ///
    /// Zero compositions are a common pattern and are raised silently.
    pub fn adjusted(&self) -> Self {
        let mut out = self.clone();
        for (key, value) in out.values.iter_mut() {
            if let ConditionKey::MoleFraction(_) = key {
                if *value > 0.0 && *value < MIN_COMPOSITION {
                    warn!(
                        condition = %key,
                        value = *value,
                        "composition below the minimum allowed composition of {MIN_COMPOSITION}"
                    );
                }
                if *value < MIN_COMPOSITION && *value >= 0.0 {
                    *value = MIN_COMPOSITION;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eq_core::units::{k, pa};

    #[test]
    fn parses_condition_names() {
        assert_eq!(
            "X_AL".parse::<ConditionKey>().unwrap(),
            ConditionKey::MoleFraction("AL".into())
        );
        assert_eq!(
            "MU_CR".parse::<ConditionKey>().unwrap(),
            ConditionKey::ChemicalPotential("CR".into())
        );
        assert_eq!(
            "T".parse::<ConditionKey>().unwrap(),
            ConditionKey::StateVariable(StateVariable::Temperature)
        );
        assert_eq!("N".parse::<ConditionKey>().unwrap(), ConditionKey::SystemAmount);
        assert!("X_".parse::<ConditionKey>().is_err());
        assert!("ACR_AL".parse::<ConditionKey>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for name in ["X_B", "MU_A", "T", "P", "N"] {
            assert_eq!(name.parse::<ConditionKey>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn builder_keeps_insertion_order() {
        let conds = Conditions::new()
            .temperature(k(1000.0))
            .pressure(pa(101_325.0))
            .mole_fraction("B", 0.3)
            .mole_fraction("C", 0.1);
        let names: Vec<String> = conds.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(names, vec!["T", "P", "X_B", "X_C"]);
        assert_eq!(conds.state_variable(StateVariable::Temperature), Some(1000.0));
        assert_eq!(conds.system_amount_value(), 1.0);
    }

    #[test]
    fn adjusted_raises_tiny_compositions() {
        let conds = Conditions::from_pairs([("X_B", 0.0), ("X_C", 1e-14), ("T", 300.0)]).unwrap();
        let adjusted = conds.adjusted();
        assert_eq!(
            adjusted.get(&ConditionKey::MoleFraction("B".into())),
            Some(MIN_COMPOSITION)
        );
        assert_eq!(
            adjusted.get(&ConditionKey::MoleFraction("C".into())),
            Some(MIN_COMPOSITION)
        );
        assert_eq!(adjusted.state_variable(StateVariable::Temperature), Some(300.0));
    }
}
