//! Problem file schema definitions.

use eq_models::Database;
use eq_solver::SolverConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const LATEST_VERSION: u32 = 1;

/// One equilibrium problem: phases, conditions, starting point and requested outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Problem {
    pub version: u32,
    pub name: String,
    pub database: DatabaseSource,
    /// Condition strings (`T`, `P`, `N`, `X_<EL>`, `MU_<EL>`) in evaluation order.
    pub conditions: IndexMap<String, f64>,
    /// Starting values for state variables that are not conditions (`T`, `P`).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub initial_state: IndexMap<String, f64>,
    #[serde(default)]
    pub starting_points: Vec<StartingPointDef>,
    #[serde(default)]
    pub solver: SolverConfig,
    /// Merge composition sets of the same phase before solving.
    #[serde(default)]
    pub no_miscibility_gap: bool,
    /// Property strings evaluated on the converged result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
}

/// Database embedded in the problem, or a path relative to the problem file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DatabaseSource {
    File { file: PathBuf },
    Inline(Database),
}

/// Starting composition set.
///
/// ```yaml
/// starting_points:
///   - phase: FCC
///     site_fractions: [0.8, 0.2]   # optional, uniform per sublattice by default
///     amount: 0.5
///   - phase: LIQUID
///     amount: 0.0
///     fixed: true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartingPointDef {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_fractions: Option<Vec<f64>>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub fixed: bool,
}
