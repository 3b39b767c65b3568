//! Serde-loadable thermodynamic database of CEF phases.

use crate::cef::{CefPhase, Sublattice};
use crate::error::{ModelError, ModelResult};
use crate::tfunc::TemperatureFunction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Database {
    /// Non-vacant elements, in the order used for chemical potentials.
    pub elements: Vec<String>,
    #[serde(default)]
    pub phases: Vec<PhaseDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseDef {
    pub name: String,
    pub sublattices: Vec<SublatticeDef>,
    #[serde(default)]
    pub endmembers: Vec<EndmemberDef>,
    #[serde(default)]
    pub interactions: Vec<InteractionDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SublatticeDef {
    #[serde(default = "unit_site_ratio")]
    pub site_ratio: f64,
    pub constituents: Vec<String>,
}

fn unit_site_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndmemberDef {
    pub constituents: Vec<String>,
    pub g: TemperatureFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionDef {
    #[serde(default)]
    pub sublattice: usize,
    pub pair: [String; 2],
    #[serde(default)]
    pub order: u32,
    pub l: TemperatureFunction,
}

impl Database {
    pub fn from_yaml_str(content: &str) -> ModelResult<Self> {
        let db: Database = serde_yaml::from_str(content).map_err(|e| ModelError::Database {
            message: e.to_string(),
        })?;
        db.validate()?;
        Ok(db)
    }

    pub fn from_json_str(content: &str) -> ModelResult<Self> {
        let db: Database = serde_json::from_str(content).map_err(|e| ModelError::Database {
            message: e.to_string(),
        })?;
        db.validate()?;
        Ok(db)
    }

    /// Load a `.json` file as JSON and anything else as YAML.
    pub fn load(path: &Path) -> ModelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::Database {
            message: format!("{}: {e}", path.display()),
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Structural checks that do not require building the phases.
    pub fn validate(&self) -> ModelResult<()> {
        if self.elements.is_empty() {
            return Err(ModelError::Database {
                message: "no elements defined".into(),
            });
        }
        for (i, el) in self.elements.iter().enumerate() {
            if self.elements[..i].contains(el) {
                return Err(ModelError::Database {
                    message: format!("element {el} listed twice"),
                });
            }
        }
        for (i, phase) in self.phases.iter().enumerate() {
            if self.phases[..i].iter().any(|p| p.name == phase.name) {
                return Err(ModelError::Database {
                    message: format!("phase {} defined twice", phase.name),
                });
            }
        }
        Ok(())
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseDef> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn build_phase(&self, name: &str) -> ModelResult<CefPhase> {
        let def = self.phase(name).ok_or_else(|| ModelError::Database {
            message: format!("phase {name} not in database"),
        })?;
        def.build(&self.elements)
    }

    /// Build every phase, keyed by name.
    pub fn phase_records(&self) -> ModelResult<BTreeMap<String, Arc<CefPhase>>> {
        self.phases
            .iter()
            .map(|def| Ok((def.name.clone(), Arc::new(def.build(&self.elements)?))))
            .collect()
    }
}

impl PhaseDef {
    pub fn build(&self, elements: &[String]) -> ModelResult<CefPhase> {
        let sublattices = self
            .sublattices
            .iter()
            .map(|s| Sublattice {
                site_ratio: s.site_ratio,
                constituents: s.constituents.clone(),
            })
            .collect();
        let mut phase = CefPhase::new(self.name.clone(), elements.to_vec(), sublattices)?;
        for em in &self.endmembers {
            let constituents: Vec<&str> = em.constituents.iter().map(String::as_str).collect();
            phase.add_endmember(&constituents, em.g)?;
        }
        for int in &self.interactions {
            phase.add_interaction(
                int.sublattice,
                (int.pair[0].as_str(), int.pair[1].as_str()),
                int.order,
                int.l,
            )?;
        }
        Ok(phase)
    }
}
