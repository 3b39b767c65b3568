//! Problem validation logic.

use crate::schema::{DatabaseSource, LATEST_VERSION, Problem, StartingPointDef};
use eq_models::{Database, PhaseDef};
use eq_solver::{ComputableProperty, ConditionKey};

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Missing reference: {id} in {context}")]
    MissingReference { id: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid database: {message}")]
    Database { message: String },

    #[error("Unsupported version: {version}")]
    UnsupportedVersion { version: u32 },
}

/// Structural checks on a problem.
///
/// Checks that need the phase definitions are skipped while the database is still a
/// file reference; loading resolves it first.
pub fn validate_problem(problem: &Problem) -> Result<(), ValidationError> {
    if problem.version > LATEST_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            version: problem.version,
        });
    }

    if problem.conditions.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "conditions".to_string(),
            value: "{}".to_string(),
            reason: "at least one condition is required".to_string(),
        });
    }
    for (name, value) in &problem.conditions {
        name.parse::<ConditionKey>()
            .map_err(|e| ValidationError::InvalidValue {
                field: "condition".to_string(),
                value: name.clone(),
                reason: e.to_string(),
            })?;
        validate_finite(&format!("condition {name}"), *value)?;
    }

    for (name, value) in &problem.initial_state {
        if !matches!(name.as_str(), "T" | "P") {
            return Err(ValidationError::InvalidValue {
                field: "initial_state".to_string(),
                value: name.clone(),
                reason: "only T and P can be given a starting value".to_string(),
            });
        }
        validate_positive_finite(&format!("initial_state {name}"), *value)?;
    }

    if problem.starting_points.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "starting_points".to_string(),
            value: "[]".to_string(),
            reason: "at least one starting composition set is required".to_string(),
        });
    }
    for point in &problem.starting_points {
        validate_starting_point(point)?;
    }

    if let DatabaseSource::Inline(db) = &problem.database {
        validate_against_database(problem, db)?;
    }

    for property in &problem.properties {
        property
            .parse::<ComputableProperty>()
            .map_err(|e| ValidationError::InvalidValue {
                field: "property".to_string(),
                value: property.clone(),
                reason: e.to_string(),
            })?;
    }

    Ok(())
}

fn validate_starting_point(point: &StartingPointDef) -> Result<(), ValidationError> {
    if !point.amount.is_finite() || point.amount < 0.0 {
        return Err(ValidationError::InvalidValue {
            field: format!("starting point '{}' amount", point.phase),
            value: point.amount.to_string(),
            reason: "must be non-negative and finite".to_string(),
        });
    }
    for &y in point.site_fractions.iter().flatten() {
        if !y.is_finite() || y <= 0.0 || y > 1.0 {
            return Err(ValidationError::InvalidValue {
                field: format!("starting point '{}' site_fractions", point.phase),
                value: y.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
    }
    Ok(())
}

fn validate_against_database(problem: &Problem, db: &Database) -> Result<(), ValidationError> {
    db.validate().map_err(|e| ValidationError::Database {
        message: e.to_string(),
    })?;

    for point in &problem.starting_points {
        let phase = db
            .phase(&point.phase)
            .ok_or_else(|| ValidationError::MissingReference {
                id: point.phase.clone(),
                context: "starting point phase".to_string(),
            })?;
        if let Some(y) = &point.site_fractions {
            let expected = site_count(phase);
            if y.len() != expected {
                return Err(ValidationError::InvalidValue {
                    field: format!("starting point '{}' site_fractions", point.phase),
                    value: y.len().to_string(),
                    reason: format!("phase has {expected} site fractions"),
                });
            }
        }
    }

    for name in problem.conditions.keys() {
        let element = match name.parse::<ConditionKey>() {
            Ok(ConditionKey::MoleFraction(el)) | Ok(ConditionKey::ChemicalPotential(el)) => el,
            _ => continue,
        };
        if !db.elements.contains(&element) {
            return Err(ValidationError::MissingReference {
                id: element,
                context: format!("condition {name}"),
            });
        }
    }
    Ok(())
}

pub(crate) fn site_count(phase: &PhaseDef) -> usize {
    phase.sublattices.iter().map(|s| s.constituents.len()).sum()
}

fn validate_finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be finite".to_string(),
        });
    }
    Ok(())
}

fn validate_positive_finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be positive and finite".to_string(),
        });
    }
    Ok(())
}
