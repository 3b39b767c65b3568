//! eq-project: equilibrium problem file format, validation and solver setup.

pub mod schema;
pub mod setup;
pub mod validate;

pub use schema::*;
pub use setup::{SolverInputs, prepare, uniform_site_fractions};
pub use validate::{ValidationError, validate_problem};

use std::path::Path;

pub type ProjectResult<T> = Result<T, ProjectError>;

#[derive(thiserror::Error, Debug)]
pub enum ProjectError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database file was not resolved; load the problem from a file")]
    UnresolvedDatabase,

    #[error("Model error: {0}")]
    Model(#[from] eq_models::ModelError),

    #[error("Solver error: {0}")]
    Solver(#[from] eq_solver::SolverError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn load_yaml(path: &Path) -> ProjectResult<Problem> {
    let content = std::fs::read_to_string(path)?;
    let problem: Problem = serde_yaml::from_str(&content)?;
    finish_loading(problem, path)
}

pub fn save_yaml(path: &Path, problem: &Problem) -> ProjectResult<()> {
    validate_problem(problem)?;
    let content = serde_yaml::to_string(problem)?;
    std::fs::write(path, content)?;
    Ok(())
}

pub fn load_json(path: &Path) -> ProjectResult<Problem> {
    let content = std::fs::read_to_string(path)?;
    let problem: Problem = serde_json::from_str(&content)?;
    finish_loading(problem, path)
}

pub fn save_json(path: &Path, problem: &Problem) -> ProjectResult<()> {
    validate_problem(problem)?;
    let content = serde_json::to_string_pretty(problem)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load `.json` files as JSON and anything else as YAML.
pub fn load(path: &Path) -> ProjectResult<Problem> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => load_json(path),
        _ => load_yaml(path),
    }
}

/// Inline a referenced database file (relative to the problem file) and validate.
fn finish_loading(mut problem: Problem, path: &Path) -> ProjectResult<Problem> {
    if let DatabaseSource::File { file } = &problem.database {
        let db_path = match path.parent() {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.clone(),
        };
        tracing::debug!(path = %db_path.display(), "loading database");
        problem.database = DatabaseSource::Inline(eq_models::Database::load(&db_path)?);
    }
    validate_problem(&problem)?;
    Ok(problem)
}
