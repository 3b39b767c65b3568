//! eq-models: Gibbs energy models consumed by the equilibrium solver.
//!
//! Provides:
//! - `PhaseRecord`, the capability trait the solver consumes (energy, gradient,
//!   Hessian, masses, internal constraints, named properties)
//! - `CefPhase`, a compound-energy-formalism implementation of it
//! - temperature-dependent parameter functions
//! - a serde-loadable `Database` of CEF phases
//!
//! # Example
//!
//! ```
//! use eq_models::{Database, PhaseRecord};
//!
//! let db = Database::from_yaml_str(
//!     "elements: [A]\nphases:\n  - name: FCC\n    sublattices: [{constituents: [A]}]\n    endmembers: [{constituents: [A], g: {a: -1000.0}}]\n",
//! )
//! .unwrap();
//! let fcc = db.build_phase("FCC").unwrap();
//! let g = fcc.obj(&[101325.0, 300.0, 1.0]).unwrap();
//! assert!((g + 1000.0).abs() < 1e-9);
//! ```

pub mod cef;
pub mod database;
pub mod error;
pub mod record;
pub mod tfunc;

// Re-exports for ergonomics
pub use cef::{CefPhase, Sublattice};
pub use database::{Database, EndmemberDef, InteractionDef, PhaseDef, SublatticeDef};
pub use error::{ModelError, ModelResult};
pub use record::{PhaseRecord, StateVariable};
pub use tfunc::TemperatureFunction;
