//! eq-core: shared foundation for the equilibrium workspace.
//!
//! Contains:
//! - units (uom SI types + constructors, physical constants)
//! - numeric (finiteness and relative-change helpers)
//! - error (numeric error type)

pub mod error;
pub mod numeric;
pub mod units;

// Re-exports: nice ergonomics for downstream crates
pub use error::EqError;
pub use numeric::*;
pub use units::*;
