//! Shared phase builders for the solver integration tests.
#![allow(dead_code)]

use eq_core::units::constants::GAS_CONSTANT;
use eq_models::{CefPhase, PhaseRecord, Sublattice, TemperatureFunction};
use eq_solver::CompositionSet;
use std::sync::Arc;

pub const P: f64 = 101_325.0;

pub fn rt(t: f64) -> f64 {
    GAS_CONSTANT * t
}

/// Single-sublattice A-B solution with the given end-member energies.
pub fn binary(name: &str, g_a: TemperatureFunction, g_b: TemperatureFunction) -> Arc<dyn PhaseRecord> {
    let mut phase = CefPhase::new(
        name,
        vec!["A".into(), "B".into()],
        vec![Sublattice {
            site_ratio: 1.0,
            constituents: vec!["A".into(), "B".into()],
        }],
    )
    .unwrap();
    phase.add_endmember(&["A"], g_a).unwrap();
    phase.add_endmember(&["B"], g_b).unwrap();
    Arc::new(phase)
}

/// Pure-A phase of a unary system.
pub fn unary(name: &str, g: TemperatureFunction) -> Arc<dyn PhaseRecord> {
    let mut phase = CefPhase::new(
        name,
        vec!["A".into()],
        vec![Sublattice {
            site_ratio: 1.0,
            constituents: vec!["A".into()],
        }],
    )
    .unwrap();
    phase.add_endmember(&["A"], g).unwrap();
    Arc::new(phase)
}

pub fn compset(record: &Arc<dyn PhaseRecord>, t: f64, y: &[f64], np: f64) -> CompositionSet {
    CompositionSet::from_parts(record.clone(), &[P, t], y, np).unwrap()
}

pub fn find<'a>(compsets: &'a [CompositionSet], phase: &str) -> &'a CompositionSet {
    compsets
        .iter()
        .find(|cs| cs.phase_name() == phase)
        .unwrap_or_else(|| panic!("{phase} missing"))
}

/// Ideal-solution phases with a two-phase region around X_B = 0.4 at 1000 K,
/// plus a metastable GAMMA phase far above both.
pub fn two_phase_start() -> Vec<CompositionSet> {
    let alpha = binary(
        "ALPHA",
        TemperatureFunction::constant(0.0),
        TemperatureFunction::constant(5000.0),
    );
    let beta = binary(
        "BETA",
        TemperatureFunction::constant(3000.0),
        TemperatureFunction::constant(0.0),
    );
    let gamma = binary(
        "GAMMA",
        TemperatureFunction::constant(4000.0),
        TemperatureFunction::constant(4000.0),
    );
    vec![
        compset(&alpha, 1000.0, &[0.8, 0.2], 0.5),
        compset(&beta, 1000.0, &[0.4, 0.6], 0.5),
        compset(&gamma, 1000.0, &[0.5, 0.5], 0.0),
    ]
}

/// Analytic common tangent of [`two_phase_start`]: `(y_B(ALPHA), y_B(BETA))`.
pub fn two_phase_tie_line() -> (f64, f64) {
    let r1 = (3000.0 / rt(1000.0)).exp();
    let r2 = (5000.0 / rt(1000.0)).exp();
    let p = (r1 - 1.0) / (r1 * r2 - 1.0);
    (p, r2 * p)
}

/// A-B solution with zero end-member energies and a single `L0` interaction.
pub fn regular(name: &str, l0: f64) -> Arc<dyn PhaseRecord> {
    let mut phase = CefPhase::new(
        name,
        vec!["A".into(), "B".into()],
        vec![Sublattice {
            site_ratio: 1.0,
            constituents: vec!["A".into(), "B".into()],
        }],
    )
    .unwrap();
    phase
        .add_endmember(&["A"], TemperatureFunction::constant(0.0))
        .unwrap();
    phase
        .add_endmember(&["B"], TemperatureFunction::constant(0.0))
        .unwrap();
    phase
        .add_interaction(0, ("A", "B"), 0, TemperatureFunction::constant(l0))
        .unwrap();
    Arc::new(phase)
}

/// B-poor edge of the symmetric miscibility gap of [`regular`]:
/// the root of `ln((1 − x)/x) = L0·(1 − 2x)/RT` below one half.
pub fn regular_gap_edge(l0: f64, t: f64) -> f64 {
    let f = |x: f64| ((1.0 - x) / x).ln() - l0 * (1.0 - 2.0 * x) / rt(t);
    let (mut lo, mut hi) = (1e-6, 0.4);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if f(lo) * f(mid) <= 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    0.5 * (lo + hi)
}
