//! Temperature-dependent parameter functions.

use serde::{Deserialize, Serialize};

/// `G(T) = a + b·T + c·T·ln(T) + d·T²`
///
/// The usual leading terms of a CALPHAD lattice-stability expression. Missing
/// coefficients default to zero in database files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureFunction {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl TemperatureFunction {
    pub fn constant(a: f64) -> Self {
        Self {
            a,
            ..Self::default()
        }
    }

    pub fn linear(a: f64, b: f64) -> Self {
        Self {
            a,
            b,
            ..Self::default()
        }
    }

    pub fn value(&self, t: f64) -> f64 {
        self.a + self.b * t + self.c * t * t.ln() + self.d * t * t
    }

    pub fn d1(&self, t: f64) -> f64 {
        self.b + self.c * (t.ln() + 1.0) + 2.0 * self.d * t
    }

    pub fn d2(&self, t: f64) -> f64 {
        self.c / t + 2.0 * self.d
    }

    pub fn d3(&self, t: f64) -> f64 {
        -self.c / (t * t)
    }

    /// Value and first three derivatives.
    pub(crate) fn derivatives(&self, t: f64) -> [f64; 4] {
        [self.value(t), self.d1(t), self.d2(t), self.d3(t)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivatives_match_finite_differences() {
        let f = TemperatureFunction {
            a: -7976.15,
            b: 137.093,
            c: -24.3671,
            d: -1.88e-3,
        };
        let t = 800.0;
        let h = 1e-3;
        let fd1 = (f.value(t + h) - f.value(t - h)) / (2.0 * h);
        let fd2 = (f.d1(t + h) - f.d1(t - h)) / (2.0 * h);
        let fd3 = (f.d2(t + h) - f.d2(t - h)) / (2.0 * h);
        assert!((fd1 - f.d1(t)).abs() < 1e-6);
        assert!((fd2 - f.d2(t)).abs() < 1e-8);
        assert!((fd3 - f.d3(t)).abs() < 1e-10);
    }

    #[test]
    fn missing_coefficients_default_to_zero() {
        let f: TemperatureFunction = serde_json::from_str(r#"{"a": 5000.0}"#).unwrap();
        assert_eq!(f, TemperatureFunction::constant(5000.0));
    }
}
