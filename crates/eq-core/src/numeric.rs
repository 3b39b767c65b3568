use crate::EqError;

/// `v` unchanged when finite.
pub fn ensure_finite(v: f64, what: &'static str) -> Result<f64, EqError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(EqError::NonFinite { what, value: v })
    }
}

/// Magnitude of the change from `old` to `new`, relative to the larger magnitude.
///
/// The absolute change when both are zero.
pub fn relative_change(old: f64, new: f64) -> f64 {
    let diff = (new - old).abs();
    let scale = old.abs().max(new.abs());
    if scale > 0.0 { diff / scale } else { diff }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(f64::NAN, "test").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Non-finite"));
    }

    #[test]
    fn relative_change_handles_zero() {
        assert_eq!(relative_change(0.0, 0.0), 0.0);
        assert!((relative_change(0.0, 1e-3) - 1.0).abs() < 1e-15);
        assert!((relative_change(100.0, 101.0) - 1.0 / 101.0).abs() < 1e-15);
    }
}
