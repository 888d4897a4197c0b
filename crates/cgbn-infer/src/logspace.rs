//! Numerically stable log-space arithmetic.

use crate::error::{FactorError, Result};

/// `ln(Σ exp(xᵢ))` without underflow; `-inf` for an empty or all-zero input.
pub fn log_sum_of_logs(logs: &[f64]) -> f64 {
    let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = logs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// `ln(exp(a) + exp(b))`.
pub fn log_add(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Natural log of a probability; exactly 0.0 maps to `-inf`.
pub fn safe_ln(p: f64) -> Result<f64> {
    if p.is_nan() || p < 0.0 {
        return Err(FactorError::InvalidValue(format!(
            "probability must be a non-negative number, got {}",
            p
        )));
    }
    if p == 0.0 {
        Ok(f64::NEG_INFINITY)
    } else {
        Ok(p.ln())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_log_sum_of_logs_tiny_values() {
        // exp(-1000) underflows to 0 in linear space
        let logs = [-1000.0, -1000.0];
        assert_abs_diff_eq!(log_sum_of_logs(&logs), -1000.0 + 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_log_sum_of_logs_zeros() {
        assert_eq!(log_sum_of_logs(&[]), f64::NEG_INFINITY);
        assert_eq!(
            log_sum_of_logs(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        assert_abs_diff_eq!(
            log_sum_of_logs(&[f64::NEG_INFINITY, 0.5f64.ln()]),
            0.5f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_log_add() {
        assert_abs_diff_eq!(log_add(0.2f64.ln(), 0.3f64.ln()), 0.5f64.ln(), epsilon = 1e-12);
        assert_eq!(log_add(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert_eq!(log_add(f64::NEG_INFINITY, -2.0), -2.0);
    }

    #[test]
    fn test_safe_ln() {
        assert_eq!(safe_ln(0.0).unwrap(), f64::NEG_INFINITY);
        assert_abs_diff_eq!(safe_ln(1.0).unwrap(), 0.0);
        assert!(safe_ln(f64::NAN).is_err());
        assert!(safe_ln(-0.1).is_err());
    }
}
