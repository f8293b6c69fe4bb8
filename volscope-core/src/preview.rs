//! Preview grid kernels: non-finite cleanup, safe division and min-max scaling.

use crate::{element_count, Error, Result};

/// Replacement for exact-zero denominators before dividing.
pub const ZERO_DENOMINATOR_FLOOR: f64 = 1e-10;

/// How `sanitize` treats positive infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfPolicy {
    /// `+inf` becomes 0.0 (single-dataset previews).
    Zero,
    /// `+inf` becomes 1.0 (ratio previews).
    One,
}

impl InfPolicy {
    fn positive(self) -> f64 {
        match self {
            Self::Zero => 0.0,
            Self::One => 1.0,
        }
    }
}

/// Checks that `len` elements fill `shape` exactly.
///
/// # Errors
/// Returns `ShapeMismatch` if the counts differ.
pub fn check_element_count(len: usize, shape: &[usize]) -> Result<()> {
    if element_count(shape) == len {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            shape: shape.to_vec(),
            len,
        })
    }
}

/// Replaces NaN and `-inf` with 0.0, and `+inf` per `policy`.
pub fn sanitize(values: &mut [f64], policy: InfPolicy) {
    for v in values.iter_mut() {
        if v.is_nan() {
            *v = 0.0;
        } else if v.is_infinite() {
            *v = if v.is_sign_positive() {
                policy.positive()
            } else {
                0.0
            };
        }
    }
}

/// Scales finite values into `[0, 1]`.
///
/// When every value is equal (or the slice is empty) the result is all zeros.
pub fn normalize_min_max(values: &mut [f64]) {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if max > min {
        let span = max - min;
        if span.is_finite() {
            for v in values.iter_mut() {
                *v = (*v - min) / span;
            }
        } else {
            // extremes near +-f64::MAX: halve both sides so the span stays finite
            let (half_min, half_span) = (min / 2.0, max / 2.0 - min / 2.0);
            for v in values.iter_mut() {
                *v = ((*v / 2.0 - half_min) / half_span).clamp(0.0, 1.0);
            }
        }
    } else {
        values.fill(0.0);
    }
}

/// Elementwise `numerator / denominator` with exact zeros in the
/// denominator replaced by [`ZERO_DENOMINATOR_FLOOR`].
///
/// # Errors
/// Returns `ShapeMismatch` if the operands differ in length.
pub fn ratio_with_floor(numerator: &[f64], denominator: &[f64]) -> Result<Vec<f64>> {
    if numerator.len() != denominator.len() {
        return Err(Error::ShapeMismatch {
            shape: vec![numerator.len()],
            len: denominator.len(),
        });
    }

    Ok(numerator
        .iter()
        .zip(denominator)
        .map(|(&n, &d)| {
            let d = if d == 0.0 { ZERO_DENOMINATOR_FLOOR } else { d };
            n / d
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_sanitize_policies() {
        let mut single = vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 2.5];
        sanitize(&mut single, InfPolicy::Zero);
        assert_eq!(single, vec![0.0, 0.0, 0.0, 2.5]);

        let mut ratio = vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 2.5];
        sanitize(&mut ratio, InfPolicy::One);
        assert_eq!(ratio, vec![0.0, 1.0, 0.0, 2.5]);
    }

    #[test]
    fn test_normalize_range() {
        let mut values = vec![2.0, 4.0, 6.0];
        normalize_min_max(&mut values);
        assert_abs_diff_eq!(values[0], 0.0);
        assert_abs_diff_eq!(values[1], 0.5);
        assert_abs_diff_eq!(values[2], 1.0);
    }

    #[test]
    fn test_normalize_constant_is_zero() {
        let mut values = vec![1.0; 6];
        normalize_min_max(&mut values);
        assert!(values.iter().all(|&v| v == 0.0));

        let mut empty: Vec<f64> = Vec::new();
        normalize_min_max(&mut empty);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_normalize_overflowing_span() {
        let mut values = vec![1.5e308, -1.5e308, 0.0];
        normalize_min_max(&mut values);
        assert!(values.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(values[0], 1.0);
        assert_abs_diff_eq!(values[1], 0.0);
        assert_abs_diff_eq!(values[2], 0.5);
    }

    #[test]
    fn test_huge_ratio_stays_finite() {
        let mut values = ratio_with_floor(&[1.5e298, -1.5e298, 1.0], &[0.0, 0.0, 1.0]).unwrap();
        sanitize(&mut values, InfPolicy::One);
        normalize_min_max(&mut values);
        assert!(values.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(values[0], 1.0);
        assert_abs_diff_eq!(values[1], 0.0);
        assert_abs_diff_eq!(values[2], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_idempotent() {
        let mut values = vec![0.3, 7.0, -2.0, 1.5, 4.25];
        normalize_min_max(&mut values);
        let once = values.clone();
        normalize_min_max(&mut values);
        for (a, b) in once.iter().zip(&values) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_ratio_zero_denominator_stays_finite() {
        let num = vec![1.0, 0.0, -3.0, 2.0];
        let den = vec![0.0, 0.0, 0.0, 4.0];
        let mut out = ratio_with_floor(&num, &den).unwrap();
        sanitize(&mut out, InfPolicy::One);
        assert!(out.iter().all(|v| v.is_finite()));
        assert_relative_eq!(out[0], 1e10, max_relative = 1e-9);
        assert_abs_diff_eq!(out[1], 0.0);
        assert_abs_diff_eq!(out[3], 0.5);
    }

    #[test]
    fn test_ratio_length_mismatch() {
        let err = ratio_with_floor(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_check_element_count() {
        assert!(check_element_count(12, &[3, 4]).is_ok());
        assert_eq!(
            check_element_count(10, &[3, 4]),
            Err(Error::ShapeMismatch {
                shape: vec![3, 4],
                len: 10
            })
        );
    }
}
