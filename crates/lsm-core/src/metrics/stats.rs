//! Distribution summaries shared by the metric families.
//! Every helper returns `None` where the statistic is undefined instead of NaN.

/// Arithmetic mean; `None` for an empty slice.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Weighted mean Σ vᵢwᵢ / Σ wᵢ over `(value, weight)` pairs.
pub(crate) fn weighted_mean(pairs: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let (num, den) = pairs.fold((0.0, 0.0), |(n, d), (v, w)| (n + v * w, d + w));
    if den > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

/// Coefficient of variation in percent, using the sample standard deviation.
///
/// Undefined for fewer than two values or a zero mean.
pub(crate) fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    if m.abs() < f64::EPSILON {
        return None;
    }
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    let sd = (ss / (values.len() - 1) as f64).sqrt();
    Some(sd / m * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_of_empty_is_undefined() {
        assert!(mean(&[]).is_none());
        assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
    }

    #[test]
    fn weighted_mean_zero_weight_is_undefined() {
        assert!(weighted_mean([(1.0, 0.0)].into_iter()).is_none());
        assert_eq!(weighted_mean([(1.0, 1.0), (4.0, 3.0)].into_iter()), Some(3.25));
    }

    #[test]
    fn cv_uses_sample_sd() {
        // sd(2, 4, 6) = 2, mean = 4
        assert_relative_eq!(coefficient_of_variation(&[2.0, 4.0, 6.0]).unwrap(), 50.0, epsilon = 1e-12);
        assert!(coefficient_of_variation(&[5.0]).is_none());
        assert_eq!(coefficient_of_variation(&[3.0, 3.0]), Some(0.0));
    }
}
