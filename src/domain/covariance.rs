//! Covariance estimators and numerical stabilization.

use nalgebra::DMatrix;

/// Sample covariance of the columns of `returns` (rows are periods), with
/// denominator `T - 1`.
pub fn sample_covariance(returns: &DMatrix<f64>) -> DMatrix<f64> {
    let t = returns.nrows();
    let centered = demeaned(returns);
    let denom = (t.max(2) - 1) as f64;
    (centered.transpose() * &centered) / denom
}

/// Ledoit-Wolf shrinkage toward `mu * I`, where `mu` is the average variance.
///
/// Returns the shrunk (maximum-likelihood scaled) covariance and the
/// shrinkage intensity in `[0, 1]`.
pub fn ledoit_wolf(returns: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
    let t = returns.nrows() as f64;
    let n = returns.ncols();
    let x = demeaned(returns);
    let emp = (x.transpose() * &x) / t;

    let x2 = x.map(|v| v * v);
    let emp_trace = x2.sum() / t;
    let mu = emp_trace / n as f64;

    let beta_raw: f64 = (x2.transpose() * &x2).sum();
    let delta_raw: f64 = (x.transpose() * &x).map(|v| v * v).sum() / (t * t);

    let delta = (delta_raw - 2.0 * mu * emp_trace + n as f64 * mu * mu) / n as f64;
    let beta = ((beta_raw / t - delta_raw) / (n as f64 * t)).min(delta);
    let shrinkage = if beta <= 0.0 || delta <= 0.0 {
        0.0
    } else {
        (beta / delta).clamp(0.0, 1.0)
    };

    let target = DMatrix::identity(n, n) * mu;
    (emp * (1.0 - shrinkage) + target * shrinkage, shrinkage)
}

/// Blends `cov` with `(trace / n) * I` when it is singular or its condition
/// number exceeds `max_condition`.
///
/// Uses the smallest blend intensity that brings the condition number down to
/// `max_condition`; returns the intensity when a blend was applied. A matrix
/// with non-positive trace is returned unchanged.
pub fn stabilize(cov: &DMatrix<f64>, max_condition: f64) -> (DMatrix<f64>, Option<f64>) {
    let n = cov.nrows();
    let sym = (cov + cov.transpose()) * 0.5;
    if n == 0 {
        return (sym, None);
    }

    let eigen = sym.clone().symmetric_eigen();
    let lambda_min = eigen.eigenvalues.min();
    let lambda_max = eigen.eigenvalues.max();
    let mean_var = sym.trace() / n as f64;

    if !(mean_var.is_finite() && mean_var > 0.0) {
        return (sym, None);
    }
    if lambda_min > 0.0 && lambda_max / lambda_min <= max_condition {
        return (sym, None);
    }

    let excess = lambda_max - max_condition * lambda_min;
    let pull = mean_var * (max_condition - 1.0);
    let intensity = ((excess / (excess + pull)) * (1.0 + 1e-9)).clamp(0.0, 1.0);

    let target = DMatrix::identity(n, n) * mean_var;
    (sym * (1.0 - intensity) + target * intensity, Some(intensity))
}

fn demeaned(returns: &DMatrix<f64>) -> DMatrix<f64> {
    let t = returns.nrows().max(1) as f64;
    let mut centered = returns.clone();
    for mut column in centered.column_iter_mut() {
        let mean = column.sum() / t;
        column.add_scalar_mut(-mean);
    }
    centered
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn condition_number(cov: &DMatrix<f64>) -> f64 {
        let eigen = cov.clone().symmetric_eigen();
        eigen.eigenvalues.max() / eigen.eigenvalues.min()
    }

    fn sample_returns() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            5,
            2,
            &[
                0.01, 0.02, //
                -0.02, -0.01, //
                0.03, 0.01, //
                0.00, 0.02, //
                0.01, -0.03,
            ],
        )
    }

    #[test]
    fn sample_covariance_matches_hand_computation() {
        let cov = sample_covariance(&sample_returns());
        // mean a = 0.006, var a = sum((a - 0.006)^2) / 4
        let a = [0.01, -0.02, 0.03, 0.00, 0.01];
        let mean_a = a.iter().sum::<f64>() / 5.0;
        let var_a = a.iter().map(|x| (x - mean_a).powi(2)).sum::<f64>() / 4.0;
        assert_relative_eq!(cov[(0, 0)], var_a, epsilon = 1e-15);
        assert_relative_eq!(cov[(0, 1)], cov[(1, 0)], epsilon = 1e-18);
    }

    #[test]
    fn ledoit_wolf_intensity_in_unit_interval() {
        let (cov, shrinkage) = ledoit_wolf(&sample_returns());
        assert!((0.0..=1.0).contains(&shrinkage));
        assert_eq!(cov.nrows(), 2);
        assert!(cov[(0, 0)] > 0.0);
        assert_relative_eq!(cov[(0, 1)], cov[(1, 0)], epsilon = 1e-18);
    }

    #[test]
    fn stabilize_leaves_well_conditioned_matrix_alone() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]);
        let (out, shrinkage) = stabilize(&cov, 1e8);
        assert!(shrinkage.is_none());
        assert_eq!(out, cov);
    }

    #[test]
    fn stabilize_makes_singular_matrix_positive_definite() {
        // Perfectly correlated pair: rank one.
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.04, 0.04, 0.04]);
        let (out, shrinkage) = stabilize(&cov, 100.0);
        let intensity = shrinkage.expect("shrinkage should be applied");
        assert!(intensity > 0.0 && intensity < 1.0);
        assert!(out.clone().cholesky().is_some());
        assert!(condition_number(&out) <= 100.0 * (1.0 + 1e-6));
        assert_relative_eq!(out.trace(), cov.trace(), epsilon = 1e-12);
    }

    #[test]
    fn stabilize_ignores_zero_matrix() {
        let cov = DMatrix::<f64>::zeros(3, 3);
        let (out, shrinkage) = stabilize(&cov, 1e8);
        assert!(shrinkage.is_none());
        assert!(out.cholesky().is_none());
    }
}
