//! Expected performance of a weight vector under estimated moments.

use crate::domain::allocation::Allocation;
use crate::domain::returns::MomentEstimates;
use nalgebra::DVector;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Performance {
    /// Annualized expected return.
    pub expected_return: f64,
    /// Annualized volatility.
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

impl Performance {
    /// Performance of weights ordered like `moments.funds`.
    pub fn of_vector(w: &DVector<f64>, moments: &MomentEstimates, risk_free_rate: f64) -> Self {
        let expected_return = moments.expected_returns.dot(w);
        let variance = (w.transpose() * &moments.covariance * w)[(0, 0)];
        let volatility = variance.max(0.0).sqrt();
        let sharpe_ratio = if volatility > 0.0 {
            (expected_return - risk_free_rate) / volatility
        } else {
            0.0
        };
        Self {
            expected_return,
            volatility,
            sharpe_ratio,
        }
    }
}

/// Expected return, volatility and Sharpe ratio of an allocation.
///
/// Funds missing from the allocation count as zero weight.
pub fn portfolio_performance(
    allocation: &Allocation,
    moments: &MomentEstimates,
    risk_free_rate: f64,
) -> Performance {
    let w = DVector::from_iterator(
        moments.fund_count(),
        moments
            .funds
            .iter()
            .map(|f| allocation.weight(f).unwrap_or(0.0)),
    );
    Performance::of_vector(&w, moments, risk_free_rate)
}
