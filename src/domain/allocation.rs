//! Continuous portfolio weights produced by the frontier solver.

use nalgebra::DVector;

/// Ordered fund weights in `[0, 1]` summing to one.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    weights: Vec<(String, f64)>,
    dust: Vec<String>,
}

impl Allocation {
    pub fn new(weights: Vec<(String, f64)>, dust: Vec<String>) -> Self {
        Self { weights, dust }
    }

    pub fn from_vector(funds: &[String], w: &DVector<f64>, dust: Vec<String>) -> Self {
        let weights = funds
            .iter()
            .cloned()
            .zip(w.iter().copied())
            .collect();
        Self { weights, dust }
    }

    pub fn weights(&self) -> &[(String, f64)] {
        &self.weights
    }

    pub fn funds(&self) -> impl Iterator<Item = &str> {
        self.weights.iter().map(|(f, _)| f.as_str())
    }

    pub fn weight(&self, fund: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|(f, _)| f == fund)
            .map(|(_, w)| *w)
    }

    /// Funds whose dust weight was zeroed during post-processing.
    pub fn dust(&self) -> &[String] {
        &self.dust
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().map(|(_, w)| w).sum()
    }

    pub fn as_vector(&self) -> DVector<f64> {
        DVector::from_iterator(self.weights.len(), self.weights.iter().map(|(_, w)| *w))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_fund() {
        let funds = vec!["A".to_string(), "B".to_string()];
        let alloc = Allocation::from_vector(&funds, &DVector::from_vec(vec![0.25, 0.75]), vec![]);
        assert_eq!(alloc.weight("B"), Some(0.75));
        assert_eq!(alloc.weight("C"), None);
        assert_eq!(alloc.total(), 1.0);
        assert_eq!(alloc.funds().collect::<Vec<_>>(), vec!["A", "B"]);
    }
}
