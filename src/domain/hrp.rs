//! Hierarchical risk parity.
//!
//! Funds are clustered with single linkage on the correlation distance
//! `sqrt((1 - ρ) / 2)`, the dendrogram leaves give an order that places
//! similar funds next to each other, and the weights come from recursive
//! bisection of that order: each half receives weight in inverse proportion
//! to the variance of its own inverse-variance portfolio.

use nalgebra::{DMatrix, DVector};

enum Cluster {
    Leaf(usize),
    Merge(Box<Cluster>, Box<Cluster>),
}

impl Cluster {
    fn leaves(&self, out: &mut Vec<usize>) {
        match self {
            Cluster::Leaf(i) => out.push(*i),
            Cluster::Merge(left, right) => {
                left.leaves(out);
                right.leaves(out);
            }
        }
    }
}

/// Risk-parity weights for `cov`, summing to one.
///
/// The diagonal of `cov` must be positive.
pub fn hrp_weights(cov: &DMatrix<f64>) -> DVector<f64> {
    let mut w = DVector::from_element(cov.nrows(), 1.0);
    let mut pending = vec![cluster_order(cov)];

    while let Some(members) = pending.pop() {
        if members.len() < 2 {
            continue;
        }
        let (left, right) = members.split_at(members.len() / 2);
        let v_left = cluster_variance(cov, left);
        let v_right = cluster_variance(cov, right);
        let alpha = if v_left + v_right > 0.0 {
            1.0 - v_left / (v_left + v_right)
        } else {
            0.5
        };
        for &i in left {
            w[i] *= alpha;
        }
        for &i in right {
            w[i] *= 1.0 - alpha;
        }
        pending.push(right.to_vec());
        pending.push(left.to_vec());
    }
    w
}

/// Leaf order of the single-linkage dendrogram. Ties merge the pair found
/// first in index order; the child with the smaller cluster id goes left.
fn cluster_order(cov: &DMatrix<f64>) -> Vec<usize> {
    let n = cov.nrows();
    let distance = |i: usize, j: usize| {
        let rho = cov[(i, j)] / (cov[(i, i)] * cov[(j, j)]).sqrt();
        ((1.0 - rho) / 2.0).clamp(0.0, 1.0).sqrt()
    };

    let mut clusters: Vec<(usize, Cluster)> = (0..n).map(|i| (i, Cluster::Leaf(i))).collect();
    let mut dist: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| distance(i, j)).collect())
        .collect();
    let mut next_id = n;

    while clusters.len() > 1 {
        let mut pick = (0, 1);
        for a in 0..clusters.len() {
            for b in a + 1..clusters.len() {
                if dist[a][b] < dist[pick.0][pick.1] {
                    pick = (a, b);
                }
            }
        }
        let (a, b) = pick;

        for k in 0..clusters.len() {
            let merged = dist[a][k].min(dist[b][k]);
            dist[a][k] = merged;
            dist[k][a] = merged;
        }
        dist.remove(b);
        for row in &mut dist {
            row.remove(b);
        }

        let (id_b, second) = clusters.remove(b);
        let (id_a, first) = clusters.remove(a);
        let merged = if id_a < id_b {
            Cluster::Merge(Box::new(first), Box::new(second))
        } else {
            Cluster::Merge(Box::new(second), Box::new(first))
        };
        clusters.insert(a, (next_id, merged));
        next_id += 1;
    }

    let mut order = Vec::with_capacity(n);
    if let Some((_, root)) = clusters.pop() {
        root.leaves(&mut order);
    }
    order
}

/// Variance of the inverse-variance portfolio over `members`.
fn cluster_variance(cov: &DMatrix<f64>, members: &[usize]) -> f64 {
    let inverse: Vec<f64> = members.iter().map(|&i| 1.0 / cov[(i, i)]).collect();
    let total: f64 = inverse.iter().sum();
    let mut variance = 0.0;
    for (a, &i) in members.iter().enumerate() {
        for (b, &j) in members.iter().enumerate() {
            variance += inverse[a] * inverse[b] * cov[(i, j)];
        }
    }
    variance / (total * total)
}
