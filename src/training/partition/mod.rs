//! Partitioning policies for the per-round update.
//!
//! Every partitioner consumes the round's main bins, writes the inner
//! update tensor, and returns a non-negative, non-NaN gain. The gain may
//! be +infinity on numeric overflow; the orchestrator resolves overflow
//! against the illegal-gain sentinel.

pub mod one_dimensional;
pub mod random;
pub mod two_dimensional;

pub use one_dimensional::partition_one_dimensional_boosting;
pub use random::partition_random_boosting;
pub use two_dimensional::partition_two_dimensional_boosting;

use crate::booster::term::MonotoneDirection;
use crate::training::bins::BinSet;
use crate::training::stats::{
    calc_partial_gain, compute_single_partition_update, compute_single_partition_update_gradient_sum,
};
use crate::training::update::TermBoostFlags;

/// Aggregated statistics of a run of bins (one candidate leaf).
#[derive(Debug, Clone)]
pub(crate) struct LeafTotals {
    pub count: u64,
    pub weight: f64,
    pub grads: Vec<f64>,
    /// Empty when the objective provides no Hessians.
    pub hess: Vec<f64>,
}

impl LeafTotals {
    pub fn new(score_count: usize, hessian: bool) -> Self {
        Self {
            count: 0,
            weight: 0.0,
            grads: vec![0.0; score_count],
            hess: vec![0.0; if hessian { score_count } else { 0 }],
        }
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.weight = 0.0;
        self.grads.fill(0.0);
        self.hess.fill(0.0);
    }

    /// Accumulate one bin.
    pub fn add_bin(&mut self, bins: &BinSet, bin: usize) {
        self.count += bins.count(bin);
        self.weight += bins.weight(bin);
        for (s, grad) in self.grads.iter_mut().enumerate() {
            *grad += bins.grad(bin, s);
        }
        for (s, hess) in self.hess.iter_mut().enumerate() {
            *hess += bins.hess(bin, s);
        }
    }

    /// `self - rhs`, used to derive the right child from parent and left.
    pub fn subtract_from(&self, parent: &LeafTotals, out: &mut LeafTotals) {
        out.count = parent.count - self.count;
        out.weight = parent.weight - self.weight;
        for s in 0..self.grads.len() {
            out.grads[s] = parent.grads[s] - self.grads[s];
        }
        for s in 0..self.hess.len() {
            out.hess[s] = parent.hess[s] - self.hess[s];
        }
    }

    /// Denominator used by the leaf update for `score`.
    #[inline]
    pub fn update_denominator(&self, score: usize, flags: TermBoostFlags) -> f64 {
        if self.hess.is_empty() || flags.disable_newton_update() {
            self.weight
        } else {
            self.hess[score]
        }
    }

    /// Denominator used by the gain computation for `score`.
    #[inline]
    pub fn gain_denominator(&self, score: usize, flags: TermBoostFlags) -> f64 {
        if self.hess.is_empty() || flags.disable_newton_gain() {
            self.weight
        } else {
            self.hess[score]
        }
    }
}

/// Sum of per-score partial gains for one candidate leaf.
pub(crate) fn leaf_partial_gain(totals: &LeafTotals, flags: TermBoostFlags) -> f64 {
    let mut partial = 0.0;
    for (s, &grad) in totals.grads.iter().enumerate() {
        partial += calc_partial_gain(grad, totals.gain_denominator(s, flags));
    }
    partial
}

/// Fill `out` with the closed-form leaf scores for one leaf.
pub(crate) fn fill_leaf_scores(totals: &LeafTotals, flags: TermBoostFlags, out: &mut [f64]) {
    debug_assert_eq!(out.len(), totals.grads.len());
    for (s, &grad) in totals.grads.iter().enumerate() {
        out[s] = if flags.gradient_sums() {
            compute_single_partition_update_gradient_sum(grad)
        } else {
            compute_single_partition_update(grad, totals.update_denominator(s, flags))
        };
    }
}

/// Whether each child satisfies the minimum leaf mass requirements.
pub(crate) fn passes_leaf_constraints(
    totals: &LeafTotals,
    flags: TermBoostFlags,
    samples_leaf_min: usize,
    hessian_min: f64,
) -> bool {
    if totals.count < samples_leaf_min as u64 {
        return false;
    }
    for s in 0..totals.grads.len() {
        if totals.gain_denominator(s, flags) < hessian_min {
            return false;
        }
    }
    true
}

/// Whether the ordered pair of leaf score vectors respects `direction`.
pub(crate) fn monotone_ok(lower: &[f64], upper: &[f64], direction: MonotoneDirection) -> bool {
    match direction {
        MonotoneDirection::None => true,
        MonotoneDirection::Increasing => lower.iter().zip(upper).all(|(a, b)| a <= b),
        MonotoneDirection::Decreasing => lower.iter().zip(upper).all(|(a, b)| a >= b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bins_with(grads: &[f64], hess: &[f64]) -> BinSet {
        let mut bins = BinSet::new(1, true);
        bins.zero(grads.len());
        bins.grads_mut().copy_from_slice(grads);
        bins.hess_mut().copy_from_slice(hess);
        for (bin, count) in bins.counts_mut().iter_mut().enumerate() {
            *count = bin as u64 + 1;
        }
        for weight in bins.weights_mut().iter_mut() {
            *weight = 1.0;
        }
        bins
    }

    #[test]
    fn test_leaf_totals_accumulation() {
        let bins = bins_with(&[1.0, 2.0, 3.0], &[0.5, 0.5, 1.0]);
        let mut totals = LeafTotals::new(1, true);
        totals.add_bin(&bins, 0);
        totals.add_bin(&bins, 2);
        assert_eq!(totals.count, 4);
        assert_eq!(totals.grads[0], 4.0);
        assert_eq!(totals.hess[0], 1.5);
    }

    #[test]
    fn test_subtract_from_parent() {
        let bins = bins_with(&[1.0, 2.0, 3.0], &[0.5, 0.5, 1.0]);
        let mut parent = LeafTotals::new(1, true);
        for bin in 0..3 {
            parent.add_bin(&bins, bin);
        }
        let mut left = LeafTotals::new(1, true);
        left.add_bin(&bins, 0);
        let mut right = LeafTotals::new(1, true);
        left.subtract_from(&parent, &mut right);
        assert_eq!(right.count, 5);
        assert_eq!(right.grads[0], 5.0);
        assert_eq!(right.hess[0], 1.5);
    }

    #[test]
    fn test_denominator_selection() {
        let mut totals = LeafTotals::new(1, true);
        totals.weight = 3.0;
        totals.hess = vec![2.0];
        assert_eq!(totals.update_denominator(0, TermBoostFlags::NONE), 2.0);
        assert_eq!(
            totals.update_denominator(0, TermBoostFlags::DISABLE_NEWTON_UPDATE),
            3.0
        );
        assert_eq!(totals.gain_denominator(0, TermBoostFlags::DISABLE_NEWTON_GAIN), 3.0);

        let gradient_only = LeafTotals { weight: 4.0, ..LeafTotals::new(1, false) };
        assert_eq!(gradient_only.update_denominator(0, TermBoostFlags::NONE), 4.0);
    }

    #[test]
    fn test_monotone_ok() {
        use MonotoneDirection::*;
        assert!(monotone_ok(&[1.0], &[2.0], None));
        assert!(monotone_ok(&[1.0], &[2.0], Increasing));
        assert!(!monotone_ok(&[2.0], &[1.0], Increasing));
        assert!(monotone_ok(&[2.0], &[1.0], Decreasing));
        assert!(monotone_ok(&[1.0], &[1.0], Increasing));
    }
}
