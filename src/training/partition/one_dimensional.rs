//! Greedy one-dimensional partitioning.
//!
//! Grows a piecewise-constant update along a single binned axis by
//! repeatedly applying the best remaining cut: every current segment is
//! scanned for its best interior cut, the highest-gain cut overall is
//! applied, and the scan repeats until the split budget is exhausted or
//! no cut improves the objective. Exact gain ties are broken by coin
//! flip so repeated boosting does not systematically favor low bins.

use tracing::trace;

use crate::booster::term::MonotoneDirection;
use crate::error::Result;
use crate::rng::BoostRng;
use crate::tensor::SegmentedTensor;
use crate::training::bins::BinSet;
use crate::training::stats::sanitize_gain;
use crate::training::update::TermBoostFlags;

use super::{fill_leaf_scores, leaf_partial_gain, monotone_ok, passes_leaf_constraints, LeafTotals};

/// Static parameters of one partitioning call.
#[derive(Debug, Clone)]
pub struct OneDimensionalConfig {
    pub flags: TermBoostFlags,
    pub samples_leaf_min: usize,
    pub hessian_min: f64,
    pub splits_max: usize,
    pub direction: MonotoneDirection,
}

/// One contiguous run of bins acting as a leaf candidate.
#[derive(Debug, Clone, Copy)]
struct Segment {
    lo: usize,
    hi: usize,
}

/// Leaf scores one segment would receive, for neighbor-ordering checks.
fn segment_scores(main_bins: &BinSet, segment: &Segment, config: &OneDimensionalConfig) -> Vec<f64> {
    let mut totals = LeafTotals::new(main_bins.score_count(), main_bins.has_hessian());
    for bin in segment.lo..segment.hi {
        totals.add_bin(main_bins, bin);
    }
    let mut scores = vec![0.0; main_bins.score_count()];
    fill_leaf_scores(&totals, config.flags, &mut scores);
    scores
}

/// Best interior cut of one segment, if any survives the constraints.
#[derive(Debug, Clone, Copy)]
struct CutCandidate {
    segment: usize,
    cut: usize,
    gain: f64,
}

/// Partition `bin_count` bins along tensor dimension `i_dimension`,
/// writing divisions and leaf scores into `inner_update` and returning
/// the total gain of the applied cuts.
pub fn partition_one_dimensional_boosting(
    rng: &mut BoostRng,
    main_bins: &BinSet,
    bin_count: usize,
    i_dimension: usize,
    config: &OneDimensionalConfig,
    inner_update: &mut SegmentedTensor,
) -> Result<f64> {
    debug_assert!(2 <= bin_count);
    debug_assert_eq!(main_bins.bin_count(), bin_count);
    let score_count = main_bins.score_count();
    let hessian = main_bins.has_hessian();

    let mut segments = vec![Segment { lo: 0, hi: bin_count }];
    let mut total_gain = 0.0;

    let mut parent = LeafTotals::new(score_count, hessian);
    let mut left = LeafTotals::new(score_count, hessian);
    let mut right = LeafTotals::new(score_count, hessian);
    let mut left_scores = vec![0.0; score_count];
    let mut right_scores = vec![0.0; score_count];

    while segments.len() <= config.splits_max {
        let mut best: Option<CutCandidate> = None;

        for (segment_index, segment) in segments.iter().enumerate() {
            parent.clear();
            for bin in segment.lo..segment.hi {
                parent.add_bin(main_bins, bin);
            }
            let parent_partial = leaf_partial_gain(&parent, config.flags);

            // splitting one segment must keep the whole leaf sequence
            // monotone, so the children are also checked against their
            // neighbors
            let prev_scores = (config.direction.is_constrained() && 0 < segment_index)
                .then(|| segment_scores(main_bins, &segments[segment_index - 1], config));
            let next_scores = (config.direction.is_constrained()
                && segment_index + 1 < segments.len())
            .then(|| segment_scores(main_bins, &segments[segment_index + 1], config));

            left.clear();
            for cut in segment.lo + 1..segment.hi {
                left.add_bin(main_bins, cut - 1);
                left.subtract_from(&parent, &mut right);

                if !passes_leaf_constraints(&left, config.flags, config.samples_leaf_min, config.hessian_min)
                    || !passes_leaf_constraints(&right, config.flags, config.samples_leaf_min, config.hessian_min)
                {
                    continue;
                }
                if config.direction.is_constrained() {
                    fill_leaf_scores(&left, config.flags, &mut left_scores);
                    fill_leaf_scores(&right, config.flags, &mut right_scores);
                    let chain_ok = monotone_ok(&left_scores, &right_scores, config.direction)
                        && prev_scores
                            .as_deref()
                            .map_or(true, |prev| monotone_ok(prev, &left_scores, config.direction))
                        && next_scores
                            .as_deref()
                            .map_or(true, |next| monotone_ok(&right_scores, next, config.direction));
                    if !chain_ok {
                        continue;
                    }
                }

                let gain = leaf_partial_gain(&left, config.flags)
                    + leaf_partial_gain(&right, config.flags)
                    - parent_partial;
                if gain <= 0.0 {
                    continue;
                }
                let replace = match best {
                    None => true,
                    Some(current) => gain > current.gain || (gain == current.gain && rng.coin()),
                };
                if replace {
                    best = Some(CutCandidate { segment: segment_index, cut, gain });
                }
            }
        }

        let Some(chosen) = best else {
            break;
        };
        trace!(cut = chosen.cut, gain = chosen.gain, "applying cut");
        total_gain += chosen.gain;
        let old = segments[chosen.segment];
        segments[chosen.segment] = Segment { lo: old.lo, hi: chosen.cut };
        segments.insert(chosen.segment + 1, Segment { lo: chosen.cut, hi: old.hi });
    }

    // a cut before bin `c` is the division after coordinate `c - 1`
    let division_count = segments.len() - 1;
    inner_update.set_division_count(i_dimension, division_count)?;
    for (slot, segment) in inner_update.divisions_mut(i_dimension).iter_mut().zip(&segments[1..]) {
        *slot = segment.lo - 1;
    }

    inner_update.ensure_value_capacity(segments.len() * score_count)?;
    let mut leaf = LeafTotals::new(score_count, hessian);
    for (leaf_index, segment) in segments.iter().enumerate() {
        leaf.clear();
        for bin in segment.lo..segment.hi {
            leaf.add_bin(main_bins, bin);
        }
        let values = inner_update.values_mut();
        fill_leaf_scores(
            &leaf,
            config.flags,
            &mut values[leaf_index * score_count..(leaf_index + 1) * score_count],
        );
    }

    Ok(sanitize_gain(total_gain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bins_from(grads: &[f64], hess: &[f64], counts: u64) -> BinSet {
        let mut bins = BinSet::new(1, true);
        bins.zero(grads.len());
        bins.grads_mut().copy_from_slice(grads);
        bins.hess_mut().copy_from_slice(hess);
        for count in bins.counts_mut() {
            *count = counts;
        }
        for weight in bins.weights_mut() {
            *weight = counts as f64;
        }
        bins
    }

    fn config(splits_max: usize) -> OneDimensionalConfig {
        OneDimensionalConfig {
            flags: TermBoostFlags::NONE,
            samples_leaf_min: 0,
            hessian_min: f64::MIN_POSITIVE,
            splits_max,
            direction: MonotoneDirection::None,
        }
    }

    fn fresh_tensor() -> SegmentedTensor {
        let mut tensor = SegmentedTensor::new(1, 1).unwrap();
        tensor.set_dimension_count(1);
        tensor.reset();
        tensor
    }

    #[test]
    fn test_obvious_single_cut() {
        // gradients flip sign between bins 1 and 2
        let bins = bins_from(&[4.0, 4.0, -4.0, -4.0], &[2.0, 2.0, 2.0, 2.0], 10);
        let mut rng = BoostRng::new(1);
        let mut update = fresh_tensor();
        let gain =
            partition_one_dimensional_boosting(&mut rng, &bins, 4, 0, &config(1), &mut update)
                .unwrap();
        assert!(0.0 < gain);
        assert_eq!(update.divisions(0), &[1]);
        // left leaf: -8/4, right leaf: +8/4
        assert_abs_diff_eq!(update.values()[0], -2.0);
        assert_abs_diff_eq!(update.values()[1], 2.0);
    }

    #[test]
    fn test_no_cut_for_uniform_gradients() {
        let bins = bins_from(&[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0], 5);
        let mut rng = BoostRng::new(1);
        let mut update = fresh_tensor();
        let gain =
            partition_one_dimensional_boosting(&mut rng, &bins, 3, 0, &config(2), &mut update)
                .unwrap();
        assert_abs_diff_eq!(gain, 0.0);
        assert_eq!(update.division_count(0), 0);
        assert_abs_diff_eq!(update.values()[0], -1.0);
    }

    #[test]
    fn test_split_budget_respected() {
        let bins = bins_from(&[8.0, -8.0, 8.0, -8.0], &[1.0, 1.0, 1.0, 1.0], 10);
        let mut rng = BoostRng::new(1);
        let mut update = fresh_tensor();
        partition_one_dimensional_boosting(&mut rng, &bins, 4, 0, &config(1), &mut update).unwrap();
        assert_eq!(update.division_count(0), 1);

        let mut update3 = fresh_tensor();
        partition_one_dimensional_boosting(&mut rng, &bins, 4, 0, &config(3), &mut update3)
            .unwrap();
        assert_eq!(update3.division_count(0), 3);
    }

    #[test]
    fn test_min_samples_blocks_narrow_leaves() {
        let bins = bins_from(&[9.0, -1.0, -1.0, -1.0], &[1.0, 1.0, 1.0, 1.0], 2);
        let mut rng = BoostRng::new(1);
        let mut update = fresh_tensor();
        let mut cfg = config(3);
        cfg.samples_leaf_min = 4;
        let gain =
            partition_one_dimensional_boosting(&mut rng, &bins, 4, 0, &cfg, &mut update).unwrap();
        // only the middle cut leaves two bins (4 samples) on each side
        assert!(0.0 < gain);
        assert_eq!(update.divisions(0), &[1]);
    }

    #[test]
    fn test_monotone_increasing_blocks_decreasing_cut() {
        // the natural cut would give left leaf +2, right leaf -2
        let bins = bins_from(&[-4.0, -4.0, 4.0, 4.0], &[2.0, 2.0, 2.0, 2.0], 10);
        let mut rng = BoostRng::new(1);
        let mut update = fresh_tensor();
        let mut cfg = config(1);
        cfg.direction = MonotoneDirection::Increasing;
        let gain =
            partition_one_dimensional_boosting(&mut rng, &bins, 4, 0, &cfg, &mut update).unwrap();
        assert_abs_diff_eq!(gain, 0.0);
        assert_eq!(update.division_count(0), 0);

        cfg.direction = MonotoneDirection::Decreasing;
        let mut update2 = fresh_tensor();
        let gain2 =
            partition_one_dimensional_boosting(&mut rng, &bins, 4, 0, &cfg, &mut update2).unwrap();
        assert!(0.0 < gain2);
        assert_eq!(update2.divisions(0), &[1]);
    }

    #[test]
    fn test_gradient_sums_fill_raw_sums() {
        let bins = bins_from(&[4.0, 4.0, -4.0, -4.0], &[2.0, 2.0, 2.0, 2.0], 10);
        let mut rng = BoostRng::new(1);
        let mut update = fresh_tensor();
        let mut cfg = config(1);
        cfg.flags = TermBoostFlags::GRADIENT_SUMS;
        partition_one_dimensional_boosting(&mut rng, &bins, 4, 0, &cfg, &mut update).unwrap();
        assert_abs_diff_eq!(update.values()[0], -8.0);
        assert_abs_diff_eq!(update.values()[1], 8.0);
    }
}
