//! Two-dimensional cross partitioning.
//!
//! For a term with exactly two significant dimensions the update is cut
//! by one division per axis, giving four rectangular leaves. All
//! (cut_x, cut_y) crosses are scored against the prefix-sum totals; the
//! best valid cross is compared with leaving the grid uncut.

use tracing::warn;

use crate::error::{BoostError, Result};
use crate::tensor::SegmentedTensor;
use crate::training::bins::BinSet;
use crate::training::stats::sanitize_gain;
use crate::training::totals::{region_sum, RegionTotals};
use crate::training::update::TermBoostFlags;

use super::{fill_leaf_scores, leaf_partial_gain, passes_leaf_constraints, LeafTotals};

/// Static parameters of one partitioning call.
#[derive(Debug, Clone)]
pub struct TwoDimensionalConfig {
    pub flags: TermBoostFlags,
    pub samples_leaf_min: usize,
    pub hessian_min: f64,
}

fn totals_to_leaf(totals: &RegionTotals, hessian: bool, out: &mut LeafTotals) {
    out.count = totals.count.max(0) as u64;
    out.weight = totals.weight;
    out.grads.copy_from_slice(&totals.grads);
    if hessian {
        out.hess.copy_from_slice(&totals.hess);
    }
}

/// Search every single-cross partition of the two significant
/// dimensions, writing divisions and the four leaf scores into
/// `inner_update` and returning the gain over the uncut grid.
///
/// `real_bins` are the bin counts of the two significant dimensions and
/// `dimension_positions` their tensor dimension indices, both in
/// dimension order. `aux_bins` holds the inclusive prefix sums built by
/// the totals builder.
pub fn partition_two_dimensional_boosting(
    aux_bins: &BinSet,
    real_bins: &[usize],
    dimension_positions: &[usize],
    config: &TwoDimensionalConfig,
    inner_update: &mut SegmentedTensor,
) -> Result<f64> {
    if real_bins.len() != 2 || dimension_positions.len() != 2 {
        warn!("two-dimensional partitioning requires exactly 2 significant dimensions");
        return Err(BoostError::UnexpectedInternal(format!(
            "two-dimensional partitioning over {} significant dimensions",
            real_bins.len()
        )));
    }
    let score_count = aux_bins.score_count();
    let hessian = aux_bins.has_hessian();
    let (bins_x, bins_y) = (real_bins[0], real_bins[1]);
    debug_assert!(2 <= bins_x && 2 <= bins_y);

    let mut region = RegionTotals::new(score_count);
    let mut cell = LeafTotals::new(score_count, hessian);

    region_sum(aux_bins, real_bins, &[0, 0], &[bins_x, bins_y], &mut region);
    let mut parent = LeafTotals::new(score_count, hessian);
    totals_to_leaf(&region, hessian, &mut parent);
    let parent_partial = leaf_partial_gain(&parent, config.flags);

    let mut best_cut: Option<(usize, usize)> = None;
    let mut best_gain = 0.0;

    for cut_x in 1..bins_x {
        for cut_y in 1..bins_y {
            let mut partial = 0.0;
            let mut valid = true;
            for (lo, hi) in [
                ([0, 0], [cut_x, cut_y]),
                ([cut_x, 0], [bins_x, cut_y]),
                ([0, cut_y], [cut_x, bins_y]),
                ([cut_x, cut_y], [bins_x, bins_y]),
            ] {
                region_sum(aux_bins, real_bins, &lo, &hi, &mut region);
                totals_to_leaf(&region, hessian, &mut cell);
                if !passes_leaf_constraints(&cell, config.flags, config.samples_leaf_min, config.hessian_min) {
                    valid = false;
                    break;
                }
                partial += leaf_partial_gain(&cell, config.flags);
            }
            if !valid {
                continue;
            }
            let gain = partial - parent_partial;
            if best_gain < gain {
                best_gain = gain;
                best_cut = Some((cut_x, cut_y));
            }
        }
    }

    let Some((cut_x, cut_y)) = best_cut else {
        // no valid cross improves on the uncut grid
        inner_update.ensure_value_capacity(score_count)?;
        let mut scores = vec![0.0; score_count];
        fill_leaf_scores(&parent, config.flags, &mut scores);
        inner_update.values_mut().copy_from_slice(&scores);
        return Ok(0.0);
    };

    let (dim_x, dim_y) = (dimension_positions[0], dimension_positions[1]);
    inner_update.set_division_count(dim_x, 1)?;
    inner_update.divisions_mut(dim_x)[0] = cut_x - 1;
    inner_update.set_division_count(dim_y, 1)?;
    inner_update.divisions_mut(dim_y)[0] = cut_y - 1;
    inner_update.ensure_value_capacity(4 * score_count)?;

    // leaf layout follows the tensor: the lower dimension index varies
    // fastest
    let mut scores = vec![0.0; score_count];
    for (leaf_index, (lo, hi)) in [
        ([0, 0], [cut_x, cut_y]),
        ([cut_x, 0], [bins_x, cut_y]),
        ([0, cut_y], [cut_x, bins_y]),
        ([cut_x, cut_y], [bins_x, bins_y]),
    ]
    .into_iter()
    .enumerate()
    {
        region_sum(aux_bins, real_bins, &lo, &hi, &mut region);
        totals_to_leaf(&region, hessian, &mut cell);
        fill_leaf_scores(&cell, config.flags, &mut scores);
        inner_update.values_mut()[leaf_index * score_count..(leaf_index + 1) * score_count]
            .copy_from_slice(&scores);
    }

    Ok(sanitize_gain(best_gain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::totals::tensor_totals_build;
    use approx::assert_abs_diff_eq;

    fn config() -> TwoDimensionalConfig {
        TwoDimensionalConfig {
            flags: TermBoostFlags::NONE,
            samples_leaf_min: 0,
            hessian_min: f64::MIN_POSITIVE,
        }
    }

    fn tensor_2d() -> SegmentedTensor {
        let mut tensor = SegmentedTensor::new(2, 1).unwrap();
        tensor.set_dimension_count(2);
        tensor.reset();
        tensor
    }

    /// 2x2 grid with a clean diagonal pattern: the only sensible cross
    /// is at (1, 1).
    fn diagonal_bins() -> (BinSet, BinSet) {
        let mut main = BinSet::new(1, true);
        main.zero(4);
        // (0,0)=+4 (1,0)=-4 (0,1)=-4 (1,1)=+4
        main.grads_mut().copy_from_slice(&[4.0, -4.0, -4.0, 4.0]);
        main.hess_mut().copy_from_slice(&[2.0, 2.0, 2.0, 2.0]);
        for count in main.counts_mut() {
            *count = 10;
        }
        for weight in main.weights_mut() {
            *weight = 10.0;
        }
        let mut aux = BinSet::new(1, true);
        tensor_totals_build(&[2, 2], &main, &mut aux);
        (main, aux)
    }

    #[test]
    fn test_diagonal_cross() {
        let (_, aux) = diagonal_bins();
        let mut update = tensor_2d();
        let gain = partition_two_dimensional_boosting(&aux, &[2, 2], &[0, 1], &config(), &mut update)
            .unwrap();
        assert!(0.0 < gain);
        assert_eq!(update.divisions(0), &[0]);
        assert_eq!(update.divisions(1), &[0]);
        // each leaf is one cell: -g/h
        assert_abs_diff_eq!(update.values()[0], -2.0);
        assert_abs_diff_eq!(update.values()[1], 2.0);
        assert_abs_diff_eq!(update.values()[2], 2.0);
        assert_abs_diff_eq!(update.values()[3], -2.0);
    }

    #[test]
    fn test_constraints_force_uncut_grid() {
        let (_, aux) = diagonal_bins();
        let mut update = tensor_2d();
        let mut cfg = config();
        cfg.samples_leaf_min = 100;
        let gain = partition_two_dimensional_boosting(&aux, &[2, 2], &[0, 1], &cfg, &mut update)
            .unwrap();
        assert_abs_diff_eq!(gain, 0.0);
        assert_eq!(update.division_count(0), 0);
        assert_eq!(update.division_count(1), 0);
        // uncut: total gradient 0 -> update 0
        assert_abs_diff_eq!(update.values()[0], 0.0);
    }

    #[test]
    fn test_wrong_arity_is_internal_error() {
        let (_, aux) = diagonal_bins();
        let mut update = tensor_2d();
        assert!(matches!(
            partition_two_dimensional_boosting(&aux, &[2, 2, 2], &[0, 1, 2], &config(), &mut update),
            Err(BoostError::UnexpectedInternal(_))
        ));
    }
}
