//! Random partitioning, the differential-privacy path.
//!
//! Split points are drawn uniformly at random, independent of the data;
//! the privacy argument only needs independence, not quality. Leaf
//! scores are then filled from the binned sums like any other partition.
//! No minimum-mass constraints apply: filtering on the data would break
//! the independence of the splits.

use crate::booster::term::{MonotoneDirection, Term};
use crate::error::Result;
use crate::rng::BoostRng;
use crate::tensor::SegmentedTensor;
use crate::training::bins::BinSet;
use crate::training::stats::sanitize_gain;
use crate::training::update::TermBoostFlags;

use super::{fill_leaf_scores, leaf_partial_gain, LeafTotals};

/// Number of segments along one axis: divisions are sorted, so the
/// segment of `coord` is the count of divisions below it.
#[inline]
fn segment_of(divisions: &[usize], coord: usize) -> usize {
    divisions.partition_point(|&division| division < coord)
}

/// Cut every significant dimension of `term` at random points, writing
/// divisions and per-cell leaf scores into `inner_update`.
///
/// `leaves_max` bounds the leaf count per dimension; a dimension without
/// a budget (or with a single bin) stays uncut. When `direction`
/// constrains the single segmented dimension the leaf scores are clamped
/// into monotone order after filling.
pub fn partition_random_boosting(
    rng: &mut BoostRng,
    main_bins: &BinSet,
    term: &Term,
    flags: TermBoostFlags,
    leaves_max: Option<&[usize]>,
    direction: MonotoneDirection,
    inner_update: &mut SegmentedTensor,
) -> Result<f64> {
    let score_count = main_bins.score_count();
    let hessian = main_bins.has_hessian();
    let dimension_count = term.dimension_count();
    let bin_counts = term.bin_counts();

    // choose the divisions
    let mut divisions_per_dim: Vec<Vec<usize>> = Vec::with_capacity(dimension_count);
    for (d, &bins) in bin_counts.iter().enumerate() {
        let budget = leaves_max.map_or(1, |leaves| leaves.get(d).copied().unwrap_or(1));
        let leaves = budget.clamp(1, bins.max(1));
        let cuts = leaves - 1;
        if bins < 2 || cuts == 0 {
            divisions_per_dim.push(Vec::new());
        } else {
            divisions_per_dim.push(rng.sample_distinct_sorted(bins - 1, cuts));
        }
    }

    // aggregate bins into cells of the segment grid
    let segment_counts: Vec<usize> =
        divisions_per_dim.iter().map(|divisions| divisions.len() + 1).collect();
    let cell_count: usize = segment_counts.iter().product();
    let mut cells: Vec<LeafTotals> =
        (0..cell_count).map(|_| LeafTotals::new(score_count, hessian)).collect();

    for bin in 0..main_bins.bin_count() {
        let mut remainder = bin;
        let mut cell = 0;
        let mut cell_stride = 1;
        for d in 0..dimension_count {
            let coord = remainder % bin_counts[d];
            remainder /= bin_counts[d];
            cell += segment_of(&divisions_per_dim[d], coord) * cell_stride;
            cell_stride *= segment_counts[d];
        }
        cells[cell].add_bin(main_bins, bin);
    }

    let mut parent = LeafTotals::new(score_count, hessian);
    for bin in 0..main_bins.bin_count() {
        parent.add_bin(main_bins, bin);
    }

    // write the tensor
    for (d, divisions) in divisions_per_dim.iter().enumerate() {
        inner_update.set_division_count(d, divisions.len())?;
        inner_update.divisions_mut(d).copy_from_slice(divisions);
    }
    inner_update.ensure_value_capacity(cell_count * score_count)?;

    let mut gain = -leaf_partial_gain(&parent, flags);
    let mut scores = vec![0.0; score_count];
    for (cell_index, cell) in cells.iter().enumerate() {
        gain += leaf_partial_gain(cell, flags);
        fill_leaf_scores(cell, flags, &mut scores);
        inner_update.values_mut()[cell_index * score_count..(cell_index + 1) * score_count]
            .copy_from_slice(&scores);
    }

    if direction.is_constrained() {
        let segmented_dims: Vec<usize> =
            (0..dimension_count).filter(|&d| !divisions_per_dim[d].is_empty()).collect();
        if let [single] = segmented_dims[..] {
            clamp_monotone(inner_update, segment_counts[single], score_count, direction);
        }
    }

    Ok(sanitize_gain(gain))
}

/// Running clamp along the single segmented axis so successive leaf
/// scores never violate `direction`.
fn clamp_monotone(
    inner_update: &mut SegmentedTensor,
    segment_count: usize,
    score_count: usize,
    direction: MonotoneDirection,
) {
    let values = inner_update.values_mut();
    for s in 0..score_count {
        for leaf in 1..segment_count {
            let prev = values[(leaf - 1) * score_count + s];
            let slot = &mut values[leaf * score_count + s];
            match direction {
                MonotoneDirection::Increasing => *slot = slot.max(prev),
                MonotoneDirection::Decreasing => *slot = slot.min(prev),
                MonotoneDirection::None => {}
            }
        }
    }
}
