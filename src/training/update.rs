//! The per-round update orchestrator.
//!
//! [`generate_term_update`] composes one boosting round for one term:
//! validate parameters, bin each subset's weighted gradients, dispatch a
//! partitioner per inner bag, and accumulate the per-bag updates into
//! the round update tensor. The committed update still has to be scaled
//! by the learning-rate multiple, which also serves as the last line of
//! defense against numerically poisoned updates.

use std::sync::atomic::{AtomicI32, Ordering};

use tracing::{debug, error, trace, warn};

use crate::booster::term::MonotoneDirection;
use crate::booster::{BoosterShell, ShellScratch};
use crate::error::{BoostError, Result};
use crate::rng::BoostRng;
use crate::tensor::SegmentedTensor;
use crate::training::bins::{
    bin_byte_size, bin_sums_boosting, convert_add_bin, parallel_bin_bytes_max, BinSet,
    BinSumsParams,
};
use crate::training::partition::{
    fill_leaf_scores, partition_one_dimensional_boosting, partition_random_boosting,
    partition_two_dimensional_boosting, LeafTotals,
};
use crate::training::partition::one_dimensional::OneDimensionalConfig;
use crate::training::partition::two_dimensional::TwoDimensionalConfig;
use crate::training::totals::tensor_totals_build;

// ============================================================================
// Flags and sentinels
// ============================================================================

/// Behavior flags for one boosting round. Unrecognized bits are ignored
/// with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermBoostFlags(u64);

impl TermBoostFlags {
    pub const NONE: Self = Self(0);
    /// Compute gain with the gradient-boosting denominator instead of
    /// the Hessian.
    pub const DISABLE_NEWTON_GAIN: Self = Self(1 << 0);
    /// Use the weight instead of the Hessian as the leaf update
    /// denominator.
    pub const DISABLE_NEWTON_UPDATE: Self = Self(1 << 1);
    /// Produce a raw gradient-sum update (the differential-privacy
    /// variant).
    pub const GRADIENT_SUMS: Self = Self(1 << 2);
    /// Choose split points at random, ignoring the gradients.
    pub const RANDOM_SPLITS: Self = Self(1 << 3);

    const KNOWN_MASK: u64 = 0xF;

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[inline]
    pub const fn unknown_bits(self) -> u64 {
        self.0 & !Self::KNOWN_MASK
    }

    #[inline]
    pub fn disable_newton_gain(self) -> bool {
        self.contains(Self::DISABLE_NEWTON_GAIN)
    }

    #[inline]
    pub fn disable_newton_update(self) -> bool {
        self.contains(Self::DISABLE_NEWTON_UPDATE)
    }

    #[inline]
    pub fn gradient_sums(self) -> bool {
        self.contains(Self::GRADIENT_SUMS)
    }

    #[inline]
    pub fn random_splits(self) -> bool {
        self.contains(Self::RANDOM_SPLITS)
    }
}

impl std::ops::BitOr for TermBoostFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Out-of-band gain value reporting that the averaged gain overflowed or
/// the update was numerically poisoned. Finite so callers can compare
/// exactly, and the most negative value so ranking by gain puts it last.
pub const ILLEGAL_GAIN: f64 = f64::MIN;

// rate-limit the entry log so tight boosting loops stay quiet after the
// first few rounds
static ENTRY_LOG_BUDGET: AtomicI32 = AtomicI32::new(10);

// ============================================================================
// Zero-dimensional boosting
// ============================================================================

/// Fill the inner update with the closed-form single-leaf update from
/// the lone main bin.
fn boost_zero_dimensional(main_bins: &BinSet, flags: TermBoostFlags, inner_update: &mut SegmentedTensor) {
    trace!("entered boost_zero_dimensional");
    debug_assert_eq!(main_bins.bin_count(), 1);
    let score_count = main_bins.score_count();

    let mut totals = LeafTotals::new(score_count, main_bins.has_hessian());
    totals.add_bin(main_bins, 0);
    let mut scores = vec![0.0; score_count];
    fill_leaf_scores(&totals, flags, &mut scores);
    inner_update.values_mut().copy_from_slice(&scores);
    trace!("exited boost_zero_dimensional");
}

// ============================================================================
// GenerateTermUpdate
// ============================================================================

/// Generate the boosting-round update tensor for one term.
///
/// On success the shell's round update tensor holds the scaled update,
/// the shell's current term index is committed, and the averaged gain is
/// returned, with [`ILLEGAL_GAIN`] standing in when the gain overflowed
/// or the update had to be suppressed. Degenerate rounds (zero scores or
/// zero tensor bins) return a gain of zero without touching the update
/// tensor.
#[allow(clippy::too_many_arguments)]
pub fn generate_term_update(
    rng: Option<&mut BoostRng>,
    shell: &mut BoosterShell,
    term_index: usize,
    flags: TermBoostFlags,
    learning_rate: f64,
    min_samples_leaf: usize,
    min_hessian: f64,
    leaves_max: Option<&[usize]>,
    directions: Option<&[MonotoneDirection]>,
) -> Result<f64> {
    let entry_budget = ENTRY_LOG_BUDGET.load(Ordering::Relaxed);
    if 0 < entry_budget {
        ENTRY_LOG_BUDGET.store(entry_budget - 1, Ordering::Relaxed);
        debug!(
            term_index,
            flags = flags.bits(),
            learning_rate,
            min_samples_leaf,
            min_hessian,
            "generate_term_update"
        );
    } else {
        trace!(term_index, "generate_term_update");
    }

    // invalidate until this round commits
    shell.set_current_term_index(None);

    if shell.core().term_count() <= term_index {
        error!("term_index above the number of terms that we have");
        return Err(BoostError::IllegalParamVal(format!(
            "term index {term_index} out of range for {} terms",
            shell.core().term_count()
        )));
    }

    if flags.unknown_bits() != 0 {
        warn!(bits = flags.unknown_bits(), "flags contains unknown bits, ignoring extras");
    }

    if learning_rate.is_nan() {
        warn!("learning_rate is NaN");
    } else if learning_rate == f64::INFINITY {
        warn!("learning_rate is +infinity");
    } else if learning_rate == 0.0 {
        warn!("learning_rate is zero");
    } else if learning_rate < 0.0 {
        warn!("learning_rate is negative");
    }

    let min_hessian = if min_hessian.is_nan() || min_hessian <= 0.0 {
        warn!("min_hessian must be a positive number, adjusting to the smallest positive value");
        f64::MIN_POSITIVE
    } else {
        min_hessian
    };

    let score_count = shell.core().score_count();
    if score_count == 0 {
        // a single target class is predicted with certainty; the update
        // tensor has zero-length score vectors and the gain is zero
        warn!("score_count is zero");
        shell.set_current_term_index(Some(term_index));
        return Ok(0.0);
    }

    let term = &shell.core().terms()[term_index];
    let dimension_count = term.dimension_count();
    let real_dimension_count = term.real_dimension_count();
    let mut tensor_bin_count = term.tensor_bin_count();
    if tensor_bin_count == 0 {
        // a zero-bin feature (empty training set) makes a zero-bin
        // update tensor; leave the round tensor untouched
        warn!("tensor_bin_count is zero");
        shell.set_current_term_index(Some(term_index));
        return Ok(0.0);
    }

    // ------------------------------------------------------------------
    // dimension analysis
    // ------------------------------------------------------------------
    let mut last_dimension_leaves_max = 0usize;
    let mut significant_bin_count = 0usize;
    let mut significant_direction = MonotoneDirection::None;
    let mut i_dimension_important = 0usize;
    match leaves_max {
        None => warn!("leaves_max was null, so there won't be any splits"),
        Some(leaves) => {
            if real_dimension_count != 0 {
                if leaves.len() < dimension_count {
                    return Err(BoostError::IllegalParamVal(format!(
                        "leaves_max holds {} entries for a {dimension_count}-dimension term",
                        leaves.len()
                    )));
                }
                if let Some(directions) = directions {
                    if directions.len() < dimension_count {
                        return Err(BoostError::IllegalParamVal(format!(
                            "direction holds {} entries for a {dimension_count}-dimension term",
                            directions.len()
                        )));
                    }
                }
                for (i, &bins) in term.bin_counts().iter().enumerate() {
                    let feature_direction =
                        directions.map_or(MonotoneDirection::None, |directions| directions[i]);
                    if 1 < bins {
                        i_dimension_important = i;
                        significant_bin_count = bins;
                        significant_direction = significant_direction.or(feature_direction);
                        let count_leaves_max = leaves[i];
                        if count_leaves_max <= 1 {
                            warn!(dimension = i, "count_leaves_max is 1 or less");
                        } else {
                            last_dimension_leaves_max = count_leaves_max;
                        }
                    }
                }
                debug_assert!(2 <= significant_bin_count);
            }
        }
    }

    let mut internal_rng;
    let rng = match rng {
        Some(rng) => rng,
        None => {
            // seeding only has to be independent of the data
            internal_rng = BoostRng::from_entropy()?;
            &mut internal_rng
        }
    };

    let ShellScratch { core, term_update, inner_term_update, main_bins, aux_bins, fast_bins } =
        shell.scratch();
    let term = &core.terms()[term_index];

    term_update.set_dimension_count(dimension_count);
    term_update.reset();

    let mut gain_avg = 0.0;
    let training_set = core.training_set();
    if training_set.sample_count() != 0 {
        let constants = core.constants();
        let hessian = core.is_hessian();
        let inner_bag_count = core.inner_bag_count().max(1);

        // --------------------------------------------------------------
        // pre-multiply constants
        // --------------------------------------------------------------
        let multiple_common = constants.gradient_constant / inner_bag_count as f64;
        let mut multiple = multiple_common;
        let mut gain_multiple = multiple_common;
        if flags.gradient_sums() {
            multiple *= constants.learning_rate_adjustment_differential_privacy;
        } else if flags.disable_newton_update() {
            multiple *= constants.learning_rate_adjustment_gradient_boosting;
        } else {
            multiple /= constants.hessian_constant;
            multiple *= constants.learning_rate_adjustment_hessian_boosting;
        }
        if flags.disable_newton_gain() {
            gain_multiple *= constants.gain_adjustment_gradient_boosting;
        } else {
            gain_multiple /= constants.hessian_constant;
            gain_multiple *= constants.gain_adjustment_hessian_boosting;
        }
        multiple *= learning_rate;
        gain_multiple *= constants.gradient_constant;

        inner_term_update.set_dimension_count(dimension_count);
        inner_term_update.reset();

        if last_dimension_leaves_max == 0
            || (real_dimension_count != 1 && significant_direction.is_constrained())
        {
            // no split budget, or monotone constraints we cannot honor
            // across multiple dimensions: sum everything into one bin
            tensor_bin_count = 1;
        }

        let subsets = training_set.subsets();
        for bag in 0..inner_bag_count {
            main_bins.zero(tensor_bin_count);

            for (subset_index, subset) in subsets.iter().enumerate() {
                let pack = if tensor_bin_count == 1 {
                    None
                } else {
                    match subset.term_data(term_index) {
                        Some(pack) => Some(pack),
                        None => {
                            return Err(BoostError::UnexpectedInternal(format!(
                                "subset {subset_index} holds no packed data for term {term_index}"
                            )))
                        }
                    }
                };

                let bytes_per_fast_bin = bin_byte_size(
                    false,
                    false,
                    hessian,
                    score_count,
                    subset.float_width().bytes(),
                    subset.uint_width().bytes(),
                );
                let mut lanes = 1;
                let simd_pack = subset.simd_pack();
                if simd_pack != 1 && tensor_bin_count != 1 {
                    let budget = parallel_bin_bytes_max(hessian, score_count);
                    let combined = bytes_per_fast_bin
                        .checked_mul(tensor_bin_count)
                        .and_then(|bytes| bytes.checked_mul(simd_pack));
                    if combined.is_some_and(|bytes| bytes <= budget) {
                        lanes = simd_pack;
                    }
                }

                fast_bins.prepare(
                    subset.float_width(),
                    hessian,
                    lanes * tensor_bin_count * score_count,
                );
                {
                    let mut params = BinSumsParams {
                        parallel_lanes: lanes,
                        hessian,
                        score_count,
                        pack,
                        sample_count: subset.sample_count(),
                        grad_hess: subset.grad_hess(),
                        weights: subset.bag_weights(bag),
                        bin_count: tensor_bin_count,
                        fast_bins: &mut *fast_bins,
                    };
                    bin_sums_boosting(&mut params)?;
                }

                // the per-bag count and weight tensors are final totals:
                // add them exactly once, on the last lane of the last
                // subset
                let last_subset = subset_index + 1 == subsets.len();
                let collapsed = tensor_bin_count == 1;
                for lane in 0..lanes {
                    let (counts, weights) = if last_subset && lane + 1 == lanes {
                        let bag_totals = training_set.term_inner_bag(term_index, bag);
                        (Some(bag_totals.counts(collapsed)), Some(bag_totals.weights(collapsed)))
                    } else {
                        (None, None)
                    };
                    convert_add_bin(
                        fast_bins,
                        lane,
                        tensor_bin_count,
                        score_count,
                        hessian,
                        counts,
                        weights,
                        main_bins,
                    );
                }
            }

            inner_term_update.set_dimension_count(dimension_count);
            inner_term_update.reset();

            if tensor_bin_count == 1 {
                warn!("boosting zero dimensional");
                boost_zero_dimensional(main_bins, flags, inner_term_update);
            } else {
                let weight_total = training_set.bag_weight_total(bag);
                debug_assert!(0.0 < weight_total);

                let gain;
                if flags.random_splits() || 2 < real_dimension_count {
                    gain = partition_random_boosting(
                        rng,
                        main_bins,
                        term,
                        flags,
                        leaves_max,
                        significant_direction,
                        inner_term_update,
                    )?;
                } else if real_dimension_count == 1 {
                    debug_assert!(2 <= last_dimension_leaves_max);
                    debug_assert!(2 <= significant_bin_count);
                    let config = OneDimensionalConfig {
                        flags,
                        samples_leaf_min: min_samples_leaf,
                        hessian_min: min_hessian,
                        splits_max: last_dimension_leaves_max - 1,
                        direction: significant_direction,
                    };
                    gain = partition_one_dimensional_boosting(
                        rng,
                        main_bins,
                        significant_bin_count,
                        i_dimension_important,
                        &config,
                        inner_term_update,
                    )?;
                } else {
                    let real_bins = term.real_bin_counts();
                    let positions: Vec<usize> = term
                        .bin_counts()
                        .iter()
                        .enumerate()
                        .filter(|&(_, &bins)| 1 < bins)
                        .map(|(i, _)| i)
                        .collect();
                    tensor_totals_build(&real_bins, main_bins, aux_bins);
                    debug_assert_eq!(aux_bins.bin_count(), term.auxiliary_bin_count());
                    let config = TwoDimensionalConfig {
                        flags,
                        samples_leaf_min: min_samples_leaf,
                        hessian_min: min_hessian,
                    };
                    gain = partition_two_dimensional_boosting(
                        aux_bins,
                        &real_bins,
                        &positions,
                        &config,
                        inner_term_update,
                    )?;
                }

                // gain is +infinity if a callee overflowed, never NaN
                debug_assert!(!gain.is_nan());
                debug_assert!(0.0 <= gain);

                // divide by the bag weight here, in case summing the
                // averaged gains is what pushes us over the edge
                gain_avg += gain / weight_total * gain_multiple;
                debug_assert!(!gain_avg.is_nan());
                debug_assert!(0.0 <= gain_avg);
            }

            term_update.add(inner_term_update)?;
        }

        if !(gain_avg <= f64::MAX) {
            // also catches NaN, since NaN compares false against anything.
            // Some inner bags may have overflowed while others did not;
            // the update is preserved and the caller decides whether to
            // keep boosting.
            gain_avg = ILLEGAL_GAIN;
        }

        trace!("done sampling set loop");

        // the 0.5 multiplier for two scores is the binary-classification
        // convention from the boosting literature, preserved pending a
        // proper multiclass correction
        let factor = if score_count == 2 { multiple * 0.5 } else { multiple };
        if term_update.multiply_and_check_for_issues(factor) {
            // the update holds a NaN or infinity; destroy it rather than
            // let it poison the model
            term_update.set_dimension_count(dimension_count);
            term_update.reset();
            gain_avg = ILLEGAL_GAIN;
        }
    }

    shell.set_current_term_index(Some(term_index));

    debug_assert!(!gain_avg.is_nan());
    debug_assert!(gain_avg != f64::INFINITY);
    debug_assert!(gain_avg == ILLEGAL_GAIN || 0.0 <= gain_avg);

    trace!(gain_avg, "exited generate_term_update");
    Ok(gain_avg)
}
