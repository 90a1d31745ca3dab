//! Bin accumulation for boosting rounds.
//!
//! Per round the engine sums each sample's weighted gradient (and
//! Hessian) into the tensor bin the sample falls in. Subsets accumulate
//! into *fast bins* typed at the subset's compute width; a convert+add
//! step then merges fast bins into the canonical f64 *main bins*. Bin
//! counts and weights never change across rounds, so they are not
//! re-accumulated here: the precomputed per-bag tensors are added into
//! the main bins exactly once per bag.
//!
//! When a subset reports multiple SIMD lanes and the combined lane
//! storage stays under a byte ceiling, samples scatter round-robin across
//! per-lane bin copies; each lane is merged separately. This keeps the
//! accumulation loop free of cross-lane conflicts without changing the
//! result.

use crate::booster::dataset::{FloatWidth, GradHessStorage, PackedTermData};
use crate::error::{BoostError, Result};

// ============================================================================
// Bin byte sizes and lane ceilings
// ============================================================================

/// Storage bytes of one bin with the given layout. Main bins carry a
/// count and a weight in front of the per-score pairs; fast bins carry
/// only the pairs.
#[inline]
pub fn bin_byte_size(
    with_count: bool,
    with_weight: bool,
    hessian: bool,
    score_count: usize,
    float_bytes: usize,
    uint_bytes: usize,
) -> usize {
    let mut bytes = float_bytes * score_count * (1 + usize::from(hessian));
    if with_count {
        bytes += uint_bytes;
    }
    if with_weight {
        bytes += float_bytes;
    }
    bytes
}

/// Combined lane storage ceilings, in bytes. Above these the scatter
/// cost outweighs the conflict-free accumulation.
const HESSIAN_PARALLEL_BIN_BYTES_MAX: usize = 64 * 1024;
const GRADIENT_PARALLEL_BIN_BYTES_MAX: usize = 64 * 1024;
const MULTISCORE_PARALLEL_BIN_BYTES_MAX: usize = 16 * 1024;

/// Byte budget for lane-parallel fast bins. Zero disables lanes;
/// multiclass gradient boosting never uses them (multiclass should be
/// Hessian boosting).
#[inline]
pub fn parallel_bin_bytes_max(hessian: bool, score_count: usize) -> usize {
    if hessian {
        if score_count == 1 {
            HESSIAN_PARALLEL_BIN_BYTES_MAX
        } else {
            MULTISCORE_PARALLEL_BIN_BYTES_MAX
        }
    } else if score_count == 1 {
        GRADIENT_PARALLEL_BIN_BYTES_MAX
    } else {
        0
    }
}

// ============================================================================
// Main bins
// ============================================================================

/// Canonical-width bins: u64 counts, f64 weights, f64 per-score gradient
/// and Hessian sums, flat with `score_count` entries per bin.
#[derive(Debug, Clone)]
pub struct BinSet {
    score_count: usize,
    hessian: bool,
    bin_count: usize,
    counts: Vec<u64>,
    weights: Vec<f64>,
    grads: Vec<f64>,
    hess: Vec<f64>,
}

impl BinSet {
    pub fn new(score_count: usize, hessian: bool) -> Self {
        Self {
            score_count,
            hessian,
            bin_count: 0,
            counts: Vec::new(),
            weights: Vec::new(),
            grads: Vec::new(),
            hess: Vec::new(),
        }
    }

    /// Resize to `bin_count` active bins with every field zeroed.
    /// Capacity is retained across rounds.
    pub fn zero(&mut self, bin_count: usize) {
        self.bin_count = bin_count;
        self.counts.clear();
        self.counts.resize(bin_count, 0);
        self.weights.clear();
        self.weights.resize(bin_count, 0.0);
        self.grads.clear();
        self.grads.resize(bin_count * self.score_count, 0.0);
        if self.hessian {
            self.hess.clear();
            self.hess.resize(bin_count * self.score_count, 0.0);
        }
    }

    #[inline]
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    #[inline]
    pub fn score_count(&self) -> usize {
        self.score_count
    }

    #[inline]
    pub fn has_hessian(&self) -> bool {
        self.hessian
    }

    #[inline]
    pub fn count(&self, bin: usize) -> u64 {
        self.counts[bin]
    }

    #[inline]
    pub fn weight(&self, bin: usize) -> f64 {
        self.weights[bin]
    }

    #[inline]
    pub fn grad(&self, bin: usize, score: usize) -> f64 {
        self.grads[bin * self.score_count + score]
    }

    #[inline]
    pub fn hess(&self, bin: usize, score: usize) -> f64 {
        debug_assert!(self.hessian);
        self.hess[bin * self.score_count + score]
    }

    #[inline]
    pub fn counts_mut(&mut self) -> &mut [u64] {
        &mut self.counts[..self.bin_count]
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights[..self.bin_count]
    }

    #[inline]
    pub fn grads_mut(&mut self) -> &mut [f64] {
        &mut self.grads[..self.bin_count * self.score_count]
    }

    #[inline]
    pub fn hess_mut(&mut self) -> &mut [f64] {
        debug_assert!(self.hessian);
        &mut self.hess[..self.bin_count * self.score_count]
    }

    /// Overwrite this bin set with `rhs`'s active contents.
    pub fn copy_from(&mut self, rhs: &BinSet) {
        debug_assert_eq!(self.score_count, rhs.score_count);
        debug_assert_eq!(self.hessian, rhs.hessian);
        self.zero(rhs.bin_count);
        self.counts_mut().copy_from_slice(&rhs.counts[..rhs.bin_count]);
        self.weights_mut().copy_from_slice(&rhs.weights[..rhs.bin_count]);
        self.grads_mut().copy_from_slice(&rhs.grads[..rhs.bin_count * rhs.score_count]);
        if self.hessian {
            self.hess_mut().copy_from_slice(&rhs.hess[..rhs.bin_count * rhs.score_count]);
        }
    }
}

// ============================================================================
// Fast bins
// ============================================================================

/// Per-subset accumulation bins typed at the subset's float width.
/// Holds `lanes * bin_count * score_count` gradient slots (and as many
/// Hessian slots when the objective provides them).
#[derive(Debug, Clone)]
pub enum FastBins {
    F32 { grads: Vec<f32>, hess: Vec<f32> },
    F64 { grads: Vec<f64>, hess: Vec<f64> },
}

impl FastBins {
    pub fn new(width: FloatWidth) -> Self {
        match width {
            FloatWidth::F32 => Self::F32 { grads: Vec::new(), hess: Vec::new() },
            FloatWidth::F64 => Self::F64 { grads: Vec::new(), hess: Vec::new() },
        }
    }

    /// Switch to `width` if needed and zero `slots` gradient slots (and
    /// Hessian slots when `hessian`).
    pub fn prepare(&mut self, width: FloatWidth, hessian: bool, slots: usize) {
        if self.float_width() != width {
            *self = Self::new(width);
        }
        match self {
            Self::F32 { grads, hess } => {
                grads.clear();
                grads.resize(slots, 0.0);
                hess.clear();
                hess.resize(if hessian { slots } else { 0 }, 0.0);
            }
            Self::F64 { grads, hess } => {
                grads.clear();
                grads.resize(slots, 0.0);
                hess.clear();
                hess.resize(if hessian { slots } else { 0 }, 0.0);
            }
        }
    }

    #[inline]
    pub fn float_width(&self) -> FloatWidth {
        match self {
            Self::F32 { .. } => FloatWidth::F32,
            Self::F64 { .. } => FloatWidth::F64,
        }
    }
}

// ============================================================================
// Bin summation
// ============================================================================

/// Parameters for one subset's bin-summation pass.
pub struct BinSumsParams<'a> {
    /// Lane count; 1 means no lane parallelism.
    pub parallel_lanes: usize,
    /// Whether the objective provides Hessians.
    pub hessian: bool,
    /// Score vector length.
    pub score_count: usize,
    /// Packed tensor bin indices, or `None` when the round collapsed to
    /// a single bin and every sample sums into bin 0.
    pub pack: Option<&'a PackedTermData>,
    /// Samples in the subset.
    pub sample_count: usize,
    /// Interleaved gradients/Hessians for the subset.
    pub grad_hess: &'a GradHessStorage,
    /// Inner-bag sample weights (zero for out-of-bag samples).
    pub weights: &'a [f64],
    /// Active tensor bins this round.
    pub bin_count: usize,
    /// Destination fast bins, already prepared at the subset's width.
    pub fast_bins: &'a mut FastBins,
}

/// Accumulation element: the subset's compute float.
trait BinFloat: Copy + std::ops::AddAssign + std::ops::Mul<Output = Self> {
    fn from_f64(value: f64) -> Self;
}

impl BinFloat for f32 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl BinFloat for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

fn accumulate<F: BinFloat>(
    sample_count: usize,
    score_count: usize,
    hessian: bool,
    lanes: usize,
    bin_count: usize,
    pack: Option<&PackedTermData>,
    weights: &[f64],
    grad_hess: &[F],
    fast_grads: &mut [F],
    fast_hess: &mut [F],
) {
    let per_sample = score_count * (1 + usize::from(hessian));
    for i in 0..sample_count {
        let weight = F::from_f64(weights[i]);
        let bin = pack.map_or(0, |p| p.get(i));
        debug_assert!(bin < bin_count);
        let lane = i % lanes;
        let base = (lane * bin_count + bin) * score_count;
        let sample = &grad_hess[i * per_sample..(i + 1) * per_sample];
        if hessian {
            for s in 0..score_count {
                fast_grads[base + s] += weight * sample[2 * s];
                fast_hess[base + s] += weight * sample[2 * s + 1];
            }
        } else {
            for s in 0..score_count {
                fast_grads[base + s] += weight * sample[s];
            }
        }
    }
}

/// Sum one subset's weighted gradients into its fast bins.
pub fn bin_sums_boosting(params: &mut BinSumsParams<'_>) -> Result<()> {
    debug_assert!(0 < params.parallel_lanes);
    debug_assert_eq!(params.weights.len(), params.sample_count);
    match (params.grad_hess, &mut *params.fast_bins) {
        (GradHessStorage::F32(grad_hess), FastBins::F32 { grads, hess }) => {
            accumulate(
                params.sample_count,
                params.score_count,
                params.hessian,
                params.parallel_lanes,
                params.bin_count,
                params.pack,
                params.weights,
                grad_hess,
                grads,
                hess,
            );
            Ok(())
        }
        (GradHessStorage::F64(grad_hess), FastBins::F64 { grads, hess }) => {
            accumulate(
                params.sample_count,
                params.score_count,
                params.hessian,
                params.parallel_lanes,
                params.bin_count,
                params.pack,
                params.weights,
                grad_hess,
                grads,
                hess,
            );
            Ok(())
        }
        _ => Err(BoostError::UnexpectedInternal(
            "fast bin width does not match subset storage width".to_string(),
        )),
    }
}

// ============================================================================
// Convert + add
// ============================================================================

/// Merge one lane of typed fast bins into the canonical main bins.
///
/// `counts` and `weights` are the precomputed per-bag tensors; pass them
/// on exactly one invocation per bag (the final lane of the final
/// subset) so they are not added twice.
pub fn convert_add_bin(
    fast: &FastBins,
    lane: usize,
    bin_count: usize,
    score_count: usize,
    hessian: bool,
    counts: Option<&[u64]>,
    weights: Option<&[f64]>,
    main: &mut BinSet,
) {
    debug_assert_eq!(main.bin_count(), bin_count);
    debug_assert_eq!(main.score_count(), score_count);
    let slots = bin_count * score_count;
    let base = lane * slots;

    match fast {
        FastBins::F32 { grads, hess } => {
            for (to, from) in main.grads_mut().iter_mut().zip(&grads[base..base + slots]) {
                *to += f64::from(*from);
            }
            if hessian {
                for (to, from) in main.hess_mut().iter_mut().zip(&hess[base..base + slots]) {
                    *to += f64::from(*from);
                }
            }
        }
        FastBins::F64 { grads, hess } => {
            for (to, from) in main.grads_mut().iter_mut().zip(&grads[base..base + slots]) {
                *to += *from;
            }
            if hessian {
                for (to, from) in main.hess_mut().iter_mut().zip(&hess[base..base + slots]) {
                    *to += *from;
                }
            }
        }
    }

    if let Some(counts) = counts {
        for (to, from) in main.counts_mut().iter_mut().zip(counts) {
            *to += *from;
        }
    }
    if let Some(weights) = weights {
        for (to, from) in main.weights_mut().iter_mut().zip(weights) {
            *to += *from;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bin_byte_size() {
        // main bin: u64 count + f64 weight + f64 grad/hess pair
        assert_eq!(bin_byte_size(true, true, true, 1, 8, 8), 32);
        // fast bin, f32 gradient only, 3 scores
        assert_eq!(bin_byte_size(false, false, false, 3, 4, 8), 12);
    }

    #[test]
    fn test_parallel_budget_disallows_multiclass_gradient() {
        assert_eq!(parallel_bin_bytes_max(false, 3), 0);
        assert!(0 < parallel_bin_bytes_max(true, 3));
        assert!(0 < parallel_bin_bytes_max(false, 1));
    }

    fn sums_for(lanes: usize, storage_width: FloatWidth) -> BinSet {
        // 4 samples in 3 bins, single score, with hessians
        let bins = [0usize, 2, 1, 2];
        let grads = [1.0f64, -2.0, 0.5, 4.0];
        let hesses = [1.0f64, 1.0, 2.0, 0.5];
        let weights = [1.0f64, 1.0, 0.5, 1.0];

        let interleaved: Vec<f64> =
            grads.iter().zip(&hesses).flat_map(|(&g, &h)| [g, h]).collect();
        let storage = match storage_width {
            FloatWidth::F32 => {
                GradHessStorage::F32(interleaved.iter().map(|&v| v as f32).collect())
            }
            FloatWidth::F64 => GradHessStorage::F64(interleaved),
        };
        let pack = PackedTermData::pack(&bins, 2, crate::booster::dataset::UintWidth::U64);

        let mut fast = FastBins::new(storage_width);
        fast.prepare(storage_width, true, lanes * 3);
        let mut params = BinSumsParams {
            parallel_lanes: lanes,
            hessian: true,
            score_count: 1,
            pack: Some(&pack),
            sample_count: 4,
            grad_hess: &storage,
            weights: &weights,
            bin_count: 3,
            fast_bins: &mut fast,
        };
        bin_sums_boosting(&mut params).unwrap();

        let bag_counts = [1u64, 1, 2];
        let bag_weights = [1.0, 0.5, 2.0];
        let mut main = BinSet::new(1, true);
        main.zero(3);
        for lane in 0..lanes {
            let (counts, weights) = if lane == lanes - 1 {
                (Some(bag_counts.as_slice()), Some(bag_weights.as_slice()))
            } else {
                (None, None)
            };
            convert_add_bin(&fast, lane, 3, 1, true, counts, weights, &mut main);
        }
        main
    }

    #[test]
    fn test_bin_sums_then_convert() {
        let main = sums_for(1, FloatWidth::F64);
        // bin 0: sample 0; bin 1: sample 2 (weight 0.5); bin 2: samples 1 and 3
        assert_abs_diff_eq!(main.grad(0, 0), 1.0);
        assert_abs_diff_eq!(main.grad(1, 0), 0.25);
        assert_abs_diff_eq!(main.grad(2, 0), 2.0);
        assert_abs_diff_eq!(main.hess(1, 0), 1.0);
        assert_abs_diff_eq!(main.hess(2, 0), 1.5);
        assert_eq!(main.count(1), 1);
        assert_abs_diff_eq!(main.weight(2), 2.0);
    }

    #[test]
    fn test_lane_split_matches_single_lane() {
        let single = sums_for(1, FloatWidth::F64);
        let multi = sums_for(2, FloatWidth::F64);
        for bin in 0..3 {
            assert_abs_diff_eq!(single.grad(bin, 0), multi.grad(bin, 0));
            assert_abs_diff_eq!(single.hess(bin, 0), multi.hess(bin, 0));
            assert_eq!(single.count(bin), multi.count(bin));
        }
    }

    #[test]
    fn test_f32_storage_accumulates() {
        let main = sums_for(1, FloatWidth::F32);
        assert_abs_diff_eq!(main.grad(0, 0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(main.grad(2, 0), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_width_mismatch_is_internal_error() {
        let storage = GradHessStorage::F64(vec![1.0, 1.0]);
        let mut fast = FastBins::new(FloatWidth::F32);
        fast.prepare(FloatWidth::F32, true, 1);
        let weights = [1.0];
        let mut params = BinSumsParams {
            parallel_lanes: 1,
            hessian: true,
            score_count: 1,
            pack: None,
            sample_count: 1,
            grad_hess: &storage,
            weights: &weights,
            bin_count: 1,
            fast_bins: &mut fast,
        };
        assert!(matches!(
            bin_sums_boosting(&mut params),
            Err(BoostError::UnexpectedInternal(_))
        ));
    }
}
