//! Prefix-sum auxiliary bins for multi-dimensional partitioning.
//!
//! The two-dimensional partitioner evaluates many rectangular regions of
//! the bin grid. Building an inclusive prefix-sum copy of the main bins
//! once turns every region query into an inclusion-exclusion over
//! `2^D` corners.
//!
//! The flat bin layout has dimension 0 varying fastest, matching the
//! tensor score layout.

use crate::training::bins::BinSet;

/// Build inclusive prefix sums of `main` into `aux` over the grid
/// described by `real_bins` (bin counts of the significant dimensions
/// only; single-bin dimensions do not affect the flat layout).
pub fn tensor_totals_build(real_bins: &[usize], main: &BinSet, aux: &mut BinSet) {
    let total: usize = real_bins.iter().product();
    debug_assert_eq!(total, main.bin_count());
    aux.copy_from(main);

    let score_count = aux.score_count();
    let hessian = aux.has_hessian();

    let mut stride = 1;
    for &bins in real_bins {
        for idx in 0..total {
            if 0 < (idx / stride) % bins {
                let prev = idx - stride;

                let counts = aux.counts_mut();
                counts[idx] += counts[prev];
                let weights = aux.weights_mut();
                weights[idx] += weights[prev];
                let grads = aux.grads_mut();
                for s in 0..score_count {
                    grads[idx * score_count + s] += grads[prev * score_count + s];
                }
                if hessian {
                    let hess = aux.hess_mut();
                    for s in 0..score_count {
                        hess[idx * score_count + s] += hess[prev * score_count + s];
                    }
                }
            }
        }
        stride *= bins;
    }
}

/// Aggregated statistics of one rectangular region of the bin grid.
#[derive(Debug, Clone)]
pub struct RegionTotals {
    pub count: i64,
    pub weight: f64,
    pub grads: Vec<f64>,
    pub hess: Vec<f64>,
}

impl RegionTotals {
    pub fn new(score_count: usize) -> Self {
        Self { count: 0, weight: 0.0, grads: vec![0.0; score_count], hess: vec![0.0; score_count] }
    }

    fn clear(&mut self) {
        self.count = 0;
        self.weight = 0.0;
        self.grads.fill(0.0);
        self.hess.fill(0.0);
    }

    fn accumulate(&mut self, aux: &BinSet, bin: usize, sign: f64) {
        self.count += sign as i64 * aux.count(bin) as i64;
        self.weight += sign * aux.weight(bin);
        let score_count = self.grads.len();
        for s in 0..score_count {
            self.grads[s] += sign * aux.grad(bin, s);
        }
        if aux.has_hessian() {
            for s in 0..score_count {
                self.hess[s] += sign * aux.hess(bin, s);
            }
        }
    }
}

/// Sum the region `lo[d] .. hi[d]` (exclusive upper) of the prefix-sum
/// tensor `aux` into `out`, by inclusion-exclusion over the region's
/// corners.
pub fn region_sum(aux: &BinSet, real_bins: &[usize], lo: &[usize], hi: &[usize], out: &mut RegionTotals) {
    debug_assert_eq!(lo.len(), real_bins.len());
    debug_assert_eq!(hi.len(), real_bins.len());
    out.clear();

    let dims = real_bins.len();
    'corner: for mask in 0..(1usize << dims) {
        let mut bin = 0;
        let mut stride = 1;
        let mut low_corners = 0;
        for d in 0..dims {
            let coord = if mask & (1 << d) == 0 {
                debug_assert!(hi[d] <= real_bins[d]);
                hi[d].wrapping_sub(1)
            } else {
                low_corners += 1;
                lo[d].wrapping_sub(1)
            };
            if coord == usize::MAX {
                // an empty prefix contributes nothing
                continue 'corner;
            }
            bin += coord * stride;
            stride *= real_bins[d];
        }
        let sign = if low_corners % 2 == 0 { 1.0 } else { -1.0 };
        out.accumulate(aux, bin, sign);
    }
}
