//! Compressed piecewise-constant tensors over binned feature grids.
//!
//! A [`SegmentedTensor`] represents a function from an N-dimensional
//! integer grid into a score vector of fixed length. Along each axis the
//! grid is cut into segments by a strictly increasing sequence of
//! *division* points; the function is constant on every rectangular cell
//! of the segment grid. A division value `d` cuts between coordinates `d`
//! and `d + 1`, so an axis with `k` divisions has `k + 1` segments.
//!
//! Scores are stored flat in segment-grid order with dimension 0 varying
//! fastest, each segment occupying `score_count` consecutive slots.
//!
//! The interesting operations are [`add`](SegmentedTensor::add), which
//! merges two tensors by taking the per-axis union of their division
//! points, and [`expand`](SegmentedTensor::expand), which densifies a
//! tensor onto the full bin grid. Both fill the value array in place by
//! walking destination cells from the highest index downward; since the
//! destination aliases the source and the grid only ever grows, writing
//! high-to-low guarantees no source cell is clobbered before it is read.

use tracing::{debug, trace};

use crate::error::{BoostError, Result};
use crate::utils::{add_overflows, mult_overflows};

/// Hard upper limit on tensor dimensionality. The per-dimension cursor
/// stacks used by `expand` and `add` are fixed-size arrays of this depth.
pub const DIMENSIONS_MAX: usize = 64;

const INITIAL_DIVISION_CAPACITY: usize = 1;
const INITIAL_VALUE_CAPACITY: usize = 2;

/// One axis of the segmentation: the division points cutting the axis
/// into segments. Only the first `count` entries of `divisions` are
/// meaningful; the rest is reserved capacity.
#[derive(Debug, Clone)]
struct Dimension {
    count: usize,
    divisions: Vec<usize>,
}

/// Cursor for the in-place densification walk: tracks how many source
/// divisions remain below the current cell and which destination division
/// index comes next.
#[derive(Debug, Clone, Copy, Default)]
struct ExpandCursor {
    div_pos: usize,
    next_dst: usize,
    new_divisions: usize,
}

/// Cursor pair for the union-of-cuts walk, one position per operand.
#[derive(Debug, Clone, Copy, Default)]
struct AddCursor {
    lhs_pos: usize,
    rhs_pos: usize,
    new_divisions: usize,
}

/// A piecewise-constant tensor with a compressed per-dimension
/// segmentation.
///
/// The tensor exclusively owns its score buffer and each per-dimension
/// division buffer. Buffers grow with a 1.5x amortized policy and are
/// never shrunk; growth preserves existing contents, and a failed growth
/// leaves the original buffer valid (the realloc contract).
#[derive(Debug, Clone)]
pub struct SegmentedTensor {
    score_count: usize,
    dimension_count: usize,
    dimensions: Vec<Dimension>,
    values: Vec<f64>,
    expanded: bool,
}

/// Grow `buf` so it holds at least `needed` elements, by 50% over the
/// request to amortize repeated growth. Contents are preserved; on
/// failure the buffer is untouched.
fn grow_buffer<T: Copy + Default>(buf: &mut Vec<T>, needed: usize) -> Result<()> {
    if buf.len() < needed {
        if add_overflows(needed, needed >> 1) {
            debug!("buffer growth size overflow");
            return Err(BoostError::OutOfMemory);
        }
        let new_len = needed + (needed >> 1);
        buf.try_reserve_exact(new_len - buf.len()).map_err(|_| BoostError::OutOfMemory)?;
        buf.resize(new_len, T::default());
    }
    Ok(())
}

impl SegmentedTensor {
    /// Allocate a tensor supporting up to `dimension_count_max` dimensions
    /// and `score_count` scores per segment. The active dimension count
    /// starts at the maximum, every axis starts with zero divisions, and
    /// the single segment's scores are zero.
    pub fn new(dimension_count_max: usize, score_count: usize) -> Result<Self> {
        assert!(dimension_count_max <= DIMENSIONS_MAX);
        assert!(1 <= score_count);

        if mult_overflows(score_count, INITIAL_VALUE_CAPACITY) {
            debug!("initial value capacity overflow");
            return Err(BoostError::OutOfMemory);
        }
        let value_capacity = score_count * INITIAL_VALUE_CAPACITY;

        let mut values = Vec::new();
        values.try_reserve_exact(value_capacity).map_err(|_| BoostError::OutOfMemory)?;
        values.resize(value_capacity, 0.0);

        let mut dimensions = Vec::new();
        dimensions.try_reserve_exact(dimension_count_max).map_err(|_| BoostError::OutOfMemory)?;
        for _ in 0..dimension_count_max {
            let mut divisions = Vec::new();
            divisions.try_reserve_exact(INITIAL_DIVISION_CAPACITY).map_err(|_| BoostError::OutOfMemory)?;
            divisions.resize(INITIAL_DIVISION_CAPACITY, 0);
            dimensions.push(Dimension { count: 0, divisions });
        }

        Ok(Self {
            score_count,
            dimension_count: dimension_count_max,
            dimensions,
            values,
            expanded: false,
        })
    }

    /// Score vector length per segment.
    #[inline]
    pub fn score_count(&self) -> usize {
        self.score_count
    }

    /// Number of active dimensions.
    #[inline]
    pub fn dimension_count(&self) -> usize {
        self.dimension_count
    }

    /// Maximum dimension count fixed at allocation.
    #[inline]
    pub fn dimension_count_max(&self) -> usize {
        self.dimensions.len()
    }

    /// Whether the tensor is dense over the full bin grid.
    #[inline]
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Set the active dimension count. Per-dimension data is untouched.
    pub fn set_dimension_count(&mut self, dimension_count: usize) {
        assert!(dimension_count <= self.dimension_count_max());
        self.dimension_count = dimension_count;
    }

    /// Number of divisions along `dimension`.
    #[inline]
    pub fn division_count(&self, dimension: usize) -> usize {
        assert!(dimension < self.dimension_count);
        self.dimensions[dimension].count
    }

    /// The meaningful division points along `dimension`.
    #[inline]
    pub fn divisions(&self, dimension: usize) -> &[usize] {
        assert!(dimension < self.dimension_count);
        let dim = &self.dimensions[dimension];
        &dim.divisions[..dim.count]
    }

    /// Mutable view of the meaningful division points along `dimension`.
    /// Callers write entries after [`set_division_count`]; entries must
    /// end up strictly increasing.
    ///
    /// [`set_division_count`]: Self::set_division_count
    #[inline]
    pub fn divisions_mut(&mut self, dimension: usize) -> &mut [usize] {
        assert!(dimension < self.dimension_count);
        let dim = &mut self.dimensions[dimension];
        &mut dim.divisions[..dim.count]
    }

    /// Total segment count over the active dimensions. Always at least 1;
    /// cannot overflow because the segments are already backed by
    /// allocated storage.
    #[inline]
    pub fn segment_count(&self) -> usize {
        let mut count = 1;
        for dim in &self.dimensions[..self.dimension_count] {
            count *= dim.count + 1;
        }
        count
    }

    /// Number of meaningful score slots: `score_count * segment_count`.
    #[inline]
    pub fn total_score_count(&self) -> usize {
        self.score_count * self.segment_count()
    }

    /// The meaningful scores, segment-major with dimension 0 fastest.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values[..self.total_score_count()]
    }

    /// Mutable view of the meaningful scores.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [f64] {
        let total = self.total_score_count();
        &mut self.values[..total]
    }

    /// Return the tensor to the empty state: zero divisions on every
    /// active axis, a single all-zero segment, not expanded. Capacities
    /// are retained.
    pub fn reset(&mut self) {
        for dim in &mut self.dimensions[..self.dimension_count] {
            dim.count = 0;
        }
        self.values[..self.score_count].fill(0.0);
        self.expanded = false;
    }

    /// Record `count` divisions along `dimension`, growing the division
    /// buffer if needed. New entries are uninitialized from the caller's
    /// point of view; the caller writes them afterwards.
    ///
    /// Must not grow an expanded tensor: expansion is already the maximum
    /// size.
    pub fn set_division_count(&mut self, dimension: usize, count: usize) -> Result<()> {
        assert!(dimension < self.dimension_count);
        let dim = &mut self.dimensions[dimension];
        debug_assert!(!self.expanded || count <= dim.count);
        if dim.divisions.len() < count {
            debug_assert!(!self.expanded);
            trace!(dimension, count, "growing division buffer");
            grow_buffer(&mut dim.divisions, count)?;
        }
        dim.count = count;
        Ok(())
    }

    /// Ensure the score buffer holds at least `slot_count` slots, growing
    /// with the 1.5x policy. Contents are preserved.
    pub fn ensure_value_capacity(&mut self, slot_count: usize) -> Result<()> {
        if self.values.len() < slot_count {
            debug_assert!(!self.expanded);
            trace!(slot_count, "growing value buffer");
            grow_buffer(&mut self.values, slot_count)?;
        }
        Ok(())
    }

    /// Overwrite this tensor to equal `rhs` structurally and numerically.
    /// Both tensors must have the same active dimension count.
    ///
    /// On failure the tensor may hold partially overwritten contents and
    /// is logically invalid; callers reset or discard it.
    pub fn copy_from(&mut self, rhs: &SegmentedTensor) -> Result<()> {
        assert_eq!(self.dimension_count, rhs.dimension_count);
        debug_assert_eq!(self.score_count, rhs.score_count);

        let mut slot_count = self.score_count;
        for i in 0..self.dimension_count {
            let count = rhs.dimensions[i].count;
            slot_count *= count + 1;
            self.set_division_count(i, count)?;
            self.dimensions[i].divisions[..count].copy_from_slice(&rhs.dimensions[i].divisions[..count]);
        }
        self.ensure_value_capacity(slot_count)?;
        self.values[..slot_count].copy_from_slice(&rhs.values[..slot_count]);
        self.expanded = rhs.expanded;
        Ok(())
    }

    /// Multiply every meaningful score by `factor`.
    pub fn multiply(&mut self, factor: f64) {
        for value in self.values_mut() {
            *value *= factor;
        }
    }

    /// Multiply every meaningful score by `factor`, reporting whether any
    /// resulting score is NaN or infinite. Used to reject a numerically
    /// poisoned update.
    #[must_use]
    pub fn multiply_and_check_for_issues(&mut self, factor: f64) -> bool {
        let mut bad = false;
        for value in self.values_mut() {
            *value *= factor;
            bad |= !value.is_finite();
        }
        bad
    }

    /// Densify the tensor onto the full grid of `bins_per_dimension`
    /// cells, in place. Idempotent when already expanded. Afterwards each
    /// axis `i` has divisions `0, 1, .., bins[i] - 2` and every grid cell
    /// carries the score of the segment that contained it.
    pub fn expand(&mut self, bins_per_dimension: &[usize]) -> Result<()> {
        trace!("entered expand");
        let dimension_count = self.dimension_count;
        assert!(1 <= dimension_count);
        assert_eq!(bins_per_dimension.len(), dimension_count);

        if self.expanded {
            trace!("exited expand (already expanded)");
            return Ok(());
        }

        let score_count = self.score_count;
        let mut stack = [ExpandCursor::default(); DIMENSIONS_MAX];

        let mut source_segments = 1;
        let mut target_cells = 1;
        for i in 0..dimension_count {
            let bins = bins_per_dimension[i];
            debug_assert!(1 <= bins);
            // counting existing storage cannot overflow
            source_segments *= self.dimensions[i].count + 1;
            if mult_overflows(target_cells, bins) {
                debug!("expand target cell count overflow");
                return Err(BoostError::OutOfMemory);
            }
            target_cells *= bins;
            stack[i] = ExpandCursor {
                div_pos: self.dimensions[i].count,
                next_dst: bins - 1,
                new_divisions: bins - 1,
            };
        }

        if mult_overflows(target_cells, score_count) {
            debug!("expand score slot count overflow");
            return Err(BoostError::OutOfMemory);
        }
        let target_slots = target_cells * score_count;
        self.ensure_value_capacity(target_slots)?;

        debug_assert!(source_segments <= target_cells);
        let mut src_end = score_count * source_segments;
        let mut dst_end = target_slots;

        // Walk destination cells from the top down; the cursor stack
        // decides when the source segment pointer steps backward.
        loop {
            for j in 1..=score_count {
                self.values[dst_end - j] = self.values[src_end - j];
            }
            dst_end -= score_count;
            if dst_end == 0 {
                break;
            }

            let mut stride = score_count;
            let mut d = 0;
            loop {
                let cursor = &mut stack[d];
                if 0 < cursor.div_pos {
                    debug_assert!(0 < cursor.next_dst);
                    let division = self.dimensions[d].divisions[cursor.div_pos - 1];
                    cursor.next_dst -= 1;
                    if cursor.next_dst <= division {
                        cursor.div_pos -= 1;
                        src_end -= stride;
                    }
                    break;
                }
                if 0 < cursor.next_dst {
                    cursor.next_dst -= 1;
                    break;
                }
                // this axis wrapped: rewind to its last segment and carry
                // into the next dimension
                let segments = self.dimensions[d].count + 1;
                src_end -= stride;
                stride *= segments;
                src_end += stride;
                cursor.div_pos = segments - 1;
                cursor.next_dst = cursor.new_divisions;
                d += 1;
            }
        }
        debug_assert_eq!(src_end, score_count);

        for i in 0..dimension_count {
            let new_divisions = bins_per_dimension[i] - 1;
            if new_divisions == self.dimensions[i].count {
                continue;
            }
            self.set_division_count(i, new_divisions)?;
            for (j, slot) in self.dimensions[i].divisions[..new_divisions].iter_mut().enumerate() {
                *slot = j;
            }
        }

        self.expanded = true;
        trace!("exited expand");
        Ok(())
    }

    /// Element-wise add `source` into the meaningful scores. The tensor
    /// must already be expanded; `source` is a dense grid of the same
    /// shape.
    pub fn add_expanded(&mut self, source: &[f64]) {
        debug_assert!(self.expanded);
        let total = self.total_score_count();
        debug_assert!(total <= source.len());
        for (to, from) in self.values[..total].iter_mut().zip(&source[..total]) {
            *to += *from;
        }
    }

    /// Merge `rhs` into this tensor: along every axis the divisions become
    /// the sorted union of both operands' divisions, and every resulting
    /// segment's score is the sum of the two source segments containing
    /// it. Both operands must have the same dimension count, score count,
    /// and coordinate range.
    ///
    /// On failure (size overflow or allocation failure) the tensor may be
    /// partially mutated and is logically invalid; callers reset or
    /// discard it.
    pub fn add(&mut self, rhs: &SegmentedTensor) -> Result<()> {
        assert_eq!(self.dimension_count, rhs.dimension_count);
        debug_assert_eq!(self.score_count, rhs.score_count);
        let dimension_count = self.dimension_count;
        let score_count = self.score_count;

        if dimension_count == 0 {
            for s in 0..score_count {
                self.values[s] += rhs.values[s];
            }
            return Ok(());
        }

        let mut stack = [AddCursor::default(); DIMENSIONS_MAX];

        let mut lhs_segments = 1;
        let mut rhs_segments = 1;
        let mut new_segments = 1;
        for i in 0..dimension_count {
            let lhs_count = self.dimensions[i].count;
            let rhs_count = rhs.dimensions[i].count;
            lhs_segments *= lhs_count + 1;
            rhs_segments *= rhs_count + 1;

            // forward two-pointer union count; the reverse merge below
            // then finds the divisions warm in cache
            let lhs_divisions = &self.dimensions[i].divisions[..lhs_count];
            let rhs_divisions = &rhs.dimensions[i].divisions[..rhs_count];
            let mut p1 = 0;
            let mut p2 = 0;
            let mut union_count = 0;
            loop {
                if p2 == rhs_count {
                    union_count += lhs_count - p1;
                    break;
                }
                if p1 == lhs_count {
                    union_count += rhs_count - p2;
                    break;
                }
                union_count += 1;
                let d1 = lhs_divisions[p1];
                let d2 = rhs_divisions[p2];
                if d1 <= d2 {
                    p1 += 1;
                }
                if d2 <= d1 {
                    p2 += 1;
                }
            }
            stack[i] = AddCursor { lhs_pos: lhs_count, rhs_pos: rhs_count, new_divisions: union_count };

            if mult_overflows(new_segments, union_count + 1) {
                debug!("add union segment count overflow");
                return Err(BoostError::OutOfMemory);
            }
            new_segments *= union_count + 1;
        }

        if mult_overflows(new_segments, score_count) {
            debug!("add score slot count overflow");
            return Err(BoostError::OutOfMemory);
        }
        self.ensure_value_capacity(new_segments * score_count)?;

        let mut lhs_end = score_count * lhs_segments;
        let mut rhs_end = score_count * rhs_segments;
        let mut dst_end = score_count * new_segments;

        // Fill the union grid from the top down; the destination aliases
        // the left operand, so high-to-low writes never clobber an unread
        // source cell.
        loop {
            for j in 1..=score_count {
                self.values[dst_end - j] = self.values[lhs_end - j] + rhs.values[rhs_end - j];
            }
            dst_end -= score_count;
            if dst_end == 0 {
                break;
            }

            let mut lhs_stride = score_count;
            let mut rhs_stride = score_count;
            let mut d = 0;
            loop {
                let cursor = &mut stack[d];
                if 0 < cursor.lhs_pos {
                    if 0 < cursor.rhs_pos {
                        let d1 = self.dimensions[d].divisions[cursor.lhs_pos - 1];
                        let d2 = rhs.dimensions[d].divisions[cursor.rhs_pos - 1];
                        if d2 <= d1 {
                            cursor.lhs_pos -= 1;
                            lhs_end -= lhs_stride;
                        }
                        if d1 <= d2 {
                            cursor.rhs_pos -= 1;
                            rhs_end -= rhs_stride;
                        }
                        break;
                    }
                    cursor.lhs_pos -= 1;
                    lhs_end -= lhs_stride;
                    break;
                }
                if 0 < cursor.rhs_pos {
                    cursor.rhs_pos -= 1;
                    rhs_end -= rhs_stride;
                    break;
                }
                // both axes wrapped: rewind each to its last segment and
                // carry into the next dimension
                let lhs_axis_segments = self.dimensions[d].count + 1;
                let rhs_axis_segments = rhs.dimensions[d].count + 1;
                lhs_end -= lhs_stride;
                rhs_end -= rhs_stride;
                lhs_stride *= lhs_axis_segments;
                rhs_stride *= rhs_axis_segments;
                lhs_end += lhs_stride;
                rhs_end += rhs_stride;
                cursor.lhs_pos = lhs_axis_segments - 1;
                cursor.rhs_pos = rhs_axis_segments - 1;
                d += 1;
            }
        }
        debug_assert_eq!(dst_end, 0);
        debug_assert_eq!(lhs_end, score_count);
        debug_assert_eq!(rhs_end, score_count);

        // now the divisions, merged in reverse so new entries land above
        // the old entries still waiting to be read
        for i in 0..dimension_count {
            let new_divisions = stack[i].new_divisions;
            let old_count = self.dimensions[i].count;
            self.set_division_count(i, new_divisions)?;

            let rhs_count = rhs.dimensions[i].count;
            let rhs_divisions = &rhs.dimensions[i].divisions[..rhs_count];
            let divisions = &mut self.dimensions[i].divisions;

            let mut p1 = old_count;
            let mut p2 = rhs_count;
            let mut top = new_divisions;
            loop {
                debug_assert!(p1 <= top);
                debug_assert!(p2 <= top);
                if top == p1 {
                    // our remaining divisions are already in place
                    break;
                }
                if top == p2 {
                    divisions[..top].copy_from_slice(&rhs_divisions[..top]);
                    break;
                }
                let d1 = divisions[p1 - 1];
                let d2 = rhs_divisions[p2 - 1];
                if d2 <= d1 {
                    p1 -= 1;
                }
                if d1 <= d2 {
                    p2 -= 1;
                }
                top -= 1;
                divisions[top] = d1.max(d2);
            }
        }
        Ok(())
    }

    /// Structural and numerical equality: same active dimensions, same
    /// divisions, same meaningful scores (exact comparison).
    pub fn is_equal(&self, rhs: &SegmentedTensor) -> bool {
        if self.dimension_count != rhs.dimension_count {
            return false;
        }

        let mut slot_count = self.score_count;
        for i in 0..self.dimension_count {
            let count = self.dimensions[i].count;
            if count != rhs.dimensions[i].count {
                return false;
            }
            slot_count *= count + 1;
            if self.dimensions[i].divisions[..count] != rhs.dimensions[i].divisions[..count] {
                return false;
            }
        }
        self.values[..slot_count] == rhs.values[..slot_count]
    }
}
