//! Features, terms, and monotone directions.
//!
//! A *term* is an interaction of one or more binned features; its
//! Cartesian bin grid defines the shape of the term's update tensor.
//! Features with a single bin carry no information but still occupy a
//! dimension of the tensor, so a term distinguishes its *dimension count*
//! (all features) from its *real dimension count* (features with at least
//! two bins).

// ============================================================================
// MonotoneDirection
// ============================================================================

/// Monotone constraint direction for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonotoneDirection {
    /// No constraint (default).
    #[default]
    None,
    /// Scores must increase with the feature's bin index.
    Increasing,
    /// Scores must decrease with the feature's bin index.
    Decreasing,
}

impl MonotoneDirection {
    /// Create from integer representation (`0` none, `1` increasing,
    /// `-1` decreasing).
    pub fn from_int(value: i32) -> Self {
        match value {
            1 => Self::Increasing,
            -1 => Self::Decreasing,
            _ => Self::None,
        }
    }

    /// Convert to integer representation.
    pub fn to_int(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Increasing => 1,
            Self::Decreasing => -1,
        }
    }

    /// Whether this direction constrains anything.
    #[inline]
    pub fn is_constrained(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Accumulate directions across dimensions, bitwise over the integer
    /// representation. Mixed constraints saturate to `Decreasing`; the
    /// combined value only ever feeds the constrained/unconstrained test
    /// once more than one dimension is involved.
    #[inline]
    pub fn or(self, rhs: Self) -> Self {
        Self::from_int(self.to_int() | rhs.to_int())
    }
}

// ============================================================================
// Feature
// ============================================================================

/// One pre-binned feature.
#[derive(Debug, Clone)]
pub struct Feature {
    bin_count: usize,
}

impl Feature {
    pub fn new(bin_count: usize) -> Self {
        Self { bin_count }
    }

    /// Number of bins, including any missing/unseen bins the binning
    /// produced. A count of 1 means the feature is constant.
    #[inline]
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }
}

// ============================================================================
// Term
// ============================================================================

/// An interaction term: an ordered set of feature indices plus cached
/// grid metadata.
#[derive(Debug, Clone)]
pub struct Term {
    feature_indices: Vec<usize>,
    bin_counts: Vec<usize>,
    tensor_bin_count: usize,
    real_dimension_count: usize,
    bits_required: u32,
}

impl Term {
    /// Build a term over `feature_indices`, resolving bin counts against
    /// `features`. A term over an empty feature set (an intercept) has a
    /// single tensor bin. `tensor_bin_count` is zero when any feature has
    /// zero bins (an empty training set).
    pub fn new(feature_indices: Vec<usize>, features: &[Feature]) -> Self {
        let bin_counts: Vec<usize> =
            feature_indices.iter().map(|&f| features[f].bin_count()).collect();
        let tensor_bin_count = bin_counts.iter().product();
        let real_dimension_count = bin_counts.iter().filter(|&&bins| 1 < bins).count();
        let bits_required = bits_required_for(tensor_bin_count);
        Self { feature_indices, bin_counts, tensor_bin_count, real_dimension_count, bits_required }
    }

    /// Feature indices in dimension order.
    #[inline]
    pub fn feature_indices(&self) -> &[usize] {
        &self.feature_indices
    }

    /// Bin count per dimension, in dimension order.
    #[inline]
    pub fn bin_counts(&self) -> &[usize] {
        &self.bin_counts
    }

    /// Number of tensor dimensions (all features, significant or not).
    #[inline]
    pub fn dimension_count(&self) -> usize {
        self.feature_indices.len()
    }

    /// Number of dimensions with at least two bins.
    #[inline]
    pub fn real_dimension_count(&self) -> usize {
        self.real_dimension_count
    }

    /// Total cells of the term's bin grid.
    #[inline]
    pub fn tensor_bin_count(&self) -> usize {
        self.tensor_bin_count
    }

    /// Minimum bits needed to store one tensor bin index.
    #[inline]
    pub fn bits_required(&self) -> u32 {
        self.bits_required
    }

    /// Bin counts of the real dimensions only, in dimension order.
    pub fn real_bin_counts(&self) -> Vec<usize> {
        self.bin_counts.iter().copied().filter(|&bins| 1 < bins).collect()
    }

    /// Auxiliary bins needed by the totals builder: a full prefix-sum
    /// copy of the tensor grid.
    #[inline]
    pub fn auxiliary_bin_count(&self) -> usize {
        self.tensor_bin_count
    }
}

/// Bits needed to represent indexes `0..bin_count`. At least 1 so a pack
/// width can always be chosen.
fn bits_required_for(bin_count: usize) -> u32 {
    if bin_count <= 1 {
        return 1;
    }
    usize::BITS - (bin_count - 1).leading_zeros()
}
