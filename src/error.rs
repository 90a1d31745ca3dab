//! Shared error types for the update engine.

/// Errors observable at the boosting boundary.
///
/// Degenerate-but-valid rounds (zero scores, zero tensor bins, overflowed
/// gain) are *not* errors: they return `Ok` and communicate through the
/// written gain value instead.
#[derive(Debug, thiserror::Error)]
pub enum BoostError {
    /// A caller-supplied parameter was out of range.
    #[error("illegal parameter value: {0}")]
    IllegalParamVal(String),

    /// A size computation overflowed or an allocation failed.
    ///
    /// The tensor involved may be left logically invalid; callers must
    /// reset or discard it.
    #[error("out of memory")]
    OutOfMemory,

    /// An internal path that is not supported was reached.
    #[error("unexpected internal state: {0}")]
    UnexpectedInternal(String),
}

/// Crate-wide result alias.
pub type Result<T, E = BoostError> = std::result::Result<T, E>;
