//! segboost: the segmented tensor update engine of a gradient-boosted
//! additive model trainer.
//!
//! One boosting round computes, for a single *term* (an interaction of
//! binned features), a compressed piecewise-constant *update tensor*
//! that callers add onto the running model tensor of the same shape.
//! The crate provides:
//!
//! - [`SegmentedTensor`]: the compressed representation and its algebra
//!   (union-of-cuts addition, in-place densification, scalar scaling
//!   with poisoning detection).
//! - [`generate_term_update`]: the round orchestrator that bins
//!   per-sample gradients, partitions the bins, and accumulates the
//!   per-bag updates.
//! - The booster state it runs against: [`BoosterCore`] (terms, data,
//!   objective constants) wrapped by a [`BoosterShell`] (per-round
//!   scratch).

pub mod booster;
pub mod error;
pub mod rng;
pub mod tensor;
pub mod testing;
pub mod training;
pub mod utils;

pub use booster::term::{Feature, MonotoneDirection, Term};
pub use booster::{BoosterCore, BoosterShell, ObjectiveConstants};
pub use error::{BoostError, Result};
pub use rng::BoostRng;
pub use tensor::SegmentedTensor;
pub use training::{generate_term_update, TermBoostFlags, ILLEGAL_GAIN};
