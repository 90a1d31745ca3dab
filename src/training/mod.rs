//! Per-round training machinery.
//!
//! One boosting round flows through this module: subsets are summed into
//! bins ([`bins`]), prefix totals are built for multi-dimensional search
//! ([`totals`]), a partitioner cuts the grid ([`partition`]), and the
//! orchestrator ([`update`]) stitches it all together across inner bags.

pub mod bins;
pub mod partition;
pub mod stats;
pub mod totals;
pub mod update;

pub use update::{generate_term_update, TermBoostFlags, ILLEGAL_GAIN};
