//! Persistent booster state.
//!
//! [`BoosterCore`] holds everything fixed across rounds: term metadata,
//! the training set, and the objective's scaling constants.
//! [`BoosterShell`] wraps a core with the per-round scratch: the round
//! update tensor being composed, the inner update tensor one partitioner
//! writes, the bin sets, and the index of the term under construction.
//!
//! Ownership is a pure tree (shell -> core -> dataset, shell -> tensors
//! -> buffers) and nothing here touches global state, so independent
//! shells may run on separate threads.

pub mod dataset;
pub mod term;

use crate::error::Result;
use crate::tensor::SegmentedTensor;
use crate::training::bins::{BinSet, FastBins};
use dataset::{FloatWidth, TrainingSet};
use term::{Feature, Term};

// ============================================================================
// ObjectiveConstants
// ============================================================================

/// Scaling constants supplied by the objective. The defaults are the
/// identity; objectives override individual factors to keep effective
/// learning rates comparable across boosting modes.
#[derive(Debug, Clone)]
pub struct ObjectiveConstants {
    pub gradient_constant: f64,
    pub hessian_constant: f64,
    pub learning_rate_adjustment_differential_privacy: f64,
    pub learning_rate_adjustment_gradient_boosting: f64,
    pub learning_rate_adjustment_hessian_boosting: f64,
    pub gain_adjustment_gradient_boosting: f64,
    pub gain_adjustment_hessian_boosting: f64,
}

impl Default for ObjectiveConstants {
    fn default() -> Self {
        Self {
            gradient_constant: 1.0,
            hessian_constant: 1.0,
            learning_rate_adjustment_differential_privacy: 1.0,
            learning_rate_adjustment_gradient_boosting: 1.0,
            learning_rate_adjustment_hessian_boosting: 1.0,
            gain_adjustment_gradient_boosting: 1.0,
            gain_adjustment_hessian_boosting: 1.0,
        }
    }
}

// ============================================================================
// BoosterCore
// ============================================================================

/// State fixed for the lifetime of a boosting run.
#[derive(Debug)]
pub struct BoosterCore {
    score_count: usize,
    hessian: bool,
    features: Vec<Feature>,
    terms: Vec<Term>,
    training_set: TrainingSet,
    inner_bag_count: usize,
    constants: ObjectiveConstants,
}

impl BoosterCore {
    pub fn new(
        score_count: usize,
        hessian: bool,
        features: Vec<Feature>,
        terms: Vec<Term>,
        training_set: TrainingSet,
        inner_bag_count: usize,
        constants: ObjectiveConstants,
    ) -> Self {
        Self { score_count, hessian, features, terms, training_set, inner_bag_count, constants }
    }

    /// Score vector length. Zero is legal: a single-class classifier
    /// predicts perfectly and never produces an update.
    #[inline]
    pub fn score_count(&self) -> usize {
        self.score_count
    }

    /// Whether the objective provides Hessians.
    #[inline]
    pub fn is_hessian(&self) -> bool {
        self.hessian
    }

    #[inline]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    #[inline]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[inline]
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    #[inline]
    pub fn training_set(&self) -> &TrainingSet {
        &self.training_set
    }

    /// Configured inner bag count; zero means a single implicit bag over
    /// the full training set.
    #[inline]
    pub fn inner_bag_count(&self) -> usize {
        self.inner_bag_count
    }

    #[inline]
    pub fn constants(&self) -> &ObjectiveConstants {
        &self.constants
    }
}

// ============================================================================
// BoosterShell
// ============================================================================

/// Per-round scratch wrapped around a core.
#[derive(Debug)]
pub struct BoosterShell {
    core: BoosterCore,
    term_update: SegmentedTensor,
    inner_term_update: SegmentedTensor,
    main_bins: BinSet,
    aux_bins: BinSet,
    fast_bins: FastBins,
    current_term_index: Option<usize>,
}

/// Disjoint mutable views into the shell for the round orchestrator.
pub(crate) struct ShellScratch<'a> {
    pub core: &'a BoosterCore,
    pub term_update: &'a mut SegmentedTensor,
    pub inner_term_update: &'a mut SegmentedTensor,
    pub main_bins: &'a mut BinSet,
    pub aux_bins: &'a mut BinSet,
    pub fast_bins: &'a mut FastBins,
}

impl BoosterShell {
    /// Build the scratch state for `core`. Tensor shapes are sized to the
    /// widest term once and reused across rounds.
    pub fn new(core: BoosterCore) -> Result<Self> {
        let dimensions_max =
            core.terms().iter().map(Term::dimension_count).max().unwrap_or(0);
        // tensors need a score vector even for the degenerate zero-score
        // case, which never reaches them
        let tensor_scores = core.score_count().max(1);
        let term_update = SegmentedTensor::new(dimensions_max, tensor_scores)?;
        let inner_term_update = SegmentedTensor::new(dimensions_max, tensor_scores)?;
        let main_bins = BinSet::new(tensor_scores, core.is_hessian());
        let aux_bins = BinSet::new(tensor_scores, core.is_hessian());
        let fast_bins = FastBins::new(FloatWidth::F64);
        Ok(Self {
            core,
            term_update,
            inner_term_update,
            main_bins,
            aux_bins,
            fast_bins,
            current_term_index: None,
        })
    }

    #[inline]
    pub fn core(&self) -> &BoosterCore {
        &self.core
    }

    /// The update tensor composed by the last successful round.
    #[inline]
    pub fn term_update(&self) -> &SegmentedTensor {
        &self.term_update
    }

    /// Index of the term the current update was generated for, if the
    /// last round completed.
    #[inline]
    pub fn current_term_index(&self) -> Option<usize> {
        self.current_term_index
    }

    pub(crate) fn set_current_term_index(&mut self, term_index: Option<usize>) {
        self.current_term_index = term_index;
    }

    pub(crate) fn scratch(&mut self) -> ShellScratch<'_> {
        ShellScratch {
            core: &self.core,
            term_update: &mut self.term_update,
            inner_term_update: &mut self.inner_term_update,
            main_bins: &mut self.main_bins,
            aux_bins: &mut self.aux_bins,
            fast_bins: &mut self.fast_bins,
        }
    }
}
