//! Testing utilities for segboost.
//!
//! Assembling a [`BoosterShell`] by hand takes a fair amount of
//! ceremony: features, terms, packed term data, inner-bag tensors. The
//! [`DatasetBuilder`] here collapses that into plain vectors so unit and
//! integration tests can focus on the behavior under test.
//!
//! The module is exported for integration tests; it is not part of the
//! stable API surface.

use crate::booster::dataset::{
    DataSubset, FloatWidth, GradHessStorage, TermInnerBag, TrainingSet, UintWidth,
};
use crate::booster::term::{Feature, Term};
use crate::booster::{BoosterCore, BoosterShell, ObjectiveConstants};
use crate::error::Result;

/// Builds a single-subset booster shell from plain per-sample vectors.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    score_count: usize,
    hessian: bool,
    feature_bin_counts: Vec<usize>,
    term_features: Vec<Vec<usize>>,
    /// Per feature, per sample: bin index.
    sample_bins: Vec<Vec<usize>>,
    /// Per sample, per score: gradient then Hessian (when `hessian`).
    grad_hess: Vec<f64>,
    inner_bag_count: usize,
    /// Per bag, per sample. Defaults to weight 1 everywhere.
    bag_weights: Option<Vec<Vec<f64>>>,
    subset_sizes: Option<Vec<usize>>,
    float_width: FloatWidth,
    uint_width: UintWidth,
    simd_pack: usize,
    constants: ObjectiveConstants,
}

impl DatasetBuilder {
    pub fn new(score_count: usize, hessian: bool) -> Self {
        Self {
            score_count,
            hessian,
            feature_bin_counts: Vec::new(),
            term_features: Vec::new(),
            sample_bins: Vec::new(),
            grad_hess: Vec::new(),
            inner_bag_count: 0,
            bag_weights: None,
            subset_sizes: None,
            float_width: FloatWidth::F64,
            uint_width: UintWidth::U64,
            simd_pack: 1,
            constants: ObjectiveConstants::default(),
        }
    }

    /// Add a feature with `bin_count` bins and its per-sample bin
    /// indices.
    pub fn feature(mut self, bin_count: usize, sample_bins: Vec<usize>) -> Self {
        self.feature_bin_counts.push(bin_count);
        self.sample_bins.push(sample_bins);
        self
    }

    /// Add a term over the given feature indices.
    pub fn term(mut self, feature_indices: Vec<usize>) -> Self {
        self.term_features.push(feature_indices);
        self
    }

    /// Interleaved per-sample gradients (and Hessians when the builder
    /// is Hessian-enabled).
    pub fn grad_hess(mut self, grad_hess: Vec<f64>) -> Self {
        self.grad_hess = grad_hess;
        self
    }

    /// Explicit inner bags with per-sample weights.
    pub fn inner_bags(mut self, bag_weights: Vec<Vec<f64>>) -> Self {
        self.inner_bag_count = bag_weights.len();
        self.bag_weights = Some(bag_weights);
        self
    }

    /// Split the samples into subsets of the given sizes instead of one
    /// subset over everything.
    pub fn subset_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.subset_sizes = Some(sizes);
        self
    }

    pub fn float_width(mut self, width: FloatWidth) -> Self {
        self.float_width = width;
        self
    }

    pub fn simd_pack(mut self, simd_pack: usize) -> Self {
        self.simd_pack = simd_pack;
        self
    }

    pub fn constants(mut self, constants: ObjectiveConstants) -> Self {
        self.constants = constants;
        self
    }

    fn sample_count(&self) -> usize {
        self.sample_bins.first().map_or(0, Vec::len)
    }

    /// Tensor bin index of one sample for one term, dimension 0 fastest.
    fn tensor_bin(&self, term: &Term, sample: usize) -> usize {
        let mut bin = 0;
        let mut stride = 1;
        for (d, &feature) in term.feature_indices().iter().enumerate() {
            bin += self.sample_bins[feature][sample] * stride;
            stride *= term.bin_counts()[d];
        }
        bin
    }

    pub fn build(self) -> Result<BoosterShell> {
        let sample_count = self.sample_count();
        let per_sample = self.score_count * (1 + usize::from(self.hessian));
        assert_eq!(self.grad_hess.len(), sample_count * per_sample);

        let features: Vec<Feature> =
            self.feature_bin_counts.iter().map(|&bins| Feature::new(bins)).collect();
        let terms: Vec<Term> = self
            .term_features
            .iter()
            .map(|indices| Term::new(indices.clone(), &features))
            .collect();

        let bag_count = self.inner_bag_count.max(1);
        let bag_weights: Vec<Vec<f64>> = match &self.bag_weights {
            Some(weights) => {
                assert!(weights.iter().all(|bag| bag.len() == sample_count));
                weights.clone()
            }
            None => vec![vec![1.0; sample_count]; bag_count],
        };

        // per-term inner bag count/weight tensors
        let mut term_inner_bags: Vec<Vec<TermInnerBag>> = Vec::with_capacity(terms.len());
        for term in &terms {
            let bins = term.tensor_bin_count().max(1);
            let mut per_bag = Vec::with_capacity(bag_count);
            for bag in &bag_weights {
                let mut counts = vec![0u64; bins];
                let mut weights = vec![0.0f64; bins];
                for sample in 0..sample_count {
                    let bin = self.tensor_bin(term, sample);
                    if bag[sample] != 0.0 {
                        counts[bin] += 1;
                    }
                    weights[bin] += bag[sample];
                }
                per_bag.push(TermInnerBag::new(counts, weights));
            }
            term_inner_bags.push(per_bag);
        }
        let bag_weight_totals: Vec<f64> =
            bag_weights.iter().map(|bag| bag.iter().sum()).collect();

        // carve the samples into subsets
        let subset_sizes = self
            .subset_sizes
            .clone()
            .unwrap_or_else(|| if sample_count == 0 { vec![] } else { vec![sample_count] });
        assert_eq!(subset_sizes.iter().sum::<usize>(), sample_count);

        let mut subsets = Vec::with_capacity(subset_sizes.len());
        let mut offset = 0;
        for &size in &subset_sizes {
            let range = offset..offset + size;
            let values = &self.grad_hess[range.start * per_sample..range.end * per_sample];
            let storage = match self.float_width {
                FloatWidth::F32 => {
                    GradHessStorage::F32(values.iter().map(|&v| v as f32).collect())
                }
                FloatWidth::F64 => GradHessStorage::F64(values.to_vec()),
            };
            let weights: Vec<Vec<f64>> =
                bag_weights.iter().map(|bag| bag[range.clone()].to_vec()).collect();
            let mut subset = DataSubset::new(
                size,
                self.score_count,
                self.hessian,
                storage,
                self.uint_width,
                self.simd_pack,
                weights,
                terms.len(),
            );
            for (term_index, term) in terms.iter().enumerate() {
                let bins: Vec<usize> =
                    range.clone().map(|sample| self.tensor_bin(term, sample)).collect();
                subset.set_term_data(term_index, term, &bins);
            }
            subsets.push(subset);
            offset += size;
        }

        let training_set = TrainingSet::new(subsets, term_inner_bags, bag_weight_totals);
        let core = BoosterCore::new(
            self.score_count,
            self.hessian,
            features,
            terms,
            training_set,
            self.inner_bag_count,
            self.constants,
        );
        BoosterShell::new(core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assembles_shell() {
        let shell = DatasetBuilder::new(1, true)
            .feature(3, vec![0, 1, 2, 1])
            .term(vec![0])
            .grad_hess(vec![1.0, 1.0, -1.0, 1.0, 2.0, 1.0, 0.5, 1.0])
            .build()
            .unwrap();
        assert_eq!(shell.core().term_count(), 1);
        assert_eq!(shell.core().training_set().sample_count(), 4);
        let bag = shell.core().training_set().term_inner_bag(0, 0);
        assert_eq!(bag.counts(false), &[1, 2, 1]);
    }

    #[test]
    fn test_builder_splits_subsets() {
        let shell = DatasetBuilder::new(1, false)
            .feature(2, vec![0, 1, 0, 1])
            .term(vec![0])
            .grad_hess(vec![1.0, -1.0, 2.0, -2.0])
            .subset_sizes(vec![2, 2])
            .build()
            .unwrap();
        let subsets = shell.core().training_set().subsets();
        assert_eq!(subsets.len(), 2);
        assert_eq!(subsets[0].sample_count(), 2);
        assert_eq!(subsets[1].bag_weights(0), &[1.0, 1.0]);
    }
}
