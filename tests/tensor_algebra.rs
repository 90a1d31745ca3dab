//! Integration tests for the segmented tensor algebra.

use approx::assert_abs_diff_eq;
use proptest::collection::btree_set;
use proptest::prelude::*;
use segboost::SegmentedTensor;

/// Build a one-dimensional tensor from its divisions and segment values.
fn one_dim(divisions: &[usize], values: &[f64]) -> SegmentedTensor {
    assert_eq!(divisions.len() + 1, values.len());
    let mut tensor = SegmentedTensor::new(1, 1).unwrap();
    tensor.set_division_count(0, divisions.len()).unwrap();
    tensor.divisions_mut(0).copy_from_slice(divisions);
    tensor.ensure_value_capacity(values.len()).unwrap();
    tensor.values_mut().copy_from_slice(values);
    tensor
}

/// Build a two-dimensional tensor (dimension 0 varies fastest in
/// `values`).
fn two_dim(divs0: &[usize], divs1: &[usize], values: &[f64]) -> SegmentedTensor {
    assert_eq!((divs0.len() + 1) * (divs1.len() + 1), values.len());
    let mut tensor = SegmentedTensor::new(2, 1).unwrap();
    tensor.set_division_count(0, divs0.len()).unwrap();
    tensor.divisions_mut(0).copy_from_slice(divs0);
    tensor.set_division_count(1, divs1.len()).unwrap();
    tensor.divisions_mut(1).copy_from_slice(divs1);
    tensor.ensure_value_capacity(values.len()).unwrap();
    tensor.values_mut().copy_from_slice(values);
    tensor
}

/// Dense value at `coord` of a one-dimensional tensor.
fn value_at(divisions: &[usize], values: &[f64], coord: usize) -> f64 {
    let segment = divisions.partition_point(|&division| division < coord);
    values[segment]
}

#[test]
fn union_of_cuts_merges_divisions_and_sums_values() {
    let mut a = one_dim(&[2], &[10.0, 20.0]);
    let b = one_dim(&[5], &[1.0, 2.0]);
    a.add(&b).unwrap();
    assert_eq!(a.divisions(0), &[2, 5]);
    assert_eq!(a.values(), &[11.0, 21.0, 22.0]);
}

#[test]
fn two_dimensional_union_uses_dimension_zero_fastest_layout() {
    let mut a = two_dim(&[1], &[], &[1.0, 2.0]);
    let b = two_dim(&[], &[3], &[10.0, 20.0]);
    a.add(&b).unwrap();
    assert_eq!(a.divisions(0), &[1]);
    assert_eq!(a.divisions(1), &[3]);
    assert_eq!(a.values(), &[11.0, 12.0, 21.0, 22.0]);
}

#[test]
fn expansion_repeats_segment_values_over_their_bins() {
    let mut tensor = one_dim(&[1], &[7.0, 9.0]);
    tensor.expand(&[4]).unwrap();
    assert!(tensor.is_expanded());
    assert_eq!(tensor.divisions(0), &[0, 1, 2]);
    assert_eq!(tensor.values(), &[7.0, 7.0, 9.0, 9.0]);
}

#[test]
fn expansion_matches_pointwise_evaluation() {
    let divisions = [0usize, 3, 7];
    let values = [1.0, -2.0, 4.0, 0.5];
    let mut tensor = one_dim(&divisions, &values);
    tensor.expand(&[10]).unwrap();
    for coord in 0..10 {
        assert_abs_diff_eq!(tensor.values()[coord], value_at(&divisions, &values, coord));
    }
}

#[test]
fn expanded_add_equals_dense_elementwise_sum() {
    let a_divisions = [1usize, 4];
    let a_values = [1.0, 2.0, 3.0];
    let b_divisions = [2usize];
    let b_values = [10.0, 20.0];

    let mut a = one_dim(&a_divisions, &a_values);
    a.expand(&[6]).unwrap();
    let mut b = one_dim(&b_divisions, &b_values);
    b.expand(&[6]).unwrap();
    a.add(&b).unwrap();

    for coord in 0..6 {
        let expected = value_at(&a_divisions, &a_values, coord)
            + value_at(&b_divisions, &b_values, coord);
        assert_abs_diff_eq!(a.values()[coord], expected);
    }
}

#[test]
fn add_expanded_accepts_dense_source() {
    let mut tensor = one_dim(&[1], &[7.0, 9.0]);
    tensor.expand(&[4]).unwrap();
    tensor.add_expanded(&[0.5, 1.0, 1.5, 2.0]);
    assert_eq!(tensor.values(), &[7.5, 8.0, 10.5, 11.0]);
}

#[test]
fn copy_after_reset_round_trips() {
    let original = one_dim(&[3, 8], &[0.25, -1.0, 2.0]);
    let mut copy = SegmentedTensor::new(1, 1).unwrap();
    copy.copy_from(&original).unwrap();
    assert!(copy.is_equal(&original));

    copy.reset();
    let fresh = SegmentedTensor::new(1, 1).unwrap();
    assert!(copy.is_equal(&fresh));

    copy.copy_from(&original).unwrap();
    assert!(copy.is_equal(&original));
}

#[test]
fn multiply_detects_poisoned_scale() {
    let mut tensor = one_dim(&[2], &[3.0, -1.5]);
    assert!(!tensor.multiply_and_check_for_issues(2.0));
    assert_eq!(tensor.values(), &[6.0, -3.0]);
    assert!(tensor.multiply_and_check_for_issues(f64::INFINITY));
}

// ----------------------------------------------------------------------------
// Property tests
// ----------------------------------------------------------------------------

/// Strategy: a one-dimensional tensor over coordinates `0..40` with up
/// to 6 divisions. Divisions only ever cut between existing
/// coordinates, so they stay below 39.
fn arb_one_dim() -> impl Strategy<Value = (Vec<usize>, Vec<f64>)> {
    btree_set(0usize..39, 0..6).prop_flat_map(|divisions| {
        let divisions: Vec<usize> = divisions.into_iter().collect();
        let segment_count = divisions.len() + 1;
        (
            Just(divisions),
            proptest::collection::vec(-100.0f64..100.0, segment_count..=segment_count),
        )
    })
}

proptest! {
    #[test]
    fn prop_add_is_structurally_commutative(
        (a_divs, a_vals) in arb_one_dim(),
        (b_divs, b_vals) in arb_one_dim(),
    ) {
        let mut ab = one_dim(&a_divs, &a_vals);
        ab.add(&one_dim(&b_divs, &b_vals)).unwrap();
        let mut ba = one_dim(&b_divs, &b_vals);
        ba.add(&one_dim(&a_divs, &a_vals)).unwrap();

        prop_assert_eq!(ab.divisions(0), ba.divisions(0));
        for (x, y) in ab.values().iter().zip(ba.values()) {
            prop_assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_add_divisions_stay_strictly_increasing(
        (a_divs, a_vals) in arb_one_dim(),
        (b_divs, b_vals) in arb_one_dim(),
    ) {
        let mut sum = one_dim(&a_divs, &a_vals);
        sum.add(&one_dim(&b_divs, &b_vals)).unwrap();
        prop_assert!(sum.divisions(0).windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(sum.total_score_count(), sum.division_count(0) + 1);
    }

    #[test]
    fn prop_add_is_associative_within_tolerance(
        (a_divs, a_vals) in arb_one_dim(),
        (b_divs, b_vals) in arb_one_dim(),
        (c_divs, c_vals) in arb_one_dim(),
    ) {
        // (a + b) + c
        let mut left = one_dim(&a_divs, &a_vals);
        left.add(&one_dim(&b_divs, &b_vals)).unwrap();
        left.add(&one_dim(&c_divs, &c_vals)).unwrap();

        // a + (b + c)
        let mut bc = one_dim(&b_divs, &b_vals);
        bc.add(&one_dim(&c_divs, &c_vals)).unwrap();
        let mut right = one_dim(&a_divs, &a_vals);
        right.add(&bc).unwrap();

        prop_assert_eq!(left.divisions(0), right.divisions(0));
        for (x, y) in left.values().iter().zip(right.values()) {
            prop_assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_add_matches_pointwise_sum(
        (a_divs, a_vals) in arb_one_dim(),
        (b_divs, b_vals) in arb_one_dim(),
    ) {
        let mut sum = one_dim(&a_divs, &a_vals);
        sum.add(&one_dim(&b_divs, &b_vals)).unwrap();
        let sum_divs: Vec<usize> = sum.divisions(0).to_vec();
        let sum_vals: Vec<f64> = sum.values().to_vec();
        for coord in 0..42 {
            let expected = value_at(&a_divs, &a_vals, coord) + value_at(&b_divs, &b_vals, coord);
            let actual = value_at(&sum_divs, &sum_vals, coord);
            prop_assert!((actual - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_expand_preserves_pointwise_values(
        (divs, vals) in arb_one_dim(),
    ) {
        let mut tensor = one_dim(&divs, &vals);
        tensor.expand(&[40]).unwrap();
        prop_assert!(tensor.is_expanded());
        prop_assert_eq!(tensor.total_score_count(), 40);
        for coord in 0..40 {
            let expected = value_at(&divs, &vals, coord);
            prop_assert!((tensor.values()[coord] - expected).abs() < 1e-12);
        }
    }
}
