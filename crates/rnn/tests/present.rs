//! Properties of present-map reduction and expansion.

use proptest::prelude::*;
use seqnet_core::Tensor;
use seqnet_rnn::present::{expand_rows, reduce_rows};
use seqnet_rnn::{PresentMap, State, StateGrad, VecState, VecStateGrad};

/// A superset map `q`, a subset `p ⊆ q`, a row size and packed rows for `q`.
fn nested_maps() -> impl Strategy<Value = (PresentMap, PresentMap, usize, Vec<f32>)> {
    (1usize..10, 1usize..4).prop_flat_map(|(n, row)| {
        (
            prop::collection::vec(any::<bool>(), n),
            prop::collection::vec(any::<bool>(), n),
            Just(row),
        )
            .prop_flat_map(|(q, mask, row)| {
                let p: Vec<bool> = q.iter().zip(&mask).map(|(&a, &b)| a && b).collect();
                let rows = q.iter().filter(|&&b| b).count();
                (
                    Just(PresentMap::new(q)),
                    Just(PresentMap::new(p)),
                    Just(row),
                    prop::collection::vec(-10.0f32..10.0, rows * row),
                )
            })
    })
}

proptest! {
    #[test]
    fn prop_reduce_then_expand_zeroes_dropped_rows((q, p, row, packed) in nested_maps()) {
        let packed = Tensor::from(packed);
        let reduced = reduce_rows(&packed, &q, &p, row);
        prop_assert_eq!(reduced.len(), p.count() * row);

        let expanded = expand_rows(&reduced, &p, &q, row);
        prop_assert_eq!(expanded.len(), packed.len());

        let mut packed_row = 0;
        for i in 0..q.len() {
            if !q.is_present(i) {
                continue;
            }
            let got = &expanded.data[packed_row * row..(packed_row + 1) * row];
            let original = &packed.data[packed_row * row..(packed_row + 1) * row];
            if p.is_present(i) {
                prop_assert_eq!(got, original);
            } else {
                prop_assert!(got.iter().all(|&v| v == 0.0));
            }
            packed_row += 1;
        }
    }

    #[test]
    fn prop_state_reduce_matches_grad_expand((q, p, row, packed) in nested_maps()) {
        let state = VecState::new(Tensor::from(packed.clone()), row, q.clone());
        let reduced = state.reduce(&p);
        prop_assert_eq!(reduced.present(), p.clone());

        let reduced = reduced.as_any().downcast_ref::<VecState>().unwrap();
        let grad = VecStateGrad::new(reduced.vector.clone(), row, p.clone());
        let expanded = grad.expand(&q);
        prop_assert_eq!(expanded.present(), q.clone());

        let expanded = expanded.as_any().downcast_ref::<VecStateGrad>().unwrap();
        prop_assert_eq!(
            expanded.vector.clone(),
            expand_rows(&reduce_rows(&Tensor::from(packed), &q, &p, row), &p, &q, row)
        );
    }
}

#[test]
fn test_identity_reduction() {
    let q = PresentMap::new(vec![true, false, true]);
    let packed = Tensor::from(vec![1.0, 2.0]);
    assert_eq!(reduce_rows(&packed, &q, &q, 1), packed);
    assert_eq!(expand_rows(&packed, &q, &q, 1), packed);
}
