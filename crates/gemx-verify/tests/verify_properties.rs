//! Property tests for the reference verifier.
//!
//! 1. **Self-consistency**: the reference output always verifies as `Match`.
//! 2. **Single-element perturbation**: flipping one element is reported at
//!    exactly that position with a count of one.
//! 3. **Small-range agreement**: for operands small enough that nothing
//!    saturates, the reference equals a naive `i64` product.
//! 4. **Saturation**: every output lies in the `i16` range and equals the
//!    clamped exact value.

use gemx_common::{Matrix, PostScale, QuantizationRule};
use gemx_verify::{MatchResult, Verifier, reference_gemm, reference_values, verify};
use proptest::prelude::*;

fn operands(max: i16) -> impl Strategy<Value = (usize, usize, usize, Vec<i16>, Vec<i16>)> {
    (1usize..6, 1usize..6, 1usize..6).prop_flat_map(move |(m, k, n)| {
        (
            Just(m),
            Just(k),
            Just(n),
            prop::collection::vec(-max..=max, m * k),
            prop::collection::vec(-max..=max, k * n),
        )
    })
}

fn product(a: &Matrix, b: &Matrix) -> Vec<i16> {
    reference_values(a, b, None, PostScale::IDENTITY, QuantizationRule::default()).unwrap()
}

/// Unsaturated dot product of row `i` of `av` (`k` wide) and column `j` of
/// `bv` (`n` wide).
fn exact_dot(av: &[i16], bv: &[i16], k: usize, n: usize, i: usize, j: usize) -> i64 {
    (0..k).map(|l| i64::from(av[i * k + l]) * i64::from(bv[l * n + j])).sum()
}

// ---------------------------------------------------------------------------
// Properties: self-consistency
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_reference_result_matches(
        (m, k, n, av, bv) in operands(i16::MAX),
        scale in -4i32..=4,
        shift in 0u32..20,
    ) {
        let a = Matrix::from_i16(m, k, av).unwrap();
        let b = Matrix::from_i16(k, n, bv).unwrap();
        let post = PostScale::new(scale, shift);
        let c = reference_gemm(&a, &b, None, post, QuantizationRule::default()).unwrap();
        prop_assert_eq!(verify(&c, &a, &b, None, scale, shift, 0).unwrap(), MatchResult::Match);
    }

    #[test]
    fn prop_single_perturbation_is_located(
        (m, k, n, av, bv) in operands(50),
        pick in any::<prop::sample::Index>(),
    ) {
        let a = Matrix::from_i16(m, k, av).unwrap();
        let b = Matrix::from_i16(k, n, bv).unwrap();
        let mut values = product(&a, &b);
        let at = pick.index(values.len());
        values[at] = values[at].wrapping_add(1);
        let expected = values[at].wrapping_sub(1);
        let c = Matrix::from_i16(m, n, values).unwrap();

        let result = Verifier::default().verify(&c, &a, &b, None, PostScale::IDENTITY).unwrap();
        prop_assert_eq!(
            result,
            MatchResult::Mismatch {
                count: 1,
                first_index: (at / n, at % n),
                expected,
                actual: expected.wrapping_add(1),
            }
        );
    }
}

// ---------------------------------------------------------------------------
// Properties: arithmetic
// ---------------------------------------------------------------------------

proptest! {
    // k <= 5, so |sum| <= 5 * 80^2 = 32000 stays inside i16
    #[test]
    fn prop_small_operands_match_naive_product((m, k, n, av, bv) in operands(80)) {
        let a = Matrix::from_i16(m, k, av.clone()).unwrap();
        let b = Matrix::from_i16(k, n, bv.clone()).unwrap();
        let got = product(&a, &b);
        for i in 0..m {
            for j in 0..n {
                let naive = exact_dot(&av, &bv, k, n, i, j);
                prop_assert_eq!(i64::from(got[i * n + j]), naive);
            }
        }
    }

    #[test]
    fn prop_output_is_clamped_exact_value((m, k, n, av, bv) in operands(i16::MAX)) {
        let a = Matrix::from_i16(m, k, av.clone()).unwrap();
        let b = Matrix::from_i16(k, n, bv.clone()).unwrap();
        let got = product(&a, &b);
        for i in 0..m {
            for j in 0..n {
                let exact = exact_dot(&av, &bv, k, n, i, j);
                let clamped = exact.clamp(i64::from(i16::MIN), i64::from(i16::MAX));
                prop_assert_eq!(i64::from(got[i * n + j]), clamped);
            }
        }
    }
}
