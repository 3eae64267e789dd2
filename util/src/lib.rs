//! Helpers shared by the tests and benchmarks of the workspace.
use nalgebra::DMatrix;
use nalgebra_sparse::pattern::SparsityPattern;

/// The pattern of a smoothed-aggregation prolongator for `num_fine` points grouped into
/// consecutive aggregates of `aggregate_size` points.
///
/// Fine point `i` couples to its own aggregate and to the aggregates of its neighbors
/// `i - 1` and `i + 1`, which is the pattern of `(I - A) P_tent` for a 1D Laplacian `A`.
pub fn smoothed_aggregation_pattern(num_fine: usize, aggregate_size: usize) -> SparsityPattern {
    assert!(aggregate_size > 0);
    let num_coarse = (num_fine + aggregate_size - 1) / aggregate_size;
    let mut offsets = vec![0];
    let mut indices = Vec::new();
    for i in 0..num_fine {
        let first = i.saturating_sub(1) / aggregate_size;
        let last = usize::min(i + 1, num_fine - 1) / aggregate_size;
        indices.extend(first..=last);
        offsets.push(indices.len());
    }
    SparsityPattern::try_from_offsets_and_indices(num_fine, num_coarse, offsets, indices)
        .expect("Pattern is sorted and in bounds by construction")
}

/// A `n x d` matrix whose columns are the monomials `1, x, x^2, ...` sampled at `n`
/// equidistant points `x_j` in `[-1, 1]`.
pub fn monomial_modes(n: usize, d: usize) -> DMatrix<f64> {
    let h = if n > 1 { 2.0 / (n - 1) as f64 } else { 0.0 };
    DMatrix::from_fn(n, d, |j, k| (j as f64 * h - 1.0).powi(k as i32))
}
