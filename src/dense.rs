//! Small dense kernels used by the per-row constraint projection.
use emin_traits::Real;
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut};
use std::error::Error;
use std::fmt;

/// A Gram matrix was found to be singular to working precision.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SingularMatrix {
    /// Dimension of the matrix.
    pub dim: usize,
    /// Ratio of the smallest to the largest pivot magnitude of the LU factorization of the
    /// matrix scaled to unit diagonal.
    pub relative_pivot: f64,
}

impl fmt::Display for SingularMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} matrix is singular to working precision (relative pivot {:e})",
            self.dim, self.dim, self.relative_pivot
        )
    }
}

impl Error for SingularMatrix {}

/// Inverts the symmetric positive semi-definite matrix `gram`, storing the inverse in `inverse`.
///
/// For a `1x1` matrix the inverse is the reciprocal, and only an exactly zero entry is
/// considered singular. Larger matrices are first scaled to unit diagonal,
/// $S = D^{-1/2} G D^{-1/2}$, so that the test does not depend on the magnitude of the
/// individual near-null-space vectors. $S$ is factorized by LU decomposition with partial
/// pivoting, and is considered singular if its smallest pivot magnitude is not larger than
/// `pivot_tolerance` times the largest. A zero on the diagonal of $G$ is always singular.
///
/// # Panics
///
/// Panics if the matrices are not square or do not have the same dimensions.
pub fn invert_gram<T: Real>(
    gram: DMatrixView<T>,
    mut inverse: DMatrixViewMut<T>,
    pivot_tolerance: T,
) -> Result<(), SingularMatrix> {
    let d = gram.nrows();
    assert_eq!(gram.ncols(), d, "Gram matrix must be square");
    assert_eq!(inverse.shape(), (d, d), "Output must have the same shape as the input");

    if d == 1 {
        let value = gram[(0, 0)];
        if value == T::zero() {
            return Err(SingularMatrix {
                dim: 1,
                relative_pivot: 0.0,
            });
        }
        inverse[(0, 0)] = T::one() / value;
        return Ok(());
    }

    // A vector that vanishes on every index gives a zero row and column
    if gram.diagonal().iter().any(|&g_kk| !(g_kk > T::zero())) {
        return Err(SingularMatrix {
            dim: d,
            relative_pivot: 0.0,
        });
    }
    let scale = gram.diagonal().map(|g_kk| g_kk.sqrt());
    let scaled = DMatrix::from_fn(d, d, |i, j| gram[(i, j)] / (scale[i] * scale[j]));

    let lu = scaled.lu();
    let pivots = lu.u().diagonal().map(|u_ii| u_ii.abs());
    let max_pivot = pivots.max();
    let relative_pivot = if max_pivot > T::zero() {
        pivots.min() / max_pivot
    } else {
        T::zero()
    };

    let singular = || SingularMatrix {
        dim: d,
        relative_pivot: nalgebra::try_convert(relative_pivot).unwrap_or(f64::NAN),
    };
    if relative_pivot <= pivot_tolerance {
        return Err(singular());
    }

    // G^{-1} = D^{-1/2} S^{-1} D^{-1/2}
    let scaled_inverse = lu.try_inverse().ok_or_else(singular)?;
    for j in 0..d {
        for i in 0..d {
            inverse[(i, j)] = scaled_inverse[(i, j)] / (scale[i] * scale[j]);
        }
    }
    Ok(())
}
