//! Per-row inverse Gram matrices.
use crate::constraint::{ConstraintError, ConstraintSettings, DegenerateRowPolicy};
use crate::dense::{invert_gram, SingularMatrix};
use crate::nullspace::NullSpaceSet;
use emin_sparse::DistSparsityPattern;
use emin_traits::Real;
use log::{debug, warn};
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut};
use rayon::prelude::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RowFactorStatus {
    /// The row has a valid inverse Gram matrix.
    Valid,
    /// The row has no entries or its Gram matrix is singular. Its factor is zero.
    Degenerate,
}

/// Inverse Gram matrices `(X_i X_i^T)^{-1}` for every row `i` of a sparsity pattern, where
/// `X_i` is the restriction of the near-null-space vectors to the columns of row `i`.
///
/// The factors are stored in a single arena of `num_rows * d * d` scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorTable<T> {
    dim: usize,
    data: Vec<T>,
    status: Vec<RowFactorStatus>,
}

struct RowWorkspace<T: Real> {
    l: DMatrix<T>,
    gram: DMatrix<T>,
}

impl<T: Real> RowWorkspace<T> {
    fn new(dim: usize, max_row_nnz: usize) -> Self {
        Self {
            l: DMatrix::zeros(dim, max_row_nnz),
            gram: DMatrix::zeros(dim, dim),
        }
    }
}

impl<T: Real> FactorTable<T> {
    /// Forms and inverts the Gram matrix of every row of `pattern`.
    ///
    /// The local column indices of `pattern` index into `null_space`.
    pub fn build(
        null_space: &NullSpaceSet<T>,
        pattern: &DistSparsityPattern,
        settings: &ConstraintSettings,
    ) -> Result<Self, ConstraintError> {
        let dim = null_space.dim();
        let num_rows = pattern.num_local_rows();
        if pattern.col_map().num_local() != null_space.len() {
            return Err(ConstraintError::NullSpaceLengthMismatch {
                expected: pattern.col_map().num_local(),
                actual: null_space.len(),
            });
        }
        if dim == 0 {
            return Err(ConstraintError::EmptyNullSpace);
        }

        let tolerance = T::from_f64(settings.pivot_tolerance).ok_or(ConstraintError::InvalidSettings)?;
        let max_row_nnz = pattern.max_row_nnz();
        let mut data = vec![T::zero(); num_rows * dim * dim];
        let mut status = vec![RowFactorStatus::Valid; num_rows];

        data.par_chunks_mut(dim * dim)
            .zip(status.par_iter_mut())
            .enumerate()
            .try_for_each_init(
                || RowWorkspace::new(dim, max_row_nnz),
                |ws, (row, (factor, row_status))| {
                    let factor = DMatrixViewMut::from_slice(factor, dim, dim);
                    let columns = pattern.local_row(row);
                    match compute_row_factor(ws, null_space, columns, factor, tolerance) {
                        Ok(()) => Ok(()),
                        Err(_) if settings.degenerate_rows == DegenerateRowPolicy::PassThrough => {
                            *row_status = RowFactorStatus::Degenerate;
                            Ok(())
                        }
                        Err(err) => Err(ConstraintError::SingularGramMatrix {
                            row,
                            dim,
                            relative_pivot: err.relative_pivot,
                        }),
                    }
                },
            )?;

        let table = Self { dim, data, status };
        let num_degenerate = table.num_degenerate_rows();
        if num_degenerate > 0 {
            warn!(
                "{} of {} rows have an empty or singular Gram matrix and will not be projected",
                num_degenerate, num_rows
            );
        }
        debug!(
            "Built constraint factors for {} rows with {} near-null-space vectors (max row nnz {})",
            num_rows, dim, max_row_nnz
        );
        Ok(table)
    }

    /// The number of near-null-space vectors, i.e. the dimension of each factor.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_rows(&self) -> usize {
        self.status.len()
    }

    pub fn status(&self, row: usize) -> RowFactorStatus {
        self.status[row]
    }

    pub fn num_degenerate_rows(&self) -> usize {
        self.status
            .iter()
            .filter(|s| **s == RowFactorStatus::Degenerate)
            .count()
    }

    /// The inverse Gram matrix of the given row, or `None` if the row is degenerate.
    pub fn factor(&self, row: usize) -> Option<DMatrixView<T>> {
        match self.status[row] {
            RowFactorStatus::Valid => {
                let dd = self.dim * self.dim;
                let slice = &self.data[row * dd..(row + 1) * dd];
                Some(DMatrixView::from_slice(slice, self.dim, self.dim))
            }
            RowFactorStatus::Degenerate => None,
        }
    }
}

/// Computes the inverse Gram matrix of a single row into `factor`.
///
/// On failure the factor is left zeroed.
fn compute_row_factor<T: Real>(
    ws: &mut RowWorkspace<T>,
    null_space: &NullSpaceSet<T>,
    columns: &[usize],
    mut factor: DMatrixViewMut<T>,
    tolerance: T,
) -> Result<(), SingularMatrix> {
    let dim = null_space.dim();
    let n = columns.len();

    if dim == 1 {
        let sum_of_squares = columns
            .iter()
            .map(|&j| null_space.values(j)[0])
            .fold(T::zero(), |acc, x| acc + x * x);
        ws.gram[(0, 0)] = sum_of_squares;
    } else {
        null_space.gather_into(ws.l.columns_mut(0, n), columns);
        // gram = L L^T, accumulated as a sum of rank-one updates
        ws.gram.fill(T::zero());
        for l_j in ws.l.columns(0, n).column_iter() {
            ws.gram.ger(T::one(), &l_j, &l_j, T::one());
        }
    }

    let result = invert_gram(DMatrixView::from(&ws.gram), DMatrixViewMut::from(&mut factor), tolerance);
    if result.is_err() {
        factor.fill(T::zero());
    }
    result
}
