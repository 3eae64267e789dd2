//! Row-distributed CSR matrices.
use crate::import::{ImportError, Importer};
use crate::map::IndexMap;
use crate::multivector::MultiVector;
use emin_traits::comm::Communicator;
use emin_traits::Real;
use nalgebra::{DMatrix, Scalar};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num::Zero;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistMatrixError {
    /// The local matrix dimensions do not agree with the row or column map.
    DimensionMismatch {
        local_rows: usize,
        local_cols: usize,
        row_map_len: usize,
        col_map_len: usize,
    },
    /// A row refers to a global column index that is not part of the column map.
    ColumnNotInMap { row: usize, global_col: usize },
    /// The number of values passed to a row does not match the number of stored entries.
    RowLengthMismatch { row: usize, expected: usize, actual: usize },
    /// The row index is out of bounds.
    RowOutOfBounds { row: usize, num_rows: usize },
}

impl fmt::Display for DistMatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch {
                local_rows,
                local_cols,
                row_map_len,
                col_map_len,
            } => write!(
                f,
                "local matrix is {}x{}, but row map has {} and column map has {} local indices",
                local_rows, local_cols, row_map_len, col_map_len
            ),
            Self::ColumnNotInMap { row, global_col } => write!(
                f,
                "row {} references global column {}, which is not in the column map",
                row, global_col
            ),
            Self::RowLengthMismatch { row, expected, actual } => write!(
                f,
                "row {} stores {} entries, but {} values were given",
                row, expected, actual
            ),
            Self::RowOutOfBounds { row, num_rows } => {
                write!(f, "row {} out of bounds for matrix with {} local rows", row, num_rows)
            }
        }
    }
}

impl Error for DistMatrixError {}

/// The sparsity structure of a row-distributed matrix: a local pattern together with
/// the maps that give its rows and columns a global identity.
#[derive(Debug, Clone, PartialEq)]
pub struct DistSparsityPattern {
    row_map: Arc<IndexMap>,
    col_map: Arc<IndexMap>,
    pattern: SparsityPattern,
}

impl DistSparsityPattern {
    pub fn try_new(
        row_map: Arc<IndexMap>,
        col_map: Arc<IndexMap>,
        pattern: SparsityPattern,
    ) -> Result<Self, DistMatrixError> {
        check_dimensions(&row_map, &col_map, pattern.major_dim(), pattern.minor_dim())?;
        Ok(Self {
            row_map,
            col_map,
            pattern,
        })
    }

    pub fn row_map(&self) -> &Arc<IndexMap> {
        &self.row_map
    }

    pub fn col_map(&self) -> &Arc<IndexMap> {
        &self.col_map
    }

    pub fn local(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn num_local_rows(&self) -> usize {
        self.pattern.major_dim()
    }

    /// Local column indices of the given local row.
    pub fn local_row(&self, row: usize) -> &[usize] {
        self.pattern.lane(row)
    }

    /// The largest number of entries in any local row.
    pub fn max_row_nnz(&self) -> usize {
        self.pattern
            .major_offsets()
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap_or(0)
    }
}

/// A sparse matrix whose rows are distributed across processes.
///
/// Each process stores the rows listed in its row map as a local CSR matrix whose column
/// indices refer to the local numbering of the column map.
#[derive(Debug, Clone, PartialEq)]
pub struct DistCsrMatrix<T> {
    row_map: Arc<IndexMap>,
    col_map: Arc<IndexMap>,
    local: CsrMatrix<T>,
}

fn check_dimensions(
    row_map: &IndexMap,
    col_map: &IndexMap,
    local_rows: usize,
    local_cols: usize,
) -> Result<(), DistMatrixError> {
    if local_rows != row_map.num_local() || local_cols != col_map.num_local() {
        Err(DistMatrixError::DimensionMismatch {
            local_rows,
            local_cols,
            row_map_len: row_map.num_local(),
            col_map_len: col_map.num_local(),
        })
    } else {
        Ok(())
    }
}

impl<T> DistCsrMatrix<T> {
    pub fn try_new(
        row_map: Arc<IndexMap>,
        col_map: Arc<IndexMap>,
        local: CsrMatrix<T>,
    ) -> Result<Self, DistMatrixError> {
        check_dimensions(&row_map, &col_map, local.nrows(), local.ncols())?;
        Ok(Self {
            row_map,
            col_map,
            local,
        })
    }

    /// Wraps a matrix owned entirely by a single process, with identity row and column maps.
    pub fn from_serial(local: CsrMatrix<T>) -> Self {
        Self {
            row_map: Arc::new(IndexMap::serial(local.nrows())),
            col_map: Arc::new(IndexMap::serial(local.ncols())),
            local,
        }
    }

    pub fn row_map(&self) -> &Arc<IndexMap> {
        &self.row_map
    }

    pub fn col_map(&self) -> &Arc<IndexMap> {
        &self.col_map
    }

    pub fn local(&self) -> &CsrMatrix<T> {
        &self.local
    }

    pub fn num_local_rows(&self) -> usize {
        self.local.nrows()
    }

    pub fn into_local(self) -> CsrMatrix<T> {
        self.local
    }

    /// Local column indices and values stored in the given local row.
    ///
    /// # Panics
    ///
    /// Panics if the row index is out of bounds.
    pub fn local_row_view(&self, row: usize) -> (&[usize], &[T]) {
        let offsets = self.local.row_offsets();
        let range = offsets[row]..offsets[row + 1];
        (&self.local.col_indices()[range.clone()], &self.local.values()[range])
    }

    /// Row offsets, local column indices and mutable values of the local matrix.
    ///
    /// The structure of the matrix can not be altered through this view.
    pub fn csr_data_mut(&mut self) -> (&[usize], &[usize], &mut [T]) {
        self.local.csr_data_mut()
    }

    pub fn pattern(&self) -> DistSparsityPattern {
        DistSparsityPattern {
            row_map: self.row_map.clone(),
            col_map: self.col_map.clone(),
            pattern: self.local.pattern().clone(),
        }
    }
}

impl<T: Scalar> DistCsrMatrix<T> {
    /// Replaces the values stored in a row, in the order of the row's column indices.
    ///
    /// The structure of the row is left untouched.
    pub fn replace_local_values(&mut self, row: usize, values: &[T]) -> Result<(), DistMatrixError> {
        let num_rows = self.local.nrows();
        let mut csr_row = self
            .local
            .get_row_mut(row)
            .ok_or(DistMatrixError::RowOutOfBounds { row, num_rows })?;
        let row_values = csr_row.values_mut();
        if row_values.len() != values.len() {
            return Err(DistMatrixError::RowLengthMismatch {
                row,
                expected: row_values.len(),
                actual: values.len(),
            });
        }
        row_values.clone_from_slice(values);
        Ok(())
    }
}

impl<T: Real> DistCsrMatrix<T> {
    /// Assembles a matrix from rows given in global column indices.
    ///
    /// Row `i` of `rows` is the local row `i`. Duplicate entries are summed. Explicitly
    /// stored zeros remain part of the structure.
    pub fn try_from_global_rows(
        row_map: Arc<IndexMap>,
        col_map: Arc<IndexMap>,
        rows: &[Vec<(usize, T)>],
    ) -> Result<Self, DistMatrixError> {
        let num_rows = row_map.num_local();
        if rows.len() != num_rows {
            return Err(DistMatrixError::DimensionMismatch {
                local_rows: rows.len(),
                local_cols: col_map.num_local(),
                row_map_len: num_rows,
                col_map_len: col_map.num_local(),
            });
        }

        let mut coo = CooMatrix::new(num_rows, col_map.num_local());
        for (i, row) in rows.iter().enumerate() {
            for &(global_col, value) in row {
                let local_col = col_map
                    .local_index(global_col)
                    .ok_or(DistMatrixError::ColumnNotInMap { row: i, global_col })?;
                coo.push(i, local_col, value);
            }
        }

        let local = CsrMatrix::from(&coo);
        Self::try_new(row_map, col_map, local)
    }

    /// Computes `Y = A X` for a multivector `X` distributed according to `domain_map`
    /// (the map of `x`).
    ///
    /// `x` is first imported into the column map of the matrix. The result lives on the
    /// row map.
    pub fn apply(&self, x: &MultiVector<T>, comm: &impl Communicator) -> Result<MultiVector<T>, ImportError> {
        let x_col = if x.map().is_same_as(&self.col_map, comm) {
            x.clone()
        } else {
            Importer::new(x.map().clone(), self.col_map.clone(), comm)?.import_new(x)?
        };

        let mut y = DMatrix::zeros(self.local.nrows(), x.num_vectors());
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(&self.local), Op::NoOp(x_col.data()));
        MultiVector::try_from_data(self.row_map.clone(), y).map_err(|_| ImportError::MapMismatch)
    }
}

impl<T: Scalar + Zero> DistCsrMatrix<T> {
    /// Creates a matrix with the given structure and all values set to zero.
    pub fn zeros_with_pattern(pattern: DistSparsityPattern) -> Self {
        let nnz = pattern.local().nnz();
        let DistSparsityPattern {
            row_map,
            col_map,
            pattern,
        } = pattern;
        let local = CsrMatrix::try_from_pattern_and_values(pattern, vec![T::zero(); nnz])
            .expect("Number of values always matches the number of entries in the pattern");
        Self {
            row_map,
            col_map,
            local,
        }
    }
}
