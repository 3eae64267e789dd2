//! Projection of sparse operators onto the space of operators that preserve a set of
//! near-null-space vectors.
//!
//! Energy-minimizing interpolation computes a prolongation operator $P$ with a fixed sparsity
//! pattern such that the coarse near-null-space vectors $B_c$ are interpolated exactly,
//! $P B_c = B$. Iterative minimization of the energy of $P$ requires every update to satisfy
//! the homogeneous constraint, which decouples into one small problem per row $i$: with
//! $X_i$ the restriction of $B_c$ to the columns of row $i$, the row $p_i$ is replaced by
//!
//! $$ p_i - X_i^T (X_i X_i^T)^{-1} X_i p_i, $$
//!
//! which is orthogonal to every near-null-space vector restricted to the row.
//!
//! [`Constraint::setup`] forms and inverts the Gram matrices $X_i X_i^T$ once, and
//! [`Constraint::apply`] projects any operator sharing the pattern.
use crate::nullspace::NullSpaceSet;
use crate::residual::ResidualError;
use emin_sparse::{Communicator, DistCsrMatrix, DistSparsityPattern, GhostExchange, ImportError, Importer, MultiVector};
use emin_traits::Real;
use log::debug;
use nalgebra::{DMatrix, DMatrixView, DVector, DVectorView};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use thread_local::ThreadLocal;

mod factors;

pub use factors::{FactorTable, RowFactorStatus};

/// Determines how rows with an empty pattern or a singular Gram matrix are treated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DegenerateRowPolicy {
    /// Setup fails with [`ConstraintError::SingularGramMatrix`].
    #[default]
    Fail,
    /// The row is not projected: [`Constraint::apply`] copies its values unmodified.
    PassThrough,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSettings {
    pub degenerate_rows: DegenerateRowPolicy,
    /// Gram matrices whose smallest LU pivot is not larger than this fraction of the largest
    /// pivot are considered singular. Pivots are taken after scaling the Gram matrix to unit
    /// diagonal.
    pub pivot_tolerance: f64,
}

impl Default for ConstraintSettings {
    fn default() -> Self {
        Self {
            degenerate_rows: DegenerateRowPolicy::default(),
            pivot_tolerance: 1e-12,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum ConstraintError {
    /// The row maps of the candidate and the projected operator differ.
    IncompatibleMaps,
    /// The projected operator does not have the sparsity pattern given to setup.
    PatternMismatch,
    /// The Gram matrix of a row is singular and degenerate rows are not permitted.
    SingularGramMatrix { row: usize, dim: usize, relative_pivot: f64 },
    /// The near-null-space data does not have one entry per column of the pattern.
    NullSpaceLengthMismatch { expected: usize, actual: usize },
    /// At least one near-null-space vector is required.
    EmptyNullSpace,
    /// The near-null-space vectors could not be imported into the column map of the pattern.
    Import(ImportError),
    /// The settings can not be represented in the scalar type.
    InvalidSettings,
}

impl fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleMaps => write!(f, "Row maps are incompatible"),
            Self::PatternMismatch => write!(f, "Projected operator does not have the constraint pattern"),
            Self::SingularGramMatrix {
                row,
                dim,
                relative_pivot,
            } => write!(
                f,
                "Gram matrix ({}x{}) of row {} is singular (relative pivot {:e})",
                dim, dim, row, relative_pivot
            ),
            Self::NullSpaceLengthMismatch { expected, actual } => write!(
                f,
                "Near-null-space has {} entries, but the pattern has {} columns",
                actual, expected
            ),
            Self::EmptyNullSpace => write!(f, "At least one near-null-space vector is required"),
            Self::Import(err) => {
                write!(f, "Failed to import near-null-space vectors: ")?;
                err.fmt(f)
            }
            Self::InvalidSettings => write!(f, "Settings can not be represented in the scalar type"),
        }
    }
}

impl Error for ConstraintError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Import(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ImportError> for ConstraintError {
    fn from(err: ImportError) -> Self {
        Self::Import(err)
    }
}

/// Per-thread scratch space for [`Constraint::apply`].
#[derive(Debug)]
struct ProjectionWorkspace<T: Real> {
    /// Dense candidate row, indexed by candidate column. Zero between rows.
    dense_row: Vec<T>,
    l: DMatrix<T>,
    p1: DVector<T>,
    p2: DVector<T>,
    p3: DVector<T>,
}

impl<T: Real> Default for ProjectionWorkspace<T> {
    fn default() -> Self {
        Self {
            dense_row: Vec::new(),
            l: DMatrix::zeros(0, 0),
            p1: DVector::zeros(0),
            p2: DVector::zeros(0),
            p3: DVector::zeros(0),
        }
    }
}

/// The energy-minimization constraint for operators with a fixed sparsity pattern.
#[derive(Debug)]
pub struct Constraint<T: Real> {
    pattern: DistSparsityPattern,
    null_space: NullSpaceSet<T>,
    factors: FactorTable<T>,
    settings: ConstraintSettings,
    workspace: ThreadLocal<RefCell<ProjectionWorkspace<T>>>,
}

impl<T: Real> Constraint<T> {
    /// Sets up the constraint for the given pattern and coarse near-null-space vectors `bc`.
    ///
    /// `bc` is imported into the column map of the pattern, and the inverse Gram matrix of
    /// every row is computed.
    pub fn setup(
        bc: &MultiVector<T>,
        pattern: DistSparsityPattern,
        settings: ConstraintSettings,
        comm: &impl Communicator,
    ) -> Result<Self, ConstraintError> {
        if bc.map().is_same_as(pattern.col_map(), comm) {
            Self::setup_with_null_space(NullSpaceSet::from_multivector(bc), pattern, settings)
        } else {
            let importer = Importer::new(bc.map().clone(), pattern.col_map().clone(), comm)?;
            Self::setup_with_import(bc, pattern, settings, &importer)
        }
    }

    /// Same as [`setup`](Self::setup), but uses the given ghost exchange to bring `bc` into
    /// the column map of the pattern.
    pub fn setup_with_import(
        bc: &MultiVector<T>,
        pattern: DistSparsityPattern,
        settings: ConstraintSettings,
        import: &impl GhostExchange<T>,
    ) -> Result<Self, ConstraintError> {
        if !import.target_map().is_locally_same_as(pattern.col_map()) {
            return Err(ConstraintError::Import(ImportError::MapMismatch));
        }
        let mut x = MultiVector::zeros(pattern.col_map().clone(), bc.num_vectors());
        import.import(bc, &mut x, emin_sparse::CombineMode::Insert)?;
        Self::setup_with_null_space(NullSpaceSet::from_multivector(&x), pattern, settings)
    }

    /// Sets up the constraint from near-null-space data already given in the column
    /// numbering of the pattern.
    pub fn setup_with_null_space(
        null_space: NullSpaceSet<T>,
        pattern: DistSparsityPattern,
        settings: ConstraintSettings,
    ) -> Result<Self, ConstraintError> {
        let factors = FactorTable::build(&null_space, &pattern, &settings)?;
        Ok(Self {
            pattern,
            null_space,
            factors,
            settings,
            workspace: ThreadLocal::new(),
        })
    }

    pub fn pattern(&self) -> &DistSparsityPattern {
        &self.pattern
    }

    pub fn null_space(&self) -> &NullSpaceSet<T> {
        &self.null_space
    }

    pub fn factors(&self) -> &FactorTable<T> {
        &self.factors
    }

    pub fn settings(&self) -> &ConstraintSettings {
        &self.settings
    }

    /// Projects `candidate` onto the constraint space, writing the result into the values of
    /// `projected`.
    ///
    /// `projected` must have the pattern given to setup, and is typically obtained from
    /// [`DistCsrMatrix::zeros_with_pattern`]. Entries of `candidate` outside the pattern are
    /// dropped, and entries of the pattern not stored in `candidate` are treated as zero.
    /// Columns are matched by global index, so the column maps of the two operators may differ.
    ///
    /// The row maps are compared without communication. A mismatch is therefore reported as
    /// [`ConstraintError::IncompatibleMaps`] only on the processes whose local rows differ, and
    /// callers that need agreement across processes must reduce the outcome themselves.
    pub fn apply(&self, candidate: &DistCsrMatrix<T>, projected: &mut DistCsrMatrix<T>) -> Result<(), ConstraintError> {
        // Only row maps are checked, column maps may be different
        if !candidate.row_map().is_locally_same_as(projected.row_map()) {
            return Err(ConstraintError::IncompatibleMaps);
        }
        if !projected.col_map().is_locally_same_as(self.pattern.col_map())
            || projected.local().pattern() != self.pattern.local()
        {
            return Err(ConstraintError::PatternMismatch);
        }

        let candidate_ncols = candidate.col_map().num_local();
        let translation = projected.col_map().translation_to(candidate.col_map());

        let (offsets, col_indices, values) = projected.csr_data_mut();
        let rows = split_rows_mut(offsets, values);

        rows.into_par_iter()
            .enumerate()
            .for_each(|(i, row_values)| {
                let ws = &mut *self.workspace.get_or_default().borrow_mut();
                let row_columns = &col_indices[offsets[i]..offsets[i + 1]];
                ws.dense_row.resize(candidate_ncols, T::zero());
                gather_candidate_row(&mut ws.dense_row, candidate, i, row_columns, &translation, row_values);
                self.project_row(ws, i, row_columns, row_values);
            });

        debug!(
            "Projected {} rows ({} entries) onto {} near-null-space vectors",
            self.pattern.num_local_rows(),
            col_indices.len(),
            self.factors.dim()
        );
        Ok(())
    }

    /// Removes from `values` its component in the span of the near-null-space vectors
    /// restricted to `columns`.
    fn project_row(&self, ws: &mut ProjectionWorkspace<T>, row: usize, columns: &[usize], values: &mut [T]) {
        let factor = match self.factors.factor(row) {
            Some(factor) => factor,
            // Degenerate rows pass through unmodified
            None => return,
        };
        let d = self.factors.dim();
        let m = columns.len();

        ws.l.resize_mut(d, m, T::zero());
        ws.p1.resize_vertically_mut(d, T::zero());
        ws.p2.resize_vertically_mut(d, T::zero());
        ws.p3.resize_vertically_mut(m, T::zero());
        self.null_space.gather_into(ws.l.columns_mut(0, m), columns);

        let v = DVectorView::from_slice(values, m);
        let l: DMatrixView<T> = DMatrixView::from(&ws.l);
        ws.p1.gemv(T::one(), &l, &v, T::zero());
        ws.p2.gemv(T::one(), &factor, &ws.p1, T::zero());
        ws.p3.gemv_tr(T::one(), &l, &ws.p2, T::zero());

        for (v_j, p_j) in values.iter_mut().zip(ws.p3.iter()) {
            *v_j -= *p_j;
        }
    }

    /// Computes the residual norm $\| P B_c - B \|$ of the given operator, with $B_c$ the
    /// near-null-space vectors given at setup.
    ///
    /// Since the near-null-space is already stored in the column numbering of the pattern,
    /// no import is needed, but `p` must have the column map of the pattern. `b` must live on
    /// the row map of `p`. See also the free function [`residual_norm`](crate::residual::residual_norm).
    pub fn residual_norm(
        &self,
        p: &DistCsrMatrix<T>,
        b: &MultiVector<T>,
        comm: &impl Communicator,
    ) -> Result<T, ResidualError> {
        let d = self.null_space.dim();
        if b.num_vectors() != d {
            return Err(ResidualError::VectorCountMismatch {
                fine: b.num_vectors(),
                coarse: d,
            });
        }
        if !b.map().is_locally_same_as(p.row_map()) {
            return Err(ResidualError::RowMapMismatch);
        }
        if !p.col_map().is_locally_same_as(self.pattern.col_map()) {
            return Err(ResidualError::ColumnMapMismatch);
        }

        let b = b.data();
        let mut r_i = DVector::<T>::zeros(d);
        let mut local_sum = T::zero();
        for i in 0..p.num_local_rows() {
            r_i.copy_from(&b.row(i).transpose());
            r_i.neg_mut();
            let (columns, values) = p.local_row_view(i);
            for (&j, &p_ij) in columns.iter().zip(values) {
                r_i.axpy(p_ij, &self.null_space.values(j), T::one());
            }
            local_sum += r_i.norm_squared();
        }
        Ok(comm.sum_all(local_sum).sqrt())
    }
}

/// Copies the entries of row `row` of `candidate` that lie in the target row into `values`.
///
/// `dense_row` must be zero on entry, and is zero again on exit.
fn gather_candidate_row<T: Real>(
    dense_row: &mut [T],
    candidate: &DistCsrMatrix<T>,
    row: usize,
    target_columns: &[usize],
    target_to_candidate: &[Option<usize>],
    values: &mut [T],
) {
    let (candidate_columns, candidate_values) = candidate.local_row_view(row);
    for (&j, &v) in candidate_columns.iter().zip(candidate_values) {
        dense_row[j] = v;
    }
    for (&j, value) in target_columns.iter().zip(values.iter_mut()) {
        *value = match target_to_candidate[j] {
            Some(candidate_j) => dense_row[candidate_j],
            None => T::zero(),
        };
    }
    for &j in candidate_columns {
        dense_row[j] = T::zero();
    }
}

/// Splits the values of a CSR matrix into one mutable slice per row.
fn split_rows_mut<'a, T>(offsets: &[usize], mut values: &'a mut [T]) -> Vec<&'a mut [T]> {
    let mut rows = Vec::with_capacity(offsets.len().saturating_sub(1));
    for window in offsets.windows(2) {
        let (row, rest) = std::mem::take(&mut values).split_at_mut(window[1] - window[0]);
        rows.push(row);
        values = rest;
    }
    rows
}
