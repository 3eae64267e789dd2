use emin_sparse::{Communicator, DistCsrMatrix, ImportError, MultiVector};
use emin_traits::Real;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResidualError {
    /// The fine near-null-space vectors do not live on the row map of the operator.
    RowMapMismatch,
    /// The operator does not have the column map of the stored near-null-space vectors.
    ColumnMapMismatch,
    /// The number of fine and coarse near-null-space vectors differ.
    VectorCountMismatch { fine: usize, coarse: usize },
    /// The coarse vectors could not be brought into the column map of the operator.
    Import(ImportError),
}

impl fmt::Display for ResidualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowMapMismatch => write!(f, "Fine vectors must live on the row map of the operator"),
            Self::ColumnMapMismatch => write!(f, "Operator does not have the column map of the near-null-space"),
            Self::VectorCountMismatch { fine, coarse } => write!(
                f,
                "Got {} fine but {} coarse near-null-space vectors",
                fine, coarse
            ),
            Self::Import(err) => {
                write!(f, "Failed to import coarse vectors: ")?;
                err.fmt(f)
            }
        }
    }
}

impl Error for ResidualError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Import(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ImportError> for ResidualError {
    fn from(err: ImportError) -> Self {
        Self::Import(err)
    }
}

/// Computes $\| P B_c - B \|$, the Frobenius norm of the interpolation error of the
/// near-null-space.
///
/// `bc` is imported into the column map of `p` if necessary, and `b` must live on the row
/// map of `p`. The squared norms are summed across all processes, so every process
/// returns the same value.
pub fn residual_norm<T: Real>(
    p: &DistCsrMatrix<T>,
    b: &MultiVector<T>,
    bc: &MultiVector<T>,
    comm: &impl Communicator,
) -> Result<T, ResidualError> {
    if b.num_vectors() != bc.num_vectors() {
        return Err(ResidualError::VectorCountMismatch {
            fine: b.num_vectors(),
            coarse: bc.num_vectors(),
        });
    }
    if !b.map().is_locally_same_as(p.row_map()) {
        return Err(ResidualError::RowMapMismatch);
    }

    let mut r = p.apply(bc, comm)?.into_data();
    r -= &b.data();
    Ok(comm.sum_all(r.norm_squared()).sqrt())
}
