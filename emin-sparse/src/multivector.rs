use crate::map::IndexMap;
use emin_traits::comm::Communicator;
use emin_traits::Real;
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVectorView, Scalar};
use num::Zero;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A collection of vectors sharing the same distribution.
///
/// The locally owned (or ghosted) entries are stored as a dense `num_local x num_vectors`
/// matrix, so that column `k` holds the local part of the `k`-th vector.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVector<T: Scalar> {
    map: Arc<IndexMap>,
    data: DMatrix<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthMismatch {
    pub map_len: usize,
    pub data_len: usize,
}

impl fmt::Display for LengthMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "multivector data has {} rows, but the map has {} local indices",
            self.data_len, self.map_len
        )
    }
}

impl Error for LengthMismatch {}

impl<T: Scalar + Zero> MultiVector<T> {
    pub fn zeros(map: Arc<IndexMap>, num_vectors: usize) -> Self {
        let data = DMatrix::zeros(map.num_local(), num_vectors);
        Self { map, data }
    }
}

impl<T: Scalar> MultiVector<T> {
    pub fn try_from_data(map: Arc<IndexMap>, data: DMatrix<T>) -> Result<Self, LengthMismatch> {
        if data.nrows() != map.num_local() {
            return Err(LengthMismatch {
                map_len: map.num_local(),
                data_len: data.nrows(),
            });
        }
        Ok(Self { map, data })
    }

    pub fn map(&self) -> &Arc<IndexMap> {
        &self.map
    }

    pub fn num_vectors(&self) -> usize {
        self.data.ncols()
    }

    pub fn local_len(&self) -> usize {
        self.data.nrows()
    }

    pub fn data(&self) -> DMatrixView<T> {
        DMatrixView::from(&self.data)
    }

    pub fn data_mut(&mut self) -> DMatrixViewMut<T> {
        DMatrixViewMut::from(&mut self.data)
    }

    pub fn column(&self, k: usize) -> DVectorView<T> {
        self.data.column(k)
    }

    pub fn into_data(self) -> DMatrix<T> {
        self.data
    }
}

impl<T: Real> MultiVector<T> {
    /// Computes the global 2-norm of every vector.
    pub fn norms2(&self, comm: &impl Communicator) -> Vec<T> {
        self.data
            .column_iter()
            .map(|column| comm.sum_all(column.norm_squared()).sqrt())
            .collect()
    }
}
