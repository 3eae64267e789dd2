//! Near-null-space vectors and their restriction to local indices.
use emin_sparse::{Communicator, IndexMap, MultiVector};
use emin_traits::Real;
use nalgebra::allocator::Allocator;
use nalgebra::{
    DMatrix, DMatrixViewMut, DVectorView, DefaultAllocator, DimName, OPoint, OVector, Point2, Point3, Scalar,
};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NullSpaceError {
    /// The map does not have one local index per node and component.
    LengthMismatch { expected: usize, actual: usize },
    /// The block size must be positive.
    ZeroBlockSize,
}

impl fmt::Display for NullSpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "map has {} local indices, but {} are required by the nodes and components",
                actual, expected
            ),
            Self::ZeroBlockSize => write!(f, "block size must be positive"),
        }
    }
}

impl Error for NullSpaceError {}

/// The restriction of `d` near-null-space vectors to a set of local indices.
///
/// Values are stored gathered, so that the `d` values belonging to one local index are
/// contiguous in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct NullSpaceSet<T: Scalar> {
    /// `d x n` matrix, column `j` holds the values at local index `j`.
    values: DMatrix<T>,
}

impl<T: Scalar> NullSpaceSet<T> {
    /// Takes an owned copy of the given multivector, one vector per near-null-space mode.
    pub fn from_multivector(vectors: &MultiVector<T>) -> Self {
        Self {
            values: vectors.data().transpose(),
        }
    }

    /// The number of near-null-space vectors `d`.
    pub fn dim(&self) -> usize {
        self.values.nrows()
    }

    /// The number of local indices.
    pub fn len(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `d` values at the given local index.
    pub fn values(&self, local_index: usize) -> DVectorView<T> {
        self.values.column(local_index)
    }

    /// Gathers the values at `indices` into the columns of the `d x indices.len()` matrix `l`.
    ///
    /// # Panics
    ///
    /// Panics if `l` has the wrong shape or an index is out of bounds.
    pub fn gather_into(&self, mut l: DMatrixViewMut<T>, indices: &[usize]) {
        assert_eq!(l.shape(), (self.dim(), indices.len()));
        for (j, &index) in indices.iter().enumerate() {
            l.column_mut(j).copy_from(&self.values.column(index));
        }
    }
}

/// Constant vectors for a vector-valued field with `block_size` components per node.
///
/// Mode `k` is one at every index whose global index `g` satisfies `g % block_size == k`, and
/// zero elsewhere. Since the component is derived from the global index, the modes are
/// consistent across processes.
pub fn constant_modes<T: Real>(map: Arc<IndexMap>, block_size: usize) -> Result<MultiVector<T>, NullSpaceError> {
    if block_size == 0 {
        return Err(NullSpaceError::ZeroBlockSize);
    }
    let mut modes = MultiVector::zeros(map.clone(), block_size);
    let mut data = modes.data_mut();
    for (local, global) in map.global_indices().iter().enumerate() {
        data[(local, global % block_size)] = T::one();
    }
    Ok(modes)
}

fn check_len(map: &IndexMap, num_nodes: usize, block_size: usize) -> Result<(), NullSpaceError> {
    let expected = num_nodes * block_size;
    if map.num_local() != expected {
        Err(NullSpaceError::LengthMismatch {
            expected,
            actual: map.num_local(),
        })
    } else {
        Ok(())
    }
}

/// Rigid body modes of a two-dimensional elastic body: two translations and one rotation.
///
/// The degrees of freedom are interlaced, so that local indices `2i` and `2i + 1` are the
/// `x` and `y` components at node `i`. Rotations are taken about the centroid of the points
/// of all processes, so this is a collective operation.
pub fn rigid_body_modes_2d<T: Real>(
    points: &[Point2<T>],
    map: Arc<IndexMap>,
    comm: &impl Communicator,
) -> Result<MultiVector<T>, NullSpaceError> {
    let centroid = global_centroid(points, comm);
    check_len(&map, points.len(), 2)?;

    let mut modes = MultiVector::zeros(map, 3);
    let mut data = modes.data_mut();
    for (i, p) in points.iter().enumerate() {
        let r = p.coords - centroid;
        let (u, v) = (2 * i, 2 * i + 1);
        data[(u, 0)] = T::one();
        data[(v, 1)] = T::one();
        data[(u, 2)] = -r.y;
        data[(v, 2)] = r.x;
    }
    Ok(modes)
}

/// Rigid body modes of a three-dimensional elastic body: three translations and three
/// rotations about the coordinate axes through the centroid.
///
/// Local indices `3i`, `3i + 1` and `3i + 2` are the `x`, `y` and `z` components at node `i`.
/// Like [`rigid_body_modes_2d`], this is a collective operation.
pub fn rigid_body_modes_3d<T: Real>(
    points: &[Point3<T>],
    map: Arc<IndexMap>,
    comm: &impl Communicator,
) -> Result<MultiVector<T>, NullSpaceError> {
    let centroid = global_centroid(points, comm);
    check_len(&map, points.len(), 3)?;

    let mut modes = MultiVector::zeros(map, 6);
    let mut data = modes.data_mut();
    for (i, p) in points.iter().enumerate() {
        let r = p.coords - centroid;
        let (u, v, w) = (3 * i, 3 * i + 1, 3 * i + 2);
        data[(u, 0)] = T::one();
        data[(v, 1)] = T::one();
        data[(w, 2)] = T::one();
        // Rotation about x
        data[(v, 3)] = -r.z;
        data[(w, 3)] = r.y;
        // Rotation about y
        data[(u, 4)] = r.z;
        data[(w, 4)] = -r.x;
        // Rotation about z
        data[(u, 5)] = -r.y;
        data[(v, 5)] = r.x;
    }
    Ok(modes)
}

/// The centroid of the points owned by all processes.
fn global_centroid<T: Real, D: DimName>(points: &[OPoint<T, D>], comm: &impl Communicator) -> OVector<T, D>
where
    DefaultAllocator: Allocator<T, D>,
{
    let local_sum = points
        .iter()
        .fold(OVector::<T, D>::zeros(), |acc, p| acc + &p.coords);
    let sum = local_sum.map(|x_k| comm.sum_all(x_k));
    let n = comm.sum_all(nalgebra::convert::<f64, T>(points.len() as f64));
    if n > T::zero() {
        sum / n
    } else {
        sum
    }
}
