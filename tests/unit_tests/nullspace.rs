use emin::constraint::{Constraint, ConstraintSettings};
use emin::emin_sparse::{Communicator, DistCsrMatrix, DistSparsityPattern, IndexMap, SerialCommunicator};
use emin::nullspace::{constant_modes, rigid_body_modes_2d, rigid_body_modes_3d, NullSpaceError, NullSpaceSet};
use emin::Real;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, Point2, Point3};
use nalgebra_sparse::pattern::SparsityPattern;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One of two processes, where the contributions of the other process to each reduction are
/// given up front. With no peer contributions it only records its own.
struct PairedCommunicator {
    rank: usize,
    peer_values: Mutex<VecDeque<f64>>,
    local_values: Mutex<Vec<f64>>,
}

impl PairedCommunicator {
    fn new(rank: usize, peer_values: Vec<f64>) -> Self {
        Self {
            rank,
            peer_values: Mutex::new(peer_values.into()),
            local_values: Mutex::new(Vec::new()),
        }
    }

    fn into_local_values(self) -> Vec<f64> {
        self.local_values.into_inner().unwrap()
    }
}

impl Communicator for PairedCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        2
    }

    fn sum_all<T: Real>(&self, value: T) -> T {
        let local = *(&value as &dyn Any)
            .downcast_ref::<f64>()
            .expect("Only f64 reductions are supported");
        self.local_values.lock().unwrap().push(local);
        let peer = self.peer_values.lock().unwrap().pop_front().unwrap_or(0.0);
        value + T::from_f64(peer).unwrap()
    }

    fn all(&self, value: bool) -> bool {
        value
    }
}

#[test]
fn constant_modes_follow_global_component() {
    // Interlaced two-component field, where this process owns global indices [3, 4, 5]
    let map = Arc::new(IndexMap::contiguous(3, 3, 8));
    let modes = constant_modes::<f64>(map, 2).unwrap();
    let expected = DMatrix::from_row_slice(3, 2, &[0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
    assert_matrix_eq!(modes.data(), expected);

    let err = constant_modes::<f64>(Arc::new(IndexMap::serial(2)), 0).unwrap_err();
    assert_eq!(err, NullSpaceError::ZeroBlockSize);
}

#[test]
fn null_space_set_gathers_values_per_index() {
    let map = Arc::new(IndexMap::serial(3));
    let modes = constant_modes::<f64>(map, 1).unwrap();
    let set = NullSpaceSet::from_multivector(&modes);
    assert_eq!(set.dim(), 1);
    assert_eq!(set.len(), 3);
    assert!(!set.is_empty());

    let mut l = DMatrix::zeros(1, 2);
    set.gather_into(l.columns_mut(0, 2), &[2, 0]);
    assert_matrix_eq!(l, DMatrix::from_row_slice(1, 2, &[1.0, 1.0]));
}

#[test]
fn rigid_body_modes_2d_are_translations_and_rotation() {
    let points = [Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), Point2::new(1.0, 3.0)];
    let map = Arc::new(IndexMap::serial(6));
    let modes = rigid_body_modes_2d(&points, map, &SerialCommunicator).unwrap();
    assert_eq!(modes.num_vectors(), 3);

    // Centroid is (1, 1)
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(6, 3, &[
        1.0, 0.0,  1.0,
        0.0, 1.0, -1.0,
        1.0, 0.0,  1.0,
        0.0, 1.0,  1.0,
        1.0, 0.0, -2.0,
        0.0, 1.0,  0.0,
    ]);
    assert_matrix_eq!(modes.data(), expected, comp = abs, tol = 1e-14);

    // Rotation about the centroid is orthogonal to both translations
    let data = modes.data();
    assert_scalar_eq!(data.column(2).dot(&data.column(0)), 0.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(data.column(2).dot(&data.column(1)), 0.0, comp = abs, tol = 1e-14);
}

#[test]
fn rigid_body_modes_3d_rotations_are_orthogonal_to_translations() {
    let points = [
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 2.0, 0.0),
        Point3::new(0.0, 0.0, 3.0),
    ];
    let modes = rigid_body_modes_3d(&points, Arc::new(IndexMap::serial(12)), &SerialCommunicator).unwrap();
    assert_eq!(modes.num_vectors(), 6);

    let data = modes.data();
    for rotation in 3..6 {
        for translation in 0..3 {
            let dot = data.column(rotation).dot(&data.column(translation));
            assert_scalar_eq!(dot, 0.0, comp = abs, tol = 1e-14);
        }
    }
    // A rotation moves each point perpendicular to its offset from the centroid
    let centroid = Point3::new(0.25, 0.5, 0.75);
    for (i, p) in points.iter().enumerate() {
        let r = p - centroid;
        for rotation in 3..6 {
            let u = data.fixed_view::<3, 1>(3 * i, rotation);
            assert_scalar_eq!(u.dot(&r), 0.0, comp = abs, tol = 1e-14);
        }
    }
}

#[test]
fn rigid_body_modes_rotate_about_global_centroid() {
    // Four points on a line, split evenly over two processes
    let points: Vec<_> = (0..4).map(|i| Point2::new(i as f64, 0.0)).collect();
    let serial = rigid_body_modes_2d(&points, Arc::new(IndexMap::serial(8)), &SerialCommunicator).unwrap();

    let (first, second) = points.split_at(2);
    let first_map = Arc::new(IndexMap::contiguous(0, 4, 8));
    let second_map = Arc::new(IndexMap::contiguous(4, 4, 8));
    let record = |rank, points: &[Point2<f64>], map: &Arc<IndexMap>| {
        let comm = PairedCommunicator::new(rank, Vec::new());
        rigid_body_modes_2d(points, map.clone(), &comm).unwrap();
        comm.into_local_values()
    };
    let first_values = record(0, first, &first_map);
    let second_values = record(1, second, &second_map);

    let first_modes = rigid_body_modes_2d(first, first_map, &PairedCommunicator::new(0, second_values)).unwrap();
    let second_modes = rigid_body_modes_2d(second, second_map, &PairedCommunicator::new(1, first_values)).unwrap();

    let mut joined = DMatrix::zeros(8, 3);
    joined.rows_mut(0, 4).copy_from(&first_modes.data());
    joined.rows_mut(4, 4).copy_from(&second_modes.data());
    assert_matrix_eq!(joined, serial.data(), comp = abs, tol = 1e-14);
    // The rotation is about x = 1.5
    assert_scalar_eq!(joined[(1, 2)], -1.5, comp = abs, tol = 1e-14);
    assert_scalar_eq!(joined[(7, 2)], 1.5, comp = abs, tol = 1e-14);
}

#[test]
fn rigid_body_modes_require_matching_map() {
    let points = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
    let err = rigid_body_modes_2d(&points, Arc::new(IndexMap::serial(3)), &SerialCommunicator).unwrap_err();
    assert_eq!(err, NullSpaceError::LengthMismatch { expected: 4, actual: 3 });
}

#[test]
fn rigid_body_modes_preserved_by_projected_update() {
    // A single coarse node with two components interpolated to fine nodes by a dense row
    // pattern, with the coarse rigid body modes as near-null-space
    let coarse_points = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
    let bc = rigid_body_modes_2d(&coarse_points, Arc::new(IndexMap::serial(6)), &SerialCommunicator).unwrap();

    let num_fine = 4;
    let offsets = (0..=num_fine).map(|i| 6 * i).collect();
    let indices = (0..num_fine).flat_map(|_| 0..6).collect();
    let pattern = SparsityPattern::try_from_offsets_and_indices(num_fine, 6, offsets, indices).unwrap();
    let pattern = DistSparsityPattern::try_new(
        Arc::new(IndexMap::serial(num_fine)),
        Arc::new(IndexMap::serial(6)),
        pattern,
    )
    .unwrap();
    let settings = ConstraintSettings::default();
    let constraint = Constraint::setup(&bc, pattern.clone(), settings, &SerialCommunicator).unwrap();

    let mut candidate = DistCsrMatrix::zeros_with_pattern(pattern.clone());
    let (_, _, values) = candidate.csr_data_mut();
    for (idx, v) in values.iter_mut().enumerate() {
        *v = ((idx * 7 % 11) as f64) - 5.0;
    }
    let mut projected = DistCsrMatrix::zeros_with_pattern(pattern);
    constraint.apply(&candidate, &mut projected).unwrap();

    let p_bc = projected.apply(&bc, &SerialCommunicator).unwrap();
    assert_matrix_eq!(p_bc.data(), DMatrix::<f64>::zeros(num_fine, 3), comp = abs, tol = 1e-12);
}
