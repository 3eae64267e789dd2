//! Collective operations across the processes that jointly own a distributed object.
use crate::Real;

/// A group of cooperating processes, each owning a disjoint slice of rows.
///
/// Every method is collective: all processes in the group must call it, in the same order.
pub trait Communicator: Sync {
    /// The index of the calling process in `0 .. size()`.
    fn rank(&self) -> usize;

    /// The number of processes in the group.
    fn size(&self) -> usize;

    /// Sums `value` over all processes and returns the total on every process.
    ///
    /// The summation order is unspecified, so the result need not be bit-reproducible.
    fn sum_all<T: Real>(&self, value: T) -> T;

    /// Returns `true` on every process if and only if `value` is `true` on every process.
    fn all(&self, value: bool) -> bool;
}

/// The trivial communicator for a single process.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_all<T: Real>(&self, value: T) -> T {
        value
    }

    fn all(&self, value: bool) -> bool {
        value
    }
}

impl<'a, C: Communicator> Communicator for &'a C {
    fn rank(&self) -> usize {
        C::rank(self)
    }

    fn size(&self) -> usize {
        C::size(self)
    }

    fn sum_all<T: Real>(&self, value: T) -> T {
        C::sum_all(self, value)
    }

    fn all(&self, value: bool) -> bool {
        C::all(self, value)
    }
}
