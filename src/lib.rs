//! Energy-minimization constraints for algebraic multigrid prolongation operators.
//!
//! The central type is [`Constraint`](constraint::Constraint), which projects a sparse
//! operator onto the space of operators with the same sparsity pattern that preserve a set of
//! near-null-space vectors.
pub mod blocking;
pub mod constraint;
pub mod dense;
pub mod io;
pub mod nullspace;
pub mod residual;
pub mod stepper;

pub extern crate emin_sparse;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use emin_traits::Real;
