//! Row-distributed sparse linear algebra for emin.
//!
//! Matrices and multivectors carry [`IndexMap`]s that give every locally stored row and column
//! a global identity. Operations that involve data owned by other processes go through the
//! [`GhostExchange`](import::GhostExchange) and [`Communicator`] abstractions.

pub mod import;
pub mod map;
pub mod matrix;
pub mod multivector;

pub use emin_traits::comm::{Communicator, SerialCommunicator};
pub use import::{CombineMode, GhostExchange, ImportError, Importer};
pub use map::{translate_local_index, IndexMap, MapError};
pub use matrix::{DistCsrMatrix, DistMatrixError, DistSparsityPattern};
pub use multivector::{LengthMismatch, MultiVector};
