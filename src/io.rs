//! Reading of mesh files used to set up near-null-space vectors.
pub mod msh;
