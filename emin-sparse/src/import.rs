//! Ghost exchange: making data owned elsewhere available in a different map.
use crate::map::IndexMap;
use crate::multivector::MultiVector;
use emin_traits::comm::Communicator;
use nalgebra::{ClosedAdd, Scalar};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// How imported values are combined with the values already present in the target.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CombineMode {
    /// Overwrite target values.
    Insert,
    /// Add to target values.
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// The target map references a global index that no process provides.
    MissingGlobalIndex(usize),
    /// The source or target multivector does not live on the map the importer was built for.
    MapMismatch,
    /// Source and target have a different number of vectors.
    VectorCountMismatch { source: usize, target: usize },
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingGlobalIndex(idx) => {
                write!(f, "global index {} is not available in the source map", idx)
            }
            Self::MapMismatch => write!(f, "multivector map does not match the map of the importer"),
            Self::VectorCountMismatch { source, target } => write!(
                f,
                "source has {} vectors, but target has {} vectors",
                source, target
            ),
        }
    }
}

impl Error for ImportError {}

/// The capability of copying entries of a source multivector into a target multivector
/// with a different map, matching entries by global index.
///
/// This is a collective operation and acts as a synchronization point between processes.
pub trait GhostExchange<T: Scalar> {
    fn source_map(&self) -> &IndexMap;
    fn target_map(&self) -> &IndexMap;

    fn import(&self, source: &MultiVector<T>, target: &mut MultiVector<T>, mode: CombineMode)
        -> Result<(), ImportError>;
}

/// An import plan for the case where every target index is available in the source map
/// held by the calling process.
///
/// This is always the case for a single process, where the source map owns every global index.
#[derive(Debug, Clone)]
pub struct Importer {
    source_map: Arc<IndexMap>,
    target_map: Arc<IndexMap>,
    /// Source local index for each target local index.
    source_indices: Vec<usize>,
}

impl Importer {
    pub fn new(
        source_map: Arc<IndexMap>,
        target_map: Arc<IndexMap>,
        comm: &impl Communicator,
    ) -> Result<Self, ImportError> {
        let translation = target_map.translation_to(&source_map);
        let missing = translation.iter().position(Option::is_none);
        let all_resolved = comm.all(missing.is_none());

        if let Some(target_local) = missing {
            let global = target_map.global_indices()[target_local];
            return Err(ImportError::MissingGlobalIndex(global));
        } else if !all_resolved {
            // Another process could not resolve its ghosts. We report the failure on every
            // process, since the collective operation cannot complete anywhere.
            return Err(ImportError::MapMismatch);
        }

        let source_indices = translation.into_iter().flatten().collect();
        Ok(Self {
            source_map,
            target_map,
            source_indices,
        })
    }

    /// Imports `source` into a new multivector on the target map.
    pub fn import_new<T>(&self, source: &MultiVector<T>) -> Result<MultiVector<T>, ImportError>
    where
        T: Scalar + ClosedAdd + num::Zero,
    {
        let mut target = MultiVector::zeros(self.target_map.clone(), source.num_vectors());
        self.import(source, &mut target, CombineMode::Insert)?;
        Ok(target)
    }
}

impl<T> GhostExchange<T> for Importer
where
    T: Scalar + ClosedAdd,
{
    fn source_map(&self) -> &IndexMap {
        &self.source_map
    }

    fn target_map(&self) -> &IndexMap {
        &self.target_map
    }

    fn import(
        &self,
        source: &MultiVector<T>,
        target: &mut MultiVector<T>,
        mode: CombineMode,
    ) -> Result<(), ImportError> {
        if !source.map().is_locally_same_as(&self.source_map) || !target.map().is_locally_same_as(&self.target_map) {
            return Err(ImportError::MapMismatch);
        }
        if source.num_vectors() != target.num_vectors() {
            return Err(ImportError::VectorCountMismatch {
                source: source.num_vectors(),
                target: target.num_vectors(),
            });
        }

        let source_data = source.data();
        let mut target_data = target.data_mut();
        for k in 0..source_data.ncols() {
            for (target_local, &source_local) in self.source_indices.iter().enumerate() {
                let value = source_data[(source_local, k)].clone();
                let entry = &mut target_data[(target_local, k)];
                match mode {
                    CombineMode::Insert => *entry = value,
                    CombineMode::Add => *entry += value,
                }
            }
        }
        Ok(())
    }
}
