//! Maps between process-local indices and global indices.
use emin_traits::comm::Communicator;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;

/// Assigns a global index to each local index owned (or referenced) by the calling process.
///
/// A row map lists the rows owned by a process. A column map lists every column a process
/// references, which generally includes *ghost* indices owned by other processes.
/// Local indices are positions in [`global_indices`](Self::global_indices).
#[derive(Debug, Clone)]
pub struct IndexMap {
    global_indices: Vec<usize>,
    global_to_local: FxHashMap<usize, usize>,
    num_global: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// A global index appears more than once in the same map.
    DuplicateGlobalIndex(usize),
    /// A global index is not smaller than the global size of the map.
    GlobalIndexOutOfBounds { global_index: usize, num_global: usize },
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateGlobalIndex(idx) => write!(f, "global index {} appears more than once", idx),
            Self::GlobalIndexOutOfBounds {
                global_index,
                num_global,
            } => write!(
                f,
                "global index {} out of bounds for map with {} global indices",
                global_index, num_global
            ),
        }
    }
}

impl Error for MapError {}

impl IndexMap {
    /// A map where the local index `i` corresponds to the global index `i`, for `n` indices.
    pub fn serial(n: usize) -> Self {
        Self::contiguous(0, n, n)
    }

    /// A map owning the contiguous global range `start .. start + len`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds `num_global`.
    pub fn contiguous(start: usize, len: usize, num_global: usize) -> Self {
        assert!(start + len <= num_global, "Contiguous range must be contained in global range");
        let global_indices: Vec<_> = (start..start + len).collect();
        let global_to_local = global_indices
            .iter()
            .enumerate()
            .map(|(local, global)| (*global, local))
            .collect();
        Self {
            global_indices,
            global_to_local,
            num_global,
        }
    }

    /// Constructs a map from an arbitrary list of distinct global indices.
    pub fn try_from_global_indices(global_indices: Vec<usize>, num_global: usize) -> Result<Self, MapError> {
        let mut global_to_local = FxHashMap::default();
        global_to_local.reserve(global_indices.len());
        for (local, &global) in global_indices.iter().enumerate() {
            if global >= num_global {
                return Err(MapError::GlobalIndexOutOfBounds {
                    global_index: global,
                    num_global,
                });
            }
            if global_to_local.insert(global, local).is_some() {
                return Err(MapError::DuplicateGlobalIndex(global));
            }
        }
        Ok(Self {
            global_indices,
            global_to_local,
            num_global,
        })
    }

    /// Builds a column map from the rows owned by a process and the global columns they reference.
    ///
    /// Owned indices (present in `owned`) come first, in the order of `owned`, followed by the
    /// remaining *ghost* indices in ascending global order.
    pub fn with_ghosts(owned: &IndexMap, referenced: impl IntoIterator<Item = usize>) -> Result<Self, MapError> {
        let ghosts = referenced
            .into_iter()
            .filter(|global| owned.local_index(*global).is_none())
            .sorted_unstable()
            .dedup();
        let global_indices = owned
            .global_indices()
            .iter()
            .copied()
            .chain(ghosts)
            .collect();
        Self::try_from_global_indices(global_indices, owned.num_global())
    }

    pub fn num_local(&self) -> usize {
        self.global_indices.len()
    }

    pub fn num_global(&self) -> usize {
        self.num_global
    }

    pub fn global_indices(&self) -> &[usize] {
        &self.global_indices
    }

    /// Returns the global index of the given local index, or `None` if it is out of bounds.
    pub fn global_index(&self, local_index: usize) -> Option<usize> {
        self.global_indices.get(local_index).copied()
    }

    /// Returns the local index of the given global index, or `None` if this map does not
    /// contain it.
    pub fn local_index(&self, global_index: usize) -> Option<usize> {
        self.global_to_local.get(&global_index).copied()
    }

    pub fn contains_global(&self, global_index: usize) -> bool {
        self.global_to_local.contains_key(&global_index)
    }

    /// Translates every local index of `self` into the local numbering of `other`.
    ///
    /// Entry `i` of the result is the local index in `other` with the same global index as the
    /// local index `i` in `self`, or `None` if `other` does not contain it.
    pub fn translation_to(&self, other: &IndexMap) -> Vec<Option<usize>> {
        self.global_indices
            .iter()
            .map(|global| other.local_index(*global))
            .collect()
    }

    /// Whether the two maps assign the same global indices to the same local indices on the
    /// calling process.
    pub fn is_locally_same_as(&self, other: &IndexMap) -> bool {
        self.num_global == other.num_global && self.global_indices == other.global_indices
    }

    /// Whether the two maps are the same on every process of the communicator.
    pub fn is_same_as(&self, other: &IndexMap, comm: &impl Communicator) -> bool {
        comm.all(self.is_locally_same_as(other))
    }
}

impl PartialEq for IndexMap {
    fn eq(&self, other: &Self) -> bool {
        self.is_locally_same_as(other)
    }
}

impl Eq for IndexMap {}

/// Translates a local index of `from` into the local numbering of `to` through its global index.
///
/// Returns `None` if `local_index` is not a valid index of `from` or the global index is not
/// contained in `to`.
pub fn translate_local_index(from: &IndexMap, to: &IndexMap, local_index: usize) -> Option<usize> {
    from.global_index(local_index)
        .and_then(|global| to.local_index(global))
}
