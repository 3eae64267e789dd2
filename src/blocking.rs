//! Splitting of vectors and operators into per-variable blocks.
//!
//! A multiphysics system such as Stokes flow is typically assembled with its degrees of
//! freedom nodally interlaced, `[u0 v0 p0 u1 v1 p1 ...]`. Block preconditioners and
//! block-wise constraints instead need one vector (or operator) per variable. A
//! [`BlockedMapping`] describes which global indices of the base map belong to which block,
//! and gives every block its own contiguous global numbering.
use emin_sparse::{DistCsrMatrix, DistSparsityPattern, IndexMap, MultiVector};
use emin_traits::Real;
use eyre::{eyre, WrapErr};
use log::debug;
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum BlockLayout {
    /// Global index `g` has node `g / stride` and component `g % stride`.
    Strided {
        block_sizes: Vec<usize>,
        /// Component offset of every block, with a final entry equal to the stride.
        offsets: Vec<usize>,
    },
    /// Maps a base global index to its block and its global index within the block.
    Explicit(FxHashMap<usize, (usize, usize)>),
}

#[derive(Debug, Clone)]
pub struct BlockedMapping {
    base_map: Arc<IndexMap>,
    layout: BlockLayout,
    block_maps: Vec<Arc<IndexMap>>,
    /// For every block, the base local index of each block local index.
    base_local_indices: Vec<Vec<usize>>,
}

impl BlockedMapping {
    /// Creates a mapping from explicit lists of base global indices, one list per block.
    ///
    /// Every process must pass the same lists. The global index of an entry within its block
    /// is its position in the list. Indices owned by the base map that appear in no list
    /// are ignored by all operations.
    pub fn new(vars: Vec<Vec<usize>>, base_map: Arc<IndexMap>) -> eyre::Result<Self> {
        let mut lookup = FxHashMap::default();
        for (block, block_vars) in vars.iter().enumerate() {
            for (block_global, &global) in block_vars.iter().enumerate() {
                if global >= base_map.num_global() {
                    return Err(eyre!(
                        "global index {} of block {} is out of bounds for base map with {} global indices",
                        global,
                        block,
                        base_map.num_global()
                    ));
                }
                if let Some((other, _)) = lookup.insert(global, (block, block_global)) {
                    return Err(eyre!(
                        "global index {} appears in both block {} and block {}",
                        global,
                        other,
                        block
                    ));
                }
            }
        }
        let num_global_per_block = vars.iter().map(Vec::len).collect();
        Self::from_layout(base_map, BlockLayout::Explicit(lookup), num_global_per_block)
    }

    /// Creates a mapping for nodally interlaced variables, where each node carries
    /// `block_sizes[b]` consecutive components belonging to block `b`.
    pub fn strided(base_map: Arc<IndexMap>, block_sizes: &[usize]) -> eyre::Result<Self> {
        if block_sizes.is_empty() || block_sizes.contains(&0) {
            return Err(eyre!("block sizes must be non-empty and positive, got {:?}", block_sizes));
        }
        let mut offsets = vec![0];
        for size in block_sizes {
            offsets.push(offsets.last().unwrap_or(&0) + size);
        }
        let stride = offsets[block_sizes.len()];
        if base_map.num_global() % stride != 0 {
            return Err(eyre!(
                "base map with {} global indices is not divisible into nodes with {} components",
                base_map.num_global(),
                stride
            ));
        }
        let num_nodes = base_map.num_global() / stride;
        let num_global_per_block = block_sizes.iter().map(|size| num_nodes * size).collect();
        let layout = BlockLayout::Strided {
            block_sizes: block_sizes.to_vec(),
            offsets,
        };
        Self::from_layout(base_map, layout, num_global_per_block)
    }

    fn from_layout(
        base_map: Arc<IndexMap>,
        layout: BlockLayout,
        num_global_per_block: Vec<usize>,
    ) -> eyre::Result<Self> {
        let num_blocks = num_global_per_block.len();
        let mut block_globals = vec![Vec::new(); num_blocks];
        let mut base_local_indices = vec![Vec::new(); num_blocks];
        for (base_local, &global) in base_map.global_indices().iter().enumerate() {
            if let Some((block, block_global)) = layout.locate(global) {
                block_globals[block].push(block_global);
                base_local_indices[block].push(base_local);
            }
        }

        let block_maps = block_globals
            .into_iter()
            .zip(num_global_per_block)
            .enumerate()
            .map(|(block, (globals, num_global))| {
                IndexMap::try_from_global_indices(globals, num_global)
                    .map(Arc::new)
                    .wrap_err_with(|| format!("failed to construct map for block {}", block))
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        debug!(
            "Created blocked mapping with {} blocks of local sizes {:?}",
            num_blocks,
            base_local_indices.iter().map(Vec::len).collect::<Vec<_>>()
        );
        Ok(Self {
            base_map,
            layout,
            block_maps,
            base_local_indices,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.block_maps.len()
    }

    pub fn base_map(&self) -> &Arc<IndexMap> {
        &self.base_map
    }

    pub fn block_map(&self, block: usize) -> &Arc<IndexMap> {
        &self.block_maps[block]
    }

    /// The block and the global index within the block of the given base global index.
    pub fn locate(&self, global: usize) -> Option<(usize, usize)> {
        self.layout.locate(global)
    }

    /// Copies the entries of a vector on the base map into one new vector per block.
    pub fn copy_into_blocks<T: Real>(&self, x: &MultiVector<T>) -> eyre::Result<Vec<MultiVector<T>>> {
        self.check_base_map(x.map())?;
        let x_data = x.data();
        let blocks = self
            .block_maps
            .iter()
            .zip(&self.base_local_indices)
            .map(|(block_map, base_indices)| {
                let mut block = MultiVector::zeros(block_map.clone(), x.num_vectors());
                let mut block_data = block.data_mut();
                for (i, &base_local) in base_indices.iter().enumerate() {
                    block_data.row_mut(i).copy_from(&x_data.row(base_local));
                }
                block
            })
            .collect();
        Ok(blocks)
    }

    /// Copies the entries of per-block vectors back into a vector on the base map.
    ///
    /// Entries of `x` that belong to no block are left untouched. All blocks are checked
    /// before anything is copied, so `x` is unchanged on error.
    pub fn copy_from_blocks<T: Real>(&self, blocks: &[MultiVector<T>], x: &mut MultiVector<T>) -> eyre::Result<()> {
        self.check_base_map(x.map())?;
        if blocks.len() != self.num_blocks() {
            return Err(eyre!("expected {} blocks, got {}", self.num_blocks(), blocks.len()));
        }
        let num_vectors = x.num_vectors();
        for (b, block) in blocks.iter().enumerate() {
            if !block.map().is_locally_same_as(&self.block_maps[b]) {
                return Err(eyre!("vector {} does not live on the map of block {}", b, b));
            }
            if block.num_vectors() != num_vectors {
                return Err(eyre!(
                    "block {} has {} vectors, but the target has {}",
                    b,
                    block.num_vectors(),
                    num_vectors
                ));
            }
        }

        let mut x_data = x.data_mut();
        for (block, base_indices) in blocks.iter().zip(&self.base_local_indices) {
            let block_data = block.data();
            for (i, &base_local) in base_indices.iter().enumerate() {
                x_data.row_mut(base_local).copy_from(&block_data.row(i));
            }
        }
        Ok(())
    }

    /// Splits an operator on the base map into `num_blocks x num_blocks` sub-operators.
    ///
    /// With a single block the operator itself is the only block.
    pub fn build_blocked_operator<T: Real>(&self, a: &DistCsrMatrix<T>) -> eyre::Result<BlockedOperator<T>> {
        self.check_base_map(a.row_map()).wrap_err("row map of operator")?;
        let n = self.num_blocks();
        if n == 1 {
            return Ok(BlockedOperator {
                num_blocks: 1,
                source_pattern: a.pattern(),
                blocks: vec![a.clone()],
                positions: (0..a.local().nnz()).map(|idx| (0, idx)).collect(),
            });
        }

        // Block and block global column of every local column of the operator
        let col_locations: Vec<Option<(usize, usize)>> = a
            .col_map()
            .global_indices()
            .iter()
            .map(|&global| self.locate(global))
            .collect();

        let mut block_rows = vec![Vec::new(); n * n];
        for (r, base_indices) in self.base_local_indices.iter().enumerate() {
            for &base_local in base_indices {
                let mut rows: Vec<Vec<(usize, T)>> = vec![Vec::new(); n];
                let (columns, values) = a.local_row_view(base_local);
                for (&j, &v) in columns.iter().zip(values) {
                    if let Some((c, block_global)) = col_locations[j] {
                        rows[c].push((block_global, v));
                    }
                }
                for (c, row) in rows.into_iter().enumerate() {
                    block_rows[r * n + c].push(row);
                }
            }
        }

        let mut blocks = Vec::with_capacity(n * n);
        for (idx, rows) in block_rows.into_iter().enumerate() {
            let (r, c) = (idx / n, idx % n);
            let referenced = rows.iter().flatten().map(|(global, _)| *global);
            let col_map = IndexMap::with_ghosts(&self.block_maps[c], referenced)
                .wrap_err_with(|| format!("failed to construct column map of block ({}, {})", r, c))?;
            let block = DistCsrMatrix::try_from_global_rows(self.block_maps[r].clone(), Arc::new(col_map), &rows)
                .wrap_err_with(|| format!("failed to assemble block ({}, {})", r, c))?;
            blocks.push(block);
        }

        let positions = self.block_positions(a, &col_locations, &blocks)?;
        debug!(
            "Split operator with {} entries into {}x{} blocks",
            a.local().nnz(),
            n,
            n
        );
        Ok(BlockedOperator {
            num_blocks: n,
            source_pattern: a.pattern(),
            blocks,
            positions,
        })
    }

    /// Refreshes the values of a blocked operator from an operator with the structure it
    /// was built from.
    pub fn rebuild_blocked_operator<T: Real>(
        &self,
        a: &DistCsrMatrix<T>,
        blocked: &mut BlockedOperator<T>,
    ) -> eyre::Result<()> {
        if a.pattern() != blocked.source_pattern {
            return Err(eyre!("operator does not have the structure the blocked operator was built from"));
        }
        for block in &mut blocked.blocks {
            let (_, _, values) = block.csr_data_mut();
            values.iter_mut().for_each(|v| *v = T::zero());
        }
        for (&(block, position), &value) in blocked.positions.iter().zip(a.local().values()) {
            if block != usize::MAX {
                let (_, _, values) = blocked.blocks[block].csr_data_mut();
                values[position] = value;
            }
        }
        Ok(())
    }

    /// For every stored entry of `a`, the block it was copied to and its position in the
    /// values of that block, or `usize::MAX` if the entry belongs to no block.
    fn block_positions<T: Real>(
        &self,
        a: &DistCsrMatrix<T>,
        col_locations: &[Option<(usize, usize)>],
        blocks: &[DistCsrMatrix<T>],
    ) -> eyre::Result<Vec<(usize, usize)>> {
        let n = self.num_blocks();
        let mut row_locations = vec![None; a.num_local_rows()];
        for (r, base_indices) in self.base_local_indices.iter().enumerate() {
            for (i, &base_local) in base_indices.iter().enumerate() {
                row_locations[base_local] = Some((r, i));
            }
        }

        let mut positions = Vec::with_capacity(a.local().nnz());
        for (base_local, location) in row_locations.into_iter().enumerate() {
            let (columns, _) = a.local_row_view(base_local);
            for &j in columns {
                let position = match (location, col_locations[j]) {
                    (Some((r, i)), Some((c, block_global))) => {
                        let block = &blocks[r * n + c];
                        let block_col = block
                            .col_map()
                            .local_index(block_global)
                            .ok_or_else(|| eyre!("column {} missing from block ({}, {})", block_global, r, c))?;
                        let offset = block.local().row_offsets()[i];
                        let (block_columns, _) = block.local_row_view(i);
                        let k = block_columns
                            .binary_search(&block_col)
                            .map_err(|_| eyre!("entry missing from block ({}, {})", r, c))?;
                        (r * n + c, offset + k)
                    }
                    _ => (usize::MAX, 0),
                };
                positions.push(position);
            }
        }
        Ok(positions)
    }

    fn check_base_map(&self, map: &IndexMap) -> eyre::Result<()> {
        if map.is_locally_same_as(&self.base_map) {
            Ok(())
        } else {
            Err(eyre!("map does not match the base map of the blocked mapping"))
        }
    }
}

impl BlockLayout {
    fn locate(&self, global: usize) -> Option<(usize, usize)> {
        match self {
            Self::Strided { block_sizes, offsets } => {
                let stride = *offsets.last()?;
                let (node, component) = (global / stride, global % stride);
                // offsets is sorted, so the block is the last offset not exceeding the component
                let block = offsets.partition_point(|&offset| offset <= component) - 1;
                Some((block, node * block_sizes[block] + component - offsets[block]))
            }
            Self::Explicit(lookup) => lookup.get(&global).copied(),
        }
    }
}

/// An operator split into `n x n` sub-operators, stored row-major.
#[derive(Debug, Clone)]
pub struct BlockedOperator<T> {
    num_blocks: usize,
    source_pattern: DistSparsityPattern,
    blocks: Vec<DistCsrMatrix<T>>,
    positions: Vec<(usize, usize)>,
}

impl<T> BlockedOperator<T> {
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// The sub-operator coupling block row `r` to block column `c`.
    pub fn block(&self, r: usize, c: usize) -> &DistCsrMatrix<T> {
        &self.blocks[r * self.num_blocks + c]
    }

    pub fn blocks(&self) -> &[DistCsrMatrix<T>] {
        &self.blocks
    }
}
