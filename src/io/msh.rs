//! Loading of node coordinates and block structure from Gmsh MSH files (format 4.1).
use eyre::{eyre, Context};
use log::warn;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, OPoint, Point2, Point3, RealField, U2, U3};
use std::path::Path;

/// Summary of a node block in an MSH file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBlockInfo {
    pub entity_dim: usize,
    pub num_nodes: usize,
}

/// Summary of an element block in an MSH file.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementBlockInfo {
    pub entity_dim: usize,
    pub element_type: mshio::ElementType,
    pub num_elements: usize,
}

/// The block structure of an MSH file, without coordinates or connectivity.
#[derive(Debug, Clone, PartialEq)]
pub struct MshMetadata {
    pub num_nodes: usize,
    pub node_blocks: Vec<NodeBlockInfo>,
    pub element_blocks: Vec<ElementBlockInfo>,
}

impl MshMetadata {
    /// The total number of elements of the given type across all element blocks.
    pub fn num_elements_of_type(&self, element_type: mshio::ElementType) -> usize {
        self.element_blocks
            .iter()
            .filter(|block| block.element_type == element_type)
            .map(|block| block.num_elements)
            .sum()
    }
}

fn parse_msh(bytes: &[u8]) -> eyre::Result<mshio::MshFile<u64, i32, f64>> {
    mshio::parse_msh_bytes(bytes).map_err(|e| eyre!("failed to parse msh file: {}", e))
}

fn entity_dim_to_usize(entity_dim: i32) -> eyre::Result<usize> {
    usize::try_from(entity_dim).map_err(|_| eyre!("invalid entity dimension {} in msh file", entity_dim))
}

fn count_to_usize(count: u64) -> eyre::Result<usize> {
    usize::try_from(count).map_err(|_| eyre!("count {} in msh file does not fit in usize", count))
}

/// Reads the block structure of the MSH file at the given path.
pub fn load_msh_metadata_from_file<P: AsRef<Path>>(file_path: P) -> eyre::Result<MshMetadata> {
    let msh_bytes = std::fs::read(file_path).wrap_err("failed to read file")?;
    load_msh_metadata_from_bytes(&msh_bytes).wrap_err("failed to load metadata from msh file")
}

/// Reads the block structure by parsing the given bytes as a Gmsh MSH file.
pub fn load_msh_metadata_from_bytes(bytes: &[u8]) -> eyre::Result<MshMetadata> {
    let msh_file = parse_msh(bytes)?;
    let msh_nodes = msh_file
        .data
        .nodes
        .ok_or(eyre!("MSH file does not contain nodes"))?;

    let node_blocks = msh_nodes
        .node_blocks
        .iter()
        .map(|block| {
            Ok(NodeBlockInfo {
                entity_dim: entity_dim_to_usize(block.entity_dim)?,
                num_nodes: block.nodes.len(),
            })
        })
        .collect::<eyre::Result<_>>()?;

    // A file with only nodes is valid, e.g. for point clouds
    let element_blocks = match msh_file.data.elements {
        Some(msh_elements) => msh_elements
            .element_blocks
            .iter()
            .map(|block| {
                Ok(ElementBlockInfo {
                    entity_dim: entity_dim_to_usize(block.entity_dim)?,
                    element_type: block.element_type,
                    num_elements: block.elements.len(),
                })
            })
            .collect::<eyre::Result<_>>()?,
        None => Vec::new(),
    };

    Ok(MshMetadata {
        num_nodes: count_to_usize(msh_nodes.num_nodes)?,
        node_blocks,
        element_blocks,
    })
}

/// Loads the node coordinates of the MSH file at the given path.
pub fn load_msh_nodes_from_file<T, D, P>(file_path: P) -> eyre::Result<Vec<OPoint<T, D>>>
where
    T: RealField,
    D: DimName,
    P: AsRef<Path>,
    OPoint<T, D>: TryPointFromMshNode<T, D>,
    DefaultAllocator: Allocator<T, D>,
{
    let msh_bytes = std::fs::read(file_path).wrap_err("failed to read file")?;
    load_msh_nodes_from_bytes(&msh_bytes).wrap_err("failed to load nodes from msh file")
}

/// Loads the node coordinates by parsing the given bytes as a Gmsh MSH file.
///
/// Nodes are returned in the order of their tags, so that node `i` has tag `i + 1`.
pub fn load_msh_nodes_from_bytes<T, D>(bytes: &[u8]) -> eyre::Result<Vec<OPoint<T, D>>>
where
    T: RealField,
    D: DimName,
    OPoint<T, D>: TryPointFromMshNode<T, D>,
    DefaultAllocator: Allocator<T, D>,
{
    let msh_nodes = parse_msh(bytes)?
        .data
        .nodes
        .ok_or(eyre!("MSH file does not contain nodes"))?;

    let mut points = Vec::with_capacity(count_to_usize(msh_nodes.num_nodes)?);
    for node_block in &msh_nodes.node_blocks {
        if node_block.node_tags.is_some() {
            return Err(eyre!("node block tags are not consecutive in msh file"));
        }
        // Points of lower-dimensional entities (corners, curves) are embedded in the full space
        if entity_dim_to_usize(node_block.entity_dim)? > D::dim() {
            warn!(
                "Node block of entity dimension {} read as points of dimension {}.",
                node_block.entity_dim,
                D::dim()
            );
        }
        for node in &node_block.nodes {
            points.push(OPoint::try_point_from_msh_node(node)?);
        }
    }
    Ok(points)
}

/// Conversion from `mshio::Node`s to points.
pub trait TryPointFromMshNode<T, D>
where
    T: RealField,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn try_point_from_msh_node(node: &mshio::Node<f64>) -> eyre::Result<OPoint<T, D>>;
}

macro_rules! f_to_t {
    ($component:expr) => {
        T::from_f64($component).ok_or_else(|| eyre!("failed to convert node coordinate from f64 to target real type"))?
    };
}

impl<T: RealField> TryPointFromMshNode<T, U2> for Point2<T> {
    fn try_point_from_msh_node(node: &mshio::Node<f64>) -> eyre::Result<Self> {
        if node.z != 0.0 {
            return Err(eyre!("node at z = {} can not be read as a two-dimensional point", node.z));
        }
        Ok(Self::new(f_to_t!(node.x), f_to_t!(node.y)))
    }
}

impl<T: RealField> TryPointFromMshNode<T, U3> for Point3<T> {
    fn try_point_from_msh_node(node: &mshio::Node<f64>) -> eyre::Result<Self> {
        Ok(Self::new(f_to_t!(node.x), f_to_t!(node.y), f_to_t!(node.z)))
    }
}
