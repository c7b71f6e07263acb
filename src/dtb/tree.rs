// ABOUTME: Device tree arena, node and property definitions
// ABOUTME: Provides tree traversal, lookup and the low-level structure block decoders

use super::error::DtbError;
use super::header::DtbHeader;
use super::irq::InterruptSpecifier;
use super::memory::MemoryReservation;
use super::tokens::{DtbToken, read_be_u32};
use crate::region::AddressRange;
use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    vec,
    vec::Vec,
};

/// Default `#address-cells` when no ancestor declares one
pub const DEFAULT_ADDRESS_CELLS: u32 = 2;
/// Default `#size-cells` when no ancestor declares one
pub const DEFAULT_SIZE_CELLS: u32 = 1;

/// Stable index of a node inside a [`DeviceTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position of the node in document order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Device tree property, kept as its raw big-endian bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Property name
    pub name: String,
    /// Raw property value
    pub value: Vec<u8>,
}

impl Property {
    /// Value as a single u32 cell
    pub fn as_u32(&self) -> Option<u32> {
        if self.value.len() == 4 {
            read_be_u32(&self.value, 0)
        } else {
            None
        }
    }

    /// Value as a list of u32 cells
    pub fn as_cells(&self) -> Option<Vec<u32>> {
        if self.value.len() % 4 != 0 {
            return None;
        }
        Some(
            self.value
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Value as a phandle reference
    pub fn as_phandle(&self) -> Option<u32> {
        self.as_u32()
    }

    /// First string of the value
    pub fn as_str(&self) -> Option<&str> {
        self.as_str_list().into_iter().next()
    }

    /// Value as a NUL-separated string list; empty if the bytes are not text
    pub fn as_str_list(&self) -> Vec<&str> {
        let data = self.value.strip_suffix(&[0]).unwrap_or(&self.value[..]);
        if data.is_empty() {
            return Vec::new();
        }
        data.split(|&b| b == 0)
            .map(core::str::from_utf8)
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_default()
    }

    /// Whether the property carries no value
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Device tree node.
///
/// `reg` holds the node's register ranges already translated into the root
/// address space. A node whose `reg` could not be translated keeps an empty
/// `reg` and has `untranslatable` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTreeNode {
    /// Node name (`name@unit-address`, empty for the root)
    pub name: String,
    /// Absolute path, `/` for the root
    pub path: String,
    /// Parent node, `None` for the root
    pub parent: Option<NodeId>,
    /// Child nodes in document order
    pub children: Vec<NodeId>,
    /// Node properties in document order
    pub properties: Vec<Property>,
    /// Compatible strings, most specific first
    pub compatible: Vec<String>,
    /// The node's own phandle
    pub phandle: Option<u32>,
    /// Translated register ranges
    pub reg: Vec<AddressRange>,
    /// `reg` exists but maps to no root address
    pub untranslatable: bool,
    /// Decoded interrupt specifiers
    pub interrupts: Vec<InterruptSpecifier>,
    /// Controller `interrupts` entries are routed to
    pub interrupt_parent: Option<NodeId>,
}

impl DeviceTreeNode {
    /// Create a new device tree node
    pub fn new(name: String, path: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            path,
            parent,
            children: Vec::new(),
            properties: Vec::new(),
            compatible: Vec::new(),
            phandle: None,
            reg: Vec::new(),
            untranslatable: false,
            interrupts: Vec::new(),
            interrupt_parent: None,
        }
    }

    /// Find a property by name
    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Check if property exists
    pub fn has_property(&self, name: &str) -> bool {
        self.find_property(name).is_some()
    }

    /// Get property value as u32
    pub fn prop_u32(&self, name: &str) -> Option<u32> {
        self.find_property(name).and_then(Property::as_u32)
    }

    /// Get property value as string
    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.find_property(name).and_then(Property::as_str)
    }

    /// Name without the unit address
    pub fn base_name(&self) -> &str {
        self.name.split('@').next().unwrap_or(&self.name)
    }

    /// Unit address part of the name, if any
    pub fn unit_address(&self) -> Option<&str> {
        self.name.split_once('@').map(|(_, unit)| unit)
    }

    /// Whether the node lists `compatible` among its compatible strings
    pub fn is_compatible(&self, compatible: &str) -> bool {
        self.compatible.iter().any(|c| c == compatible)
    }

    /// The `status` property is absent, `okay` or `ok`
    pub fn is_enabled(&self) -> bool {
        matches!(self.prop_str("status"), None | Some("okay") | Some("ok"))
    }

    /// Node describes RAM (`device_type = "memory"`)
    pub fn is_memory(&self) -> bool {
        self.prop_str("device_type") == Some("memory")
    }
}

/// A parsed device tree: arena of nodes plus the blob's reservation block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTree {
    /// Header of the blob the tree was read from
    pub header: DtbHeader,
    /// Memory reservation block entries
    pub reservations: Vec<MemoryReservation>,
    nodes: Vec<DeviceTreeNode>,
    phandles: BTreeMap<u32, NodeId>,
}

impl DeviceTree {
    /// Id of the root node
    pub const ROOT: NodeId = NodeId(0);

    /// Assemble a tree from nodes in document order, root first.
    ///
    /// Fails on duplicate phandles.
    pub(crate) fn from_nodes(
        header: DtbHeader,
        reservations: Vec<MemoryReservation>,
        mut nodes: Vec<DeviceTreeNode>,
    ) -> Result<Self, DtbError> {
        for node in nodes.iter_mut() {
            node.compatible = node
                .find_property("compatible")
                .map(|p| p.as_str_list().into_iter().map(ToString::to_string).collect())
                .unwrap_or_default();
            node.phandle = node
                .find_property("phandle")
                .or_else(|| node.find_property("linux,phandle"))
                .and_then(Property::as_phandle);
        }

        let mut phandles: BTreeMap<u32, NodeId> = BTreeMap::new();
        for (index, node) in nodes.iter().enumerate() {
            let Some(phandle) = node.phandle else {
                continue;
            };
            if let Some(existing) = phandles.insert(phandle, NodeId(index)) {
                return Err(DtbError::DuplicatePhandle {
                    phandle,
                    first: nodes[existing.0].path.clone(),
                    second: node.path.clone(),
                });
            }
        }

        Ok(Self {
            header,
            reservations,
            nodes,
            phandles,
        })
    }

    /// The root node
    pub fn root(&self) -> &DeviceTreeNode {
        &self.nodes[Self::ROOT.0]
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> &DeviceTreeNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut DeviceTreeNode {
        &mut self.nodes[id.0]
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A parsed tree always has a root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in document order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Parent of a node
    pub fn parent(&self, id: NodeId) -> Option<&DeviceTreeNode> {
        self.node(id).parent.map(|p| self.node(p))
    }

    /// Children of a node in document order
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &DeviceTreeNode> + '_ {
        self.node(id).children.iter().map(|&c| self.node(c))
    }

    /// Ids of the node's ancestors, nearest first
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        core::iter::successors(self.node(id).parent, |&p| self.node(p).parent)
    }

    /// Node carrying the given phandle
    pub fn by_phandle(&self, phandle: u32) -> Option<NodeId> {
        self.phandles.get(&phandle).copied()
    }

    /// `#address-cells` governing children of `bus`: its own, else the nearest ancestor's
    pub fn address_cells(&self, bus: NodeId) -> u32 {
        self.inherited_u32(bus, "#address-cells")
            .unwrap_or(DEFAULT_ADDRESS_CELLS)
    }

    /// `#size-cells` governing children of `bus`: its own, else the nearest ancestor's
    pub fn size_cells(&self, bus: NodeId) -> u32 {
        self.inherited_u32(bus, "#size-cells")
            .unwrap_or(DEFAULT_SIZE_CELLS)
    }

    fn inherited_u32(&self, id: NodeId, name: &str) -> Option<u32> {
        core::iter::once(id)
            .chain(self.ancestors(id))
            .find_map(|n| self.node(n).prop_u32(name))
    }

    /// Find a node by path (e.g., "/cpus/cpu@0")
    ///
    /// A path segment without a unit address also matches `name@unit`.
    pub fn find_node(&self, path: &str) -> Option<&DeviceTreeNode> {
        let mut current = Self::ROOT;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let node = self.node(current);
            let exact = node.children.iter().find(|&&c| self.node(c).name == part);
            let by_base = || {
                node.children
                    .iter()
                    .find(|&&c| self.node(c).base_name() == part)
            };
            current = *exact.or_else(by_base)?;
        }
        Some(self.node(current))
    }

    /// Get all nodes with a specific compatible string
    pub fn find_compatible_nodes(&self, compatible: &str) -> Vec<&DeviceTreeNode> {
        self.iter_nodes()
            .filter(|n| n.is_compatible(compatible))
            .collect()
    }

    /// Get iterator over all nodes (depth-first traversal)
    pub fn iter_nodes(&self) -> NodeIterator<'_> {
        NodeIterator::new(self, Self::ROOT)
    }
}

/// Iterator for depth-first traversal of device tree nodes
pub struct NodeIterator<'a> {
    tree: &'a DeviceTree,
    stack: Vec<NodeId>,
}

impl<'a> NodeIterator<'a> {
    fn new(tree: &'a DeviceTree, start: NodeId) -> Self {
        Self {
            tree,
            stack: vec![start],
        }
    }
}

impl<'a> Iterator for NodeIterator<'a> {
    type Item = &'a DeviceTreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id);
        // Add children to stack in reverse order for depth-first traversal
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Parse a null-terminated string at `offset`, returning the offset past the NUL
pub fn parse_null_terminated_string(
    data: &[u8],
    offset: usize,
) -> Result<(usize, String), DtbError> {
    let malformed = DtbError::Malformed {
        what: "string",
        offset,
    };
    let tail = data.get(offset..).ok_or(malformed.clone())?;
    let null_pos = tail.iter().position(|&b| b == 0).ok_or(malformed.clone())?;

    let string = core::str::from_utf8(&tail[..null_pos])
        .map_err(|_| malformed)?
        .to_string();

    Ok((offset + null_pos + 1, string))
}

/// Parse node name after FDT_BEGIN_NODE token
pub fn parse_node_name(block: &[u8], offset: usize) -> Result<(usize, String), DtbError> {
    let (end, name) = parse_null_terminated_string(block, offset)?;
    let next = DtbToken::align(end);
    if next > block.len() {
        return Err(DtbError::Malformed {
            what: "node name padding",
            offset: end,
        });
    }
    Ok((next, name))
}

/// Parse property data after FDT_PROP token
pub fn parse_property_data(
    block: &[u8],
    offset: usize,
    strings_block: &[u8],
) -> Result<(usize, Property), DtbError> {
    let malformed = DtbError::Malformed {
        what: "property header",
        offset,
    };
    let prop_len = read_be_u32(block, offset).ok_or(malformed.clone())? as usize;
    let name_offset = read_be_u32(block, offset + 4).ok_or(malformed)? as usize;

    let data_start = offset + 8;
    let data_end = data_start
        .checked_add(prop_len)
        .filter(|&end| end <= block.len())
        .ok_or(DtbError::Malformed {
            what: "property value",
            offset: data_start,
        })?;

    let name = resolve_property_name(strings_block, name_offset)?;
    let property = Property {
        name,
        value: block[data_start..data_end].to_vec(),
    };
    Ok((DtbToken::align(data_end), property))
}

/// Resolve property name from strings block using offset
fn resolve_property_name(strings_block: &[u8], offset: usize) -> Result<String, DtbError> {
    if offset >= strings_block.len() {
        return Err(DtbError::Malformed {
            what: "property name offset",
            offset,
        });
    }
    let (_, name) = parse_null_terminated_string(strings_block, offset)?;
    Ok(name)
}
