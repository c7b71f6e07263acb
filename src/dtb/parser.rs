// ABOUTME: Core DTB parser implementation
// ABOUTME: Provides the DeviceTreeParser struct that turns a blob into an address-resolved tree

use super::error::DtbError;
use super::header::DtbHeader;
use super::irq::resolve_interrupts;
use super::memory::MemoryReservation;
use super::tokens::DtbToken;
use super::translate::translate_tree;
use super::tree::{DeviceTree, DeviceTreeNode, NodeId, parse_node_name, parse_property_data};
use alloc::{format, string::String, vec::Vec};

/// Main device tree parser struct
#[derive(Debug)]
pub struct DeviceTreeParser<'a> {
    data: &'a [u8],
}

impl<'a> DeviceTreeParser<'a> {
    /// Create a new parser from DTB data
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Get the underlying data slice
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Parse and validate the DTB header
    pub fn parse_header(&self) -> Result<DtbHeader, DtbError> {
        let header = DtbHeader::parse(self.data)?;
        header.validate(self.data.len())?;
        Ok(header)
    }

    /// Parse the complete device tree.
    ///
    /// Either the whole tree comes back with every address translated and
    /// every phandle resolved, or an error does; nothing partial is returned.
    pub fn parse_tree(&self) -> Result<DeviceTree, DtbError> {
        let header = self.parse_header()?;
        let blob = &self.data[..header.totalsize as usize];
        let reservations = MemoryReservation::parse_all(blob, header.off_mem_rsvmap as usize)?;

        let (struct_start, struct_end) = header.struct_block_bounds();
        let (strings_start, strings_end) = header.strings_block_bounds();
        let strings_block = &blob[strings_start..strings_end];

        let nodes = parse_structure_block(blob, struct_start, struct_end, strings_block)?;
        log::debug!(
            "parsed {} nodes and {} memory reservations",
            nodes.len(),
            reservations.len()
        );

        let mut tree = DeviceTree::from_nodes(header, reservations, nodes)?;
        translate_tree(&mut tree)?;
        resolve_interrupts(&mut tree)?;
        Ok(tree)
    }
}

/// Walk the structure block with an explicit stack, producing nodes in document order.
///
/// Offsets stay absolute within `blob` so errors point at the faulting byte.
fn parse_structure_block(
    blob: &[u8],
    start: usize,
    end: usize,
    strings_block: &[u8],
) -> Result<Vec<DeviceTreeNode>, DtbError> {
    let block = &blob[..end];
    let mut nodes: Vec<DeviceTreeNode> = Vec::new();
    // Stack to keep track of node hierarchy
    let mut stack: Vec<NodeId> = Vec::new();
    let mut root_closed = false;
    let mut offset = start;

    loop {
        let token_offset = offset;
        let (next, token) = DtbToken::parse(block, offset)?;
        offset = next;

        match token {
            DtbToken::Nop => {}
            DtbToken::BeginNode => {
                if root_closed {
                    return Err(DtbError::Malformed {
                        what: "node after the root node",
                        offset: token_offset,
                    });
                }
                let (next, name) = parse_node_name(block, offset)?;
                offset = next;

                let id = NodeId(nodes.len());
                let parent = stack.last().copied();
                let path = match parent {
                    None => String::from("/"),
                    Some(p) if p == DeviceTree::ROOT => format!("/{name}"),
                    Some(p) => format!("{}/{name}", nodes[p.0].path),
                };
                if let Some(p) = parent {
                    nodes[p.0].children.push(id);
                }
                nodes.push(DeviceTreeNode::new(name, path, parent));
                stack.push(id);
            }
            DtbToken::Property => {
                let (next, property) = parse_property_data(block, offset, strings_block)?;
                offset = next;

                // Add property to the current (top) node
                let current = stack.last().ok_or(DtbError::Malformed {
                    what: "property outside any node",
                    offset: token_offset,
                })?;
                nodes[current.0].properties.push(property);
            }
            DtbToken::EndNode => {
                stack.pop().ok_or(DtbError::Malformed {
                    what: "unbalanced end of node",
                    offset: token_offset,
                })?;
                root_closed = stack.is_empty();
            }
            DtbToken::End => {
                if !root_closed || nodes.is_empty() {
                    return Err(DtbError::Malformed {
                        what: "end of structure inside a node",
                        offset: token_offset,
                    });
                }
                return Ok(nodes);
            }
        }
    }
}
