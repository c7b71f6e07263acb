// ABOUTME: `reg` decoding and bus address translation through ancestor `ranges`
// ABOUTME: Rewrites every node's register ranges into the root address space

use super::error::DtbError;
use super::tree::{DeviceTree, NodeId};
use crate::region::AddressRange;
use alloc::{format, string::ToString, vec::Vec};

/// Widest address or size we decode, in cells
pub const MAX_CELLS: u32 = 4;

/// One window of a bus `ranges` property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeMapping {
    /// Start of the window in the bus's child address space
    pub child_bus_addr: u128,
    /// Start of the window in the parent address space
    pub parent_bus_addr: u128,
    /// Window length
    pub len: u128,
}

impl RangeMapping {
    /// Offset of `[addr, addr + size)` into the window, if the window holds all of it
    pub fn offset_of(&self, addr: u128, size: u128) -> Option<u128> {
        let offset = addr.checked_sub(self.child_bus_addr)?;
        let end = offset.checked_add(size)?;
        (offset < self.len && end <= self.len).then_some(offset)
    }

    /// Rebase `[addr, addr + size)` into the parent address space.
    ///
    /// `None` when the window does not hold the whole entry; `Some(None)` when
    /// the rebased address does not fit the parent's cells.
    pub fn translate(&self, addr: u128, size: u128) -> Option<Option<u128>> {
        self.offset_of(addr, size)
            .map(|offset| self.parent_bus_addr.checked_add(offset))
    }
}

/// How a bus maps its children's addresses onto its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusRanges {
    /// Empty `ranges`: addresses pass through unchanged
    Identity,
    /// Explicit windows
    Mapped(Vec<RangeMapping>),
}

/// Assemble big-endian cells into one value
pub fn cells_value(cells: &[u32]) -> u128 {
    cells
        .iter()
        .fold(0u128, |acc, &cell| (acc << 32) | u128::from(cell))
}

fn bad_property(tree: &DeviceTree, id: NodeId, property: &str, reason: impl ToString) -> DtbError {
    DtbError::BadProperty {
        path: tree.node(id).path.clone(),
        property: property.to_string(),
        reason: reason.to_string(),
    }
}

fn property_cells(tree: &DeviceTree, id: NodeId, property: &str) -> Result<Option<Vec<u32>>, DtbError> {
    match tree.node(id).find_property(property) {
        None => Ok(None),
        Some(p) => p
            .as_cells()
            .map(Some)
            .ok_or_else(|| bad_property(tree, id, property, "length is not a whole number of cells")),
    }
}

fn check_cell_count(tree: &DeviceTree, id: NodeId, property: &str, cells: u32) -> Result<usize, DtbError> {
    if cells > MAX_CELLS {
        return Err(bad_property(
            tree,
            id,
            property,
            format!("{cells} cells exceed the supported {MAX_CELLS}"),
        ));
    }
    Ok(cells as usize)
}

/// Decode a node's `reg` in its parent bus's address space as (address, size) pairs
pub fn decode_reg(tree: &DeviceTree, id: NodeId) -> Result<Vec<(u128, u128)>, DtbError> {
    let Some(parent) = tree.node(id).parent else {
        return Ok(Vec::new());
    };
    let Some(cells) = property_cells(tree, id, "reg")? else {
        return Ok(Vec::new());
    };

    let address_cells = check_cell_count(tree, id, "reg", tree.address_cells(parent))?;
    let size_cells = check_cell_count(tree, id, "reg", tree.size_cells(parent))?;
    if address_cells == 0 {
        return Err(bad_property(tree, id, "reg", "parent bus has #address-cells = 0"));
    }

    let stride = address_cells + size_cells;
    if cells.len() % stride != 0 {
        return Err(bad_property(
            tree,
            id,
            "reg",
            format!("{} cells is not a multiple of {stride}", cells.len()),
        ));
    }

    Ok(cells
        .chunks_exact(stride)
        .map(|entry| {
            let (address, size) = entry.split_at(address_cells);
            (cells_value(address), cells_value(size))
        })
        .collect())
}

/// Decode the `ranges` of `bus`; `None` when the property is absent
pub fn bus_ranges(tree: &DeviceTree, bus: NodeId) -> Result<Option<BusRanges>, DtbError> {
    let Some(cells) = property_cells(tree, bus, "ranges")? else {
        return Ok(None);
    };
    if cells.is_empty() {
        return Ok(Some(BusRanges::Identity));
    }

    let parent_bus = tree.node(bus).parent.unwrap_or(DeviceTree::ROOT);
    let child_cells = check_cell_count(tree, bus, "ranges", tree.address_cells(bus))?;
    let parent_cells = check_cell_count(tree, bus, "ranges", tree.address_cells(parent_bus))?;
    let size_cells = check_cell_count(tree, bus, "ranges", tree.size_cells(bus))?;

    let stride = child_cells + parent_cells + size_cells;
    if size_cells == 0 || cells.len() % stride != 0 {
        return Err(bad_property(
            tree,
            bus,
            "ranges",
            format!(
                "{} cells do not form ({child_cells}, {parent_cells}, {size_cells}) entries",
                cells.len()
            ),
        ));
    }

    let mappings = cells
        .chunks_exact(stride)
        .map(|entry| {
            let (child, rest) = entry.split_at(child_cells);
            let (parent, len) = rest.split_at(parent_cells);
            RangeMapping {
                child_bus_addr: cells_value(child),
                parent_bus_addr: cells_value(parent),
                len: cells_value(len),
            }
        })
        .collect();
    Ok(Some(BusRanges::Mapped(mappings)))
}

/// Walk from the node's bus up to the root, rebasing `addr` at every bus.
///
/// `Ok(None)` means some bus on the way has no `ranges`, or no single window
/// holds the whole `[addr, addr + size)` entry: the node has no CPU-visible
/// address.
pub fn translate_address(
    tree: &DeviceTree,
    id: NodeId,
    addr: u128,
    size: u128,
) -> Result<Option<u128>, DtbError> {
    let mut addr = addr;
    for bus in tree.ancestors(id) {
        if bus == DeviceTree::ROOT {
            break;
        }
        match bus_ranges(tree, bus)? {
            None => return Ok(None),
            Some(BusRanges::Identity) => {}
            Some(BusRanges::Mapped(mappings)) => {
                match mappings.iter().find_map(|m| m.translate(addr, size)) {
                    Some(Some(translated)) => addr = translated,
                    Some(None) => {
                        return Err(bad_property(
                            tree,
                            bus,
                            "ranges",
                            "window rebases past the end of the parent address space",
                        ));
                    }
                    None => return Ok(None),
                }
            }
        }
    }
    Ok(Some(addr))
}

/// Fill in every node's root-relative `reg` ranges
pub fn translate_tree(tree: &mut DeviceTree) -> Result<(), DtbError> {
    let ids: Vec<NodeId> = tree.ids().collect();
    for id in ids {
        let entries = decode_reg(tree, id)?;
        if entries.is_empty() {
            continue;
        }

        let mut ranges = Vec::with_capacity(entries.len());
        let mut untranslatable = false;
        for (address, size) in entries {
            let Some(translated) = translate_address(tree, id, address, size)? else {
                untranslatable = true;
                break;
            };
            let base = u64::try_from(translated)
                .map_err(|_| bad_property(tree, id, "reg", "address does not fit in 64 bits"))?;
            let size = u64::try_from(size)
                .map_err(|_| bad_property(tree, id, "reg", "size does not fit in 64 bits"))?;
            ranges.push(AddressRange::new(base, size));
        }

        let node = tree.node_mut(id);
        if untranslatable {
            log::debug!("{}: reg is not reachable from the root bus", node.path);
            node.untranslatable = true;
            node.reg.clear();
        } else {
            node.reg = ranges;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtb::DeviceTreeParser;
    use crate::dtb::builder::DtbBuilder;
    use alloc::vec;

    #[test]
    fn test_cells_value() {
        assert_eq!(cells_value(&[]), 0);
        assert_eq!(cells_value(&[0x1]), 1);
        assert_eq!(cells_value(&[0x1, 0x2]), 0x1_0000_0002);
        assert_eq!(
            cells_value(&[0x8200_0000, 0x0, 0x4000_0000]),
            0x8200_0000_0000_0000_4000_0000
        );
    }

    #[test]
    fn test_range_mapping_translate() {
        let m = RangeMapping {
            child_bus_addr: 0x1000,
            parent_bus_addr: 0x8000_0000,
            len: 0x1000,
        };
        assert_eq!(m.translate(0x1000, 0x1000), Some(Some(0x8000_0000)));
        assert_eq!(m.translate(0x1fff, 1), Some(Some(0x8000_0fff)));
        assert_eq!(m.translate(0x2000, 0), None);
        assert_eq!(m.translate(0xfff, 1), None);
    }

    #[test]
    fn test_range_mapping_needs_whole_entry() {
        let m = RangeMapping {
            child_bus_addr: 0x1000,
            parent_bus_addr: 0x8000_0000,
            len: 0x1000,
        };
        assert_eq!(m.offset_of(0x1800, 0x800), Some(0x800));
        assert_eq!(m.offset_of(0x1800, 0x801), None);
        assert_eq!(m.offset_of(0x1000, u128::MAX), None);
    }

    #[test]
    fn test_range_mapping_parent_overflow() {
        let m = RangeMapping {
            child_bus_addr: 0,
            parent_bus_addr: u128::MAX - 0xf,
            len: 0x1000,
        };
        assert_eq!(m.translate(0x8, 0x8), Some(Some(u128::MAX - 0x7)));
        assert_eq!(m.translate(0x20, 0x10), Some(None));
    }

    fn parse(blob: &[u8]) -> Result<DeviceTree, DtbError> {
        DeviceTreeParser::new(blob).parse_tree()
    }

    #[test]
    fn test_ranges_rebasing_past_parent_space_is_malformed() {
        let mut b = DtbBuilder::new();
        b.begin_node("")
            .prop_u32("#address-cells", 4)
            .prop_u32("#size-cells", 1)
            .begin_node("bus")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .prop_cells(
                "ranges",
                &[0x0, 0xffff_ffff, 0xffff_ffff, 0xffff_ffff, 0xffff_fff0, 0x1000],
            )
            .begin_node("dev@20")
            .prop_cells("reg", &[0x20, 0x10])
            .end_node()
            .end_node()
            .end_node();

        match parse(&b.finish()) {
            Err(DtbError::BadProperty { path, property, .. }) => {
                assert_eq!(path, "/bus");
                assert_eq!(property, "ranges");
            }
            other => panic!("expected a bad ranges property, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_running_past_window_is_untranslatable() {
        let mut b = DtbBuilder::new();
        b.begin_node("")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .begin_node("soc")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .prop_cells("ranges", &[0x0, 0x1000_0000, 0x1000])
            .begin_node("inside@800")
            .prop_cells("reg", &[0x800, 0x800])
            .end_node()
            .begin_node("straddle@800")
            .prop_cells("reg", &[0x800, 0x1000])
            .end_node()
            .end_node()
            .end_node();

        let tree = parse(&b.finish()).unwrap();
        let inside = tree.find_node("/soc/inside@800").unwrap();
        assert_eq!(inside.reg, vec![AddressRange::new(0x1000_0800, 0x800)]);
        assert!(!inside.untranslatable);

        let straddle = tree.find_node("/soc/straddle@800").unwrap();
        assert!(straddle.untranslatable);
        assert!(straddle.reg.is_empty());
    }

    #[test]
    fn test_empty_ranges_is_identity() {
        let mut b = DtbBuilder::new();
        b.begin_node("")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .begin_node("outer")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .prop_empty("ranges")
            .begin_node("inner")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .prop_cells("ranges", &[0x0, 0x2000_0000, 0x1_0000])
            .begin_node("dev@1000")
            .prop_cells("reg", &[0x1000, 0x100])
            .end_node()
            .end_node()
            .begin_node("direct@3000")
            .prop_cells("reg", &[0x3000, 0x100])
            .end_node()
            .end_node()
            .end_node();

        let tree = parse(&b.finish()).unwrap();
        // Identity composed with a window is the window alone
        assert_eq!(
            tree.find_node("/outer/inner/dev@1000").unwrap().reg,
            vec![AddressRange::new(0x2000_1000, 0x100)]
        );
        assert_eq!(
            tree.find_node("/outer/direct@3000").unwrap().reg,
            vec![AddressRange::new(0x3000, 0x100)]
        );
    }
}
