// ABOUTME: Interrupt parent resolution and interrupt specifier decoding
// ABOUTME: Follows `interrupt-parent` phandles and `interrupts-extended` lists

use super::error::DtbError;
use super::tree::{DeviceTree, NodeId};
use alloc::{format, string::ToString, vec::Vec};

/// GIC specifier type cell for shared peripheral interrupts
const GIC_SPI: u32 = 0;
/// GIC specifier type cell for private peripheral interrupts
const GIC_PPI: u32 = 1;

/// One interrupt of a node: the controller it targets and the raw specifier cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptSpecifier {
    /// Interrupt controller node
    pub controller: NodeId,
    /// Specifier cells, `#interrupt-cells` of the controller long
    pub cells: Vec<u32>,
}

impl InterruptSpecifier {
    /// Kernel-visible interrupt number.
    ///
    /// GIC specifiers are `<type number flags>`: SPIs start at 32, PPIs at 16.
    /// Any other controller numbers interrupts by the first cell.
    pub fn number(&self, tree: &DeviceTree) -> Option<u32> {
        let controller = tree.node(self.controller);
        if controller.compatible.iter().any(|c| is_arm_gic(c)) && self.cells.len() >= 3 {
            return match self.cells[0] {
                GIC_SPI => self.cells[1].checked_add(32),
                GIC_PPI => self.cells[1].checked_add(16),
                _ => Some(self.cells[1]),
            };
        }
        self.cells.first().copied()
    }
}

/// Compatible strings of ARM generic interrupt controllers
pub fn is_arm_gic(compatible: &str) -> bool {
    compatible.starts_with("arm,gic")
        || (compatible.starts_with("arm,cortex-a") && compatible.ends_with("-gic"))
        || compatible == "arm,arm11mp-gic"
        || compatible == "qcom,msm-qgic2"
}

fn lookup_phandle(tree: &DeviceTree, id: NodeId, property: &str, phandle: u32) -> Result<NodeId, DtbError> {
    tree.by_phandle(phandle)
        .ok_or_else(|| DtbError::UnresolvedPhandle {
            path: tree.node(id).path.clone(),
            property: property.to_string(),
            phandle,
        })
}

fn interrupt_cells(tree: &DeviceTree, id: NodeId, property: &str, controller: NodeId) -> Result<usize, DtbError> {
    match tree.node(controller).prop_u32("#interrupt-cells") {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(DtbError::BadProperty {
            path: tree.node(id).path.clone(),
            property: property.to_string(),
            reason: format!(
                "controller {} has no usable #interrupt-cells",
                tree.node(controller).path
            ),
        }),
    }
}

fn bad_cells(tree: &DeviceTree, id: NodeId, property: &str) -> DtbError {
    DtbError::BadProperty {
        path: tree.node(id).path.clone(),
        property: property.to_string(),
        reason: "specifier cells do not match #interrupt-cells".to_string(),
    }
}

/// Resolve interrupt parents and decode interrupt specifiers for every node
pub fn resolve_interrupts(tree: &mut DeviceTree) -> Result<(), DtbError> {
    let ids: Vec<NodeId> = tree.ids().collect();

    // Nodes are in document order, so a parent's effective interrupt parent
    // is known before its children are visited.
    for &id in &ids {
        let node = tree.node(id);
        let own = match node.find_property("interrupt-parent") {
            Some(p) => {
                let phandle = p.as_phandle().ok_or_else(|| DtbError::BadProperty {
                    path: node.path.clone(),
                    property: "interrupt-parent".to_string(),
                    reason: "not a single phandle cell".to_string(),
                })?;
                Some(lookup_phandle(tree, id, "interrupt-parent", phandle)?)
            }
            None => None,
        };
        let inherited = node.parent.and_then(|p| tree.node(p).interrupt_parent);
        tree.node_mut(id).interrupt_parent = own.or(inherited);
    }

    for &id in &ids {
        let interrupts = decode_interrupts(tree, id)?;
        tree.node_mut(id).interrupts = interrupts;
    }
    Ok(())
}

fn decode_interrupts(tree: &DeviceTree, id: NodeId) -> Result<Vec<InterruptSpecifier>, DtbError> {
    let node = tree.node(id);

    if let Some(prop) = node.find_property("interrupts-extended") {
        let cells = prop.as_cells().ok_or_else(|| bad_cells(tree, id, "interrupts-extended"))?;
        let mut specifiers = Vec::new();
        let mut rest = cells.as_slice();
        while let Some((&phandle, tail)) = rest.split_first() {
            let controller = lookup_phandle(tree, id, "interrupts-extended", phandle)?;
            let count = interrupt_cells(tree, id, "interrupts-extended", controller)?;
            if tail.len() < count {
                return Err(bad_cells(tree, id, "interrupts-extended"));
            }
            let (spec, next) = tail.split_at(count);
            specifiers.push(InterruptSpecifier {
                controller,
                cells: spec.to_vec(),
            });
            rest = next;
        }
        return Ok(specifiers);
    }

    let Some(prop) = node.find_property("interrupts") else {
        return Ok(Vec::new());
    };
    let Some(controller) = node.interrupt_parent else {
        log::warn!("{}: interrupts without a reachable interrupt parent", node.path);
        return Ok(Vec::new());
    };
    let count = interrupt_cells(tree, id, "interrupts", controller)?;
    let cells = prop.as_cells().ok_or_else(|| bad_cells(tree, id, "interrupts"))?;
    if cells.len() % count != 0 {
        return Err(bad_cells(tree, id, "interrupts"));
    }

    Ok(cells
        .chunks_exact(count)
        .map(|spec| InterruptSpecifier {
            controller,
            cells: spec.to_vec(),
        })
        .collect())
}
