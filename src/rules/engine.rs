// ABOUTME: Rule resolution over an address-resolved device tree
// ABOUTME: Classifies nodes, layers overrides, validates bounds and overlaps, computes untyped memory

use super::naming::derive_name;
use super::rule::{Action, LabeledRule, RegionOverride, RuleSet, Specificity};
use crate::arch::ArchConfig;
use crate::dtb::{DeviceTree, DeviceTreeNode, NodeId};
use crate::error::{Error, Result, RuleConflict};
use crate::model::{
    Classification, ReservedOrigin, ReservedRegion, ResolvedDevice, ResolvedHardwareModel,
    UntypedRegion,
};
use crate::region::{AddressRange, RangeSet};
use std::collections::BTreeMap;

/// A field value together with the rule that set it
#[derive(Debug, Clone)]
struct Layered<'r, T> {
    value: T,
    rule: &'r str,
    specificity: Specificity,
}

/// Everything the matching rules say about one node
#[derive(Debug, Default)]
struct Resolution<'r> {
    classified_by: Option<(Action, &'r str)>,
    name: Option<Layered<'r, String>>,
    regions: Option<Layered<'r, Vec<RegionOverride>>>,
    interrupts: Option<Layered<'r, Vec<u32>>>,
    address_less: Option<Layered<'r, bool>>,
    release: Option<Layered<'r, bool>>,
}

/// Record `incoming` for `field` unless it conflicts with what an earlier rule set
fn layer<'r, T: Clone + PartialEq>(
    slot: &mut Option<Layered<'r, T>>,
    incoming: Option<&T>,
    field: &'static str,
    rule: &'r LabeledRule,
    path: &str,
) -> Result<()> {
    let Some(value) = incoming else {
        return Ok(());
    };
    let specificity = rule.rule.matcher.specificity();

    if let Some(current) = slot.as_mut() {
        if current.value == *value {
            return Ok(());
        }
        if specificity <= current.specificity {
            return Err(RuleConflict::Field {
                path: path.to_owned(),
                field,
                first: current.rule.to_owned(),
                second: rule.label.clone(),
            }
            .into());
        }
        log::debug!(
            "{path}: `{field}` from rule `{}` replaced by more specific rule `{}`",
            current.rule,
            rule.label
        );
    }

    *slot = Some(Layered {
        value: value.clone(),
        rule: &rule.label,
        specificity,
    });
    Ok(())
}

/// Resolves a device tree against hardware rules for one architecture
#[derive(Debug)]
pub struct RuleEngine<'a> {
    tree: &'a DeviceTree,
    rules: &'a RuleSet,
    arch: &'a ArchConfig,
}

/// Mutable state of one resolution pass
#[derive(Debug, Default)]
struct Collector {
    devices: Vec<ResolvedDevice>,
    reserved: Vec<ReservedRegion>,
    ram: Vec<AddressRange>,
    names: BTreeMap<String, String>,
}

impl<'a> RuleEngine<'a> {
    /// Prepare an engine; nothing is evaluated until [`RuleEngine::resolve`]
    pub fn new(tree: &'a DeviceTree, rules: &'a RuleSet, arch: &'a ArchConfig) -> Self {
        Self { tree, rules, arch }
    }

    /// Classify every node and build the hardware model
    pub fn resolve(&self) -> Result<ResolvedHardwareModel> {
        let mut collector = Collector::default();

        for reservation in &self.tree.reservations {
            collector.reserved.push(ReservedRegion {
                range: AddressRange::new(reservation.address, reservation.size),
                origin: ReservedOrigin::MemReserve,
            });
        }

        for id in self.tree.ids().filter(|&id| id != DeviceTree::ROOT) {
            let node = self.tree.node(id);
            if node.is_memory() {
                if node.is_enabled() {
                    log::debug!("{}: RAM {:?}", node.path, node.reg);
                    collector.ram.extend(node.reg.iter().copied());
                }
                continue;
            }
            if !node.is_enabled() {
                log::debug!("{}: disabled, ranges stay reserved", node.path);
                collector.reserved.extend(node.reg.iter().map(|&range| ReservedRegion {
                    range,
                    origin: ReservedOrigin::Unclaimed(node.path.clone()),
                }));
                continue;
            }
            let resolution = self.evaluate(node)?;
            self.apply(id, node, resolution, &mut collector)?;
        }

        self.check_overlaps(&collector.devices)?;
        let untyped = self.untyped(&collector);

        log::info!(
            "resolved {} kernel devices, {} reserved devices, {} untyped regions",
            collector.devices.iter().filter(|d| d.is_kernel()).count(),
            collector.devices.iter().filter(|d| !d.is_kernel()).count(),
            untyped.len()
        );

        Ok(ResolvedHardwareModel {
            arch: self.arch.clone(),
            devices: collector.devices,
            untyped,
            reserved: collector.reserved,
        })
    }

    /// Run every rule against `node`: first match classifies, all matches layer overrides
    fn evaluate(&self, node: &DeviceTreeNode) -> Result<Resolution<'a>> {
        let mut resolution = Resolution::default();
        let path = node.path.as_str();

        for rule in self.rules.iter().filter(|r| r.rule.matcher.matches(node)) {
            if resolution.classified_by.is_none() {
                log::debug!("{path}: classified `{}` by rule `{}`", rule.rule.action, rule.label);
                resolution.classified_by = Some((rule.rule.action, &rule.label));
            }

            let overrides = &rule.rule.overrides;
            layer(&mut resolution.name, overrides.name.as_ref(), "name", rule, path)?;
            layer(&mut resolution.regions, overrides.regions.as_ref(), "regions", rule, path)?;
            layer(
                &mut resolution.interrupts,
                overrides.interrupts.as_ref(),
                "interrupts",
                rule,
                path,
            )?;
            layer(
                &mut resolution.address_less,
                overrides.address_less.as_ref(),
                "address-less",
                rule,
                path,
            )?;
            layer(&mut resolution.release, overrides.release.as_ref(), "release", rule, path)?;
        }
        Ok(resolution)
    }

    fn apply(
        &self,
        id: NodeId,
        node: &DeviceTreeNode,
        resolution: Resolution<'_>,
        collector: &mut Collector,
    ) -> Result<()> {
        let regions = match &resolution.regions {
            Some(layered) => narrow(node, &layered.value, layered.rule)?,
            None => node.reg.clone(),
        };

        let (action, rule) = match resolution.classified_by {
            Some((Action::Kernel, rule)) => (Classification::Kernel, rule),
            Some((Action::Reserved, rule)) => (Classification::Reserved, rule),
            Some((Action::Ignore, _)) | None => {
                let released = resolution.release.as_ref().is_some_and(|l| l.value);
                if released {
                    log::debug!("{}: released", node.path);
                } else {
                    collector.reserved.extend(regions.iter().map(|&range| ReservedRegion {
                        range,
                        origin: ReservedOrigin::Unclaimed(node.path.clone()),
                    }));
                }
                return Ok(());
            }
        };

        let address_less = resolution.address_less.as_ref().is_some_and(|l| l.value);
        if action == Classification::Kernel {
            self.check_bounds(node, rule, &regions)?;
            if regions.is_empty() && !address_less {
                return Err(Error::MissingRegion {
                    path: node.path.clone(),
                    rule: rule.to_owned(),
                });
            }
        } else {
            collector.reserved.extend(regions.iter().map(|&range| ReservedRegion {
                range,
                origin: ReservedOrigin::Rule(node.path.clone()),
            }));
        }

        let interrupts = match resolution.interrupts {
            Some(layered) => layered.value,
            None => node
                .interrupts
                .iter()
                .filter_map(|spec| spec.number(self.tree))
                .collect(),
        };

        let name = resolution
            .name
            .map(|layered| layered.value)
            .unwrap_or_else(|| derive_name(node));
        if let Some(first) = collector.names.get(&name) {
            return Err(RuleConflict::Name {
                name,
                first: first.clone(),
                second: node.path.clone(),
            }
            .into());
        }
        collector.names.insert(name.clone(), node.path.clone());

        collector.devices.push(ResolvedDevice {
            node: id,
            path: node.path.clone(),
            name,
            classification: action,
            compatible: node.compatible.clone(),
            regions,
            interrupts,
            address_less,
            rule: rule.to_owned(),
        });
        Ok(())
    }

    fn check_bounds(&self, node: &DeviceTreeNode, rule: &str, regions: &[AddressRange]) -> Result<()> {
        let max = self.arch.addrspace_max();
        match regions.iter().find(|r| r.end().is_none_or(|end| end > max)) {
            Some(&range) => Err(Error::AddressOverflow {
                path: node.path.clone(),
                rule: rule.to_owned(),
                range,
                max,
            }),
            None => Ok(()),
        }
    }

    fn check_overlaps(&self, devices: &[ResolvedDevice]) -> Result<()> {
        let mut claimed: Vec<(AddressRange, &str)> = devices
            .iter()
            .filter(|d| d.is_kernel())
            .flat_map(|d| d.regions.iter().map(move |r| (*r, d.path.as_str())))
            .filter(|(r, _)| !r.is_empty())
            .collect();
        claimed.sort();

        for pair in claimed.windows(2) {
            let ((first_range, first), (second_range, second)) = (pair[0], pair[1]);
            if first_range.overlaps(&second_range) {
                return Err(RuleConflict::Overlap {
                    first: first.to_owned(),
                    first_range,
                    second: second.to_owned(),
                    second_range,
                }
                .into());
            }
        }
        Ok(())
    }

    fn untyped(&self, collector: &Collector) -> Vec<UntypedRegion> {
        let max = self.arch.addrspace_max();
        let page_bits = self.arch.page_bits();

        let mut ram: RangeSet = collector.ram.iter().copied().collect();
        if collector.ram.iter().any(|r| r.end_saturating() > max) {
            log::warn!("RAM above addrspace_max 0x{max:x} is not usable and has been dropped");
        }
        ram.clip(max);

        let excluded: RangeSet = collector
            .devices
            .iter()
            .filter(|d| d.is_kernel())
            .flat_map(|d| d.regions.iter().copied())
            .chain(collector.reserved.iter().map(|r| r.range))
            .collect();

        let mut device: RangeSet = core::iter::once(AddressRange::new(0, max)).collect();
        device.sub_set(&ram);
        device.sub_set(&excluded);
        ram.sub_set(&excluded);

        let mut untyped: Vec<UntypedRegion> = ram
            .iter()
            .map(|r| (r, false))
            .chain(device.iter().map(|r| (r, true)))
            .filter_map(|(range, device)| {
                range
                    .align_inward(page_bits)
                    .map(|range| UntypedRegion { range, device })
            })
            .collect();
        untyped.sort_by_key(|u| u.range.base);
        untyped
    }
}

/// Apply region overrides to the node's translated ranges
fn narrow(node: &DeviceTreeNode, overrides: &[RegionOverride], rule: &str) -> Result<Vec<AddressRange>> {
    let invalid = |reason: String| Error::InvalidOverride {
        path: node.path.clone(),
        rule: rule.to_owned(),
        reason,
    };

    overrides
        .iter()
        .map(|o| {
            let entry = node.reg.get(o.index).ok_or_else(|| {
                invalid(format!(
                    "region index {} but the node has {} translated ranges",
                    o.index,
                    node.reg.len()
                ))
            })?;
            let size = match o.size {
                Some(size) => size,
                None => entry.size.saturating_sub(o.offset),
            };
            let narrowed = entry
                .base
                .checked_add(o.offset)
                .map(|base| AddressRange::new(base, size))
                .filter(|r| r.size > 0 && r.end().is_some() && entry.contains(r))
                .ok_or_else(|| {
                    invalid(format!(
                        "offset 0x{:x} size 0x{size:x} does not fit inside {entry}",
                        o.offset
                    ))
                })?;
            Ok(narrowed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchOverrides;
    use crate::dtb::DeviceTreeParser;
    use crate::dtb::builder::DtbBuilder;
    use crate::rules::rule::RuleFile;

    fn tree() -> DeviceTree {
        let mut b = DtbBuilder::new();
        b.reserve(0x4800_0000, 0x10_0000);
        b.begin_node("")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .begin_node("memory@40000000")
            .prop_str("device_type", "memory")
            .prop_cells("reg", &[0x4000_0000, 0x1000_0000])
            .end_node()
            .begin_node("intc@8000000")
            .prop_strs("compatible", &["arm,cortex-a15-gic"])
            .prop_cells("reg", &[0x0800_0000, 0x1_0000, 0x0801_0000, 0x1_0000])
            .prop_u32("#interrupt-cells", 3)
            .prop_empty("interrupt-controller")
            .prop_u32("phandle", 1)
            .end_node()
            .begin_node("pl011@9000000")
            .prop_strs("compatible", &["arm,pl011", "arm,primecell"])
            .prop_cells("reg", &[0x0900_0000, 0x1000])
            .prop_u32("interrupt-parent", 1)
            .prop_cells("interrupts", &[0, 1, 4])
            .end_node()
            .begin_node("rtc@9010000")
            .prop_strs("compatible", &["arm,pl031", "arm,primecell"])
            .prop_cells("reg", &[0x0901_0000, 0x1000])
            .end_node()
            .begin_node("flash@0")
            .prop_strs("compatible", &["cfi-flash"])
            .prop_cells("reg", &[0x0, 0x0400_0000])
            .end_node()
            .begin_node("gpio@9030000")
            .prop_strs("compatible", &["arm,pl061"])
            .prop_cells("reg", &[0x0903_0000, 0x1000])
            .prop_str("status", "disabled")
            .end_node()
            .end_node();
        DeviceTreeParser::new(&b.finish()).parse_tree().unwrap()
    }

    fn rules(yaml: &str) -> RuleSet {
        let file: RuleFile = serde_yaml::from_str(yaml).unwrap();
        RuleSet::new(file).unwrap()
    }

    fn arch() -> ArchConfig {
        ArchConfig::new("aarch32", ArchOverrides::default()).unwrap()
    }

    fn resolve(yaml: &str) -> Result<ResolvedHardwareModel> {
        let tree = tree();
        let rules = rules(yaml);
        let arch = arch();
        RuleEngine::new(&tree, &rules, &arch).resolve()
    }

    const KERNEL_UART_AND_GIC: &str = r#"
rules:
  - name: uart
    match: { compatible: ['arm,pl011'] }
    action: kernel
  - name: gic
    match: { compatible-prefix: "arm,cortex-a15" }
    action: kernel
"#;

    #[test]
    fn test_kernel_devices_in_document_order() {
        let model = resolve(KERNEL_UART_AND_GIC).unwrap();
        let names: Vec<_> = model.devices().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["CORTEX_A15_GIC_8000000", "PL011_9000000"]);

        let uart = model.device("PL011_9000000").unwrap();
        assert_eq!(uart.regions(), &[AddressRange::new(0x0900_0000, 0x1000)]);
        assert_eq!(uart.interrupts(), &[33]);
        assert_eq!(uart.rule(), "uart");
    }

    #[test]
    fn test_first_match_classifies() {
        let model = resolve(
            r#"
rules:
  - name: quiet
    match: { path: /pl011@9000000 }
    action: ignore
  - name: uart
    match: { compatible: ['arm,pl011'] }
    action: kernel
"#,
        )
        .unwrap();
        assert!(model.device("PL011_9000000").is_none());
        assert!(model.reserved().iter().any(|r| matches!(
            &r.origin,
            ReservedOrigin::Unclaimed(path) if path == "/pl011@9000000"
        )));
    }

    #[test]
    fn test_field_conflict_at_equal_specificity() {
        let result = resolve(
            r#"
rules:
  - name: a
    match: { compatible: ['arm,pl011'] }
    action: kernel
    overrides: { name: SERIAL }
  - name: b
    match: { compatible: ['arm,primecell'] }
    action: kernel
    overrides: { name: CONSOLE }
"#,
        );
        assert!(matches!(
            result,
            Err(Error::RuleConflict(RuleConflict::Field { field: "name", ref first, ref second, .. }))
                if first == "a" && second == "b"
        ));
    }

    #[test]
    fn test_more_specific_rule_replaces_field() {
        let model = resolve(
            r#"
rules:
  - name: broad
    match: { path: /pl011* }
    action: kernel
    overrides: { name: SERIAL }
  - name: exact
    match: { compatible: ['arm,pl011'] }
    action: reserved
    overrides: { name: CONSOLE }
"#,
        )
        .unwrap();
        let device = model.device("CONSOLE").unwrap();
        assert_eq!(device.classification(), Classification::Kernel);
        assert_eq!(device.rule(), "broad");
    }

    #[test]
    fn test_equal_values_do_not_conflict() {
        let model = resolve(
            r#"
rules:
  - match: any
    action: ignore
    overrides: { release: true }
  - match: { path: /** }
    action: kernel
    overrides: { release: true }
"#,
        )
        .unwrap();
        assert!(model.devices().is_empty());
        assert!(
            model
                .reserved()
                .iter()
                .all(|r| r.origin == ReservedOrigin::MemReserve)
        );
    }

    #[test]
    fn test_overflow() {
        let tree = tree();
        let rules = rules(KERNEL_UART_AND_GIC);
        let overrides = ArchOverrides {
            addrspace_max: Some(0x0900_0800),
            ..ArchOverrides::default()
        };
        let arch = ArchConfig::new("aarch32", overrides).unwrap();
        let result = RuleEngine::new(&tree, &rules, &arch).resolve();
        assert!(matches!(
            result,
            Err(Error::AddressOverflow { ref path, max: 0x0900_0800, .. }) if path == "/pl011@9000000"
        ));
    }

    #[test]
    fn test_range_ending_at_max_is_accepted() {
        let tree = tree();
        let rules = rules(KERNEL_UART_AND_GIC);
        let overrides = ArchOverrides {
            addrspace_max: Some(0x0900_1000),
            ..ArchOverrides::default()
        };
        let arch = ArchConfig::new("aarch32", overrides).unwrap();
        assert!(RuleEngine::new(&tree, &rules, &arch).resolve().is_ok());
    }

    #[test]
    fn test_disjoint_kernel_devices() {
        let model = resolve(
            r#"
rules:
  - name: uart
    match: { compatible: ['arm,pl011'] }
    action: kernel
  - name: rtc
    match: { compatible: ['arm,pl031'] }
    action: kernel
  - name: rtc-irq
    match: { path: /rtc@9010000 }
    action: ignore
    overrides: { interrupts: [2] }
  - name: flash
    match: { path: /flash@0 }
    action: kernel
"#,
        )
        .unwrap();
        let kernel: Vec<_> = model.kernel_devices().map(|d| d.path()).collect();
        assert_eq!(kernel, vec!["/pl011@9000000", "/rtc@9010000", "/flash@0"]);
        assert_eq!(model.device("PL031_9010000").unwrap().interrupts(), &[2]);
    }

    #[test]
    fn test_overlapping_kernel_devices_fail() {
        let mut b = DtbBuilder::new();
        b.begin_node("")
            .prop_u32("#address-cells", 1)
            .prop_u32("#size-cells", 1)
            .begin_node("uart@1000")
            .prop_strs("compatible", &["ns16550a"])
            .prop_cells("reg", &[0x1000, 0x1000])
            .end_node()
            .begin_node("timer@1800")
            .prop_strs("compatible", &["vendor,timer"])
            .prop_cells("reg", &[0x1800, 0x100])
            .end_node()
            .end_node();
        let tree = DeviceTreeParser::new(&b.finish()).parse_tree().unwrap();
        let rules = rules("rules:\n  - match: any\n    action: kernel\n");
        let arch = arch();

        let result = RuleEngine::new(&tree, &rules, &arch).resolve();
        assert!(matches!(
            result,
            Err(Error::RuleConflict(RuleConflict::Overlap { ref first, ref second, .. }))
                if first == "/uart@1000" && second == "/timer@1800"
        ));
    }

    #[test]
    fn test_name_collision() {
        let result = resolve(
            r#"
rules:
  - match: { compatible: ['arm,pl011'] }
    action: kernel
    overrides: { name: DEV }
  - match: { compatible: ['arm,pl031'] }
    action: reserved
    overrides: { name: DEV }
"#,
        );
        assert!(matches!(
            result,
            Err(Error::RuleConflict(RuleConflict::Name { ref name, .. })) if name == "DEV"
        ));
    }

    #[test]
    fn test_missing_region() {
        let mut b = DtbBuilder::new();
        b.begin_node("")
            .begin_node("psci")
            .prop_strs("compatible", &["arm,psci-1.0"])
            .end_node()
            .end_node();
        let tree = DeviceTreeParser::new(&b.finish()).parse_tree().unwrap();
        let arch = arch();

        let strict = rules("rules:\n  - match: { compatible: ['arm,psci-1.0'] }\n    action: kernel\n");
        assert!(matches!(
            RuleEngine::new(&tree, &strict, &arch).resolve(),
            Err(Error::MissingRegion { ref path, .. }) if path == "/psci"
        ));

        let marked = rules(
            "rules:\n  - match: { compatible: ['arm,psci-1.0'] }\n    action: kernel\n    overrides: { address-less: true }\n",
        );
        let model = RuleEngine::new(&tree, &marked, &arch).resolve().unwrap();
        assert!(model.device("PSCI_1_0").unwrap().is_address_less());
    }

    #[test]
    fn test_region_narrowing() {
        let model = resolve(
            r#"
rules:
  - match: { compatible: ['arm,cortex-a15-gic'] }
    action: kernel
    overrides:
      regions: [ { index: 1, offset: 0x1000, size: 0x2000 } ]
"#,
        )
        .unwrap();
        let gic = model.kernel_devices().next().unwrap();
        assert_eq!(gic.regions(), &[AddressRange::new(0x0801_1000, 0x2000)]);
    }

    #[test]
    fn test_region_narrowing_out_of_bounds() {
        let result = resolve(
            r#"
rules:
  - match: { compatible: ['arm,pl011'] }
    action: kernel
    overrides:
      regions: [ { index: 0, offset: 0x800, size: 0x1000 } ]
"#,
        );
        assert!(matches!(result, Err(Error::InvalidOverride { .. })));

        let result = resolve(
            r#"
rules:
  - match: { compatible: ['arm,pl011'] }
    action: kernel
    overrides:
      regions: [ { index: 3 } ]
"#,
        );
        assert!(matches!(result, Err(Error::InvalidOverride { .. })));
    }

    #[test]
    fn test_disabled_nodes_never_match() {
        let model = resolve(
            r#"
rules:
  - match: { compatible: ['arm,pl061'] }
    action: kernel
  - match: any
    action: ignore
    overrides: { release: true }
"#,
        )
        .unwrap();
        assert!(model.devices().is_empty());

        let gpio = AddressRange::new(0x0903_0000, 0x1000);
        assert!(model.reserved().iter().any(|r| r.range == gpio
            && r.origin == ReservedOrigin::Unclaimed("/gpio@9030000".to_owned())));
        assert!(model.device_regions().all(|r| !r.overlaps(&gpio)));
    }

    #[test]
    fn test_untyped_regions() {
        let model = resolve(
            r#"
rules:
  - match: { compatible: ['arm,pl011'] }
    action: kernel
  - match: any
    action: ignore
    overrides: { release: true }
"#,
        )
        .unwrap();

        let ram: Vec<_> = model.ram_regions().collect();
        assert_eq!(
            ram,
            vec![
                AddressRange::new(0x4000_0000, 0x0800_0000),
                AddressRange::new(0x4810_0000, 0x07f0_0000),
            ]
        );

        let device: Vec<_> = model.device_regions().collect();
        assert_eq!(
            device,
            vec![
                AddressRange::new(0, 0x0900_0000),
                AddressRange::new(0x0900_1000, 0x0903_0000 - 0x0900_1000),
                AddressRange::new(0x0903_1000, 0x4000_0000 - 0x0903_1000),
                AddressRange::new(0x5000_0000, 0xb000_0000),
            ]
        );
        assert!(model.untyped().windows(2).all(|w| w[0].range.base < w[1].range.base));
    }

    #[test]
    fn test_unclaimed_ranges_stay_out_of_untyped() {
        let model = resolve("rules: []\n").unwrap();
        let rtc = AddressRange::new(0x0901_0000, 0x1000);
        assert!(model.device_regions().all(|r| !r.overlaps(&rtc)));
        assert!(model.reserved().iter().any(|r| r.range == rtc));
    }
}
