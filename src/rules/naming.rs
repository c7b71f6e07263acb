// ABOUTME: Stable symbolic names for resolved devices
// ABOUTME: Derived from the primary compatible string and the unit address

use crate::dtb::DeviceTreeNode;

/// Name derived from the primary compatible string and the unit address.
///
/// `arm,pl011` at `/pl011@9000000` becomes `PL011_9000000`. Nodes without a
/// compatible string fall back to their base name.
pub fn derive_name(node: &DeviceTreeNode) -> String {
    let stem = node
        .compatible
        .first()
        .map(|c| c.rsplit(',').next().unwrap_or(c))
        .unwrap_or_else(|| node.base_name());

    let mut name = sanitize(stem);
    if let Some(unit) = node.unit_address() {
        name.push('_');
        name.push_str(&sanitize(unit));
    }
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn node(name: &str, compatible: &[&str]) -> DeviceTreeNode {
        let mut node = DeviceTreeNode::new(name.to_owned(), format!("/{name}"), None);
        node.compatible = compatible.iter().map(|c| (*c).to_owned()).collect();
        node
    }

    #[test_case("pl011@9000000", &["arm,pl011", "arm,primecell"] => "PL011_9000000"; "vendor prefix dropped")]
    #[test_case("intc@8000000", &["arm,cortex-a15-gic"] => "CORTEX_A15_GIC_8000000"; "dashes")]
    #[test_case("timer", &["arm,armv8-timer"] => "ARMV8_TIMER"; "no unit address")]
    #[test_case("serial@10000000", &["ns16550a"] => "NS16550A_10000000"; "no vendor")]
    #[test_case("watchdog@1,2", &[] => "WATCHDOG_1_2"; "no compatible")]
    #[test_case("clk@0", &["fixed,100mhz"] => "_100MHZ_0"; "leading digit")]
    fn test_derive_name(name: &str, compatible: &[&str]) -> String {
        derive_name(&node(name, compatible))
    }
}
