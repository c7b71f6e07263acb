// ABOUTME: Kernel header backend
// ABOUTME: Emits per-device address and interrupt constants plus physical region tables

use super::hex;
use crate::model::{ResolvedDevice, ResolvedHardwareModel};
use crate::region::AddressRange;
use core::fmt::{self, Write};

/// Render the kernel header
pub fn render(model: &ResolvedHardwareModel) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let arch = model.arch();

    writeln!(out, "/*")?;
    writeln!(out, " * Generated by hwgen for {}. Do not edit.", arch.arch())?;
    writeln!(out, " */")?;
    writeln!(out)?;
    writeln!(out, "#pragma once")?;
    writeln!(out)?;
    writeln!(out, "#define PHYS_ADDR_SPACE_MAX {}", hex(arch.addrspace_max()))?;
    writeln!(out, "#define PAGE_BITS {}", arch.page_bits())?;

    for device in model.kernel_devices() {
        writeln!(out)?;
        write_device(&mut out, device)?;
    }

    let ram: Vec<_> = model.ram_regions().collect();
    let dev: Vec<_> = model.device_regions().collect();
    let reserved: Vec<_> = model.reserved().iter().map(|r| r.range).collect();
    write_table(&mut out, "avail_p_regs", "NUM_AVAIL_P_REGS", &ram)?;
    write_table(&mut out, "dev_p_regs", "NUM_DEV_P_REGS", &dev)?;
    write_table(&mut out, "reserved_p_regs", "NUM_RESERVED_P_REGS", &reserved)?;
    Ok(out)
}

fn write_device(out: &mut String, device: &ResolvedDevice) -> fmt::Result {
    writeln!(out, "/* {} (rule `{}`) */", device.path(), device.rule())?;
    let name = device.name();

    match device.regions() {
        [] => writeln!(out, "/* no MMIO */")?,
        [region] => {
            writeln!(out, "#define {name}_PADDR {}", hex(region.base))?;
            writeln!(out, "#define {name}_SIZE {}", hex(region.size))?;
        }
        regions => {
            for (i, region) in regions.iter().enumerate() {
                writeln!(out, "#define {name}_PADDR_{i} {}", hex(region.base))?;
                writeln!(out, "#define {name}_SIZE_{i} {}", hex(region.size))?;
            }
        }
    }

    match device.interrupts() {
        [] => {}
        [irq] => writeln!(out, "#define {name}_IRQ {irq}")?,
        irqs => {
            for (i, irq) in irqs.iter().enumerate() {
                writeln!(out, "#define {name}_IRQ_{i} {irq}")?;
            }
        }
    }
    Ok(())
}

fn write_table(out: &mut String, table: &str, count: &str, ranges: &[AddressRange]) -> fmt::Result {
    writeln!(out)?;
    writeln!(out, "#define {count} {}", ranges.len())?;
    // Zero-length arrays are not valid C.
    if ranges.is_empty() {
        return Ok(());
    }
    writeln!(out, "static const p_region_t {table}[] = {{")?;
    for range in ranges {
        writeln!(
            out,
            "    {{ .start = {}, .end = {} }},",
            hex(range.base),
            hex(range.end_saturating())
        )?;
    }
    writeln!(out, "}};")
}
