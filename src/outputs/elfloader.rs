// ABOUTME: Bootloader device table backend
// ABOUTME: Emits a C array describing every MMIO window of every kernel device

use super::hex;
use crate::model::ResolvedHardwareModel;
use core::fmt::{self, Write};

/// Render the bootloader device table
pub fn render(model: &ResolvedHardwareModel) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "/*")?;
    writeln!(out, " * Generated by hwgen for {}. Do not edit.", model.arch().arch())?;
    writeln!(out, " */")?;
    writeln!(out)?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;
    writeln!(out, "struct elfloader_device {{")?;
    writeln!(out, "    const char *name;")?;
    writeln!(out, "    const char *compatible;")?;
    writeln!(out, "    uint64_t paddr;")?;
    writeln!(out, "    uint64_t size;")?;
    writeln!(out, "}};")?;
    writeln!(out)?;

    let entries: Vec<_> = model
        .kernel_devices()
        .flat_map(|d| d.regions().iter().map(move |r| (d, r)))
        .collect();

    writeln!(out, "#define ELFLOADER_NUM_DEVICES {}", entries.len())?;
    if entries.is_empty() {
        return Ok(out);
    }
    writeln!(out, "static const struct elfloader_device elfloader_devices[] = {{")?;
    for (device, region) in entries {
        let compatible = device.compatible().first().map_or("", String::as_str);
        writeln!(out, "    {{")?;
        writeln!(out, "        .name = \"{}\",", device.name())?;
        writeln!(out, "        .compatible = \"{}\",", c_escape(compatible))?;
        writeln!(out, "        .paddr = {},", hex(region.base))?;
        writeln!(out, "        .size = {},", hex(region.size))?;
        writeln!(out, "    }},")?;
    }
    writeln!(out, "}};")?;
    Ok(out)
}

fn c_escape(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            c => vec![c],
        })
        .collect()
}
