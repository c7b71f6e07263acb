// ABOUTME: Serializer producing version 17 device tree blobs
// ABOUTME: Used to synthesize fixtures for tests and benchmarks

use super::header::DtbHeader;
use super::tokens::DtbToken;
use alloc::{collections::BTreeMap, string::String, vec::Vec};

/// Incrementally assembles a flattened device tree blob.
///
/// Calls mirror the structure block: `begin_node`, properties, `end_node`.
/// Balancing the calls is left to the caller, so malformed blobs can be
/// produced on purpose.
///
/// ```
/// use hwgen::dtb::builder::DtbBuilder;
///
/// let mut b = DtbBuilder::new();
/// b.begin_node("").prop_u32("#address-cells", 1).end_node();
/// let blob = b.finish();
/// assert_eq!(&blob[..4], &0xd00d_feedu32.to_be_bytes());
/// ```
#[derive(Debug, Default, Clone)]
pub struct DtbBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
    string_offsets: BTreeMap<String, u32>,
    reservations: Vec<(u64, u64)>,
    boot_cpuid: u32,
}

impl DtbBuilder {
    /// Start an empty blob
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self, token: DtbToken) {
        self.structure.extend_from_slice(&token.to_u32().to_be_bytes());
    }

    fn pad(&mut self) {
        let padding = DtbToken::calculate_padding(self.structure.len());
        self.structure.resize(self.structure.len() + padding, 0);
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some(&offset) = self.string_offsets.get(name) {
            return offset;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.string_offsets.insert(String::from(name), offset);
        offset
    }

    /// Open a node; the root is named `""`
    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.token(DtbToken::BeginNode);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad();
        self
    }

    /// Close the innermost open node
    pub fn end_node(&mut self) -> &mut Self {
        self.token(DtbToken::EndNode);
        self
    }

    /// Insert a no-op token
    pub fn nop(&mut self) -> &mut Self {
        self.token(DtbToken::Nop);
        self
    }

    /// Add a property with raw bytes
    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let name_offset = self.string_offset(name);
        self.token(DtbToken::Property);
        self.structure
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structure.extend_from_slice(&name_offset.to_be_bytes());
        self.structure.extend_from_slice(value);
        self.pad();
        self
    }

    /// Add a property without a value
    pub fn prop_empty(&mut self, name: &str) -> &mut Self {
        self.prop(name, &[])
    }

    /// Add a single-cell property
    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    /// Add a property made of u32 cells
    pub fn prop_cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
        let bytes: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.prop(name, &bytes)
    }

    /// Add a string property
    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        self.prop_strs(name, &[value])
    }

    /// Add a string list property
    pub fn prop_strs(&mut self, name: &str, values: &[&str]) -> &mut Self {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(value.as_bytes());
            bytes.push(0);
        }
        self.prop(name, &bytes)
    }

    /// Add a memory reservation block entry
    pub fn reserve(&mut self, address: u64, size: u64) -> &mut Self {
        self.reservations.push((address, size));
        self
    }

    /// Set the boot CPU id recorded in the header
    pub fn boot_cpuid(&mut self, id: u32) -> &mut Self {
        self.boot_cpuid = id;
        self
    }

    /// Lay out header, reservation block, structure block and strings block
    pub fn finish(mut self) -> Vec<u8> {
        self.token(DtbToken::End);

        let off_mem_rsvmap = DtbHeader::SIZE;
        let rsvmap_len = (self.reservations.len() + 1) * 16;
        let off_dt_struct = off_mem_rsvmap + rsvmap_len;
        let off_dt_strings = off_dt_struct + self.structure.len();
        let totalsize = off_dt_strings + self.strings.len();

        let fields = [
            DtbHeader::MAGIC,
            totalsize as u32,
            off_dt_struct as u32,
            off_dt_strings as u32,
            off_mem_rsvmap as u32,
            17,
            16,
            self.boot_cpuid,
            self.strings.len() as u32,
            self.structure.len() as u32,
        ];

        let mut blob = Vec::with_capacity(totalsize);
        for field in fields {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        for (address, size) in self.reservations.iter().chain([(0, 0)].iter()) {
            blob.extend_from_slice(&address.to_be_bytes());
            blob.extend_from_slice(&size.to_be_bytes());
        }
        blob.extend_from_slice(&self.structure);
        blob.extend_from_slice(&self.strings);
        blob
    }
}
