// ABOUTME: DTB header structure definitions and parsing
// ABOUTME: Handles the 40-byte device tree blob header format and its sanity checks

use super::error::DtbError;

/// DTB header structure (40 bytes total)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtbHeader {
    /// Magic number (should be 0xd00dfeed)
    pub magic: u32,
    /// Total size of the DTB
    pub totalsize: u32,
    /// Offset to structure block
    pub off_dt_struct: u32,
    /// Offset to strings block
    pub off_dt_strings: u32,
    /// Offset to memory reservation block
    pub off_mem_rsvmap: u32,
    /// Version of the DTB format
    pub version: u32,
    /// Last compatible version
    pub last_comp_version: u32,
    /// Boot CPU ID
    pub boot_cpuid_phys: u32,
    /// Size of strings block
    pub size_dt_strings: u32,
    /// Size of structure block (version 17 and later)
    pub size_dt_struct: u32,
}

impl DtbHeader {
    /// DTB magic number constant
    pub const MAGIC: u32 = 0xd00d_feed;

    /// Header size in bytes
    pub const SIZE: usize = 40;

    /// Oldest format version we read
    pub const MIN_VERSION: u32 = 16;

    /// Newest format version we understand
    pub const MAX_COMPAT_VERSION: u32 = 17;

    /// Parse DTB header from input bytes.
    ///
    /// Only the raw fields are decoded here; [`DtbHeader::validate`] checks
    /// them against the blob.
    pub fn parse(input: &[u8]) -> Result<Self, DtbError> {
        if input.len() < Self::SIZE {
            return Err(DtbError::Truncated {
                needed: Self::SIZE,
                actual: input.len(),
            });
        }

        let mut fields = [0u32; 10];
        for (field, chunk) in fields.iter_mut().zip(input[..Self::SIZE].chunks_exact(4)) {
            *field = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let [
            magic,
            totalsize,
            off_dt_struct,
            off_dt_strings,
            off_mem_rsvmap,
            version,
            last_comp_version,
            boot_cpuid_phys,
            size_dt_strings,
            size_dt_struct,
        ] = fields;

        if magic != Self::MAGIC {
            return Err(DtbError::InvalidMagic { found: magic });
        }

        Ok(DtbHeader {
            magic,
            totalsize,
            off_dt_struct,
            off_dt_strings,
            off_mem_rsvmap,
            version,
            last_comp_version,
            boot_cpuid_phys,
            size_dt_strings,
            size_dt_struct,
        })
    }

    /// Check the header against the blob it was read from.
    pub fn validate(&self, blob_len: usize) -> Result<(), DtbError> {
        let total = self.totalsize as usize;
        if total > blob_len {
            return Err(DtbError::Truncated {
                needed: total,
                actual: blob_len,
            });
        }
        if total < Self::SIZE {
            return Err(DtbError::MalformedHeader("total size smaller than header"));
        }
        if self.version < Self::MIN_VERSION || self.last_comp_version > Self::MAX_COMPAT_VERSION {
            return Err(DtbError::UnsupportedVersion {
                version: self.version,
                last_comp_version: self.last_comp_version,
            });
        }
        if self.off_dt_struct % 4 != 0 {
            return Err(DtbError::MalformedHeader("structure block is not 4-byte aligned"));
        }
        if self.off_mem_rsvmap % 8 != 0 {
            return Err(DtbError::MalformedHeader("reservation block is not 8-byte aligned"));
        }

        let (struct_start, struct_end) = self.struct_block_bounds();
        if struct_start < Self::SIZE || struct_start > struct_end || struct_end > total {
            return Err(DtbError::MalformedHeader("structure block outside blob"));
        }
        let (strings_start, strings_end) = self.strings_block_bounds();
        if strings_start < Self::SIZE || strings_end > total {
            return Err(DtbError::MalformedHeader("strings block outside blob"));
        }
        let rsvmap = self.off_mem_rsvmap as usize;
        if rsvmap < Self::SIZE || rsvmap >= total {
            return Err(DtbError::MalformedHeader("reservation block outside blob"));
        }

        Ok(())
    }

    /// Start and end offsets of the structure block.
    ///
    /// Version 16 blobs have no `size_dt_struct`; the block runs to the end of the blob.
    pub fn struct_block_bounds(&self) -> (usize, usize) {
        let start = self.off_dt_struct as usize;
        let end = if self.version >= 17 {
            start.saturating_add(self.size_dt_struct as usize)
        } else {
            self.totalsize as usize
        };
        (start, end)
    }

    /// Start and end offsets of the strings block.
    pub fn strings_block_bounds(&self) -> (usize, usize) {
        let start = self.off_dt_strings as usize;
        (start, start.saturating_add(self.size_dt_strings as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn header_bytes(fields: [u32; 10]) -> Vec<u8> {
        fields.iter().flat_map(|f| f.to_be_bytes()).collect()
    }

    #[test]
    fn test_header_parse_valid() {
        let mut header_data = vec![0u8; 40];
        header_data[0..4].copy_from_slice(&0xd00dfeedu32.to_be_bytes());
        header_data[4..8].copy_from_slice(&1024u32.to_be_bytes());

        let header = DtbHeader::parse(&header_data).unwrap();
        assert_eq!(header.magic, DtbHeader::MAGIC);
        assert_eq!(header.totalsize, 1024);
    }

    #[test]
    fn test_header_parse_invalid_magic() {
        let mut header_data = vec![0u8; 40];
        header_data[0..4].copy_from_slice(&0x12345678u32.to_be_bytes());

        let result = DtbHeader::parse(&header_data);
        assert_eq!(result, Err(DtbError::InvalidMagic { found: 0x12345678 }));
    }

    #[test]
    fn test_header_parse_short_input() {
        let result = DtbHeader::parse(&[0xd0, 0x0d, 0xfe, 0xed]);
        assert_eq!(
            result,
            Err(DtbError::Truncated {
                needed: 40,
                actual: 4
            })
        );
    }

    #[test]
    fn test_validate_rejects_declared_size_beyond_blob() {
        let data = header_bytes([DtbHeader::MAGIC, 200, 56, 100, 40, 17, 16, 0, 8, 40]);
        let header = DtbHeader::parse(&data).unwrap();
        assert_eq!(
            header.validate(data.len()),
            Err(DtbError::Truncated {
                needed: 200,
                actual: 40
            })
        );
    }

    #[test]
    fn test_validate_rejects_old_version() {
        let data = header_bytes([DtbHeader::MAGIC, 40, 40, 40, 40, 3, 2, 0, 0, 0]);
        let header = DtbHeader::parse(&data).unwrap();
        assert!(matches!(
            header.validate(data.len()),
            Err(DtbError::UnsupportedVersion { version: 3, .. })
        ));
    }

    #[test]
    fn test_v16_struct_block_runs_to_end() {
        let data = header_bytes([DtbHeader::MAGIC, 128, 56, 100, 40, 16, 16, 0, 8, 0]);
        let header = DtbHeader::parse(&data).unwrap();
        assert_eq!(header.struct_block_bounds(), (56, 128));
    }
}
