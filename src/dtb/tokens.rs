// ABOUTME: DTB structure block token definitions and parsing
// ABOUTME: Handles the structure block tokens with 4-byte alignment

use super::error::DtbError;

/// DTB token constants as defined in the device tree specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtbToken {
    /// Begin node token (0x00000001)
    BeginNode,
    /// End node token (0x00000002)
    EndNode,
    /// Property token (0x00000003)
    Property,
    /// No-op token (0x00000004)
    Nop,
    /// End of structure token (0x00000009)
    End,
}

impl DtbToken {
    /// Begin node token constant
    pub const FDT_BEGIN_NODE: u32 = 0x00000001;
    /// End node token constant
    pub const FDT_END_NODE: u32 = 0x00000002;
    /// Property token constant
    pub const FDT_PROP: u32 = 0x00000003;
    /// No-op token constant
    pub const FDT_NOP: u32 = 0x00000004;
    /// End of structure token constant
    pub const FDT_END: u32 = 0x00000009;

    /// Convert u32 value to DtbToken, `None` for unknown values
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            Self::FDT_BEGIN_NODE => Some(DtbToken::BeginNode),
            Self::FDT_END_NODE => Some(DtbToken::EndNode),
            Self::FDT_PROP => Some(DtbToken::Property),
            Self::FDT_NOP => Some(DtbToken::Nop),
            Self::FDT_END => Some(DtbToken::End),
            _ => None,
        }
    }

    /// Convert DtbToken to u32 value
    pub fn to_u32(self) -> u32 {
        match self {
            DtbToken::BeginNode => Self::FDT_BEGIN_NODE,
            DtbToken::EndNode => Self::FDT_END_NODE,
            DtbToken::Property => Self::FDT_PROP,
            DtbToken::Nop => Self::FDT_NOP,
            DtbToken::End => Self::FDT_END,
        }
    }

    /// Parse the token at `offset` of `blob`, returning the offset just past it.
    pub fn parse(blob: &[u8], offset: usize) -> Result<(usize, Self), DtbError> {
        if offset % 4 != 0 {
            return Err(DtbError::Malformed {
                what: "unaligned token",
                offset,
            });
        }

        let token_value = read_be_u32(blob, offset).ok_or(DtbError::Malformed {
            what: "structure block ending mid-token",
            offset,
        })?;

        let token = Self::from_u32(token_value).ok_or(DtbError::InvalidToken {
            token: token_value,
            offset,
        })?;
        Ok((offset + 4, token))
    }

    /// Calculate padding needed for 4-byte alignment
    pub fn calculate_padding(offset: usize) -> usize {
        (4 - (offset % 4)) % 4
    }

    /// Round an offset up to the next 4-byte boundary
    pub fn align(offset: usize) -> usize {
        offset + Self::calculate_padding(offset)
    }
}

/// Read a big-endian u32 at `offset`, `None` when out of bounds
pub(crate) fn read_be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a big-endian u64 at `offset`, `None` when out of bounds
pub(crate) fn read_be_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_be_bytes(raw))
}
