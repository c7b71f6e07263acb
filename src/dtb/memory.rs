// ABOUTME: Memory reservation block parsing for device tree blobs
// ABOUTME: Handles (address, size) pairs terminated by a zero entry

use super::error::DtbError;
use super::tokens::read_be_u64;
use alloc::vec::Vec;

/// Memory reservation entry with address and size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReservation {
    /// Physical address of reserved memory region
    pub address: u64,
    /// Size of reserved memory region
    pub size: u64,
}

impl MemoryReservation {
    /// Size of each reservation entry in bytes (address + size)
    pub const SIZE: usize = 16;

    /// Parse every reservation starting at `offset`, up to the terminating (0, 0) entry.
    ///
    /// `blob` must already be cut to the header's total size so a missing
    /// terminator is reported instead of read past.
    pub fn parse_all(blob: &[u8], offset: usize) -> Result<Vec<Self>, DtbError> {
        let mut reservations = Vec::new();
        let mut offset = offset;

        if offset % 8 != 0 {
            return Err(DtbError::Malformed {
                what: "unaligned memory reservation block",
                offset,
            });
        }

        loop {
            let missing_terminator = DtbError::Malformed {
                what: "unterminated memory reservation block",
                offset,
            };
            let address = read_be_u64(blob, offset).ok_or(missing_terminator.clone())?;
            let size = read_be_u64(blob, offset + 8).ok_or(missing_terminator)?;
            offset += Self::SIZE;

            // Check for terminating entry (0, 0)
            if address == 0 && size == 0 {
                break;
            }

            reservations.push(MemoryReservation { address, size });
        }

        Ok(reservations)
    }
}
