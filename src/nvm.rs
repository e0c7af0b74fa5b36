// Page-level access to the non-volatile log pool.
//
// The pool is a run of flash pages addressed by pool page index.  Pool page 0 is the
// highest page of the region and each following index is one page lower, so logs laid
// out on consecutive indices rotate through descending addresses.  Drivers do the index
// to address mapping, nothing above this layer does pointer arithmetic.
//
// Flash semantics are assumed: an erased page reads as all 0xff and writes can only
// clear bits.

use crate::byte_slice_cursor::{Cursor, CursorMut};
use crate::constants::{
    FLASH_PAGE_SIZE, MAX_LOGS, MAX_PAGES_PER_LOG, NVM_LOG_PAGE0_ADDRESS, PAGE_METADATA_LEN,
};
use crc::{Crc, CRC_16_XMODEM};

pub const ERASED_BYTE: u8 = 0xff;
pub const MEMORY_AVAILABLE: u32 = 0x0000_0000;
pub const MEMORY_FULL: u32 = 0xffff_ffff;

const FOOTER_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum NvmError {
    OutOfRange,
    Misaligned,
    WriteFailed,
    EraseFailed,
}

pub trait NvmStorage {
    /// Number of pages in the log pool.
    fn page_count(&self) -> usize;
    fn read(&mut self, page: usize, offset: usize, buf: &mut [u8]) -> Result<(), NvmError>;
    /// Programs `data` at `offset`.  Bits can only go from 1 to 0.
    fn write(&mut self, page: usize, offset: usize, data: &[u8]) -> Result<(), NvmError>;
    fn erase_page(&mut self, page: usize) -> Result<(), NvmError>;
}

/// Physical address of a pool page on the nRF52 flash map.
pub const fn pool_page_address(page: usize) -> u32 {
    NVM_LOG_PAGE0_ADDRESS - (page * FLASH_PAGE_SIZE) as u32
}

pub fn check_bounds(
    page_count: usize,
    page: usize,
    offset: usize,
    len: usize,
) -> Result<(), NvmError> {
    if page >= page_count || offset + len > FLASH_PAGE_SIZE {
        Err(NvmError::OutOfRange)
    } else {
        Ok(())
    }
}

/// Whether `len` bytes at `offset` still read as erased.
pub fn is_blank<F: NvmStorage + ?Sized>(
    flash: &mut F,
    page: usize,
    offset: usize,
    len: usize,
) -> Result<bool, NvmError> {
    let mut chunk = [0u8; 64];
    let mut done = 0;
    while done < len {
        let n = (len - done).min(chunk.len());
        flash.read(page, offset + done, &mut chunk[..n])?;
        if chunk[..n].iter().any(|&b| b != ERASED_BYTE) {
            return Ok(false);
        }
        done += n;
    }
    Ok(true)
}

/// Footer stored at the end of every claimed page.
///
/// | bytes  | field                                              |
/// |--------|----------------------------------------------------|
/// | 0      | owning log id                                      |
/// | 1      | position of this page in the log's ring            |
/// | 2..4   | declared record size in bytes                      |
/// | 4..8   | availability sentinel                              |
/// | 8..12  | pool index of the next page in the ring            |
/// | 12..14 | CRC-16 over bytes 0..4 and 8..12                   |
/// | 14..16 | reserved, left erased                              |
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageMetadata {
    pub log_id: u8,
    pub log_page_no: u8,
    pub data_size: u16,
    pub availability: u32,
    pub next_page: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Footer {
    Erased,
    /// Partially written or otherwise unusable, the page counts as free.
    Invalid,
    Claimed(PageMetadata),
}

impl PageMetadata {
    fn crc(&self) -> u16 {
        let mut digest = FOOTER_CRC.digest();
        digest.update(&[self.log_id, self.log_page_no]);
        digest.update(&self.data_size.to_le_bytes());
        digest.update(&self.next_page.to_le_bytes());
        digest.finalize()
    }

    pub fn is_available(&self) -> bool {
        self.availability == MEMORY_AVAILABLE
    }

    pub fn to_bytes(&self) -> [u8; PAGE_METADATA_LEN] {
        let mut bytes = [ERASED_BYTE; PAGE_METADATA_LEN];
        let mut cursor = CursorMut::new(&mut bytes);
        // The footer buffer is sized for every field, these writes cannot run out of room.
        let _ = cursor.write_u8(self.log_id);
        let _ = cursor.write_u8(self.log_page_no);
        let _ = cursor.write_u16(self.data_size);
        let _ = cursor.write_u32(self.availability);
        let _ = cursor.write_u32(self.next_page);
        let _ = cursor.write_u16(self.crc());
        bytes
    }

    fn parse(bytes: &[u8]) -> Option<(PageMetadata, u16)> {
        let mut cursor = Cursor::new(bytes);
        let meta = PageMetadata {
            log_id: cursor.read_u8()?,
            log_page_no: cursor.read_u8()?,
            data_size: cursor.read_u16()?,
            availability: cursor.read_u32()?,
            next_page: cursor.read_u32()?,
        };
        let crc = cursor.read_u16()?;
        Some((meta, crc))
    }

    pub fn decode(bytes: &[u8]) -> Footer {
        if bytes.iter().all(|&b| b == ERASED_BYTE) {
            return Footer::Erased;
        }
        let parsed = Self::parse(bytes);
        match parsed {
            Some((meta, crc))
                if crc == meta.crc()
                    && usize::from(meta.log_id) < MAX_LOGS
                    && usize::from(meta.log_page_no) < MAX_PAGES_PER_LOG
                    && meta.data_size != 0 =>
            {
                Footer::Claimed(meta)
            }
            _ => Footer::Invalid,
        }
    }
}
