use crate::constants::{FLASH_PAGE_SIZE, MAX_POOL_PAGES, WORD_SIZE};
use crate::nvm::{check_bounds, pool_page_address, NvmError, NvmStorage, ERASED_BYTE};
use core::ptr;

// Register map from the nRF52832 product specification, section 11.
const NVMC_BASE: u32 = 0x4001_E000;
const NVMC_READY: *const u32 = (NVMC_BASE + 0x400) as *const u32;
const NVMC_CONFIG: *mut u32 = (NVMC_BASE + 0x504) as *mut u32;
const NVMC_ERASEPAGE: *mut u32 = (NVMC_BASE + 0x508) as *mut u32;

const CONFIG_READ_ONLY: u32 = 0;
const CONFIG_WRITE_ENABLE: u32 = 1;
const CONFIG_ERASE_ENABLE: u32 = 2;

/// Page driver for the nRF52 internal flash, through the NVMC peripheral.
pub struct NrfNvmc {
    pages: usize,
}

impl NrfNvmc {
    /// # Safety
    /// The caller hands over the NVMC and the pool's flash pages, nothing else may program
    /// or erase them while this driver exists.
    pub unsafe fn new(pages: usize) -> NrfNvmc {
        NrfNvmc {
            pages: pages.min(MAX_POOL_PAGES),
        }
    }

    fn wait_ready() {
        // SAFETY: READY is a read-only status register.
        while unsafe { ptr::read_volatile(NVMC_READY) } & 1 == 0 {}
    }

    fn set_mode(mode: u32) {
        // SAFETY: CONFIG only gates programming, it is restored to read-only afterwards.
        unsafe { ptr::write_volatile(NVMC_CONFIG, mode) };
        Self::wait_ready();
    }
}

impl NvmStorage for NrfNvmc {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn read(&mut self, page: usize, offset: usize, buf: &mut [u8]) -> Result<(), NvmError> {
        check_bounds(self.pages, page, offset, buf.len())?;
        let addr = pool_page_address(page) as usize + offset;
        // SAFETY: bounds checked against the pool, flash is memory mapped for reading.
        let src = unsafe { core::slice::from_raw_parts(addr as *const u8, buf.len()) };
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, page: usize, offset: usize, data: &[u8]) -> Result<(), NvmError> {
        check_bounds(self.pages, page, offset, data.len())?;
        if offset % WORD_SIZE != 0 {
            return Err(NvmError::Misaligned);
        }
        let base = pool_page_address(page) as usize + offset;
        critical_section::with(|_cs| {
            Self::set_mode(CONFIG_WRITE_ENABLE);
            for (i, chunk) in data.chunks(WORD_SIZE).enumerate() {
                // Pad the tail with erased bytes, those bits are left as they are.
                let mut word = [ERASED_BYTE; WORD_SIZE];
                word[..chunk.len()].copy_from_slice(chunk);
                let dst = (base + i * WORD_SIZE) as *mut u32;
                // SAFETY: word aligned and inside the pool, programming is enabled.
                unsafe { ptr::write_volatile(dst, u32::from_le_bytes(word)) };
                Self::wait_ready();
            }
            Self::set_mode(CONFIG_READ_ONLY);
        });
        let mut check = [0u8; WORD_SIZE];
        for (i, chunk) in data.chunks(WORD_SIZE).enumerate() {
            self.read(page, offset + i * WORD_SIZE, &mut check[..chunk.len()])?;
            // Bits can only be cleared, anything still set that should be 0 did not program.
            if check[..chunk.len()].iter().zip(chunk).any(|(&got, &want)| got & !want != 0) {
                return Err(NvmError::WriteFailed);
            }
        }
        Ok(())
    }

    fn erase_page(&mut self, page: usize) -> Result<(), NvmError> {
        check_bounds(self.pages, page, 0, FLASH_PAGE_SIZE)?;
        critical_section::with(|_cs| {
            Self::set_mode(CONFIG_ERASE_ENABLE);
            // SAFETY: erase is enabled and the address is a pool page.
            unsafe { ptr::write_volatile(NVMC_ERASEPAGE, pool_page_address(page)) };
            Self::wait_ready();
            Self::set_mode(CONFIG_READ_ONLY);
        });
        if crate::nvm::is_blank(self, page, 0, FLASH_PAGE_SIZE)? {
            Ok(())
        } else {
            Err(NvmError::EraseFailed)
        }
    }
}
