//! In-memory NOR flash for unit tests.

use crate::config::{FlashLayout, Region};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

pub struct MemFlash {
    mem: Vec<u8>,
}

impl MemFlash {
    pub fn new(size: usize) -> Self {
        Self { mem: vec![0xFF; size] }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mem
    }
}

impl ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.mem[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.mem.len()
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.mem[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        for (cell, byte) in self.mem[offset as usize..].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

/// Scaled-down layout with two-page banks.
pub const SMALL_LAYOUT: FlashLayout = FlashLayout {
    page_size: 0x1000,
    radio_stack: Region::new(0x1000, 0x2000),
    app_bank: Region::new(0x3000, 0x2000),
    staging_bank: Region::new(0x5000, 0x2000),
    bootloader: Region::new(0x7000, 0x1000),
    settings: Region::new(0x8000, 0x2000),
};

pub const SMALL_FLASH_SIZE: usize = 0xA000;
