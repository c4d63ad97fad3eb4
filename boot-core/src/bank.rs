//! Firmware bank integrity.
//!
//! A bank ends in a 16 byte trailer describing the image at its start:
//!
//! | offset | field      |
//! |--------|------------|
//! | 0      | magic      |
//! | 4      | length     |
//! | 8      | crc32      |
//! | 12     | reserved   |
//!
//! The bank is valid when the magic matches, the length fits in front of the
//! trailer and the CRC-32 of `length` image bytes matches. Validity is recomputed on
//! every boot.

use bytemuck::{Pod, Zeroable};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::config::Region;
use crate::error::{flash_error, FlashErrorKind};

pub const TRAILER_MAGIC: u32 = 0x5AFE_B007;
pub const TRAILER_SIZE: u32 = core::mem::size_of::<BankTrailer>() as u32;

const CHUNK: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BankTrailer {
    pub magic: u32,
    pub length: u32,
    pub crc: u32,
    pub reserved: u32,
}

impl BankTrailer {
    pub const fn new(length: u32, crc: u32) -> Self {
        Self {
            magic: TRAILER_MAGIC,
            length,
            crc,
            reserved: u32::MAX,
        }
    }

    /// Magic present and the image fits in front of the trailer.
    pub const fn describes_image_in(&self, bank: &Region) -> bool {
        self.magic == TRAILER_MAGIC
            && self.length > 0
            && bank.size >= TRAILER_SIZE
            && self.length <= bank.size - TRAILER_SIZE
    }
}

const fn trailer_address(bank: &Region) -> u32 {
    bank.end() - TRAILER_SIZE
}

const fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// CRC-32 (IEEE) of `length` bytes of flash starting at `start`.
pub fn crc32_range<F: ReadNorFlash>(flash: &mut F, start: u32, length: u32) -> Result<u32, FlashErrorKind> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; CHUNK];
    let mut offset = 0u32;
    while offset < length {
        let n = core::cmp::min(CHUNK as u32, length - offset) as usize;
        let read_len = round_up(n, F::READ_SIZE).min(CHUNK);
        flash
            .read(start + offset, &mut buf[..read_len])
            .map_err(flash_error)?;
        hasher.update(&buf[..n]);
        offset += n as u32;
    }
    Ok(hasher.finalize())
}

/// Answers "does this bank hold a complete, intact image?". Never fails; anything
/// unreadable is simply invalid.
pub trait BankValidator {
    fn is_valid(&mut self, bank: &Region) -> bool;
}

/// [`BankValidator`] checking a [`BankTrailer`] and the CRC of the image it describes.
pub struct TrailerValidator<F> {
    flash: F,
}

impl<F: ReadNorFlash> TrailerValidator<F> {
    /// Validator reading banks through `flash`.
    pub const fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Hands the flash back.
    pub fn release(self) -> F {
        self.flash
    }

    /// Raw trailer at the end of `bank`, whatever it contains.
    pub fn read_trailer(&mut self, bank: &Region) -> Result<BankTrailer, FlashErrorKind> {
        let mut buf = [0u8; TRAILER_SIZE as usize];
        self.flash
            .read(trailer_address(bank), &mut buf)
            .map_err(flash_error)?;
        Ok(bytemuck::pod_read_unaligned(&buf))
    }
}

impl<F: NorFlash> TrailerValidator<F> {
    /// Writes the trailer for an image of `length` bytes already programmed at the
    /// start of `bank`. The trailer area must still be erased.
    pub fn seal(&mut self, bank: &Region, length: u32) -> Result<BankTrailer, FlashErrorKind> {
        let crc = crc32_range(&mut self.flash, bank.start, length)?;
        let trailer = BankTrailer::new(length, crc);
        if !trailer.describes_image_in(bank) {
            return Err(FlashErrorKind::OutOfBounds);
        }
        self.flash
            .write(trailer_address(bank), bytemuck::bytes_of(&trailer))
            .map_err(flash_error)?;
        Ok(trailer)
    }
}

impl<F: ReadNorFlash> BankValidator for TrailerValidator<F> {
    fn is_valid(&mut self, bank: &Region) -> bool {
        let trailer = match self.read_trailer(bank) {
            Ok(trailer) => trailer,
            Err(e) => {
                warn!("bank {:#x}: trailer unreadable: {:?}", bank.start, e);
                return false;
            }
        };
        if !trailer.describes_image_in(bank) {
            debug!("bank {:#x}: no image", bank.start);
            return false;
        }
        match crc32_range(&mut self.flash, bank.start, trailer.length) {
            Ok(crc) if crc == trailer.crc => true,
            Ok(crc) => {
                warn!("bank {:#x}: crc {:#x}, trailer says {:#x}", bank.start, crc, trailer.crc);
                false
            }
            Err(e) => {
                warn!("bank {:#x}: image unreadable: {:?}", bank.start, e);
                false
            }
        }
    }
}
