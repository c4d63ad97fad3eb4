//! Applying a staged radio-stack image.

use embedded_storage::nor_flash::NorFlash;

use crate::bank::crc32_range;
use crate::config::{FlashLayout, Region};
use crate::error::{flash_error, UpdateError};
use crate::progress::UpdateProgress;

const COPY_CHUNK: usize = 256;

/// Continues and finalizes the update described by a progress record. Both steps
/// must be safe to repeat after a reset at any point.
pub trait UpdateApplier {
    fn continue_pending_update(&mut self, record: &UpdateProgress) -> Result<(), UpdateError>;
    fn finalize_pending_update(&mut self, record: &UpdateProgress) -> Result<(), UpdateError>;
}

/// Copies the staged image over the radio-stack region with plain flash
/// operations.
pub struct FlashImageApplier<F> {
    flash: F,
    layout: FlashLayout,
}

const fn round_up(value: u32, align: usize) -> u32 {
    value.div_ceil(align as u32) * align as u32
}

impl<F: NorFlash> FlashImageApplier<F> {
    /// Applier copying between the banks of `layout`.
    pub const fn new(flash: F, layout: FlashLayout) -> Self {
        Self { flash, layout }
    }

    /// Hands the flash back.
    pub fn release(self) -> F {
        self.flash
    }

    fn regions(&self, record: &UpdateProgress) -> Result<(Region, Region), UpdateError> {
        let source = self.layout.bank(record.target_bank);
        let destination = self.layout.radio_stack;
        if record.image_size == 0 {
            return Err(UpdateError::EmptyImage);
        }
        let capacity = destination.size.min(source.size);
        if record.image_size > capacity {
            return Err(UpdateError::ImageTooLarge {
                size: record.image_size,
                capacity,
            });
        }
        Ok((source, destination))
    }

    fn erase_span(&mut self, region: &Region, length: u32) -> Result<(), UpdateError> {
        let end = region.start + round_up(length, F::ERASE_SIZE);
        self.flash.erase(region.start, end).map_err(flash_error)?;
        Ok(())
    }

    fn copy(&mut self, from: u32, to: u32, length: u32) -> Result<(), UpdateError> {
        let mut buf = [0u8; COPY_CHUNK];
        let mut offset = 0;
        while offset < length {
            let n = (length - offset).min(COPY_CHUNK as u32);
            let read_len = round_up(n, F::READ_SIZE) as usize;
            let write_len = round_up(n, F::WRITE_SIZE) as usize;
            self.flash
                .read(from + offset, &mut buf[..read_len])
                .map_err(flash_error)?;
            buf[n as usize..write_len].fill(0xFF);
            self.flash
                .write(to + offset, &buf[..write_len])
                .map_err(flash_error)?;
            offset += n;
        }
        Ok(())
    }

    fn verify(&mut self, destination: &Region, record: &UpdateProgress) -> Result<(), UpdateError> {
        let actual = crc32_range(&mut self.flash, destination.start, record.image_size)?;
        if actual != record.image_crc {
            return Err(UpdateError::VerifyFailed {
                expected: record.image_crc,
                actual,
            });
        }
        Ok(())
    }
}

impl<F: NorFlash> UpdateApplier for FlashImageApplier<F> {
    fn continue_pending_update(&mut self, record: &UpdateProgress) -> Result<(), UpdateError> {
        let (source, destination) = self.regions(record)?;

        let applied = crc32_range(&mut self.flash, destination.start, record.image_size)?;
        if applied == record.image_crc {
            info!("radio stack already holds the staged image");
            return Ok(());
        }

        let staged = crc32_range(&mut self.flash, source.start, record.image_size)?;
        if staged != record.image_crc {
            return Err(UpdateError::StagedImageCorrupt {
                expected: record.image_crc,
                actual: staged,
            });
        }

        info!(
            "copying {} byte radio stack {:#x} -> {:#x}",
            record.image_size, source.start, destination.start
        );
        self.erase_span(&destination, record.image_size)?;
        self.copy(source.start, destination.start, record.image_size)?;
        self.verify(&destination, record)
    }

    fn finalize_pending_update(&mut self, record: &UpdateProgress) -> Result<(), UpdateError> {
        let (source, destination) = self.regions(record)?;
        self.verify(&destination, record)?;
        debug!("retiring staged image at {:#x}", source.start);
        self.erase_span(&source, record.image_size)
    }
}
