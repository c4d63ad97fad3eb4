//! Error types.
//!
//! Anything that reaches [`FatalError`] stops the boot: the engine halts with
//! [`FatalError::code`] as the diagnostic and never starts an application afterwards.
//! Invalid banks, absent updates and missing DFU requests are not errors; they are
//! inputs to the boot decision.

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

use crate::progress::UpdatePhase;

/// Flash driver failure, reduced to the portable kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashErrorKind {
    #[error("unaligned flash access")]
    NotAligned,
    #[error("flash access out of bounds")]
    OutOfBounds,
    #[error("flash driver error")]
    Other,
}

pub(crate) fn flash_error<E: NorFlashError>(error: E) -> FlashErrorKind {
    match error.kind() {
        NorFlashErrorKind::NotAligned => FlashErrorKind::NotAligned,
        NorFlashErrorKind::OutOfBounds => FlashErrorKind::OutOfBounds,
        _ => FlashErrorKind::Other,
    }
}

/// Update progress store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    #[error("progress store flash error: {0}")]
    Flash(FlashErrorKind),
    #[error("phase may not move from {from:?} to {to:?}")]
    IllegalTransition { from: UpdatePhase, to: UpdatePhase },
    #[error("settings region must be page aligned and hold two pages")]
    BadRegion,
}

impl From<FlashErrorKind> for StoreError {
    fn from(kind: FlashErrorKind) -> Self {
        StoreError::Flash(kind)
    }
}

/// Continuation or finalize failure of a staged radio-stack image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateError {
    #[error("image flash error: {0}")]
    Flash(FlashErrorKind),
    #[error("staged image is empty")]
    EmptyImage,
    #[error("image of {size} bytes does not fit {capacity} bytes")]
    ImageTooLarge { size: u32, capacity: u32 },
    #[error("staged image checksum {actual:#010x}, expected {expected:#010x}")]
    StagedImageCorrupt { expected: u32, actual: u32 },
    #[error("applied image checksum {actual:#010x}, expected {expected:#010x}")]
    VerifyFailed { expected: u32, actual: u32 },
}

impl From<FlashErrorKind> for UpdateError {
    fn from(kind: FlashErrorKind) -> Self {
        UpdateError::Flash(kind)
    }
}

/// Unrecoverable condition for the current boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalError {
    #[error("bootloader built for {expected:#010x}, device provisioned with {actual:#010x}")]
    BootloaderAddressMismatch { expected: u32, actual: u32 },
    #[error("bootloader built for {expected} byte pages, device has {actual}")]
    PageSizeMismatch { expected: u32, actual: u32 },
    #[error("radio stack bring-up failed: {0:#x}")]
    RadioStack(u32),
    #[error("update continuation failed: {0}")]
    Continuation(UpdateError),
    #[error("update finalize failed: {0}")]
    Finalize(UpdateError),
    #[error("progress store failed: {0}")]
    ProgressStore(StoreError),
}

impl FatalError {
    /// Diagnostic code reported by the halt path.
    pub const fn code(&self) -> u32 {
        match self {
            FatalError::BootloaderAddressMismatch { .. } => 0xB007_0001,
            FatalError::PageSizeMismatch { .. } => 0xB007_0002,
            FatalError::RadioStack(_) => 0xB007_0003,
            FatalError::Continuation(_) => 0xB007_0004,
            FatalError::Finalize(_) => 0xB007_0005,
            FatalError::ProgressStore(_) => 0xB007_0006,
        }
    }
}

impl From<StoreError> for FatalError {
    fn from(error: StoreError) -> Self {
        FatalError::ProgressStore(error)
    }
}
