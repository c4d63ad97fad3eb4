//! Internal flash shared by the progress store, bank validator and image applier.
//!
//! Until the SoftDevice is enabled the NVMC is driven directly. Once it is up, flash
//! operations have to go through the SoftDevice, which reports completion through
//! its event loop, so each operation runs alongside `Softdevice::run` until done.

use core::cell::RefCell;
use core::future::Future;

use embassy_embedded_hal::flash::partition::BlockingPartition;
use embassy_futures::block_on;
use embassy_futures::select::{select, Either};
use embassy_nrf::nvmc::Nvmc;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use embedded_storage_async::nor_flash::{NorFlash as _, ReadNorFlash as _};
use nrf_softdevice::Softdevice;

pub const FLASH_SIZE: u32 = 0x10_0000;

pub type SharedFlash = Mutex<NoopRawMutex, RefCell<BootFlash>>;
pub type FlashPartition = BlockingPartition<'static, NoopRawMutex, BootFlash>;

pub fn partition(flash: &'static SharedFlash) -> FlashPartition {
    BlockingPartition::new(flash, 0, FLASH_SIZE)
}

pub enum BootFlash {
    Nvmc(Nvmc<'static>),
    Softdevice {
        sd: &'static Softdevice,
        flash: nrf_softdevice::Flash,
    },
}

impl BootFlash {
    /// Switch to SoftDevice flash access. Call right after enabling it.
    pub fn hand_over(&mut self, sd: &'static Softdevice) {
        *self = BootFlash::Softdevice {
            sd,
            flash: nrf_softdevice::Flash::take(sd),
        };
    }

    pub fn softdevice(&self) -> Option<&'static Softdevice> {
        match self {
            BootFlash::Nvmc(_) => None,
            BootFlash::Softdevice { sd, .. } => Some(*sd),
        }
    }
}

fn with_softdevice<F: Future>(sd: &Softdevice, op: F) -> F::Output {
    match block_on(select(op, sd.run())) {
        Either::First(out) => out,
        Either::Second(never) => never,
    }
}

fn kind<E: NorFlashError>(e: E) -> NorFlashErrorKind {
    e.kind()
}

impl ErrorType for BootFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for BootFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        match self {
            BootFlash::Nvmc(nvmc) => nvmc.read(offset, bytes).map_err(kind),
            BootFlash::Softdevice { sd, flash } => with_softdevice(sd, flash.read(offset, bytes)).map_err(kind),
        }
    }

    fn capacity(&self) -> usize {
        FLASH_SIZE as usize
    }
}

impl NorFlash for BootFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        match self {
            BootFlash::Nvmc(nvmc) => nvmc.erase(from, to).map_err(kind),
            BootFlash::Softdevice { sd, flash } => with_softdevice(sd, flash.erase(from, to)).map_err(kind),
        }
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        match self {
            BootFlash::Nvmc(nvmc) => nvmc.write(offset, bytes).map_err(kind),
            BootFlash::Softdevice { sd, flash } => with_softdevice(sd, flash.write(offset, bytes)).map_err(kind),
        }
    }
}
