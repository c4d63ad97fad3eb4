#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use boot_core::{
    BootConfig, BootEngine, EventSink, FatalError, FlashImageApplier, FlashLayout, FlashProgressStore,
    HardwareInfo, Ports, RadioConfig, RadioStack, Region, ResetReason, RetainedIntentFlag, RetainedRegister,
    Scheduler, SchedulerConfig, TrailerValidator,
};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

pub const LAYOUT: FlashLayout = FlashLayout {
    page_size: 0x1000,
    radio_stack: Region::new(0x1000, 0x2000),
    app_bank: Region::new(0x3000, 0x2000),
    staging_bank: Region::new(0x5000, 0x2000),
    bootloader: Region::new(0x7000, 0x1000),
    settings: Region::new(0x8000, 0x2000),
};

pub const FLASH_SIZE: usize = 0xA000;

pub fn config() -> BootConfig {
    BootConfig {
        layout: LAYOUT,
        ..BootConfig::NRF52840_S140
    }
}

struct Memory {
    bytes: Vec<u8>,
    /// Bytes that may still be erased or programmed before the power goes.
    budget: Option<usize>,
    used: usize,
}

impl Memory {
    fn spend(&mut self) -> Result<(), NorFlashErrorKind> {
        if let Some(budget) = &mut self.budget {
            if *budget == 0 {
                return Err(NorFlashErrorKind::Other);
            }
            *budget -= 1;
        }
        self.used += 1;
        Ok(())
    }
}

/// NOR flash shared by every handle cloned from it. Programming only clears bits,
/// erase sets them, and a power cut stops an operation part way.
#[derive(Clone)]
pub struct SharedFlash {
    memory: Rc<RefCell<Memory>>,
}

impl SharedFlash {
    pub fn new(size: usize) -> Self {
        Self {
            memory: Rc::new(RefCell::new(Memory {
                bytes: vec![0xFF; size],
                budget: None,
                used: 0,
            })),
        }
    }

    pub fn load(&self, address: u32, data: &[u8]) {
        let at = address as usize;
        self.memory.borrow_mut().bytes[at..at + data.len()].copy_from_slice(data);
    }

    pub fn bytes(&self, address: u32, len: usize) -> Vec<u8> {
        let at = address as usize;
        self.memory.borrow().bytes[at..at + len].to_vec()
    }

    /// Lets `bytes` more bytes be erased or programmed, then fails everything.
    pub fn cut_power_after(&self, bytes: usize) {
        self.memory.borrow_mut().budget = Some(bytes);
    }

    pub fn restore_power(&self) {
        self.memory.borrow_mut().budget = None;
    }

    /// Bytes erased or programmed so far.
    pub fn wear(&self) -> usize {
        self.memory.borrow().used
    }

    pub fn snapshot(&self) -> SharedFlash {
        let memory = self.memory.borrow();
        SharedFlash {
            memory: Rc::new(RefCell::new(Memory {
                bytes: memory.bytes.clone(),
                budget: None,
                used: 0,
            })),
        }
    }
}

impl ErrorType for SharedFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for SharedFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let at = offset as usize;
        bytes.copy_from_slice(&self.memory.borrow().bytes[at..at + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.memory.borrow().bytes.len()
    }
}

impl NorFlash for SharedFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 0x1000;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        let mut memory = self.memory.borrow_mut();
        for at in from as usize..to as usize {
            memory.spend()?;
            memory.bytes[at] = 0xFF;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let mut memory = self.memory.borrow_mut();
        for (i, byte) in bytes.iter().enumerate() {
            memory.spend()?;
            memory.bytes[offset as usize + i] &= *byte;
        }
        Ok(())
    }
}

/// GPREGRET stand-in.
#[derive(Clone, Default)]
pub struct Retained(pub Rc<Cell<u32>>);

impl RetainedRegister for Retained {
    fn read(&mut self) -> u32 {
        self.0.get()
    }

    fn write(&mut self, value: u32) {
        self.0.set(value);
    }
}

pub struct Device {
    pub bootloader_address: u32,
    pub page_size: u32,
    pub reset_reason: u32,
}

impl Device {
    pub fn matching(layout: &FlashLayout) -> Self {
        Self {
            bootloader_address: layout.bootloader.start,
            page_size: layout.page_size,
            reset_reason: 0,
        }
    }
}

impl HardwareInfo for Device {
    fn bootloader_address(&mut self) -> u32 {
        self.bootloader_address
    }

    fn code_page_size(&mut self) -> u32 {
        self.page_size
    }

    fn reset_reason(&mut self) -> ResetReason {
        ResetReason(core::mem::take(&mut self.reset_reason))
    }
}

#[derive(Default)]
pub struct Radio {
    pub init_calls: usize,
    pub sink: Option<EventSink>,
    pub fail_with: Option<u32>,
}

impl RadioStack for Radio {
    fn init(&mut self, _config: &RadioConfig) -> Result<(), FatalError> {
        self.init_calls += 1;
        match self.fail_with {
            Some(code) => Err(FatalError::RadioStack(code)),
            None => Ok(()),
        }
    }

    fn register_event_sink(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }
}

#[derive(Default)]
pub struct RunLoop {
    pub init_calls: usize,
    pub queue_size: u16,
}

impl Scheduler for RunLoop {
    fn init(&mut self, config: &SchedulerConfig) {
        self.init_calls += 1;
        self.queue_size = config.queue_size;
    }
}

pub type FlashEngine = BootEngine<
    Device,
    RetainedIntentFlag<Retained>,
    FlashProgressStore<SharedFlash>,
    TrailerValidator<SharedFlash>,
    Radio,
    RunLoop,
    FlashImageApplier<SharedFlash>,
>;

/// A booted device: one engine over a shared flash and retained register.
pub fn boot(flash: &SharedFlash, retained: &Retained, reset_reason: u32) -> FlashEngine {
    let mut device = Device::matching(&LAYOUT);
    device.reset_reason = reset_reason;
    let store = FlashProgressStore::new(flash.clone(), LAYOUT.settings).unwrap();
    BootEngine::new(
        config(),
        Ports {
            hardware: device,
            intent: RetainedIntentFlag::new(retained.clone()),
            store,
            validator: TrailerValidator::new(flash.clone()),
            radio: Radio::default(),
            scheduler: RunLoop::default(),
            applier: FlashImageApplier::new(flash.clone(), LAYOUT),
        },
    )
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Programs a sealed application image into the app bank.
pub fn install_app(flash: &SharedFlash, len: usize) {
    flash.load(LAYOUT.app_bank.start, &pattern(len, 7));
    TrailerValidator::new(flash.clone())
        .seal(&LAYOUT.app_bank, len as u32)
        .unwrap();
}

/// Puts a radio-stack image in the staging bank and records it as staged.
pub fn stage_radio_stack(flash: &SharedFlash, image: &[u8]) {
    flash.load(LAYOUT.staging_bank.start, image);
    let mut store = FlashProgressStore::new(flash.clone(), LAYOUT.settings).unwrap();
    store
        .stage(boot_core::BankId::Staging, image.len() as u32, crc32fast::hash(image))
        .unwrap();
}
