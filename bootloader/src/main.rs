#![no_std]
#![no_main]

mod flash;
mod hw;
mod radio;
mod terminal;

use core::cell::RefCell;

use boot_core::{
    BootConfig, BootEngine, FatalError, FlashImageApplier, FlashProgressStore, Ports, RetainedIntentFlag, Terminal,
    TrailerValidator,
};
use cortex_m_rt::{entry, exception, ExceptionFrame};
use defmt::{error, info};
use embassy_nrf::interrupt::Priority;
use embassy_nrf::nvmc::Nvmc;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Duration;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::flash::{partition, BootFlash, SharedFlash};
use crate::hw::{Device, Gpregret};
use crate::radio::{RunLoop, SoftdeviceRadio};
use crate::terminal::Exit;

const CONFIG: BootConfig = BootConfig::NRF52840_S140;

static FLASH: StaticCell<SharedFlash> = StaticCell::new();

#[entry]
fn main() -> ! {
    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    info!("bootloader {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = CONFIG.layout.validate() {
        error!("flash layout rejected: {}", e);
        terminal::park();
    }

    let flash: &'static SharedFlash = FLASH.init(Mutex::new(RefCell::new(BootFlash::Nvmc(Nvmc::new(p.NVMC)))));
    let mut exit = Exit::new(flash, Duration::from_millis(CONFIG.dfu_inactivity_timeout_ms.into()));

    let store = match FlashProgressStore::new(partition(flash), CONFIG.layout.settings) {
        Ok(store) => store,
        Err(e) => exit.halt(FatalError::ProgressStore(e)),
    };

    let ports = Ports {
        hardware: Device,
        intent: RetainedIntentFlag::new(Gpregret),
        store,
        validator: TrailerValidator::new(partition(flash)),
        radio: SoftdeviceRadio::new(flash, CONFIG.layout.bootloader.start),
        scheduler: RunLoop,
        applier: FlashImageApplier::new(partition(flash), CONFIG.layout),
    };

    BootEngine::new(CONFIG, ports)
        .with_event_sink(radio::enqueue)
        .run(&mut exit)
}

#[exception]
unsafe fn HardFault(_ef: &ExceptionFrame) -> ! {
    cortex_m::peripheral::SCB::sys_reset();
}

#[exception]
unsafe fn DefaultHandler(_: i16) -> ! {
    const SCB_ICSR: *const u32 = 0xE000_ED04 as *const u32;
    let irqn = core::ptr::read_volatile(SCB_ICSR) as u8 as i16 - 16;

    panic!("DefaultHandler #{:?}", irqn);
}
