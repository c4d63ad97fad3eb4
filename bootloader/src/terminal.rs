use boot_core::{FatalError, SystemEvent, Terminal};
use cortex_m::peripheral::{NVIC, SCB};
use defmt::{error, info, trace, warn};
use embassy_futures::block_on;
use embassy_futures::select::select;
use embassy_time::{Duration, Instant, Timer};
use nrf_softdevice::raw;

use crate::flash::SharedFlash;
use crate::radio::{self, EVENTS};

pub fn park() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Leaves the NVIC as the application expects it out of reset: every source disabled
/// and nothing pending. Must run after the last SoftDevice call, which needs SVC.
unsafe fn quiesce_interrupts() {
    cortex_m::interrupt::disable();
    let nvic = &*NVIC::PTR;
    for clear_enable in &nvic.icer {
        clear_enable.write(u32::MAX);
    }
    for clear_pending in &nvic.icpr {
        clear_pending.write(u32::MAX);
    }
    cortex_m::interrupt::enable();
}

fn handle(event: SystemEvent) {
    trace!("system event {}", event);
}

pub struct Exit {
    flash: &'static SharedFlash,
    dfu_timeout: Duration,
}

impl Exit {
    pub const fn new(flash: &'static SharedFlash, dfu_timeout: Duration) -> Self {
        Self { flash, dfu_timeout }
    }
}

impl Terminal for Exit {
    /// Services radio stack events until nothing has happened for the inactivity
    /// timeout, then resets. The transfer transport hooks into the event queue.
    fn enter_dfu_session(&mut self) -> ! {
        let Some(sd) = self.flash.lock(|f| f.borrow().softdevice()) else {
            warn!("DFU requested without a radio stack");
            self.system_reset()
        };
        info!("entering DFU mode");

        let timeout = self.dfu_timeout;
        let session = async {
            let mut last_activity = Instant::now();
            loop {
                if EVENTS.execute(handle) > 0 {
                    last_activity = Instant::now();
                }
                if last_activity.elapsed() >= timeout {
                    break;
                }
                Timer::after_millis(50).await;
            }
        };
        block_on(select(sd.run_with_callback(radio::dispatch), session));

        info!("DFU session idle, resetting");
        self.system_reset()
    }

    fn jump_to_application(&mut self, address: u32) -> ! {
        info!("starting application at {:#x}", address);
        unsafe {
            raw::sd_softdevice_disable();
            // Interrupts now go through the SoftDevice to the application.
            raw::sd_softdevice_vector_table_base_set(address);
            quiesce_interrupts();
            cortex_m::asm::bootload(address as *const u32)
        }
    }

    fn system_reset(&mut self) -> ! {
        SCB::sys_reset()
    }

    fn halt(&mut self, error: FatalError) -> ! {
        error!("halted with {:#x}: {}", error.code(), error);
        park()
    }
}
