//! SoftDevice bring-up and system event plumbing.

use core::cell::Cell;

use boot_core::{EventQueue, EventSink, FatalError, LfClockSource, RadioConfig, RadioStack, Scheduler, SchedulerConfig, SystemEvent};
use defmt::{debug, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use nrf_softdevice::{raw, SocEvent, Softdevice};
use nrf_softdevice_mbr as mbr;

use crate::flash::SharedFlash;

const QUEUE_SIZE: usize = 20;

/// Radio stack info struct magic, see the SoftDevice specification.
const SD_MAGIC_ADDRESS: *const u32 = 0x0000_3004 as *const u32;
const SD_MAGIC: u32 = 0x51B1_E5DB;

pub static EVENTS: EventQueue<SystemEvent, QUEUE_SIZE> = EventQueue::new();

static SINK: Mutex<CriticalSectionRawMutex, Cell<Option<EventSink>>> = Mutex::new(Cell::new(None));

/// Default sink: defer to the run loop.
pub fn enqueue(event: SystemEvent) {
    if EVENTS.put(event).is_err() {
        warn!("event queue full, dropping {}", event);
    }
}

/// SoftDevice SoC event callback.
pub fn dispatch(event: SocEvent) {
    let event = match event {
        SocEvent::FlashOperationSuccess => SystemEvent::FlashOperationSuccess,
        SocEvent::FlashOperationError => SystemEvent::FlashOperationError,
        SocEvent::PowerFailureWarning => SystemEvent::PowerFailureWarning,
        _ => SystemEvent::Other,
    };
    if let Some(sink) = SINK.lock(|s| s.get()) {
        sink(event);
    }
}

fn check(ret: u32) -> Result<(), FatalError> {
    match ret {
        raw::NRF_SUCCESS => Ok(()),
        code => Err(FatalError::RadioStack(code)),
    }
}

fn accuracy(ppm: u16) -> u8 {
    let level = match ppm {
        0..=20 => raw::NRF_CLOCK_LF_ACCURACY_20_PPM,
        21..=30 => raw::NRF_CLOCK_LF_ACCURACY_30_PPM,
        31..=50 => raw::NRF_CLOCK_LF_ACCURACY_50_PPM,
        51..=75 => raw::NRF_CLOCK_LF_ACCURACY_75_PPM,
        76..=100 => raw::NRF_CLOCK_LF_ACCURACY_100_PPM,
        101..=150 => raw::NRF_CLOCK_LF_ACCURACY_150_PPM,
        151..=250 => raw::NRF_CLOCK_LF_ACCURACY_250_PPM,
        _ => raw::NRF_CLOCK_LF_ACCURACY_500_PPM,
    };
    level as u8
}

fn softdevice_config(config: &RadioConfig) -> nrf_softdevice::Config {
    let (source, rc_ctiv, rc_temp_ctiv) = match config.lf_clock {
        LfClockSource::Rc => (raw::NRF_CLOCK_LF_SRC_RC, 16, 2),
        LfClockSource::Xtal => (raw::NRF_CLOCK_LF_SRC_XTAL, 0, 0),
        LfClockSource::Synth => (raw::NRF_CLOCK_LF_SRC_SYNTH, 0, 0),
    };
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: source as u8,
            rc_ctiv,
            rc_temp_ctiv,
            accuracy: accuracy(config.lf_accuracy_ppm),
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: config.peripheral_links,
            central_role_count: config.central_links,
            central_sec_count: config.central_links,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    }
}

pub struct SoftdeviceRadio {
    flash: &'static SharedFlash,
    vector_table: u32,
}

impl SoftdeviceRadio {
    pub const fn new(flash: &'static SharedFlash, vector_table: u32) -> Self {
        Self { flash, vector_table }
    }
}

impl RadioStack for SoftdeviceRadio {
    fn init(&mut self, config: &RadioConfig) -> Result<(), FatalError> {
        if unsafe { core::ptr::read_volatile(SD_MAGIC_ADDRESS) } != SD_MAGIC {
            return Err(FatalError::RadioStack(raw::NRF_ERROR_NOT_FOUND));
        }

        // MBR forwards interrupts to the SoftDevice, which forwards to us.
        let mut cmd = mbr::sd_mbr_command_t {
            command: mbr::NRF_MBR_COMMANDS_SD_MBR_COMMAND_INIT_SD,
            params: unsafe { core::mem::zeroed() },
        };
        check(unsafe { mbr::sd_mbr_command(&mut cmd) })?;
        check(unsafe { raw::sd_softdevice_vector_table_base_set(self.vector_table) })?;

        let sd: &'static Softdevice = Softdevice::enable(&softdevice_config(config));
        self.flash.lock(|f| f.borrow_mut().hand_over(sd));
        info!("softdevice enabled");
        Ok(())
    }

    fn register_event_sink(&mut self, sink: EventSink) {
        SINK.lock(|s| s.set(Some(sink)));
    }
}

pub struct RunLoop;

impl Scheduler for RunLoop {
    fn init(&mut self, config: &SchedulerConfig) {
        if usize::from(config.queue_size) > EVENTS.capacity() {
            warn!("scheduler queue capped at {}", EVENTS.capacity());
        }
        // Anything raised during bring-up stays queued for the DFU session.
        debug!(
            "run loop ready (prescaler {}, timer queue {}, {} events pending)",
            config.timer_prescaler,
            config.timer_op_queue_size,
            EVENTS.len()
        );
    }
}
