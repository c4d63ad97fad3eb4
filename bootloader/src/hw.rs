//! Raw registers read before the SoftDevice owns the POWER block.

use core::ptr;

use boot_core::{HardwareInfo, ResetReason, RetainedRegister};

const UICR_NRFFW0: *const u32 = 0x1000_1014 as *const u32;
const FICR_CODEPAGESIZE: *const u32 = 0x1000_0010 as *const u32;
const POWER_RESETREAS: *mut u32 = 0x4000_0400 as *mut u32;
const POWER_GPREGRET: *mut u32 = 0x4000_051C as *mut u32;

pub struct Device;

impl HardwareInfo for Device {
    fn bootloader_address(&mut self) -> u32 {
        unsafe { ptr::read_volatile(UICR_NRFFW0) }
    }

    fn code_page_size(&mut self) -> u32 {
        unsafe { ptr::read_volatile(FICR_CODEPAGESIZE) }
    }

    fn reset_reason(&mut self) -> ResetReason {
        unsafe {
            let reason = ptr::read_volatile(POWER_RESETREAS);
            // Write-one-to-clear, or the bits accumulate across resets.
            ptr::write_volatile(POWER_RESETREAS, reason);
            ResetReason(reason)
        }
    }
}

/// GPREGRET, kept across soft resets.
pub struct Gpregret;

impl RetainedRegister for Gpregret {
    fn read(&mut self) -> u32 {
        unsafe { ptr::read_volatile(POWER_GPREGRET) & 0xFF }
    }

    fn write(&mut self, value: u32) {
        unsafe { ptr::write_volatile(POWER_GPREGRET, value & 0xFF) }
    }
}
