//! Hardware and runtime collaborators the engine drives.

use crate::config::RadioConfig;
use crate::context::ResetReason;
use crate::error::FatalError;
use crate::scheduler::SchedulerConfig;

/// System events forwarded from the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemEvent {
    FlashOperationSuccess,
    FlashOperationError,
    PowerFailureWarning,
    Other,
}

pub type EventSink = fn(SystemEvent);

/// Device-provisioned values and the reset reason.
pub trait HardwareInfo {
    /// Bootloader start address programmed into UICR.
    fn bootloader_address(&mut self) -> u32;
    /// Flash code page size reported by FICR.
    fn code_page_size(&mut self) -> u32;
    /// Reset reason of this boot. Reading it may clear it.
    fn reset_reason(&mut self) -> ResetReason;
}

/// Radio stack bring-up. Runs exactly once per boot.
pub trait RadioStack {
    /// Enables the stack. Failure is fatal for this boot.
    fn init(&mut self, config: &RadioConfig) -> Result<(), FatalError>;
    fn register_event_sink(&mut self, sink: EventSink);
}

/// Run loop and timer setup. Fire and forget.
pub trait Scheduler {
    fn init(&mut self, config: &SchedulerConfig);
}

/// Ways a boot can end. None of them return.
pub trait Terminal {
    /// Runs the DFU session. Ends in a reset.
    fn enter_dfu_session(&mut self) -> !;
    fn jump_to_application(&mut self, address: u32) -> !;
    fn system_reset(&mut self) -> !;
    fn halt(&mut self, error: FatalError) -> !;
}
