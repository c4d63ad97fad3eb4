//! Facts gathered once per boot that the decision is made from.

/// Raw reset reason in the nRF52 RESETREAS bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetReason(pub u32);

impl ResetReason {
    pub const PIN: u32 = 1 << 0;
    pub const WATCHDOG: u32 = 1 << 1;
    pub const SOFT: u32 = 1 << 2;
    pub const LOCKUP: u32 = 1 << 3;
    pub const SYSTEM_OFF: u32 = 1 << 16;

    /// No bit set means the chip came up from power-on or brown-out.
    pub const fn is_power_on(self) -> bool {
        self.0 == 0
    }

    pub const fn is_watchdog(self) -> bool {
        self.0 & Self::WATCHDOG != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetCause {
    PowerOn,
    DfuRequested,
    Watchdog,
    Other,
}

impl ResetCause {
    /// A pending DFU request wins over whatever the hardware reports.
    pub const fn classify(dfu_requested: bool, reason: ResetReason) -> Self {
        if dfu_requested {
            ResetCause::DfuRequested
        } else if reason.is_watchdog() {
            ResetCause::Watchdog
        } else if reason.is_power_on() {
            ResetCause::PowerOn
        } else {
            ResetCause::Other
        }
    }
}

/// What the decision is made from. Rebuilt every boot, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootContext {
    pub reset_cause: ResetCause,
    pub app_bank_valid: bool,
    pub update_in_progress: bool,
}
