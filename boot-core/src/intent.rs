//! One-shot "enter DFU" request from the application.
//!
//! The application writes [`DFU_START_MAGIC`] into a register that survives a soft
//! reset (GPREGRET on nRF52) and resets. The bootloader consumes it exactly once.

/// Value the application leaves behind to ask for a DFU session.
pub const DFU_START_MAGIC: u32 = 0xB1;

/// A word of storage retained across soft resets.
pub trait RetainedRegister {
    fn read(&mut self) -> u32;
    fn write(&mut self, value: u32);
}

pub trait IntentFlag {
    /// Returns whether DFU was requested and clears the request. Never fails.
    fn take(&mut self) -> bool;
    /// Requests DFU on the next boot.
    fn set(&mut self);
}

/// [`IntentFlag`] kept in a [`RetainedRegister`] as [`DFU_START_MAGIC`].
pub struct RetainedIntentFlag<R> {
    register: R,
}

impl<R: RetainedRegister> RetainedIntentFlag<R> {
    pub const fn new(register: R) -> Self {
        Self { register }
    }

    pub fn into_inner(self) -> R {
        self.register
    }
}

impl<R: RetainedRegister> IntentFlag for RetainedIntentFlag<R> {
    fn take(&mut self) -> bool {
        let value = self.register.read();
        if value != 0 {
            self.register.write(0);
        }
        let requested = value == DFU_START_MAGIC;
        if value != 0 && !requested {
            warn!("discarding stray retained value {:#x}", value);
        }
        requested
    }

    fn set(&mut self) {
        self.register.write(DFU_START_MAGIC);
    }
}
