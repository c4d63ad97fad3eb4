//! Boot decision and radio-stack update continuation for nRF DFU bootloaders.
//!
//! [`BootEngine`] runs once per reset. It resumes an interrupted radio-stack update,
//! brings up the radio stack, and then either starts the application, enters a DFU
//! session or resets. Flash-backed implementations of the persistent pieces
//! ([`FlashProgressStore`], [`TrailerValidator`], [`FlashImageApplier`]) work on any
//! `embedded_storage` NOR flash, so the whole decision can be exercised on a host.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod bank;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod intent;
pub mod ports;
pub mod progress;
pub mod scheduler;
pub mod update;

#[cfg(test)]
mod testing;

pub use bank::{BankTrailer, BankValidator, TrailerValidator};
pub use config::{BootConfig, FlashLayout, LayoutError, LfClockSource, RadioConfig, Region};
pub use context::{BootContext, ResetCause, ResetReason};
pub use engine::{BootAction, BootEngine, Ports};
pub use error::{FatalError, FlashErrorKind, StoreError, UpdateError};
pub use intent::{IntentFlag, RetainedIntentFlag, RetainedRegister};
pub use ports::{EventSink, HardwareInfo, RadioStack, Scheduler, SystemEvent, Terminal};
pub use progress::{BankId, FlashProgressStore, ProgressStore, UpdatePhase, UpdateProgress};
pub use scheduler::{EventQueue, SchedulerConfig};
pub use update::{FlashImageApplier, UpdateApplier};
