//! The per-boot decision.
//!
//! One pass per reset:
//!
//! 1. Check the image was built for this device (bootloader address, page size).
//! 2. Consume the DFU request and read update progress.
//! 3. If a radio-stack update is part way through, continue it.
//! 4. Bring up the radio stack and the event scheduler, exactly once.
//! 5. If step 3 ran, finalize the update and re-read the banks.
//! 6. Enter DFU when asked to or when there is no valid application; start the
//!    application when it is valid and nothing is pending; otherwise reset.
//!
//! Progress is committed to the store between steps so a reset anywhere resumes
//! from the last committed phase. Any failure along the way is fatal.

use crate::bank::BankValidator;
use crate::config::BootConfig;
use crate::context::{BootContext, ResetCause};
use crate::error::FatalError;
use crate::intent::IntentFlag;
use crate::ports::{EventSink, HardwareInfo, RadioStack, Scheduler, SystemEvent, Terminal};
use crate::progress::{ProgressStore, UpdatePhase, UpdateProgress};
use crate::update::UpdateApplier;

/// How this boot ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootAction {
    EnterDfu,
    JumpToApplication { address: u32 },
    Reset,
    Halt(FatalError),
}

impl BootAction {
    pub fn execute<T: Terminal>(self, terminal: &mut T) -> ! {
        match self {
            BootAction::EnterDfu => terminal.enter_dfu_session(),
            BootAction::JumpToApplication { address } => terminal.jump_to_application(address),
            BootAction::Reset => terminal.system_reset(),
            BootAction::Halt(error) => terminal.halt(error),
        }
    }
}

/// Everything the engine talks to.
pub struct Ports<H, I, S, V, R, C, U> {
    pub hardware: H,
    pub intent: I,
    pub store: S,
    pub validator: V,
    pub radio: R,
    pub scheduler: C,
    pub applier: U,
}

fn discard(_: SystemEvent) {}

/// Single-pass boot decision over the collaborators in [`Ports`].
pub struct BootEngine<H, I, S, V, R, C, U> {
    config: BootConfig,
    ports: Ports<H, I, S, V, R, C, U>,
    event_sink: EventSink,
}

impl<H, I, S, V, R, C, U> BootEngine<H, I, S, V, R, C, U>
where
    H: HardwareInfo,
    I: IntentFlag,
    S: ProgressStore,
    V: BankValidator,
    R: RadioStack,
    C: Scheduler,
    U: UpdateApplier,
{
    /// Engine for one boot. Radio stack events are dropped until a sink is set.
    pub fn new(config: BootConfig, ports: Ports<H, I, S, V, R, C, U>) -> Self {
        Self {
            config,
            ports,
            event_sink: discard,
        }
    }

    /// Where radio stack system events go once it is up.
    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.event_sink = sink;
        self
    }

    /// Borrow the collaborators, mostly for inspection after [`Self::decide`].
    pub fn ports(&self) -> &Ports<H, I, S, V, R, C, U> {
        &self.ports
    }

    /// Give the collaborators back.
    pub fn into_ports(self) -> Ports<H, I, S, V, R, C, U> {
        self.ports
    }

    /// Runs every step up to the final choice and returns it.
    pub fn decide(&mut self) -> BootAction {
        match self.evaluate() {
            Ok(action) => action,
            Err(error) => {
                error!("boot failed ({:#x}): {}", error.code(), error);
                BootAction::Halt(error)
            }
        }
    }

    /// Decides and ends the boot through `terminal`.
    pub fn run<T: Terminal>(mut self, terminal: &mut T) -> ! {
        let action = self.decide();
        info!("boot action: {:?}", action);
        action.execute(terminal)
    }

    fn evaluate(&mut self) -> Result<BootAction, FatalError> {
        self.check_hardware()?;

        let dfu_requested = self.ports.intent.take();
        let reset_cause = ResetCause::classify(dfu_requested, self.ports.hardware.reset_reason());

        let record = self.ports.store.read();
        if record.phase == UpdatePhase::Complete {
            info!("clearing completed update record");
            self.clear_completed();
        }

        let mut context = self.capture(reset_cause, &record);
        info!(
            "reset {:?}, app valid {}, update {:?}",
            context.reset_cause, context.app_bank_valid, record.phase
        );

        let resumed = if context.update_in_progress {
            Some(self.continue_update(record)?)
        } else {
            None
        };

        self.bring_up_runtime()?;

        if let Some(record) = resumed {
            self.finalize_update(&record)?;
            let record = self.ports.store.read();
            context = self.capture(reset_cause, &record);
        }

        Ok(self.choose(&context))
    }

    fn check_hardware(&mut self) -> Result<(), FatalError> {
        let layout = &self.config.layout;
        let actual = self.ports.hardware.bootloader_address();
        if actual != layout.bootloader.start {
            return Err(FatalError::BootloaderAddressMismatch {
                expected: layout.bootloader.start,
                actual,
            });
        }
        let actual = self.ports.hardware.code_page_size();
        if actual != layout.page_size {
            return Err(FatalError::PageSizeMismatch {
                expected: layout.page_size,
                actual,
            });
        }
        Ok(())
    }

    fn capture(&mut self, reset_cause: ResetCause, record: &UpdateProgress) -> BootContext {
        BootContext {
            reset_cause,
            app_bank_valid: self.ports.validator.is_valid(&self.config.layout.app_bank),
            update_in_progress: record.is_in_progress(),
        }
    }

    fn commit(&mut self, record: &UpdateProgress) -> Result<(), FatalError> {
        self.ports.store.write(record)?;
        Ok(())
    }

    /// A complete record decides like `None`, so failing to erase it is not fatal.
    fn clear_completed(&mut self) {
        if let Err(e) = self.ports.store.write(&UpdateProgress::NONE) {
            warn!("completed update record not cleared: {}", e);
        }
    }

    fn continue_update(&mut self, mut record: UpdateProgress) -> Result<UpdateProgress, FatalError> {
        if record.phase == UpdatePhase::Staged {
            record = record.with_phase(UpdatePhase::Continuing);
            self.commit(&record)?;
        }
        info!("continuing radio stack update ({} bytes)", record.image_size);
        self.ports
            .applier
            .continue_pending_update(&record)
            .map_err(FatalError::Continuation)?;
        if record.phase != UpdatePhase::Finalizing {
            record = record.with_phase(UpdatePhase::Finalizing);
            self.commit(&record)?;
        }
        Ok(record)
    }

    fn bring_up_runtime(&mut self) -> Result<(), FatalError> {
        self.ports.radio.init(&self.config.radio)?;
        self.ports.radio.register_event_sink(self.event_sink);
        self.ports.scheduler.init(&self.config.scheduler);
        Ok(())
    }

    fn finalize_update(&mut self, record: &UpdateProgress) -> Result<(), FatalError> {
        self.ports
            .applier
            .finalize_pending_update(record)
            .map_err(FatalError::Finalize)?;
        self.commit(&record.with_phase(UpdatePhase::Complete))?;
        self.clear_completed();
        info!("radio stack update finalized");
        Ok(())
    }

    fn choose(&self, context: &BootContext) -> BootAction {
        let dfu_start = context.reset_cause == ResetCause::DfuRequested || !context.app_bank_valid;
        if dfu_start {
            BootAction::EnterDfu
        } else if context.app_bank_valid && !context.update_in_progress {
            BootAction::JumpToApplication {
                address: self.config.layout.app_bank.start,
            }
        } else {
            BootAction::Reset
        }
    }
}
