//! Persisted progress of a radio-stack update.
//!
//! Records live in two flash pages used alternately. A write erases the page that
//! does not hold the current record, programs the body and its CRC, and programs the
//! commit word last. A reset at any point leaves either the old record or the new
//! one readable, never a mix.

use bytemuck::{Pod, Zeroable};
use embedded_storage::nor_flash::NorFlash;

use crate::config::Region;
use crate::error::{flash_error, FlashErrorKind, StoreError};

/// Commit word; a slot without it was never completely written.
pub const STATE_MAGIC: u32 = 0xB007_10AD;

const SLOT_LEN: usize = core::mem::size_of::<Slot>();
const BODY_LEN: usize = 16;
const COMMIT_OFFSET: usize = SLOT_LEN - 4;

/// Where a radio-stack update stands. Stored as one byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdatePhase {
    None = 0,
    Staged = 1,
    Continuing = 2,
    Finalizing = 3,
    Complete = 4,
}

impl UpdatePhase {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(UpdatePhase::None),
            1 => Some(UpdatePhase::Staged),
            2 => Some(UpdatePhase::Continuing),
            3 => Some(UpdatePhase::Finalizing),
            4 => Some(UpdatePhase::Complete),
            _ => None,
        }
    }

    /// Staged, continuing or finalizing: an image is waiting to be applied or is
    /// part way through.
    pub const fn is_in_progress(self) -> bool {
        matches!(
            self,
            UpdatePhase::Staged | UpdatePhase::Continuing | UpdatePhase::Finalizing
        )
    }

    /// Phases advance one step at a time, may be rewritten in place, and may
    /// always be cleared.
    pub const fn can_become(self, next: UpdatePhase) -> bool {
        matches!(next, UpdatePhase::None) || next as u8 == self as u8 || next as u8 == self as u8 + 1
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BankId {
    Application = 0,
    Staging = 1,
}

impl BankId {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BankId::Application),
            1 => Some(BankId::Staging),
            _ => None,
        }
    }
}

/// The persisted update record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateProgress {
    pub phase: UpdatePhase,
    /// Bank holding the staged radio-stack image.
    pub target_bank: BankId,
    pub image_size: u32,
    pub image_crc: u32,
}

impl UpdateProgress {
    /// No update pending. Also what erased or unreadable settings decode to.
    pub const NONE: Self = Self {
        phase: UpdatePhase::None,
        target_bank: BankId::Staging,
        image_size: 0,
        image_crc: 0,
    };

    /// Record for an image of `image_size` bytes with CRC-32 `image_crc` sitting in
    /// `target_bank`, not yet touched by the bootloader.
    pub const fn staged(target_bank: BankId, image_size: u32, image_crc: u32) -> Self {
        Self {
            phase: UpdatePhase::Staged,
            target_bank,
            image_size,
            image_crc,
        }
    }

    /// Same image, another phase.
    pub const fn with_phase(self, phase: UpdatePhase) -> Self {
        Self { phase, ..self }
    }

    pub const fn is_in_progress(&self) -> bool {
        self.phase.is_in_progress()
    }
}

impl Default for UpdateProgress {
    fn default() -> Self {
        Self::NONE
    }
}

pub trait ProgressStore {
    /// Last fully committed record, or [`UpdateProgress::NONE`] if there is none.
    fn read(&mut self) -> UpdateProgress;
    fn write(&mut self, record: &UpdateProgress) -> Result<(), StoreError>;
}

/// On-flash slot, little-endian.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Slot {
    sequence: u32,
    phase: u8,
    target_bank: u8,
    reserved: [u8; 2],
    image_size: u32,
    image_crc: u32,
    body_crc: u32,
    commit: u32,
}

impl Slot {
    fn new(sequence: u32, record: &UpdateProgress) -> Self {
        let mut slot = Self {
            sequence,
            phase: record.phase as u8,
            target_bank: record.target_bank as u8,
            reserved: [0xFF; 2],
            image_size: record.image_size,
            image_crc: record.image_crc,
            body_crc: 0,
            commit: STATE_MAGIC,
        };
        slot.body_crc = slot.compute_crc();
        slot
    }

    fn compute_crc(&self) -> u32 {
        crc32fast::hash(&bytemuck::bytes_of(self)[..BODY_LEN])
    }

    fn decode(&self) -> Option<UpdateProgress> {
        if self.commit != STATE_MAGIC || self.body_crc != self.compute_crc() {
            return None;
        }
        Some(UpdateProgress {
            phase: UpdatePhase::from_u8(self.phase)?,
            target_bank: BankId::from_u8(self.target_bank)?,
            image_size: self.image_size,
            image_crc: self.image_crc,
        })
    }
}

fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[derive(Clone, Copy)]
struct Current {
    slot: u32,
    sequence: u32,
    record: UpdateProgress,
}

/// [`ProgressStore`] over two erase pages at the start of `region`.
pub struct FlashProgressStore<F> {
    flash: F,
    region: Region,
    current: Option<Current>,
}

impl<F: NorFlash> FlashProgressStore<F> {
    /// Opens the store and loads the newest committed record. `region` must be page
    /// aligned and hold two pages.
    pub fn new(flash: F, region: Region) -> Result<Self, StoreError> {
        let page = F::ERASE_SIZE as u32;
        if !region.is_aligned(page)
            || region.size < 2 * page
            || 4 % F::WRITE_SIZE != 0
            || SLOT_LEN % F::READ_SIZE != 0
        {
            return Err(StoreError::BadRegion);
        }
        let mut store = Self {
            flash,
            region,
            current: None,
        };
        store.reload();
        Ok(store)
    }

    /// Hands the flash back.
    pub fn release(self) -> F {
        self.flash
    }

    /// Record a freshly staged image. Called by the DFU side once the image is in
    /// the staging bank.
    pub fn stage(&mut self, target_bank: BankId, image_size: u32, image_crc: u32) -> Result<(), StoreError> {
        self.write(&UpdateProgress::staged(target_bank, image_size, image_crc))
    }

    /// Drop a staged update before the bootloader started applying it.
    pub fn abort(&mut self) -> Result<(), StoreError> {
        let from = self.read().phase;
        if matches!(from, UpdatePhase::Continuing | UpdatePhase::Finalizing) {
            return Err(StoreError::IllegalTransition {
                from,
                to: UpdatePhase::None,
            });
        }
        self.write(&UpdateProgress::NONE)
    }

    fn slot_address(&self, slot: u32) -> u32 {
        self.region.start + slot * F::ERASE_SIZE as u32
    }

    fn read_slot(&mut self, slot: u32) -> Result<Option<(u32, UpdateProgress)>, FlashErrorKind> {
        let mut buf = [0u8; SLOT_LEN];
        self.flash
            .read(self.slot_address(slot), &mut buf)
            .map_err(flash_error)?;
        let raw: Slot = bytemuck::pod_read_unaligned(&buf);
        Ok(raw.decode().map(|record| (raw.sequence, record)))
    }

    fn reload(&mut self) {
        let mut newest: Option<Current> = None;
        for slot in 0..2 {
            match self.read_slot(slot) {
                Ok(Some((sequence, record))) => {
                    if newest.map_or(true, |n| is_newer(sequence, n.sequence)) {
                        newest = Some(Current { slot, sequence, record });
                    }
                }
                Ok(None) => trace!("progress slot {} empty", slot),
                Err(e) => warn!("progress slot {} unreadable: {:?}", slot, e),
            }
        }
        self.current = newest;
    }
}

impl<F: NorFlash> ProgressStore for FlashProgressStore<F> {
    fn read(&mut self) -> UpdateProgress {
        self.reload();
        self.current.map_or(UpdateProgress::NONE, |c| c.record)
    }

    fn write(&mut self, record: &UpdateProgress) -> Result<(), StoreError> {
        let from = self.current.map_or(UpdatePhase::None, |c| c.record.phase);
        if !from.can_become(record.phase) {
            return Err(StoreError::IllegalTransition {
                from,
                to: record.phase,
            });
        }

        let (slot, sequence) = match self.current {
            Some(c) => (1 - c.slot, c.sequence.wrapping_add(1)),
            None => (0, 1),
        };
        let address = self.slot_address(slot);
        let image = Slot::new(sequence, record);
        let bytes = bytemuck::bytes_of(&image);

        self.flash
            .erase(address, address + F::ERASE_SIZE as u32)
            .map_err(flash_error)?;
        self.flash
            .write(address, &bytes[..COMMIT_OFFSET])
            .map_err(flash_error)?;
        // Commit word goes last.
        self.flash
            .write(address + COMMIT_OFFSET as u32, &bytes[COMMIT_OFFSET..])
            .map_err(flash_error)?;

        debug!("progress {:?} -> {:?} (seq {})", from, record.phase, sequence);
        self.current = Some(Current {
            slot,
            sequence,
            record: *record,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemFlash;

    const REGION: Region = Region::new(0, 2 * 4096);

    fn store() -> FlashProgressStore<MemFlash> {
        FlashProgressStore::new(MemFlash::new(2 * 4096), REGION).unwrap()
    }

    /// Walks a fresh record through every phase up to `phase`.
    fn advance(s: &mut FlashProgressStore<MemFlash>, record: UpdateProgress, phase: UpdatePhase) {
        for step in [UpdatePhase::Staged, UpdatePhase::Continuing, UpdatePhase::Finalizing, UpdatePhase::Complete] {
            if step > phase {
                break;
            }
            s.write(&record.with_phase(step)).unwrap();
        }
    }

    #[test]
    fn erased_flash_reads_none() {
        assert_eq!(store().read(), UpdateProgress::NONE);
    }

    #[test]
    fn records_survive_reopen() {
        let mut s = store();
        s.stage(BankId::Staging, 1000, 0xAABB_CCDD).unwrap();
        s.write(&UpdateProgress::staged(BankId::Staging, 1000, 0xAABB_CCDD).with_phase(UpdatePhase::Continuing))
            .unwrap();

        let mut reopened = FlashProgressStore::new(s.release(), REGION).unwrap();
        let record = reopened.read();
        assert_eq!(record.phase, UpdatePhase::Continuing);
        assert_eq!(record.image_size, 1000);
        assert_eq!(record.image_crc, 0xAABB_CCDD);
    }

    #[test]
    fn slots_alternate() {
        let mut s = store();
        for phase in [UpdatePhase::Staged, UpdatePhase::Continuing, UpdatePhase::Finalizing] {
            s.write(&UpdateProgress::staged(BankId::Staging, 4, 1).with_phase(phase))
                .unwrap();
        }
        // Three writes: slot 0, slot 1, slot 0 again.
        assert_eq!(s.current.map(|c| c.slot), Some(0));
        assert_eq!(s.current.map(|c| c.sequence), Some(3));
    }

    #[test]
    fn backwards_transition_is_rejected_before_flash() {
        let mut s = store();
        let staged = UpdateProgress::staged(BankId::Staging, 4, 1);
        advance(&mut s, staged, UpdatePhase::Finalizing);
        let err = s.write(&staged.with_phase(UpdatePhase::Continuing)).unwrap_err();
        assert_eq!(
            err,
            StoreError::IllegalTransition {
                from: UpdatePhase::Finalizing,
                to: UpdatePhase::Continuing,
            }
        );
        assert_eq!(s.read().phase, UpdatePhase::Finalizing);
    }

    #[test]
    fn same_phase_rewrite_and_clear_are_allowed() {
        let mut s = store();
        let continuing = UpdateProgress::staged(BankId::Staging, 4, 1).with_phase(UpdatePhase::Continuing);
        advance(&mut s, continuing, UpdatePhase::Continuing);
        s.write(&continuing).unwrap();
        s.write(&UpdateProgress::NONE).unwrap();
        assert_eq!(s.read(), UpdateProgress::NONE);
    }

    #[test]
    fn skipped_phases_are_rejected() {
        let record = UpdateProgress::staged(BankId::Staging, 4, 1);
        let phases = [
            UpdatePhase::None,
            UpdatePhase::Staged,
            UpdatePhase::Continuing,
            UpdatePhase::Finalizing,
            UpdatePhase::Complete,
        ];
        for (i, &from) in phases.iter().enumerate() {
            for &to in phases.iter().skip(i + 2) {
                let mut s = store();
                advance(&mut s, record, from);
                assert_eq!(
                    s.write(&record.with_phase(to)),
                    Err(StoreError::IllegalTransition { from, to }),
                    "{from:?} -> {to:?}"
                );
                assert_eq!(s.read().phase, from);
            }
        }
    }

    #[test]
    fn unstaged_finalizing_record_cannot_be_written() {
        let mut s = store();
        let bogus = UpdateProgress::NONE.with_phase(UpdatePhase::Finalizing);
        assert!(s.write(&bogus).is_err());
        assert_eq!(s.read(), UpdateProgress::NONE);
        s.abort().unwrap();
    }

    #[test]
    fn abort_only_before_applying() {
        let mut s = store();
        s.stage(BankId::Staging, 4, 1).unwrap();
        s.abort().unwrap();
        assert_eq!(s.read(), UpdateProgress::NONE);

        advance(&mut s, UpdateProgress::staged(BankId::Staging, 4, 1), UpdatePhase::Continuing);
        assert!(matches!(s.abort(), Err(StoreError::IllegalTransition { .. })));
    }

    #[test]
    fn corrupt_body_falls_back_to_older_slot() {
        let mut s = store();
        s.stage(BankId::Staging, 4, 1).unwrap();
        s.write(&UpdateProgress::staged(BankId::Staging, 4, 1).with_phase(UpdatePhase::Continuing))
            .unwrap();
        let mut flash = s.release();
        // Flip a bit in the image size of the newer slot (slot 1).
        flash.as_mut_slice()[4096 + 8] ^= 0x01;
        let mut s = FlashProgressStore::new(flash, REGION).unwrap();
        assert_eq!(s.read().phase, UpdatePhase::Staged);
    }

    #[test]
    fn sequence_compare_wraps() {
        assert!(is_newer(1, 0));
        assert!(is_newer(0, u32::MAX));
        assert!(!is_newer(u32::MAX, 0));
        assert!(!is_newer(5, 5));
    }

    #[test]
    fn region_must_hold_two_pages() {
        let result = FlashProgressStore::new(MemFlash::new(4096), Region::new(0, 4096));
        assert!(matches!(result, Err(StoreError::BadRegion)));
    }

    #[test]
    fn phase_rules() {
        assert!(UpdatePhase::None.can_become(UpdatePhase::Staged));
        assert!(UpdatePhase::Staged.can_become(UpdatePhase::Continuing));
        assert!(UpdatePhase::Finalizing.can_become(UpdatePhase::Complete));
        assert!(!UpdatePhase::Staged.can_become(UpdatePhase::Finalizing));
        assert!(UpdatePhase::Complete.can_become(UpdatePhase::None));
        assert!(!UpdatePhase::Complete.can_become(UpdatePhase::Staged));
        assert!(UpdatePhase::Finalizing.is_in_progress());
        assert!(!UpdatePhase::Complete.is_in_progress());
    }
}
