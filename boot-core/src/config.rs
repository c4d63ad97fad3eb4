//! Flash layout and boot-time configuration.

use crate::progress::BankId;
use crate::scheduler::SchedulerConfig;

/// Contiguous flash address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub start: u32,
    pub size: u32,
}

impl Region {
    pub const fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// One past the last byte.
    pub const fn end(&self) -> u32 {
        self.start + self.size
    }

    pub const fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    pub const fn is_aligned(&self, page_size: u32) -> bool {
        self.start % page_size == 0 && self.size % page_size == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutError {
    #[error("region {0} is not page aligned")]
    Misaligned(&'static str),
    #[error("regions {0} and {1} overlap")]
    Overlap(&'static str, &'static str),
    #[error("settings region must hold two pages")]
    SettingsTooSmall,
    #[error("staging bank cannot hold a full radio stack image")]
    StagingTooSmall,
}

/// Where everything lives in internal flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashLayout {
    /// Erase unit, checked against FICR at boot.
    pub page_size: u32,
    /// Radio stack image, directly after the MBR.
    pub radio_stack: Region,
    pub app_bank: Region,
    pub staging_bank: Region,
    /// Our own image. Its start must match the UICR bootloader address.
    pub bootloader: Region,
    /// Two pages of update progress records.
    pub settings: Region,
}

impl FlashLayout {
    /// nRF52840 with the S140 radio stack behind the MBR.
    pub const NRF52840_S140: Self = Self {
        page_size: 0x1000,
        radio_stack: Region::new(0x0000_1000, 0x2_6000),
        app_bank: Region::new(0x0002_7000, 0x6_6000),
        staging_bank: Region::new(0x0008_D000, 0x6_6000),
        bootloader: Region::new(0x000F_4000, 0xA000),
        settings: Region::new(0x000F_E000, 0x2000),
    };

    fn named(&self) -> [(&'static str, Region); 5] {
        [
            ("radio_stack", self.radio_stack),
            ("app_bank", self.app_bank),
            ("staging_bank", self.staging_bank),
            ("bootloader", self.bootloader),
            ("settings", self.settings),
        ]
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let regions = self.named();
        for (name, region) in regions {
            if !region.is_aligned(self.page_size) {
                return Err(LayoutError::Misaligned(name));
            }
        }
        for (i, (a_name, a)) in regions.iter().enumerate() {
            for (b_name, b) in &regions[i + 1..] {
                if a.overlaps(b) {
                    return Err(LayoutError::Overlap(a_name, b_name));
                }
            }
        }
        if self.settings.size < 2 * self.page_size {
            return Err(LayoutError::SettingsTooSmall);
        }
        if self.staging_bank.size < self.radio_stack.size {
            return Err(LayoutError::StagingTooSmall);
        }
        Ok(())
    }

    pub const fn bank(&self, id: BankId) -> Region {
        match id {
            BankId::Application => self.app_bank,
            BankId::Staging => self.staging_bank,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LfClockSource {
    Rc,
    Xtal,
    Synth,
}

/// Radio stack bring-up parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioConfig {
    pub lf_clock: LfClockSource,
    pub lf_accuracy_ppm: u16,
    pub central_links: u8,
    pub peripheral_links: u8,
}

impl RadioConfig {
    pub const DEFAULT: Self = Self {
        lf_clock: LfClockSource::Xtal,
        lf_accuracy_ppm: 20,
        central_links: 1,
        peripheral_links: 1,
    };
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootConfig {
    pub layout: FlashLayout,
    pub scheduler: SchedulerConfig,
    pub radio: RadioConfig,
    /// DFU session gives up and resets after this long without traffic.
    pub dfu_inactivity_timeout_ms: u32,
}

impl BootConfig {
    pub const NRF52840_S140: Self = Self {
        layout: FlashLayout::NRF52840_S140,
        scheduler: SchedulerConfig::DEFAULT,
        radio: RadioConfig::DEFAULT,
        dfu_inactivity_timeout_ms: 120_000,
    };
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::NRF52840_S140
    }
}
