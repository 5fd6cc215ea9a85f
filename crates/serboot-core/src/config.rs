//! Device memory layout.
//!
//! The addresses the trampoline and relocation logic depend on are
//! configuration rather than constants baked into the session, so a
//! different part can be described without touching the core.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::{ERASE_BLOCK_SIZE, RESET_VECTOR_LEN};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Bootloader base 0x{0:05X} is not erase-block aligned")]
    UnalignedBootloader(u32),
    #[error("Bootloader base 0x{base:05X} is outside program flash (size 0x{size:05X})")]
    BootloaderOutOfRange { base: u32, size: u32 },
    #[error("Relocation slot 0x{slot:05X} must lie inside the bootloader region")]
    SlotOutsideBootloader { slot: u32 },
}

/// Memory map of the target part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLayout {
    /// Size of program flash in bytes.
    pub flash_size: u32,
    /// First address of the write-protected bootloader region.
    pub bootloader_base: u32,
    /// Where the application's own reset instruction is relocated.
    pub relocation_slot: u32,
    /// First configuration-fuse address.
    pub config_base: u32,
}

impl Default for DeviceLayout {
    /// PIC18F4550 with a 1 KiB bootloader at the top of flash.
    fn default() -> Self {
        Self {
            flash_size: 0x8000,
            bootloader_base: 0x7C00,
            relocation_slot: 0x7FFF - ERASE_BLOCK_SIZE + 1,
            config_base: 0x30_0000,
        }
    }
}

impl DeviceLayout {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.bootloader_base % ERASE_BLOCK_SIZE != 0 {
            return Err(LayoutError::UnalignedBootloader(self.bootloader_base));
        }
        if self.bootloader_base >= self.flash_size {
            return Err(LayoutError::BootloaderOutOfRange {
                base: self.bootloader_base,
                size: self.flash_size,
            });
        }
        let slot_end = self.relocation_slot + RESET_VECTOR_LEN as u32;
        if self.relocation_slot < self.bootloader_base || slot_end > self.flash_size {
            return Err(LayoutError::SlotOutsideBootloader {
                slot: self.relocation_slot,
            });
        }
        Ok(())
    }

    /// Whether `address` is inside the write-protected bootloader region.
    pub fn is_protected(&self, address: u32) -> bool {
        address >= self.bootloader_base && address < self.flash_size
    }

    /// Load a layout from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let layout: DeviceLayout = toml::from_str(&content)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Save the layout to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = DeviceLayout::default();
        assert_eq!(layout.relocation_slot, 0x7FC0);
        assert!(layout.validate().is_ok());
        assert!(layout.is_protected(0x7C00));
        assert!(!layout.is_protected(0x7BFF));
        assert!(!layout.is_protected(0x30_0000));
    }

    #[test]
    fn test_invalid_layouts() {
        let layout = DeviceLayout {
            bootloader_base: 0x7C10,
            ..Default::default()
        };
        assert_eq!(layout.validate(), Err(LayoutError::UnalignedBootloader(0x7C10)));

        let layout = DeviceLayout {
            relocation_slot: 0x0100,
            ..Default::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::SlotOutsideBootloader { .. })
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let path = std::env::temp_dir().join(format!("serboot-layout-{}.toml", std::process::id()));
        let layout = DeviceLayout {
            bootloader_base: 0x3C00,
            flash_size: 0x4000,
            relocation_slot: 0x3FC0,
            ..Default::default()
        };
        layout.save_to_file(&path).unwrap();
        let loaded = DeviceLayout::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, layout);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let layout: DeviceLayout = toml::from_str("bootloader_base = 0x7800\n").unwrap();
        assert_eq!(layout.bootloader_base, 0x7800);
        assert_eq!(layout.config_base, 0x30_0000);
    }
}
