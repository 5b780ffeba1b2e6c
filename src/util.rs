use std::path::Path;

use crate::cmd;

/// Firmware boot mode of the running machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    Uefi,
    Bios,
}

impl FirmwareMode {
    pub fn name(&self) -> &'static str {
        match self {
            FirmwareMode::Uefi => "UEFI",
            FirmwareMode::Bios => "BIOS",
        }
    }
}

/// Detect how the machine was booted. The efivars directory only exists when
/// the kernel came up under UEFI firmware.
pub fn detect_firmware_mode() -> FirmwareMode {
    if Path::new("/sys/firmware/efi").exists() {
        FirmwareMode::Uefi
    } else {
        FirmwareMode::Bios
    }
}

/// Machine architecture as reported by the kernel
pub fn detect_arch() -> String {
    cmd::run_output("uname", ["-m"]).unwrap_or_else(|_| "Unknown".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_mode_names() {
        assert_eq!(FirmwareMode::Uefi.name(), "UEFI");
        assert_eq!(FirmwareMode::Bios.name(), "BIOS");
    }
}
