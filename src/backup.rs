//! Backup and restore of a bootloader configuration (`.wxfbc` files).
//!
//! A backup is a JSON snapshot of one OS's bootloader record. Restoring
//! validates that the backup belongs to the selected OS and that its
//! recorded bootloader can actually be installed there before any settings
//! are taken over.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::bootloader::{Bootloader, BootloaderEntry, MenuSet};

pub const BACKUP_EXTENSION: &str = "wxfbc";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootloaderBackup {
    pub os_name: String,
    pub bootloader: Bootloader,
    pub timeout: Option<u32>,
    pub global_kernel_options: Option<String>,
    pub default_os: Option<String>,
    pub menus: MenuSet,
    pub created_at: String,
    pub tool_version: String,
}

impl BootloaderBackup {
    pub fn from_entry(entry: &BootloaderEntry) -> Self {
        Self {
            os_name: entry.os_name.clone(),
            bootloader: entry.bootloader,
            timeout: entry.timeout,
            global_kernel_options: entry.global_kernel_options.clone(),
            default_os: entry.default_os.clone(),
            menus: entry.menus.clone(),
            created_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub fn save(entry: &BootloaderEntry, path: &Path) -> Result<()> {
    let backup = BootloaderBackup::from_entry(entry);
    let json = serde_json::to_string_pretty(&backup)?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write backup to {}", path.display()))?;
    println!("Saved bootloader backup for {} to {}", entry.os_name, path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<BootloaderBackup> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read backup from {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("{} is not a valid bootmend backup", path.display()))
}

/// Reject backups that belong to a different OS or whose bootloader this OS
/// cannot host
pub fn validate(backup: &BootloaderBackup, entry: &BootloaderEntry) -> Result<()> {
    if backup.os_name != entry.os_name {
        bail!(
            "backup was made for \"{}\", but \"{}\" is selected",
            backup.os_name,
            entry.os_name
        );
    }

    let installable = backup.bootloader == entry.bootloader
        || entry.available_bootloaders.contains(&backup.bootloader);
    if !installable {
        bail!(
            "backup records {}, which is neither installed nor installable on {}",
            backup.bootloader,
            entry.os_name
        );
    }

    Ok(())
}

/// Copy a validated backup's contents into the OS's pending settings
pub fn apply_to_settings(backup: &BootloaderBackup, entry: &mut BootloaderEntry) {
    let settings = &mut entry.settings;
    settings.update_config = true;
    settings.new_timeout = backup.timeout;
    settings.new_kernel_options = backup.global_kernel_options.clone();
    settings.default_os = backup.default_os.clone();

    if backup.bootloader != entry.bootloader {
        settings.install_new = true;
        settings.new_bootloader = Some(backup.bootloader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(kind: Bootloader, available: Vec<Bootloader>) -> BootloaderEntry {
        let mut entry = BootloaderEntry::new("Ubuntu (/dev/sda2)");
        entry.bootloader = kind;
        entry.available_bootloaders = available;
        entry.timeout = Some(10);
        entry
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ubuntu.wxfbc");

        let entry = entry_with(Bootloader::Grub2, vec![Bootloader::Lilo]);
        save(&entry, &path).unwrap();

        let backup = load(&path).unwrap();
        assert_eq!(backup.os_name, "Ubuntu (/dev/sda2)");
        assert_eq!(backup.bootloader, Bootloader::Grub2);
        assert_eq!(backup.timeout, Some(10));
    }

    #[test]
    fn restore_rejects_wrong_os() {
        let entry = entry_with(Bootloader::Grub2, vec![]);
        let mut backup = BootloaderBackup::from_entry(&entry);
        backup.os_name = "Fedora (/dev/sdb1)".into();

        assert!(validate(&backup, &entry).is_err());
    }

    #[test]
    fn restore_rejects_uninstallable_bootloader() {
        let entry = entry_with(Bootloader::Grub2, vec![Bootloader::GrubUefi]);
        let mut backup = BootloaderBackup::from_entry(&entry);
        backup.bootloader = Bootloader::Lilo;

        assert!(validate(&backup, &entry).is_err());
    }

    #[test]
    fn restore_accepts_installable_bootloader() {
        let entry = entry_with(Bootloader::Grub2, vec![Bootloader::Lilo]);
        let mut backup = BootloaderBackup::from_entry(&entry);
        backup.bootloader = Bootloader::Lilo;

        assert!(validate(&backup, &entry).is_ok());
    }

    #[test]
    fn applying_backup_with_other_bootloader_requests_install() {
        let mut entry = entry_with(Bootloader::Grub2, vec![Bootloader::Lilo]);
        let mut backup = BootloaderBackup::from_entry(&entry);
        backup.bootloader = Bootloader::Lilo;

        apply_to_settings(&backup, &mut entry);
        assert!(entry.settings.install_new);
        assert_eq!(entry.settings.new_bootloader, Some(Bootloader::Lilo));
        assert!(entry.settings.update_config);
    }
}
