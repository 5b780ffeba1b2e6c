//! Operating-system discovery: which OS is running, and what else is
//! installed on the machine's partitions. Linux installs are identified by
//! mounting candidate partitions and reading /etc/os-release; Windows and
//! macOS installs are recognized by their filesystem layout only.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::chroot;
use crate::paths;
use crate::registry::{DiskRegistry, OsEntry, OsRegistry, PackageManager};
use crate::util;

const LINUX_FILESYSTEMS: &[&str] = &["ext2", "ext3", "ext4", "btrfs", "xfs"];

pub fn discover_oses(disks: &DiskRegistry) -> Result<OsRegistry> {
    let mut oses = OsRegistry::default();

    let proc_mounts = fs::read_to_string("/proc/mounts").unwrap_or_default();
    let current = discover_current_os(&proc_mounts)?;
    let current_root = current.partition.clone();
    oses.insert(current);

    for disk in disks.iter() {
        let Some(fs_type) = disk.filesystem.as_deref() else {
            continue;
        };
        if disk.name == current_root {
            continue;
        }

        if LINUX_FILESYSTEMS.contains(&fs_type) {
            match probe_linux_partition(&disk.name) {
                Ok(Some(os)) => oses.insert(os),
                Ok(None) => {}
                Err(e) => tracing::debug!("probe of {} failed: {}", disk.name, e),
            }
        } else if fs_type == "ntfs" || fs_type == "vfat" {
            if let Some(os) = probe_windows_partition(&disk.name) {
                oses.insert(os);
            }
        } else if fs_type == "hfsplus" || fs_type == "apfs" {
            oses.insert(OsEntry {
                name: format!("macOS ({})", disk.name),
                is_current_os: false,
                arch: "Unknown".into(),
                partition: disk.name.clone(),
                boot_partition: None,
                efi_partition: None,
                package_manager: PackageManager::MacAppStore,
            });
        }
    }

    Ok(oses)
}

fn discover_current_os(proc_mounts: &str) -> Result<OsEntry> {
    let root_device = device_mounted_at(proc_mounts, "/")
        .context("could not determine the root device from /proc/mounts")?;

    let pretty = fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|c| os_release_pretty_name(&c))
        .unwrap_or_else(|| "Linux".to_string());

    Ok(OsEntry {
        name: format!("{} ({})", pretty, root_device),
        is_current_os: true,
        arch: util::detect_arch(),
        partition: root_device,
        boot_partition: device_mounted_at(proc_mounts, "/boot"),
        efi_partition: device_mounted_at(proc_mounts, "/boot/efi"),
        package_manager: detect_package_manager(Path::new("/")),
    })
}

/// Mount a partition at a scratch point, look for an os-release, unmount
fn probe_linux_partition(partition: &str) -> Result<Option<OsEntry>> {
    let mount_point = paths::mount_point_for(partition);
    chroot::mount_partition(partition, &mount_point)?;

    let result = read_linux_os(partition, &mount_point);

    if let Err(e) = chroot::unmount(&mount_point) {
        tracing::debug!("failed to unmount probe of {}: {}", partition, e);
    }

    result
}

fn read_linux_os(partition: &str, mount_point: &Path) -> Result<Option<OsEntry>> {
    let os_release = mount_point.join("etc/os-release");
    if !os_release.exists() {
        return Ok(None);
    }

    let pretty = fs::read_to_string(&os_release)
        .ok()
        .and_then(|c| os_release_pretty_name(&c))
        .unwrap_or_else(|| "Linux".to_string());

    let arch = arch_of_binary(&mount_point.join("bin/sh"))
        .unwrap_or_else(|| "Unknown".to_string());

    Ok(Some(OsEntry {
        name: format!("{} ({})", pretty, partition),
        is_current_os: false,
        arch,
        partition: partition.to_string(),
        // Separate /boot and EFI partitions of a foreign OS would need its
        // fstab parsed; left unknown and mounted on demand during apply
        boot_partition: None,
        efi_partition: None,
        package_manager: detect_package_manager(mount_point),
    }))
}

fn probe_windows_partition(partition: &str) -> Option<OsEntry> {
    let mount_point = paths::mount_point_for(partition);
    chroot::mount_partition(partition, &mount_point).ok()?;

    let is_windows = mount_point.join("Windows/System32").exists();
    let _ = chroot::unmount(&mount_point);

    if !is_windows {
        return None;
    }

    Some(OsEntry {
        name: format!("Windows ({})", partition),
        is_current_os: false,
        arch: "Unknown".into(),
        partition: partition.to_string(),
        boot_partition: None,
        efi_partition: None,
        package_manager: PackageManager::WindowsInstaller,
    })
}

/// Source device of the filesystem mounted exactly at `mount_point`
pub fn device_mounted_at(proc_mounts: &str, mount_point: &str) -> Option<String> {
    for line in proc_mounts.lines() {
        let mut fields = line.split_whitespace();
        let device = fields.next()?;
        let target = fields.next()?;
        if target == mount_point && device.starts_with("/dev/") {
            return Some(device.to_string());
        }
    }
    None
}

pub fn os_release_pretty_name(content: &str) -> Option<String> {
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

fn detect_package_manager(root: &Path) -> PackageManager {
    if root.join("usr/bin/apt-get").exists() {
        PackageManager::AptGet
    } else if root.join("usr/bin/yum").exists() || root.join("usr/bin/dnf").exists() {
        PackageManager::Yum
    } else {
        PackageManager::Unknown
    }
}

/// Architecture from the ELF header of a binary: byte 4 of the ident is 1
/// for 32-bit and 2 for 64-bit
fn arch_of_binary(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() < 5 || &bytes[..4] != b"\x7fELF" {
        return None;
    }
    match bytes[4] {
        1 => Some("i686".to_string()),
        2 => Some("x86_64".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
/dev/sda2 / ext4 rw,relatime 0 0
/dev/sda3 /boot ext4 rw,relatime 0 0
/dev/sda1 /boot/efi vfat rw 0 0
proc /proc proc rw 0 0
";

    #[test]
    fn finds_device_for_mount_point() {
        assert_eq!(device_mounted_at(MOUNTS, "/").as_deref(), Some("/dev/sda2"));
        assert_eq!(
            device_mounted_at(MOUNTS, "/boot/efi").as_deref(),
            Some("/dev/sda1")
        );
        assert_eq!(device_mounted_at(MOUNTS, "/home"), None);
    }

    #[test]
    fn virtual_filesystems_are_not_devices() {
        assert_eq!(device_mounted_at(MOUNTS, "/proc"), None);
    }

    #[test]
    fn pretty_name_from_os_release() {
        let content = "NAME=\"Ubuntu\"\nPRETTY_NAME=\"Ubuntu 22.04.3 LTS\"\n";
        assert_eq!(
            os_release_pretty_name(content).as_deref(),
            Some("Ubuntu 22.04.3 LTS")
        );
        assert_eq!(os_release_pretty_name("NAME=x\n"), None);
    }
}
