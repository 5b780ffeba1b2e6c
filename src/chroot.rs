//! Mount and chroot staging for operating on non-running systems.
//!
//! A staged OS gets its root partition mounted, special filesystems bound
//! into it, a working resolv.conf, and a fresh mtab, so package managers and
//! bootloader installers behave as if that OS were running. Teardown is the
//! exact inverse and is attempted even when a step fails, so no mounts leak
//! across retries.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::cmd;

/// True when something is mounted exactly at `target`
pub fn is_mounted(target: &Path) -> bool {
    let mounts = match fs::read_to_string("/proc/mounts") {
        Ok(m) => m,
        Err(_) => return false,
    };
    let target = target.to_string_lossy();
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mp| mp == target)
}

/// Mount a partition, doing nothing if it is already mounted at `target`
pub fn mount_partition(partition: &str, target: &Path) -> Result<()> {
    if is_mounted(target) {
        tracing::debug!("{} already mounted, reusing", target.display());
        return Ok(());
    }

    fs::create_dir_all(target)
        .with_context(|| format!("Failed to create mount point {}", target.display()))?;
    cmd::run("mount", [partition, &target.to_string_lossy()])
}

pub fn unmount(target: &Path) -> Result<()> {
    if !is_mounted(target) {
        return Ok(());
    }
    cmd::run("umount", [&target.to_string_lossy().to_string()])
}

/// Mount special filesystems and prime the target for chrooted commands
pub fn setup_chroot(target: &Path) -> Result<()> {
    let target_str = target.to_string_lossy();

    cmd::run("mount", ["--bind", "/dev", &format!("{}/dev", target_str)])?;
    cmd::run(
        "mount",
        ["--bind", "/dev/pts", &format!("{}/dev/pts", target_str)],
    )?;
    cmd::run(
        "mount",
        ["-t", "proc", "proc", &format!("{}/proc", target_str)],
    )?;
    cmd::run(
        "mount",
        ["-t", "sysfs", "sys", &format!("{}/sys", target_str)],
    )?;

    // Package managers need name resolution inside the chroot
    let resolv = target.join("etc/resolv.conf");
    let backup = target.join("etc/resolv.conf.bootmend-backup");
    if resolv.exists() && !backup.exists() {
        if let Err(e) = fs::copy(&resolv, &backup) {
            tracing::debug!("Could not back up resolv.conf: {}", e);
        }
    }
    fs::copy("/etc/resolv.conf", &resolv)
        .context("Failed to place resolv.conf into the chroot")?;

    // Some tools inspect mtab to decide what is mounted
    if let Err(e) = fs::copy("/proc/self/mounts", target.join("etc/mtab")) {
        tracing::debug!("Could not refresh mtab: {}", e);
    }

    Ok(())
}

/// Undo setup_chroot. Individual failures are logged and skipped so teardown
/// always runs to the end.
pub fn teardown_chroot(target: &Path) -> Result<()> {
    let resolv = target.join("etc/resolv.conf");
    let backup = target.join("etc/resolv.conf.bootmend-backup");
    if backup.exists() {
        if let Err(e) = fs::copy(&backup, &resolv) {
            tracing::debug!("Failed to restore resolv.conf: {}", e);
        }
        let _ = fs::remove_file(&backup);
    }

    let target_str = target.to_string_lossy();
    let mounts = ["sys", "proc", "dev/pts", "dev"];
    for mount in mounts {
        let path = format!("{}/{}", target_str, mount);
        if let Err(e) = cmd::run("umount", [&path]) {
            tracing::debug!("Failed to unmount {}: {}", path, e);
        }
    }

    Ok(())
}

/// Mount a staged OS's separate /boot and /boot/efi partitions, if it has them
pub fn mount_boot_partitions(
    target: &Path,
    boot_partition: Option<&str>,
    efi_partition: Option<&str>,
) -> Result<()> {
    if let Some(boot) = boot_partition {
        mount_partition(boot, &target.join("boot"))?;
    }
    if let Some(efi) = efi_partition {
        mount_partition(efi, &target.join("boot/efi"))?;
    }
    Ok(())
}

/// Inverse of mount_boot_partitions; failures logged, not fatal
pub fn unmount_boot_partitions(target: &Path) {
    for sub in ["boot/efi", "boot"] {
        let path = target.join(sub);
        if is_mounted(&path) {
            if let Err(e) = unmount(&path) {
                tracing::debug!("Failed to unmount {}: {}", path.display(), e);
            }
        }
    }
}
