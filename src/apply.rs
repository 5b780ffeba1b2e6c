//! Apply orchestrator: runs the user's requested bootloader operations,
//! one OS at a time.
//!
//! A full bootloader replacement is three steps per OS: remove the old
//! loader's packages, install the new one's, then rewrite its configuration.
//! Reinstalls and plain config updates collapse to the last step with the
//! installed loader standing in for the "new" one. Each failed step can be
//! retried or skipped at a prompt; skipping abandons the rest of that OS's
//! steps but never touches the other OSs.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::bootloader::{grub2, Bootloader, BootloaderEntry, BootloaderOps, WriteCtx};
use crate::chroot;
use crate::network;
use crate::paths;
use crate::privwrite;
use crate::prompt;
use crate::registry::{DiskRegistry, OsEntry, OsRegistry, PackageManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Remove,
    Install,
    SetConfig,
}

impl Step {
    fn describe(&self, kind: Bootloader) -> String {
        match self {
            Step::Remove => format!("removing {}", kind),
            Step::Install => format!("installing {}", kind),
            Step::SetConfig => format!("configuring {}", kind),
        }
    }
}

/// Run every requested operation. Failures are isolated per OS: an abandoned
/// OS is reported and the loop moves on.
pub fn run(
    disks: &DiskRegistry,
    oses: &OsRegistry,
    bootloaders: &mut BTreeMap<String, BootloaderEntry>,
) -> Result<()> {
    let selected: Vec<String> = bootloaders
        .iter()
        .filter(|(_, e)| e.is_modifyable && e.settings.any_operations())
        .map(|(name, _)| name.clone())
        .collect();

    if selected.is_empty() {
        println!("No bootloader operations were requested.");
        return Ok(());
    }

    for name in &selected {
        let entry = bootloaders
            .get_mut(name)
            .with_context(|| format!("no bootloader record for {}", name))?;

        println!("\n=== {} ===", name);
        match run_os_operations(disks, oses, name, entry) {
            Ok(()) => println!("Finished bootloader operations for {}", name),
            Err(e) => println!("Abandoned bootloader operations for {}: {:#}", name, e),
        }
    }

    println!("\nAll requested operations have been processed.");
    Ok(())
}

fn run_os_operations(
    disks: &DiskRegistry,
    oses: &OsRegistry,
    os_name: &str,
    entry: &mut BootloaderEntry,
) -> Result<()> {
    let os = oses
        .get(os_name)
        .with_context(|| format!("unknown operating system {}", os_name))?;

    let old_kind = entry.bootloader;
    let new_kind = if entry.settings.install_new {
        entry
            .settings
            .new_bootloader
            .context("a new bootloader was requested but none was selected")?
    } else {
        // Reinstall or config-only update acts on the installed loader
        old_kind
    };

    let steps: &[Step] = if entry.settings.install_new {
        &[Step::Remove, Step::Install, Step::SetConfig]
    } else {
        &[Step::SetConfig]
    };

    let boot_device = boot_device_for(os, disks)
        .with_context(|| format!("could not determine the boot device for {}", os_name))?;

    for step in steps {
        let kind = match step {
            Step::Remove => old_kind,
            _ => new_kind,
        };
        run_step_with_retry(disks, oses, os, entry, *step, kind, old_kind, new_kind, &boot_device)?;
    }

    if entry.settings.install_new {
        entry.bootloader = new_kind;
    }

    Ok(())
}

/// Device the loader should be installed to: the recorded boot disk, else
/// the root partition's host disk, else the root partition itself
pub fn boot_device_for(os: &OsEntry, disks: &DiskRegistry) -> Option<String> {
    if let Some(entry) = disks.get(&os.partition) {
        if let Some(host) = &entry.host_device {
            return Some(host.clone());
        }
    }
    Some(os.partition.clone())
}

#[allow(clippy::too_many_arguments)]
fn run_step_with_retry(
    disks: &DiskRegistry,
    oses: &OsRegistry,
    os: &OsEntry,
    entry: &BootloaderEntry,
    step: Step,
    kind: Bootloader,
    old_kind: Bootloader,
    new_kind: Bootloader,
    boot_device: &str,
) -> Result<()> {
    loop {
        let result = execute_step(disks, oses, os, entry, step, kind, old_kind, new_kind, boot_device);
        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        println!("Error while {}: {:#}", step.describe(kind), err);
        if matches!(step, Step::Remove | Step::Install) && !network::internet_available() {
            prompt::show_message(
                "No internet connection was detected. Package operations will \
                 keep failing until the connection comes back.",
            );
        }

        if !prompt::prompt_yes_no(&format!("Try {} again?", step.describe(kind)), true)? {
            bail!("step skipped at user request");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_step(
    disks: &DiskRegistry,
    oses: &OsRegistry,
    os: &OsEntry,
    entry: &BootloaderEntry,
    step: Step,
    kind: Bootloader,
    old_kind: Bootloader,
    new_kind: Bootloader,
    boot_device: &str,
) -> Result<()> {
    let driver = driver_for(kind)?;

    with_staged_os(os, |os_root, use_chroot| {
        let ctx = WriteCtx {
            os,
            entry,
            os_root,
            use_chroot,
            disks,
            oses,
            boot_device,
        };

        match step {
            Step::Remove => {
                wait_for_package_lock(os.package_manager, os_root);
                driver.remove(&ctx)
            }
            Step::Install => {
                wait_for_package_lock(os.package_manager, os_root);
                driver.install(&ctx)
            }
            Step::SetConfig => {
                driver.write_config(&ctx)?;
                fix_boot_commands_after_switch(&ctx, old_kind, new_kind)
            }
        }
    })
}

fn driver_for(kind: Bootloader) -> Result<Box<dyn BootloaderOps>> {
    kind.driver()
        .with_context(|| format!("{} cannot be managed from Linux", kind))
}

/// Run a closure against an OS root. The running OS is acted on directly at
/// "/"; any other OS is mounted and chrooted first and torn down afterwards,
/// on the failure path too.
pub fn with_staged_os<T, F>(os: &OsEntry, f: F) -> Result<T>
where
    F: FnOnce(&Path, bool) -> Result<T>,
{
    if os.is_current_os {
        return f(Path::new("/"), false);
    }

    let mount_point = paths::mount_point_for(&os.partition);
    chroot::mount_partition(&os.partition, &mount_point)?;

    let result = chroot::setup_chroot(&mount_point).and_then(|()| {
        chroot::mount_boot_partitions(
            &mount_point,
            os.boot_partition.as_deref(),
            os.efi_partition.as_deref(),
        )?;
        f(&mount_point, true)
    });

    chroot::unmount_boot_partitions(&mount_point);
    if let Err(e) = chroot::teardown_chroot(&mount_point) {
        tracing::debug!("chroot teardown for {} left residue: {}", os.name, e);
    }
    if let Err(e) = chroot::unmount(&mount_point) {
        tracing::debug!("failed to unmount {}: {}", mount_point.display(), e);
    }

    result
}

/// Block until the OS's package-manager lock is free. yum leaves a pid file
/// while a transaction runs; dpkg holds a lock file open, which fuser sees.
pub fn wait_for_package_lock(pm: PackageManager, os_root: &Path) {
    while package_lock_held(pm, os_root) {
        println!(
            "Waiting for another {} process to finish...",
            pm.name()
        );
        thread::sleep(Duration::from_secs(paths::LOCK_POLL_SECS));
    }
}

fn package_lock_held(pm: PackageManager, os_root: &Path) -> bool {
    match pm {
        PackageManager::Yum => os_root
            .join(paths::YUM_LOCK.trim_start_matches('/'))
            .exists(),
        PackageManager::AptGet => {
            let lock = os_root.join(paths::DPKG_LOCK.trim_start_matches('/'));
            Command::new("fuser")
                .arg(&lock)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        }
        _ => false,
    }
}

/// Fedora's grub2-mkconfig emits linux/initrd commands for the packaging it
/// ran under, which is wrong after a BIOS<->UEFI switch on the same OS. Patch
/// the generated menu to the command set the new loader boots with.
fn fix_boot_commands_after_switch(
    ctx: &WriteCtx<'_>,
    old_kind: Bootloader,
    new_kind: Bootloader,
) -> Result<()> {
    if ctx.os.package_manager != PackageManager::Yum
        || old_kind == new_kind
        || old_kind.is_efi() == new_kind.is_efi()
    {
        return Ok(());
    }

    let Some(menu_path) = grub2::menu_config_file(ctx.os_root) else {
        return Ok(());
    };

    let content = fs::read_to_string(&menu_path)
        .with_context(|| format!("Failed to read {}", menu_path.display()))?;
    let fixed = grub2::fix_boot_commands(&content, new_kind.is_efi());

    if fixed != content {
        println!(
            "Adjusting boot commands in {} for {}",
            menu_path.display(),
            new_kind
        );
        privwrite::write_config_file(ctx.os_root, &menu_path, &fixed)?;
    }

    Ok(())
}

/// Outcome of a filesystem check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsckVerdict {
    Clean,
    Fixed,
    Serious,
}

/// Map an fsck exit code to a verdict: 0 is clean, 1-3 mean errors were
/// corrected (possibly with a reboot pending), anything higher is trouble
/// fsck could not fix on its own.
pub fn interpret_fsck_code(code: i32) -> FsckVerdict {
    match code {
        0 => FsckVerdict::Clean,
        1..=3 => FsckVerdict::Fixed,
        _ => FsckVerdict::Serious,
    }
}

/// Run a preen-mode fsck against an unmounted partition
pub fn check_filesystem(partition: &str) -> Result<FsckVerdict> {
    let (code, _) = crate::cmd::run_status_output("fsck", ["-a", partition])?;
    Ok(interpret_fsck_code(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DiskEntry;

    #[test]
    fn fsck_codes_map_to_verdicts() {
        assert_eq!(interpret_fsck_code(0), FsckVerdict::Clean);
        assert_eq!(interpret_fsck_code(1), FsckVerdict::Fixed);
        assert_eq!(interpret_fsck_code(2), FsckVerdict::Fixed);
        assert_eq!(interpret_fsck_code(3), FsckVerdict::Fixed);
        assert_eq!(interpret_fsck_code(4), FsckVerdict::Serious);
        assert_eq!(interpret_fsck_code(8), FsckVerdict::Serious);
        assert_eq!(interpret_fsck_code(-1), FsckVerdict::Serious);
    }

    #[test]
    fn boot_device_prefers_host_disk() {
        let mut disks = DiskRegistry::default();
        disks.insert(DiskEntry {
            name: "/dev/sda2".into(),
            kind: crate::registry::DeviceKind::Partition,
            host_device: Some("/dev/sda".into()),
            partitions: Vec::new(),
            filesystem: Some("ext4".into()),
            uuid: None,
            id: None,
            capacity_bytes: 0,
        });

        let os = OsEntry {
            name: "Ubuntu (/dev/sda2)".into(),
            is_current_os: true,
            arch: "x86_64".into(),
            partition: "/dev/sda2".into(),
            boot_partition: None,
            efi_partition: None,
            package_manager: PackageManager::AptGet,
        };

        assert_eq!(boot_device_for(&os, &disks).as_deref(), Some("/dev/sda"));
    }

    #[test]
    fn boot_device_falls_back_to_partition() {
        let disks = DiskRegistry::default();
        let os = OsEntry {
            name: "Fedora (/dev/nvme0n1p2)".into(),
            is_current_os: false,
            arch: "x86_64".into(),
            partition: "/dev/nvme0n1p2".into(),
            boot_partition: None,
            efi_partition: None,
            package_manager: PackageManager::Yum,
        };

        assert_eq!(
            boot_device_for(&os, &disks).as_deref(),
            Some("/dev/nvme0n1p2")
        );
    }
}
