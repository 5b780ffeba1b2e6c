//! Console front end: system scan, the interactive settings flow, and the
//! backup/restore subcommands.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::apply;
use crate::backup;
use crate::bootloader::detect;
use crate::bootloader::{Bootloader, BootloaderEntry, ParsedConfig};
use crate::discovery;
use crate::matcher;
use crate::prompt::{self, SelectOption};
use crate::registry::{self, DiskRegistry, OsEntry, OsRegistry, PackageManager};
use crate::util::{self, FirmwareMode};

/// Everything a scan of the machine produces
pub struct ScanResult {
    pub disks: DiskRegistry,
    pub oses: OsRegistry,
    pub firmware: FirmwareMode,
    pub bootloaders: BTreeMap<String, BootloaderEntry>,
}

/// Inventory the machine: disks, operating systems, and each OS's
/// bootloader state
pub fn scan() -> Result<ScanResult> {
    println!("Collecting disk information...");
    let disks = registry::collect_disks()?;

    println!("Looking for operating systems...");
    let oses = discovery::discover_oses(&disks)?;

    let firmware = util::detect_firmware_mode();
    tracing::info!(?firmware, "firmware mode detected");

    let current_arch = oses
        .current()
        .map(|os| os.arch.clone())
        .context("the running operating system was not identified")?;

    let mut bootloaders = BTreeMap::new();
    for os in oses.iter() {
        println!("Checking the bootloader of {}...", os.name);
        let entry = scan_os(os, &disks, firmware, &current_arch);
        bootloaders.insert(os.name.clone(), entry);
    }

    // Default-OS resolution needs the complete OS list, so it runs after
    // every bootloader has been parsed
    for entry in bootloaders.values_mut() {
        if let Some(device) = matcher::resolve_default_boot_device(entry) {
            entry.default_os = matcher::match_device_to_os(&device, &oses, &disks);
        }
    }

    Ok(ScanResult {
        disks,
        oses,
        firmware,
        bootloaders,
    })
}

fn scan_os(
    os: &OsEntry,
    disks: &DiskRegistry,
    firmware: FirmwareMode,
    current_arch: &str,
) -> BootloaderEntry {
    let mut entry = BootloaderEntry::new(&os.name);
    entry.boot_disk = disks.host_device_of(&os.partition).map(str::to_string);

    if !os.package_manager.is_linux() {
        entry.bootloader = match os.package_manager {
            PackageManager::MacAppStore => Bootloader::IBoot,
            PackageManager::WindowsInstaller => {
                if firmware == FirmwareMode::Uefi {
                    Bootloader::WindowsBootManager
                } else {
                    Bootloader::NtLoader
                }
            }
            _ => Bootloader::Unknown,
        };
        entry.is_modifyable = false;
        entry.comments = format!("{} bootloaders cannot be managed from Linux", entry.bootloader);
        return entry;
    }

    let staged = apply::with_staged_os(os, |os_root, use_chroot| {
        let (installed, available) = detect::detect(os, os_root, use_chroot, firmware);
        let parsed = match installed.driver() {
            Some(driver) => driver.parse_config(os_root, disks)?,
            None => ParsedConfig::default(),
        };
        Ok((installed, available, parsed))
    });

    match staged {
        Ok((installed, available, parsed)) => {
            entry.bootloader = installed;
            entry.available_bootloaders = available;
            entry.menus = parsed.menus;
            entry.timeout = parsed.timeout;
            entry.global_kernel_options = parsed.global_kernel_options;
            entry.bl_specific_default_os = parsed.default_ref;

            if installed == Bootloader::Unknown {
                entry.is_modifyable = false;
                entry.comments = "no known bootloader was detected".into();
            } else if os.arch != current_arch {
                entry.is_modifyable = false;
                entry.comments = format!(
                    "its architecture ({}) differs from the running OS ({})",
                    os.arch, current_arch
                );
            }
        }
        Err(e) => {
            entry.is_modifyable = false;
            entry.comments = format!("the scan failed: {:#}", e);
        }
    }

    entry
}

/// Print the scan results, ending with one consolidated block of warnings
/// for everything that cannot be modified
pub fn report(scan: &ScanResult) {
    println!("\nOperating systems:");
    for os in scan.oses.iter() {
        let marker = if os.is_current_os { " (running)" } else { "" };
        println!(
            "  {}{} - {} on {}, packages via {}",
            os.name,
            marker,
            os.arch,
            os.partition,
            os.package_manager.name()
        );
    }

    println!("\nBootloaders:");
    for entry in scan.bootloaders.values() {
        println!("  {}:", entry.os_name);
        println!("    installed: {}", entry.bootloader);
        if !entry.available_bootloaders.is_empty() {
            let names: Vec<&str> = entry
                .available_bootloaders
                .iter()
                .map(|k| k.name())
                .collect();
            println!("    installable: {}", names.join(", "));
        }
        if let Some(timeout) = entry.timeout {
            println!("    menu timeout: {} seconds", timeout);
        }
        if let Some(default_os) = &entry.default_os {
            println!("    boots by default: {}", default_os);
        }
    }

    let warnings: Vec<&BootloaderEntry> = scan
        .bootloaders
        .values()
        .filter(|e| !e.is_modifyable)
        .collect();
    if !warnings.is_empty() {
        println!("\nThe following systems cannot be modified:");
        for entry in warnings {
            println!("  {} - {}", entry.os_name, entry.comments);
        }
    }
}

/// The default flow: scan, gather settings, confirm, apply
pub fn interactive() -> Result<()> {
    let mut scan = scan()?;
    report(&scan);

    if prompt::prompt_yes_no(
        "\nCheck the filesystems of the other operating systems first?",
        false,
    )? && !check_filesystems(&scan)?
    {
        println!("Stopping at your request. No changes were made.");
        return Ok(());
    }

    let modifiable: Vec<String> = scan
        .bootloaders
        .values()
        .filter(|e| e.is_modifyable)
        .map(|e| e.os_name.clone())
        .collect();

    if modifiable.is_empty() {
        prompt::show_message("\nNo system here has a bootloader this tool can modify.");
        return Ok(());
    }

    for name in &modifiable {
        if let Some(entry) = scan.bootloaders.get_mut(name) {
            prompt_os_settings(entry, &scan.oses)?;
        }
    }

    let planned: Vec<String> = scan
        .bootloaders
        .values()
        .filter(|e| e.settings.any_operations())
        .map(|e| describe_plan(e))
        .collect();

    if planned.is_empty() {
        println!("\nNothing to do.");
        return Ok(());
    }

    println!("\nPlanned operations:");
    for line in &planned {
        println!("  {}", line);
    }
    println!(
        "\nWarning: interrupting bootloader operations (power loss, forced \
         shutdown) can leave a system unbootable. Close other package \
         managers before continuing."
    );

    if !prompt::prompt_yes_no("Apply these operations now?", false)? {
        println!("Cancelled. No changes were made.");
        return Ok(());
    }

    apply::run(&scan.disks, &scan.oses, &mut scan.bootloaders)
}

fn describe_plan(entry: &BootloaderEntry) -> String {
    let mut parts = Vec::new();
    if entry.settings.install_new {
        if let Some(new) = entry.settings.new_bootloader {
            parts.push(format!("replace {} with {}", entry.bootloader, new));
        }
    } else if entry.settings.reinstall {
        parts.push(format!("reinstall {}", entry.bootloader));
    }
    if entry.settings.update_config {
        parts.push("update configuration".to_string());
    }
    format!("{}: {}", entry.os_name, parts.join(", "))
}

/// fsck every unmounted Linux root partition belonging to another OS.
/// Returns false when serious errors were found and the user chose to stop.
fn check_filesystems(scan: &ScanResult) -> Result<bool> {
    for os in scan.oses.iter() {
        if os.is_current_os || !os.package_manager.is_linux() {
            continue;
        }
        if partition_is_mounted(&os.partition) {
            println!("Skipping {}: {} is mounted", os.name, os.partition);
            continue;
        }

        println!("Checking {} ({})...", os.name, os.partition);
        match apply::check_filesystem(&os.partition)? {
            apply::FsckVerdict::Clean => {}
            apply::FsckVerdict::Fixed => {
                println!("Errors on {} were found and repaired.", os.partition);
            }
            apply::FsckVerdict::Serious => {
                println!(
                    "Serious errors were found on {} that could not be \
                     repaired automatically.",
                    os.partition
                );
                if !prompt::prompt_yes_no("Continue with bootloader operations anyway?", false)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn partition_is_mounted(partition: &str) -> bool {
    let mounts = fs::read_to_string("/proc/mounts").unwrap_or_default();
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|device| device == partition)
}

/// Gather one OS's pending operations at the console
fn prompt_os_settings(entry: &mut BootloaderEntry, oses: &OsRegistry) -> Result<()> {
    println!("\n--- {} ---", entry.os_name);
    println!("Installed bootloader: {}", entry.bootloader);

    let replacements: Vec<Bootloader> = entry
        .available_bootloaders
        .iter()
        .copied()
        .filter(|k| k.installable() && *k != entry.bootloader)
        .collect();

    if !replacements.is_empty()
        && prompt::prompt_yes_no("Install a different bootloader?", false)?
    {
        let options: Vec<SelectOption> = replacements
            .iter()
            .map(|k| SelectOption::new(k.name(), k.name()))
            .collect();
        let chosen = prompt::prompt_select("Bootloader to install", &options, 0)?;
        entry.settings.install_new = true;
        entry.settings.new_bootloader = Some(Bootloader::from_name(&chosen));
        entry.settings.update_config = true;
    } else if entry.bootloader.installable() {
        if prompt::prompt_yes_no(
            &format!("Reinstall {} to repair it?", entry.bootloader),
            false,
        )? {
            entry.settings.reinstall = true;
            entry.settings.update_config = true;
        } else if prompt::prompt_yes_no(
            &format!("Update the {} configuration?", entry.bootloader),
            false,
        )? {
            entry.settings.update_config = true;
        }
    }

    if entry.settings.update_config {
        prompt_config_values(entry, oses)?;
    }

    Ok(())
}

fn prompt_config_values(entry: &mut BootloaderEntry, oses: &OsRegistry) -> Result<()> {
    let current_timeout = entry.timeout.unwrap_or(10);
    let timeout = loop {
        let input =
            prompt::prompt_text_default("Boot menu timeout in seconds", &current_timeout.to_string())?;
        match input.parse::<u32>() {
            Ok(t) if t <= 100 => break t,
            _ => println!("Enter a whole number of seconds between 0 and 100"),
        }
    };
    entry.settings.new_timeout = Some(timeout);

    let current_options = entry
        .global_kernel_options
        .clone()
        .unwrap_or_else(|| "quiet splash".to_string());
    entry.settings.new_kernel_options = Some(prompt::prompt_text_default(
        "Global kernel options",
        &current_options,
    )?);

    let names: Vec<String> = oses.names().map(str::to_string).collect();
    let default_idx = entry
        .default_os
        .as_deref()
        .and_then(|d| names.iter().position(|n| n == d))
        .unwrap_or_else(|| {
            println!(
                "Note: the current default entry could not be matched to a \
                 known OS; offering the first one."
            );
            0
        });
    let options: Vec<SelectOption> = names
        .iter()
        .map(|n| SelectOption::new(n.clone(), n.clone()))
        .collect();
    entry.settings.default_os = Some(prompt::prompt_select(
        "Operating system to boot by default",
        &options,
        default_idx,
    )?);

    Ok(())
}

/// `bootmend scan`: inventory and report, no prompts, no changes
pub fn scan_command() -> Result<()> {
    let scan = scan()?;
    report(&scan);
    Ok(())
}

/// `bootmend backup [os] <file>`
pub fn backup_command(os_name: Option<&str>, path: &Path) -> Result<()> {
    let scan = scan()?;
    let name = match os_name {
        Some(n) => n.to_string(),
        None => choose_os(&scan)?,
    };
    let entry = scan
        .bootloaders
        .get(&name)
        .with_context(|| format!("no operating system named \"{}\" was found", name))?;
    backup::save(entry, path)
}

/// `bootmend restore [os] <file>`: load, validate, confirm, apply
pub fn restore_command(os_name: Option<&str>, path: &Path) -> Result<()> {
    let mut scan = scan()?;
    let restored = backup::load(path)?;

    let name = match os_name {
        Some(n) => n.to_string(),
        None => restored.os_name.clone(),
    };
    let entry = scan
        .bootloaders
        .get_mut(&name)
        .with_context(|| format!("no operating system named \"{}\" was found", name))?;

    if !entry.is_modifyable {
        bail!("{} cannot be modified: {}", name, entry.comments);
    }

    backup::validate(&restored, entry)?;
    backup::apply_to_settings(&restored, entry);

    println!("\nRestoring from {} will:", path.display());
    println!("  {}", describe_plan(entry));
    if !prompt::prompt_yes_no("Continue?", false)? {
        println!("Cancelled. No changes were made.");
        return Ok(());
    }

    apply::run(&scan.disks, &scan.oses, &mut scan.bootloaders)
}

fn choose_os(scan: &ScanResult) -> Result<String> {
    let options: Vec<SelectOption> = scan
        .bootloaders
        .keys()
        .map(|n| SelectOption::new(n.clone(), n.clone()))
        .collect();
    if options.is_empty() {
        bail!("no operating systems were found");
    }
    prompt::prompt_select("Operating system", &options, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_description_covers_replacement() {
        let mut entry = BootloaderEntry::new("Ubuntu (/dev/sda2)");
        entry.bootloader = Bootloader::Grub2;
        entry.settings.install_new = true;
        entry.settings.new_bootloader = Some(Bootloader::Lilo);
        entry.settings.update_config = true;

        let plan = describe_plan(&entry);
        assert!(plan.contains("replace GRUB2 with LILO"));
        assert!(plan.contains("update configuration"));
    }

    #[test]
    fn plan_description_covers_reinstall() {
        let mut entry = BootloaderEntry::new("Fedora (/dev/sdb1)");
        entry.bootloader = Bootloader::GrubUefi;
        entry.settings.reinstall = true;
        entry.settings.update_config = true;

        let plan = describe_plan(&entry);
        assert!(plan.contains("reinstall GRUB-UEFI"));
    }
}
