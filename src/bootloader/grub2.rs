//! GRUB2 family driver: menu parsing from grub.cfg, global settings from
//! /etc/default/grub and grubenv, config writing, and grub-install plumbing.
//!
//! grub.cfg is lexically scanned, never executed. The menu grammar is a
//! line-oriented recursive descent: `menuentry` opens a leaf scope that ends
//! on its closing brace, `submenu` opens a nested scope extracted by brace
//! counting and parsed recursively with an extended id prefix.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cmd;
use crate::privwrite;
use crate::registry::{DiskRegistry, PackageManager};

use super::{Bootloader, BootloaderOps, Menu, MenuEntry, MenuSet, ParsedConfig, WriteCtx, MAIN_MENU};

/// Parse context carried down the submenu recursion by value
#[derive(Debug, Clone)]
pub struct MenuCtx {
    pub menu_name: String,
    pub id_prefix: String,
}

impl MenuCtx {
    pub fn main() -> Self {
        Self {
            menu_name: MAIN_MENU.to_string(),
            id_prefix: String::new(),
        }
    }
}

/// Candidate grub.cfg locations relative to an OS root, in search order
const MENU_CONFIG_CANDIDATES: &[&str] = &[
    "boot/grub/grub.cfg",
    "boot/grub2/grub.cfg",
    "boot/efi/EFI/fedora/grub.cfg",
];

const GRUBENV_CANDIDATES: &[&str] = &["boot/grub/grubenv", "boot/grub2/grubenv"];

/// First grub.cfg that exists under an OS root
pub fn menu_config_file(os_root: &Path) -> Option<PathBuf> {
    MENU_CONFIG_CANDIDATES
        .iter()
        .map(|c| os_root.join(c))
        .find(|p| p.exists())
}

pub struct Grub2Driver {
    kind: Bootloader,
}

impl Grub2Driver {
    pub fn new(kind: Bootloader) -> Self {
        Self { kind }
    }

    fn menu_config_path(&self, os_root: &Path) -> Option<PathBuf> {
        menu_config_file(os_root)
    }

    fn grubenv_path(&self, os_root: &Path) -> Option<PathBuf> {
        GRUBENV_CANDIDATES
            .iter()
            .map(|c| os_root.join(c))
            .find(|p| p.exists())
    }

    /// grub-install binary and menu generator differ between the Debian and
    /// Fedora packagings
    fn tool_names(&self, pm: PackageManager) -> (&'static str, Vec<&'static str>) {
        match pm {
            PackageManager::Yum => (
                "grub2-install",
                vec!["grub2-mkconfig", "-o", "/boot/grub2/grub.cfg"],
            ),
            _ => ("grub-install", vec!["update-grub"]),
        }
    }

    fn install_to_disk(&self, ctx: &WriteCtx<'_>) -> Result<()> {
        let (install_bin, _) = self.tool_names(ctx.os.package_manager);

        if !ctx.use_chroot && which::which(install_bin).is_err() {
            bail!("{} is not available on this system", install_bin);
        }

        let args: Vec<&str> = if self.kind == Bootloader::GrubUefi {
            vec!["--target=x86_64-efi", "--efi-directory=/boot/efi"]
        } else {
            // --force tolerates GPT disks without a bios-boot partition
            vec!["--force", ctx.boot_device]
        };

        let (code, _) = cmd::run_in_os(install_bin, &args, ctx.os_root, ctx.use_chroot)?;
        if code != 0 {
            bail!(
                "{} exited with code {} while installing {}",
                install_bin,
                code,
                self.kind
            );
        }
        Ok(())
    }
}

impl BootloaderOps for Grub2Driver {
    fn kind(&self) -> Bootloader {
        self.kind
    }

    fn parse_config(&self, os_root: &Path, disks: &DiskRegistry) -> Result<ParsedConfig> {
        // GRUB-LEGACY menus are detect-only; there is nothing to edit safely
        if self.kind == Bootloader::GrubLegacy {
            return Ok(ParsedConfig::default());
        }

        let mut parsed = ParsedConfig::default();

        if let Some(menu_path) = self.menu_config_path(os_root) {
            let content = fs::read_to_string(&menu_path)
                .with_context(|| format!("Failed to read {}", menu_path.display()))?;
            let lines: Vec<&str> = content.lines().collect();
            parsed.menus = parse_menu_lines(&lines, &MenuCtx::main(), disks);
        }

        let default_path = os_root.join("etc/default/grub");
        if default_path.exists() {
            let content = fs::read_to_string(&default_path)
                .with_context(|| format!("Failed to read {}", default_path.display()))?;
            let globals = parse_default_file(&content, pm_cmdline_key_is_bare(os_root));

            parsed.timeout = globals.timeout;
            parsed.global_kernel_options = globals.kernel_options;

            if let Some(raw) = globals.default_ref {
                let grubenv = self
                    .grubenv_path(os_root)
                    .and_then(|p| fs::read_to_string(p).ok());
                let (reference, entry) =
                    resolve_default_ref(&raw, grubenv.as_deref(), &parsed.menus);
                parsed.default_ref = reference;
                parsed.default_entry = entry;
            }
        }

        Ok(parsed)
    }

    fn write_config(&self, ctx: &WriteCtx<'_>) -> Result<()> {
        if self.kind == Bootloader::GrubLegacy {
            bail!("GRUB-LEGACY configs cannot be rewritten; install a newer bootloader instead");
        }

        let settings = &ctx.entry.settings;
        let timeout = settings.new_timeout.or(ctx.entry.timeout).unwrap_or(10);
        let kernel_options = settings
            .new_kernel_options
            .clone()
            .or_else(|| ctx.entry.global_kernel_options.clone())
            .unwrap_or_else(|| "quiet splash".to_string());

        let default_id = settings
            .default_os
            .as_deref()
            .and_then(|os_name| default_id_for_os(ctx, os_name))
            .unwrap_or_else(|| {
                println!(
                    "Warning: no menu entry matches the chosen default OS for {}; using the first entry",
                    ctx.os.name
                );
                "0".to_string()
            });

        let default_path = ctx.os_root.join("etc/default/grub");
        let existing = if default_path.exists() {
            fs::read_to_string(&default_path)
                .with_context(|| format!("Failed to read {}", default_path.display()))?
        } else {
            String::new()
        };

        let rendered = render_default_file(
            &existing,
            timeout,
            &kernel_options,
            &default_id,
            ctx.os.package_manager,
        );
        privwrite::write_config_file(ctx.os_root, &default_path, &rendered)?;

        let (_, generator) = self.tool_names(ctx.os.package_manager);
        let (code, _) = cmd::run_in_os(generator[0], &generator[1..], ctx.os_root, ctx.use_chroot)?;
        if code != 0 {
            bail!("{} exited with code {} for {}", generator[0], code, ctx.os.name);
        }

        if settings.reinstall || settings.install_new {
            self.install_to_disk(ctx)?;
        }

        Ok(())
    }

    fn install(&self, ctx: &WriteCtx<'_>) -> Result<()> {
        let packages = self.kind.packages(ctx.os.package_manager);
        if packages.is_empty() {
            bail!(
                "{} has no package mapping for {}",
                self.kind,
                ctx.os.package_manager.name()
            );
        }

        let mut args: Vec<&str> = match ctx.os.package_manager {
            PackageManager::AptGet => vec!["-y", "install"],
            PackageManager::Yum => vec!["-y", "install"],
            _ => bail!("cannot install packages on {}", ctx.os.name),
        };
        args.extend(packages);

        let pm_cmd = match ctx.os.package_manager {
            PackageManager::AptGet => "apt-get",
            _ => "yum",
        };

        let (code, _) = cmd::run_in_os(pm_cmd, &args, ctx.os_root, ctx.use_chroot)?;
        if code != 0 {
            bail!("installing {} on {} failed (exit {})", self.kind, ctx.os.name, code);
        }
        Ok(())
    }

    fn remove(&self, ctx: &WriteCtx<'_>) -> Result<()> {
        let packages = self.kind.packages(ctx.os.package_manager);
        if packages.is_empty() {
            // Nothing bootmend installed; nothing to remove
            return Ok(());
        }

        let mut args: Vec<&str> = match ctx.os.package_manager {
            PackageManager::AptGet => vec!["-y", "remove", "--purge"],
            PackageManager::Yum => vec!["-y", "remove"],
            _ => return Ok(()),
        };
        args.extend(packages);

        let pm_cmd = match ctx.os.package_manager {
            PackageManager::AptGet => "apt-get",
            _ => "yum",
        };

        let (code, _) = cmd::run_in_os(pm_cmd, &args, ctx.os_root, ctx.use_chroot)?;
        if code != 0 {
            bail!("removing {} from {} failed (exit {})", self.kind, ctx.os.name, code);
        }
        Ok(())
    }
}

/// dnf-based systems put user kernel options in GRUB_CMDLINE_LINUX rather
/// than GRUB_CMDLINE_LINUX_DEFAULT
fn pm_cmdline_key_is_bare(os_root: &Path) -> bool {
    os_root.join("etc/redhat-release").exists()
}

// ---------------------------------------------------------------------------
// Menu grammar
// ---------------------------------------------------------------------------

/// Parse one menu scope. Returns every menu discovered at or below this
/// scope, keyed by menu name; `ctx.menu_name` maps to this scope itself.
pub fn parse_menu_lines(lines: &[&str], ctx: &MenuCtx, disks: &DiskRegistry) -> MenuSet {
    let mut menus = MenuSet::new();
    let mut menu = Menu::default();
    // Slot index within this scope; menuentries and submenus share the space
    let mut position = 0usize;
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if trimmed.starts_with('#') {
            i += 1;
            continue;
        }

        if trimmed.starts_with("menuentry ") || trimmed.contains(" menuentry ") {
            let end = find_entry_end(lines, i);
            let raw: Vec<String> = lines[i..=end].iter().map(|l| l.to_string()).collect();

            if let Some(mut name) = first_quoted(line) {
                if menu.entries.contains_key(&name) {
                    name = format!("{} (ID {}{})", name, ctx.id_prefix, position);
                }

                let partition = resolve_entry_partition(&name, &raw, disks);
                let kernel_options = extract_kernel_options(&raw);

                menu.push(MenuEntry {
                    name,
                    id: format!("{}{}", ctx.id_prefix, position),
                    partition,
                    kernel_options,
                    raw_data: raw,
                });
            }

            position += 1;
            i = end + 1;
            continue;
        }

        if trimmed.starts_with("submenu ") {
            let end = find_balanced_end(lines, i);

            if let Some(sub_name) = first_quoted(line) {
                if ctx.id_prefix.contains('>') {
                    // One level of nesting is all GRUB generators emit; log
                    // deeper structures instead of silently mis-scoping them
                    tracing::warn!(
                        "submenu '{}' is nested below another submenu; \
                         parsing continues but ids may not match GRUB's",
                        sub_name
                    );
                }

                let sub_ctx = MenuCtx {
                    menu_name: sub_name,
                    id_prefix: format!("{}{}>", ctx.id_prefix, position),
                };
                let body_end = end.max(i + 1);
                let sub_menus = parse_menu_lines(&lines[i + 1..body_end], &sub_ctx, disks);
                menus.extend(sub_menus);
            }

            position += 1;
            i = end + 1;
            continue;
        }

        i += 1;
    }

    menus.insert(ctx.menu_name.clone(), menu);
    menus
}

/// Index of the line closing a menuentry opened at `start`: the first line
/// whose last token is "}" (leaf entries do not nest braces in practice)
fn find_entry_end(lines: &[&str], start: usize) -> usize {
    for (offset, line) in lines[start..].iter().enumerate() {
        let last = line.split_whitespace().last();
        if last == Some("}") && (offset > 0 || line.trim_end().ends_with('}')) {
            // A one-line `menuentry ... { ... }` closes itself
            if offset == 0 && !balanced(line) {
                continue;
            }
            return start + offset;
        }
    }
    lines.len() - 1
}

fn balanced(line: &str) -> bool {
    line.matches('{').count() == line.matches('}').count() && line.contains('{')
}

/// Index of the line where the brace depth opened at `start` returns to zero
fn find_balanced_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;

    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return start + offset;
        }
    }
    lines.len() - 1
}

/// First single- or double-quoted token of a line
fn first_quoted(line: &str) -> Option<String> {
    let start = line.find(|c| c == '\'' || c == '"')?;
    let quote = line[start..].chars().next()?;
    let rest = &line[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Resolve a menu entry's boot device. Fallback order: device named in the
/// display line, `search` UUID via the disk registry, then `(hdN,M)` device
/// numbers.
fn resolve_entry_partition(
    name: &str,
    raw_lines: &[String],
    disks: &DiskRegistry,
) -> Option<String> {
    if let Some(device) = device_from_display_name(name) {
        return Some(device);
    }

    for line in raw_lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with("search ") || trimmed.starts_with("search.") {
            if let Some(uuid) = trimmed.split_whitespace().last() {
                if let Some(device) = disks.device_for_uuid(uuid) {
                    return Some(device.to_string());
                }
            }
        }
    }

    for line in raw_lines {
        if let Some(device) = device_from_hd_numbers(line) {
            return Some(device);
        }
    }

    None
}

/// "Windows 10 (on /dev/sda1)" carries its device after the final space
/// inside the parentheses
fn device_from_display_name(name: &str) -> Option<String> {
    let open = name.rfind('(')?;
    let close = name[open..].find(')')? + open;
    let inner = &name[open + 1..close];
    let candidate = inner.rsplit(' ').next()?;
    if candidate.starts_with("/dev/") {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Decode a `set root=(hd0,2)` style reference to a SCSI-style device name.
/// hd0 maps to /dev/sda; the partition index is 1-based and kept as-is.
fn device_from_hd_numbers(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if !trimmed.contains("set root=") {
        return None;
    }

    let open = trimmed.find("(hd")?;
    let close = trimmed[open..].find(')')? + open;
    let inner = &trimmed[open + 3..close];
    let (disk_part, partition_part) = inner.split_once(',')?;

    let disk_num: u32 = disk_part.parse().ok()?;
    // Tolerate partition-table prefixes like "msdos2" or "gpt1"
    let digits: String = partition_part
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .collect();
    let partition_num: u32 = digits.parse().ok()?;

    // Only hd0..hd25 map onto /dev/sd[a-z]; anything else is malformed
    let offset = u8::try_from(disk_num).ok().filter(|n| *n <= 25)?;
    let letter = char::from(b'a' + offset);
    Some(format!("/dev/sd{}{}", letter, partition_num))
}

/// Kernel options from the first `linux`/`linuxefi` body line; the first
/// three tokens (command, image path, root= device) are not user options
fn extract_kernel_options(raw_lines: &[String]) -> Vec<String> {
    for line in raw_lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(&"linux") | Some(&"linuxefi") | Some(&"linux16") => {
                return tokens.iter().skip(3).map(|t| t.to_string()).collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

// ---------------------------------------------------------------------------
// Global settings (/etc/default/grub, grubenv)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub timeout: Option<u32>,
    pub kernel_options: Option<String>,
    pub default_ref: Option<String>,
}

/// Parse key=value lines from /etc/default/grub. `bare_cmdline_key` selects
/// GRUB_CMDLINE_LINUX over GRUB_CMDLINE_LINUX_DEFAULT (dnf-based systems).
pub fn parse_default_file(content: &str, bare_cmdline_key: bool) -> GlobalConfig {
    let cmdline_key = if bare_cmdline_key {
        "GRUB_CMDLINE_LINUX"
    } else {
        "GRUB_CMDLINE_LINUX_DEFAULT"
    };

    let mut config = GlobalConfig::default();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let value = strip_quotes(value);

        match key {
            "GRUB_TIMEOUT" => config.timeout = value.parse().ok(),
            "GRUB_DEFAULT" => config.default_ref = Some(value.to_string()),
            k if k == cmdline_key => config.kernel_options = Some(value.to_string()),
            _ => {}
        }
    }

    config
}

fn strip_quotes(value: &str) -> &str {
    value
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
}

/// Classify a GRUB_DEFAULT reference and resolve it to a menu entry name.
/// Returns the final reference (after `saved` indirection) and the matched
/// entry's display name.
pub fn resolve_default_ref(
    raw: &str,
    grubenv: Option<&str>,
    menus: &MenuSet,
) -> (Option<String>, Option<String>) {
    let mut reference = raw.to_string();

    if reference == "saved" {
        match grubenv.and_then(saved_entry_from_grubenv) {
            Some(saved) => reference = saved,
            None => return (Some(reference), None),
        }
    }

    let entry_name = classify_and_match(&reference, menus);
    (Some(reference), entry_name)
}

fn saved_entry_from_grubenv(content: &str) -> Option<String> {
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("saved_entry=") {
            return Some(value.trim().to_string());
        }
        if let Some(value) = line.strip_prefix("default=") {
            return Some(value.trim().to_string());
        }
    }
    None
}

fn classify_and_match(reference: &str, menus: &MenuSet) -> Option<String> {
    if reference.contains('>') {
        // Submenu id path; search every scope
        for menu in menus.values() {
            for entry in menu.entries.values() {
                if entry.id == reference {
                    return Some(entry.name.clone());
                }
            }
        }
        return None;
    }

    if !reference.is_empty() && reference.chars().all(|c| c.is_ascii_digit()) {
        let main = menus.get(MAIN_MENU)?;
        for entry in main.entries.values() {
            if entry.id == reference {
                return Some(entry.name.clone());
            }
        }
        return None;
    }

    let main = menus.get(MAIN_MENU)?;
    if main.order.iter().any(|n| n == reference) {
        return Some(reference.to_string());
    }
    None
}

// ---------------------------------------------------------------------------
// Config writing
// ---------------------------------------------------------------------------

/// The id of the MainMenu entry whose partition belongs to the named OS
fn default_id_for_os(ctx: &WriteCtx<'_>, os_name: &str) -> Option<String> {
    let target = ctx.oses.get(os_name)?;
    let main = ctx.entry.main_menu()?;

    for name in &main.order {
        let entry = main.get(name)?;
        let Some(partition) = &entry.partition else {
            continue;
        };
        if crate::matcher::device_belongs_to_os(partition, target, ctx.disks) {
            return Some(entry.id.clone());
        }
    }
    None
}

/// Rewrite /etc/default/grub content in place: each managed key replaces its
/// first occurrence, legacy keys are commented out, and keys never seen are
/// appended. Unrelated lines pass through verbatim.
pub fn render_default_file(
    existing: &str,
    timeout: u32,
    kernel_options: &str,
    default_id: &str,
    pm: PackageManager,
) -> String {
    let cmdline_key = match pm {
        PackageManager::Yum => "GRUB_CMDLINE_LINUX",
        _ => "GRUB_CMDLINE_LINUX_DEFAULT",
    };

    let timeout_line = format!("GRUB_TIMEOUT={}", timeout);
    let cmdline_line = format!("{}=\"{}\"", cmdline_key, kernel_options);
    let default_line = format!("GRUB_DEFAULT=\"{}\"", default_id);

    let mut replaced_timeout = false;
    let mut replaced_cmdline = false;
    let mut replaced_default = false;
    let mut out: Vec<String> = Vec::new();

    for line in existing.lines() {
        let trimmed = line.trim_start();

        if !replaced_timeout && trimmed.starts_with("GRUB_TIMEOUT=") {
            out.push(timeout_line.clone());
            replaced_timeout = true;
        } else if !replaced_cmdline && trimmed.starts_with(&format!("{}=", cmdline_key)) {
            out.push(cmdline_line.clone());
            replaced_cmdline = true;
        } else if !replaced_default && trimmed.starts_with("GRUB_DEFAULT=") {
            out.push(default_line.clone());
            replaced_default = true;
        } else if trimmed.starts_with("GRUB_HIDDEN_TIMEOUT") {
            // Legacy hidden-timeout keys override GRUB_TIMEOUT; neutralize
            out.push(format!("#{}", line));
        } else if pm == PackageManager::AptGet
            && trimmed.starts_with("GRUB_CMDLINE_LINUX=")
        {
            // On apt systems the bare key shadows the _DEFAULT one
            out.push(format!("#{}", line));
        } else {
            out.push(line.to_string());
        }
    }

    if !replaced_timeout {
        out.push(timeout_line);
    }
    if !replaced_cmdline {
        out.push(cmdline_line);
    }
    if !replaced_default {
        out.push(default_line);
    }

    let mut rendered = out.join("\n");
    rendered.push('\n');
    rendered
}

/// Swap BIOS and UEFI boot commands in generated grub.cfg text. Needed after
/// switching boot modes on yum-based systems, whose generator emits commands
/// for the firmware mode it ran under. Exact-token replacement keeps the
/// substitution idempotent.
pub fn fix_boot_commands(content: &str, to_efi: bool) -> String {
    let (from_linux, to_linux, from_initrd, to_initrd) = if to_efi {
        ("linux", "linuxefi", "initrd", "initrdefi")
    } else {
        ("linuxefi", "linux", "initrdefi", "initrd")
    };

    let mut out: Vec<String> = Vec::new();
    for line in content.lines() {
        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        let replaced = match tokens.first() {
            Some(t) if *t == from_linux => {
                tokens[0] = to_linux;
                true
            }
            Some(t) if *t == from_initrd => {
                tokens[0] = to_initrd;
                true
            }
            _ => false,
        };

        if replaced {
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            out.push(format!("{}{}", indent, tokens.join(" ")));
        } else {
            out.push(line.to_string());
        }
    }

    let mut fixed = out.join("\n");
    if content.ends_with('\n') {
        fixed.push('\n');
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceKind, DiskEntry};

    fn disks_with_uuid(device: &str, uuid: &str) -> DiskRegistry {
        let mut disks = DiskRegistry::default();
        disks.insert(DiskEntry {
            name: device.to_string(),
            kind: DeviceKind::Partition,
            host_device: Some("/dev/sda".into()),
            partitions: Vec::new(),
            filesystem: Some("ext4".into()),
            uuid: Some(uuid.to_string()),
            id: None,
            capacity_bytes: 0,
        });
        disks
    }

    const SAMPLE_CFG: &str = r#"
set default="0"
menuentry 'Ubuntu' --class ubuntu {
	search --no-floppy --fs-uuid --set=root 1111-2222
	linux	/boot/vmlinuz-5.4.0 root=UUID=1111-2222 ro quiet splash
	initrd	/boot/initrd.img-5.4.0
}
menuentry 'Windows 10 (on /dev/sda1)' {
	set root=(hd0,1)
	chainloader +1
}
submenu 'Advanced options for Ubuntu' {
	menuentry 'Ubuntu, with Linux 5.4' {
		set root=(hd0,2)
		linux	/boot/vmlinuz-5.4.0 root=/dev/sda2 ro recovery nomodeset
	}
	menuentry 'Ubuntu, with Linux 5.4' {
		set root=(hd0,2)
		linux	/boot/vmlinuz-5.4.0 root=/dev/sda2 ro
	}
}
"#;

    fn parse_sample() -> MenuSet {
        let disks = disks_with_uuid("/dev/sda2", "1111-2222");
        let lines: Vec<&str> = SAMPLE_CFG.lines().collect();
        parse_menu_lines(&lines, &MenuCtx::main(), &disks)
    }

    #[test]
    fn top_level_entries_and_submenu_are_separate_scopes() {
        let menus = parse_sample();
        let main = menus.get(MAIN_MENU).unwrap();
        assert_eq!(main.order, vec!["Ubuntu", "Windows 10 (on /dev/sda1)"]);
        assert!(menus.contains_key("Advanced options for Ubuntu"));
    }

    #[test]
    fn submenu_entries_carry_parent_slot_prefix() {
        // The submenu occupies slot 2, so its members get a "2>" prefix
        let menus = parse_sample();
        let sub = menus.get("Advanced options for Ubuntu").unwrap();
        for name in &sub.order {
            let entry = sub.get(name).unwrap();
            assert!(
                entry.id.starts_with("2>"),
                "id {} should start with 2>",
                entry.id
            );
        }
    }

    #[test]
    fn duplicate_names_get_id_suffix() {
        let menus = parse_sample();
        let sub = menus.get("Advanced options for Ubuntu").unwrap();
        assert_eq!(sub.order[0], "Ubuntu, with Linux 5.4");
        assert_eq!(sub.order[1], "Ubuntu, with Linux 5.4 (ID 2>1)");
        assert_eq!(sub.order.len(), 2);
    }

    #[test]
    fn partition_from_display_name_wins() {
        let menus = parse_sample();
        let main = menus.get(MAIN_MENU).unwrap();
        let windows = main.get("Windows 10 (on /dev/sda1)").unwrap();
        assert_eq!(windows.partition.as_deref(), Some("/dev/sda1"));
    }

    #[test]
    fn partition_from_search_uuid() {
        let menus = parse_sample();
        let main = menus.get(MAIN_MENU).unwrap();
        let ubuntu = main.get("Ubuntu").unwrap();
        assert_eq!(ubuntu.partition.as_deref(), Some("/dev/sda2"));
    }

    #[test]
    fn partition_from_hd_numbers() {
        assert_eq!(
            device_from_hd_numbers("	set root=(hd0,2)"),
            Some("/dev/sda2".into())
        );
        assert_eq!(
            device_from_hd_numbers("set root=(hd1,1)"),
            Some("/dev/sdb1".into())
        );
        assert_eq!(
            device_from_hd_numbers("set root=(hd0,msdos3)"),
            Some("/dev/sda3".into())
        );
        assert_eq!(device_from_hd_numbers("linux /vmlinuz"), None);
    }

    #[test]
    fn hd_numbers_out_of_letter_range_are_skipped() {
        // No /dev/sd device exists past hd25; the line is treated as
        // malformed instead of aborting the parse
        assert_eq!(device_from_hd_numbers("set root=(hd26,1)"), None);
        assert_eq!(device_from_hd_numbers("set root=(hd200,1)"), None);
        assert_eq!(device_from_hd_numbers("set root=(hd4294967295,1)"), None);
        assert_eq!(
            device_from_hd_numbers("set root=(hd25,1)"),
            Some("/dev/sdz1".into())
        );
    }

    #[test]
    fn menu_parse_survives_huge_hd_number() {
        let cfg = "menuentry 'Old Linux' {\n\tset root=(hd200,1)\n\tlinux /vmlinuz root=/dev/sda1 ro\n}\n";
        let lines: Vec<&str> = cfg.lines().collect();
        let menus = parse_menu_lines(&lines, &MenuCtx::main(), &DiskRegistry::default());

        let main = menus.get(MAIN_MENU).unwrap();
        let entry = main.get("Old Linux").unwrap();
        assert_eq!(entry.partition, None);
        assert_eq!(entry.kernel_options, vec!["ro"]);
    }

    #[test]
    fn kernel_options_skip_command_path_and_root() {
        let menus = parse_sample();
        let main = menus.get(MAIN_MENU).unwrap();
        let ubuntu = main.get("Ubuntu").unwrap();
        assert_eq!(ubuntu.kernel_options, vec!["ro", "quiet", "splash"]);
    }

    #[test]
    fn raw_data_spans_entry_to_closing_brace() {
        let menus = parse_sample();
        let main = menus.get(MAIN_MENU).unwrap();
        let ubuntu = main.get("Ubuntu").unwrap();
        assert!(ubuntu.raw_data.first().unwrap().contains("menuentry 'Ubuntu'"));
        assert_eq!(ubuntu.raw_data.last().unwrap().trim(), "}");
    }

    #[test]
    fn default_resolution_by_name() {
        let menus = {
            let mut set = MenuSet::new();
            let mut main = Menu::default();
            main.push(MenuEntry {
                name: "Ubuntu, with Linux 5.4".into(),
                id: "0".into(),
                partition: None,
                kernel_options: vec![],
                raw_data: vec![],
            });
            set.insert(MAIN_MENU.to_string(), main);
            set
        };

        let (_, entry) = resolve_default_ref("Ubuntu, with Linux 5.4", None, &menus);
        assert_eq!(entry.as_deref(), Some("Ubuntu, with Linux 5.4"));
    }

    #[test]
    fn default_resolution_saved_form() {
        let menus = parse_sample();
        let grubenv = "# GRUB Environment Block\nsaved_entry=1\n";
        let (reference, entry) = resolve_default_ref("saved", Some(grubenv), &menus);
        assert_eq!(reference.as_deref(), Some("1"));
        assert_eq!(entry.as_deref(), Some("Windows 10 (on /dev/sda1)"));
    }

    #[test]
    fn default_resolution_submenu_path() {
        let menus = parse_sample();
        let (_, entry) = resolve_default_ref("2>1", None, &menus);
        assert_eq!(entry.as_deref(), Some("Ubuntu, with Linux 5.4 (ID 2>1)"));
    }

    #[test]
    fn default_resolution_unknown_name() {
        let menus = parse_sample();
        let (_, entry) = resolve_default_ref("No Such Entry", None, &menus);
        assert_eq!(entry, None);
    }

    #[test]
    fn parse_default_file_reads_globals() {
        let content = "GRUB_DEFAULT=saved\nGRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\"\n";
        let config = parse_default_file(content, false);
        assert_eq!(config.timeout, Some(5));
        assert_eq!(config.kernel_options.as_deref(), Some("quiet splash"));
        assert_eq!(config.default_ref.as_deref(), Some("saved"));
    }

    #[test]
    fn parse_default_file_bare_cmdline_key() {
        let content = "GRUB_CMDLINE_LINUX=\"rhgb quiet\"\nGRUB_CMDLINE_LINUX_DEFAULT=\"other\"\n";
        let config = parse_default_file(content, true);
        assert_eq!(config.kernel_options.as_deref(), Some("rhgb quiet"));
    }

    #[test]
    fn render_replaces_first_occurrence_only() {
        let existing = "GRUB_TIMEOUT=10\nGRUB_TIMEOUT=20\nGRUB_DEFAULT=0\n";
        let out = render_default_file(existing, 5, "quiet", "1", PackageManager::AptGet);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "GRUB_TIMEOUT=5");
        assert_eq!(lines[1], "GRUB_TIMEOUT=20");
        assert_eq!(lines[2], "GRUB_DEFAULT=\"1\"");
    }

    #[test]
    fn render_appends_missing_keys() {
        let out = render_default_file("", 7, "quiet splash", "0", PackageManager::AptGet);
        assert!(out.contains("GRUB_TIMEOUT=7"));
        assert!(out.contains("GRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\""));
        assert!(out.contains("GRUB_DEFAULT=\"0\""));
    }

    #[test]
    fn render_comments_out_hidden_timeout_and_bare_cmdline_on_apt() {
        let existing = "GRUB_HIDDEN_TIMEOUT=0\nGRUB_CMDLINE_LINUX=\"\"\n";
        let out = render_default_file(existing, 5, "quiet", "0", PackageManager::AptGet);
        assert!(out.contains("#GRUB_HIDDEN_TIMEOUT=0"));
        assert!(out.contains("#GRUB_CMDLINE_LINUX=\"\""));
    }

    #[test]
    fn render_keeps_bare_cmdline_on_yum() {
        let existing = "GRUB_CMDLINE_LINUX=\"rhgb\"\n";
        let out = render_default_file(existing, 5, "quiet", "0", PackageManager::Yum);
        assert!(out.contains("GRUB_CMDLINE_LINUX=\"quiet\""));
        assert!(!out.contains("#GRUB_CMDLINE_LINUX"));
    }

    #[test]
    fn fix_boot_commands_bios_to_efi() {
        let cfg = "\tlinux /vmlinuz root=/dev/sda2 ro\n\tinitrd /initrd.img\n";
        let fixed = fix_boot_commands(cfg, true);
        assert!(fixed.contains("linuxefi /vmlinuz"));
        assert!(fixed.contains("initrdefi /initrd.img"));
    }

    #[test]
    fn fix_boot_commands_is_idempotent() {
        let cfg = "\tlinux /vmlinuz root=/dev/sda2 ro\n\tinitrd /initrd.img\nset timeout=5\n";
        let once = fix_boot_commands(cfg, true);
        let twice = fix_boot_commands(&once, true);
        assert_eq!(once, twice);

        let back_once = fix_boot_commands(&once, false);
        let back_twice = fix_boot_commands(&back_once, false);
        assert_eq!(back_once, back_twice);
    }
}
