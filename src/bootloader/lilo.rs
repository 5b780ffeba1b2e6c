//! LILO/ELILO driver. The conf grammar is flat: global key=value lines
//! followed by `image=` stanzas, one per bootable kernel. Unlike GRUB2 the
//! menu is not generated for us, so writing a config means synthesizing the
//! stanzas from the known OS list and then running lilo/elilo to install.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cmd;
use crate::privwrite;
use crate::registry::{DiskRegistry, OsEntry, PackageManager};

use super::{Bootloader, BootloaderOps, Menu, MenuEntry, MenuSet, ParsedConfig, WriteCtx, MAIN_MENU};

pub struct LiloDriver {
    kind: Bootloader,
}

impl LiloDriver {
    pub fn new(kind: Bootloader) -> Self {
        Self { kind }
    }

    fn config_path(&self, os_root: &Path) -> PathBuf {
        match self.kind {
            Bootloader::Elilo => os_root.join("etc/elilo.conf"),
            _ => os_root.join("etc/lilo.conf"),
        }
    }

    fn binary(&self) -> &'static str {
        match self.kind {
            Bootloader::Elilo => "elilo",
            _ => "lilo",
        }
    }
}

impl BootloaderOps for LiloDriver {
    fn kind(&self) -> Bootloader {
        self.kind
    }

    fn parse_config(&self, os_root: &Path, disks: &DiskRegistry) -> Result<ParsedConfig> {
        let path = self.config_path(os_root);
        if !path.exists() {
            return Ok(ParsedConfig::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(parse_lilo_config(&content, disks))
    }

    fn write_config(&self, ctx: &WriteCtx<'_>) -> Result<()> {
        let settings = &ctx.entry.settings;
        let timeout = settings.new_timeout.or(ctx.entry.timeout).unwrap_or(10);
        let kernel_options = settings
            .new_kernel_options
            .clone()
            .or_else(|| ctx.entry.global_kernel_options.clone())
            .unwrap_or_else(|| "quiet".to_string());

        let default_label = settings
            .default_os
            .as_deref()
            .and_then(|name| ctx.oses.get(name))
            .map(|os| label_for(&os.name));

        let rendered = render_lilo_config(
            self.kind,
            ctx.boot_device,
            timeout,
            &kernel_options,
            default_label.as_deref(),
            ctx.oses.iter().filter(|os| os.package_manager.is_linux()),
        );

        let path = self.config_path(ctx.os_root);
        privwrite::write_config_file(ctx.os_root, &path, &rendered)?;

        // Running lilo/elilo both validates the config and installs it
        let (code, _) = cmd::run_in_os(self.binary(), &[], ctx.os_root, ctx.use_chroot)?;
        if code != 0 {
            bail!("{} exited with code {} for {}", self.binary(), code, ctx.os.name);
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

        let (pm_cmd, mut args): (&str, Vec<&str>) = match ctx.os.package_manager {
            PackageManager::AptGet => ("apt-get", vec!["-y", "install"]),
            PackageManager::Yum => ("yum", vec!["-y", "install"]),
            _ => bail!("cannot install packages on {}", ctx.os.name),
        };
        args.extend(packages);

        let (code, _) = cmd::run_in_os(pm_cmd, &args, ctx.os_root, ctx.use_chroot)?;
        if code != 0 {
            bail!("installing {} on {} failed (exit {})", self.kind, ctx.os.name, code);
        }
        Ok(())
    }

    fn remove(&self, ctx: &WriteCtx<'_>) -> Result<()> {
        let packages = self.kind.packages(ctx.os.package_manager);
        if packages.is_empty() {
            return Ok(());
        }

        let (pm_cmd, mut args): (&str, Vec<&str>) = match ctx.os.package_manager {
            PackageManager::AptGet => ("apt-get", vec!["-y", "remove", "--purge"]),
            PackageManager::Yum => ("yum", vec!["-y", "remove"]),
            _ => return Ok(()),
        };
        args.extend(packages);

        let (code, _) = cmd::run_in_os(pm_cmd, &args, ctx.os_root, ctx.use_chroot)?;
        if code != 0 {
            bail!("removing {} from {} failed (exit {})", self.kind, ctx.os.name, code);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

/// Parse lilo.conf/elilo.conf text: global settings first, then a flat list
/// of `image=` stanzas
pub fn parse_lilo_config(content: &str, disks: &DiskRegistry) -> ParsedConfig {
    let lines: Vec<&str> = content.lines().collect();
    let mut parsed = ParsedConfig::default();
    let mut menu = Menu::default();

    let stanza_starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_image_line(l))
        .map(|(i, _)| i)
        .collect();

    let global_end = stanza_starts.first().copied().unwrap_or(lines.len());

    for line in &lines[..global_end] {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        if let Some(value) = key_value(trimmed, "delay").or_else(|| key_value(trimmed, "timeout")) {
            // LILO stores deciseconds
            parsed.timeout = value.parse::<u32>().ok().map(|t| t / 10);
        } else if let Some(value) = key_value(trimmed, "append") {
            if parsed.global_kernel_options.is_none() {
                parsed.global_kernel_options = Some(unquote(value).to_string());
            }
        } else if let Some(value) = key_value(trimmed, "default") {
            parsed.default_ref = Some(unquote(value).to_string());
        }
    }

    for (index, &start) in stanza_starts.iter().enumerate() {
        let end = stanza_starts
            .get(index + 1)
            .copied()
            .unwrap_or(lines.len());
        if let Some(entry) = parse_stanza(&lines[start..end], index, disks) {
            menu.push(entry);
        }
    }

    parsed.default_entry = match &parsed.default_ref {
        // default= references entries by label, not by id
        Some(label) => menu
            .order
            .iter()
            .find(|name| *name == label)
            .cloned(),
        None => menu
            .entries
            .values()
            .find(|e| e.id == "0")
            .map(|e| e.name.clone()),
    };

    parsed.menus = MenuSet::from([(MAIN_MENU.to_string(), menu)]);
    parsed
}

fn parse_stanza(lines: &[&str], index: usize, disks: &DiskRegistry) -> Option<MenuEntry> {
    let mut name = None;
    let mut partition = None;
    let mut kernel_options = Vec::new();

    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        if let Some(value) = key_value(trimmed, "label") {
            if name.is_none() {
                name = Some(unquote(value).to_string());
            }
        } else if let Some(value) = key_value(trimmed, "root") {
            partition = resolve_root_device(unquote(value), disks);
        } else if let Some(value) = key_value(trimmed, "append") {
            kernel_options = unquote(value)
                .split_whitespace()
                .map(|t| t.to_string())
                .collect();
        }
    }

    Some(MenuEntry {
        name: name?,
        id: index.to_string(),
        partition,
        kernel_options,
        raw_data: lines.iter().map(|l| l.to_string()).collect(),
    })
}

fn is_image_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.starts_with('#') && (trimmed.starts_with("image=") || trimmed.starts_with("image ="))
}

/// `key=value` or `key = value`, tolerating surrounding whitespace
fn key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=')?;
    Some(rest.trim())
}

fn unquote(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

/// root= carries either a device path or UUID=xxx; UUIDs resolve through
/// the disk registry like GRUB2 search lines
fn resolve_root_device(value: &str, disks: &DiskRegistry) -> Option<String> {
    if let Some(uuid) = value.strip_prefix("UUID=") {
        return disks.device_for_uuid(uuid).map(|d| d.to_string());
    }
    if value.starts_with("/dev/") {
        return Some(value.to_string());
    }
    None
}

// ---------------------------------------------------------------------------
// Config writing
// ---------------------------------------------------------------------------

/// LILO labels must be short and contain no whitespace
pub fn label_for(os_name: &str) -> String {
    os_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(15)
        .collect()
}

/// Render a complete lilo/elilo config: global section plus one image stanza
/// per known Linux OS
pub fn render_lilo_config<'a>(
    kind: Bootloader,
    boot_device: &str,
    timeout: u32,
    kernel_options: &str,
    default_label: Option<&str>,
    oses: impl Iterator<Item = &'a OsEntry>,
) -> String {
    let mut out = String::new();
    out.push_str("# Generated by bootmend. Manual edits will be overwritten.\n");

    if kind != Bootloader::Elilo {
        out.push_str(&format!("boot={}\n", boot_device));
        out.push_str("map=/boot/map\ninstall=/boot/boot.b\nprompt\n");
    } else {
        out.push_str("prompt\n");
    }

    // LILO wants deciseconds back
    out.push_str(&format!("timeout={}\n", timeout * 10));

    if let Some(label) = default_label {
        out.push_str(&format!("default={}\n", label));
    }
    if !kernel_options.is_empty() {
        out.push_str(&format!("append=\"{}\"\n", kernel_options));
    }
    out.push('\n');

    out.push_str(&make_lilo_os_entries(oses));
    out
}

/// One `image=` stanza per OS, pointing at its /vmlinuz and /initrd.img
/// symlinks
pub fn make_lilo_os_entries<'a>(oses: impl Iterator<Item = &'a OsEntry>) -> String {
    let mut out = String::new();
    for os in oses {
        out.push_str("image=/vmlinuz\n");
        out.push_str(&format!("\tlabel={}\n", label_for(&os.name)));
        out.push_str(&format!("\troot={}\n", os.partition));
        out.push_str("\tinitrd=/initrd.img\n");
        out.push_str("\tread-only\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceKind, DiskEntry, DiskRegistry, PackageManager};

    fn disks() -> DiskRegistry {
        let mut disks = DiskRegistry::default();
        disks.insert(DiskEntry {
            name: "/dev/sda3".into(),
            kind: DeviceKind::Partition,
            host_device: Some("/dev/sda".into()),
            partitions: Vec::new(),
            filesystem: Some("ext4".into()),
            uuid: Some("aaaa-bbbb".into()),
            id: None,
            capacity_bytes: 0,
        });
        disks
    }

    const SAMPLE: &str = r#"
boot=/dev/sda
timeout=100
default=linux
append="quiet"

image=/boot/vmlinuz-5.4
	label=linux
	root=/dev/sda2
	append="ro quiet splash"
	read-only

image = /boot/vmlinuz-old
	label=old
	root=UUID=aaaa-bbbb
	read-only
"#;

    #[test]
    fn timeout_converts_deciseconds_to_seconds() {
        let parsed = parse_lilo_config(SAMPLE, &disks());
        assert_eq!(parsed.timeout, Some(10));
    }

    #[test]
    fn stanzas_split_on_image_lines() {
        let parsed = parse_lilo_config(SAMPLE, &disks());
        let main = parsed.menus.get(MAIN_MENU).unwrap();
        assert_eq!(main.order, vec!["linux", "old"]);
        assert_eq!(main.get("linux").unwrap().id, "0");
        assert_eq!(main.get("old").unwrap().id, "1");
    }

    #[test]
    fn root_device_and_uuid_resolution() {
        let parsed = parse_lilo_config(SAMPLE, &disks());
        let main = parsed.menus.get(MAIN_MENU).unwrap();
        assert_eq!(main.get("linux").unwrap().partition.as_deref(), Some("/dev/sda2"));
        assert_eq!(main.get("old").unwrap().partition.as_deref(), Some("/dev/sda3"));
    }

    #[test]
    fn entry_kernel_options_from_append() {
        let parsed = parse_lilo_config(SAMPLE, &disks());
        let main = parsed.menus.get(MAIN_MENU).unwrap();
        assert_eq!(
            main.get("linux").unwrap().kernel_options,
            vec!["ro", "quiet", "splash"]
        );
    }

    #[test]
    fn global_append_before_stanzas_only() {
        let parsed = parse_lilo_config(SAMPLE, &disks());
        assert_eq!(parsed.global_kernel_options.as_deref(), Some("quiet"));
    }

    #[test]
    fn default_by_label() {
        let parsed = parse_lilo_config(SAMPLE, &disks());
        assert_eq!(parsed.default_entry.as_deref(), Some("linux"));
    }

    #[test]
    fn default_falls_back_to_first_entry() {
        let no_default = SAMPLE.replace("default=linux\n", "");
        let parsed = parse_lilo_config(&no_default, &disks());
        assert_eq!(parsed.default_entry.as_deref(), Some("linux"));
    }

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(label_for("Ubuntu 22.04 (/dev/sda2)"), "Ubuntu2204devsd");
        assert!(label_for("Ubuntu 22.04 (/dev/sda2)").len() <= 15);
    }

    #[test]
    fn rendered_config_round_trips_through_parser() {
        let os = OsEntry {
            name: "Ubuntu (/dev/sda2)".into(),
            is_current_os: true,
            arch: "x86_64".into(),
            partition: "/dev/sda2".into(),
            boot_partition: None,
            efi_partition: None,
            package_manager: PackageManager::AptGet,
        };

        let rendered = render_lilo_config(
            Bootloader::Lilo,
            "/dev/sda",
            10,
            "quiet splash",
            Some("Ubuntudevsda2"),
            std::iter::once(&os),
        );

        let parsed = parse_lilo_config(&rendered, &disks());
        assert_eq!(parsed.timeout, Some(10));
        assert_eq!(parsed.global_kernel_options.as_deref(), Some("quiet splash"));
        let main = parsed.menus.get(MAIN_MENU).unwrap();
        assert_eq!(main.order.len(), 1);
        assert_eq!(main.get("Ubuntudevsda2").unwrap().partition.as_deref(), Some("/dev/sda2"));
    }
}
