//! Shared inventory of disks, partitions, and detected operating systems.
//!
//! Populated once at startup; the bootloader subsystem only reads it. Every
//! component receives the registry by reference instead of reaching into
//! globals, and the parts it may mutate (per-OS bootloader records) are held
//! separately in [`crate::bootloader::BootloaderEntry`].

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// Whole disk or a partition of one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Device,
    Partition,
}

#[derive(Debug, Clone)]
pub struct DiskEntry {
    /// Device path, e.g. "/dev/sda2"
    pub name: String,
    pub kind: DeviceKind,
    /// Parent disk for partitions
    pub host_device: Option<String>,
    /// Child partition names, populated by the collector only
    pub partitions: Vec<String>,
    pub filesystem: Option<String>,
    pub uuid: Option<String>,
    /// udev by-id name
    pub id: Option<String>,
    pub capacity_bytes: u64,
}

/// Device inventory keyed by device path
#[derive(Debug, Clone, Default)]
pub struct DiskRegistry {
    entries: BTreeMap<String, DiskEntry>,
}

impl DiskRegistry {
    pub fn insert(&mut self, entry: DiskEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, device: &str) -> Option<&DiskEntry> {
        self.entries.get(device)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiskEntry> {
        self.entries.values()
    }

    pub fn uuid_for(&self, device: &str) -> Option<&str> {
        self.entries.get(device)?.uuid.as_deref()
    }

    pub fn id_for(&self, device: &str) -> Option<&str> {
        self.entries.get(device)?.id.as_deref()
    }

    /// Resolve a filesystem UUID to a device path. Duplicate UUIDs (cloned
    /// disks) resolve to the first match in device-name order.
    pub fn device_for_uuid(&self, uuid: &str) -> Option<&str> {
        self.entries
            .values()
            .find(|e| e.uuid.as_deref() == Some(uuid))
            .map(|e| e.name.as_str())
    }

    pub fn host_device_of(&self, device: &str) -> Option<&str> {
        self.entries.get(device)?.host_device.as_deref()
    }
}

/// Package manager of a detected OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PackageManager {
    AptGet,
    Yum,
    WindowsInstaller,
    MacAppStore,
    Unknown,
}

impl PackageManager {
    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::AptGet => "apt-get",
            PackageManager::Yum => "yum",
            PackageManager::WindowsInstaller => "Windows Installer",
            PackageManager::MacAppStore => "Mac App Store",
            PackageManager::Unknown => "Unknown",
        }
    }

    pub fn is_linux(&self) -> bool {
        matches!(self, PackageManager::AptGet | PackageManager::Yum)
    }
}

#[derive(Debug, Clone)]
pub struct OsEntry {
    /// Synthetic display name, e.g. "Ubuntu 22.04 (/dev/sda2)"
    pub name: String,
    pub is_current_os: bool,
    pub arch: String,
    /// Root device
    pub partition: String,
    pub boot_partition: Option<String>,
    pub efi_partition: Option<String>,
    pub package_manager: PackageManager,
}

#[derive(Debug, Clone, Default)]
pub struct OsRegistry {
    entries: BTreeMap<String, OsEntry>,
}

impl OsRegistry {
    pub fn insert(&mut self, entry: OsEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&OsEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OsEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn current(&self) -> Option<&OsEntry> {
        self.entries.values().find(|e| e.is_current_os)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collect the device inventory from lsblk. One line per device with the
/// columns we care about; by-id names come from a second pass over
/// /dev/disk/by-id.
pub fn collect_disks() -> Result<DiskRegistry> {
    let output = Command::new("lsblk")
        .args(["-b", "-n", "-P", "-o", "PATH,TYPE,PKNAME,FSTYPE,UUID,SIZE"])
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut registry = parse_lsblk_pairs(&stdout);

    attach_by_id_names(&mut registry, Path::new("/dev/disk/by-id"));

    Ok(registry)
}

/// Parse `lsblk -P` KEY="value" pair output into a registry
pub fn parse_lsblk_pairs(output: &str) -> DiskRegistry {
    let mut registry = DiskRegistry::default();
    let mut children: Vec<(String, String)> = Vec::new();

    for line in output.lines() {
        let fields = parse_pair_line(line);
        let path = match fields.get("PATH") {
            Some(p) if !p.is_empty() => p.clone(),
            _ => continue,
        };

        let kind = match fields.get("TYPE").map(|s| s.as_str()) {
            Some("disk") => DeviceKind::Device,
            Some("part") => DeviceKind::Partition,
            _ => continue,
        };

        let host = fields
            .get("PKNAME")
            .filter(|s| !s.is_empty())
            .map(|s| format!("/dev/{}", s));

        if let Some(host) = &host {
            children.push((host.clone(), path.clone()));
        }

        registry.insert(DiskEntry {
            name: path,
            kind,
            host_device: host,
            partitions: Vec::new(),
            filesystem: fields.get("FSTYPE").filter(|s| !s.is_empty()).cloned(),
            uuid: fields.get("UUID").filter(|s| !s.is_empty()).cloned(),
            id: None,
            capacity_bytes: fields
                .get("SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        });
    }

    for (host, child) in children {
        if let Some(entry) = registry.entries.get_mut(&host) {
            entry.partitions.push(child);
        }
    }

    registry
}

fn parse_pair_line(line: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut rest = line.trim();

    while let Some(eq) = rest.find("=\"") {
        let key = rest[..eq].trim().to_string();
        let after = &rest[eq + 2..];
        let Some(close) = after.find('"') else { break };
        fields.insert(key, after[..close].to_string());
        rest = &after[close + 1..];
    }

    fields
}

fn attach_by_id_names(registry: &mut DiskRegistry, by_id_dir: &Path) {
    let entries = match std::fs::read_dir(by_id_dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let link = entry.path();
        let Ok(target) = std::fs::canonicalize(&link) else {
            continue;
        };
        let target = target.to_string_lossy().to_string();
        if let Some(disk) = registry.entries.get_mut(&target) {
            // Keep the first by-id name seen for a device
            if disk.id.is_none() {
                disk.id = Some(entry.file_name().to_string_lossy().to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "PATH=\"/dev/sda\" TYPE=\"disk\" PKNAME=\"\" FSTYPE=\"\" UUID=\"\" SIZE=\"500107862016\"\n",
        "PATH=\"/dev/sda1\" TYPE=\"part\" PKNAME=\"sda\" FSTYPE=\"vfat\" UUID=\"ABCD-1234\" SIZE=\"536870912\"\n",
        "PATH=\"/dev/sda2\" TYPE=\"part\" PKNAME=\"sda\" FSTYPE=\"ext4\" UUID=\"11111111-2222-3333-4444-555555555555\" SIZE=\"499571130368\"\n",
    );

    #[test]
    fn parses_disks_and_partitions() {
        let reg = parse_lsblk_pairs(SAMPLE);
        let sda = reg.get("/dev/sda").unwrap();
        assert_eq!(sda.kind, DeviceKind::Device);
        assert_eq!(sda.partitions, vec!["/dev/sda1", "/dev/sda2"]);

        let sda2 = reg.get("/dev/sda2").unwrap();
        assert_eq!(sda2.kind, DeviceKind::Partition);
        assert_eq!(sda2.host_device.as_deref(), Some("/dev/sda"));
        assert_eq!(sda2.filesystem.as_deref(), Some("ext4"));
    }

    #[test]
    fn uuid_resolution_round_trips() {
        let reg = parse_lsblk_pairs(SAMPLE);
        assert_eq!(reg.uuid_for("/dev/sda1"), Some("ABCD-1234"));
        assert_eq!(reg.device_for_uuid("ABCD-1234"), Some("/dev/sda1"));
        assert_eq!(reg.device_for_uuid("missing"), None);
    }

    #[test]
    fn duplicate_uuid_resolves_to_first_device() {
        let mut reg = parse_lsblk_pairs(SAMPLE);
        reg.insert(DiskEntry {
            name: "/dev/sdb1".into(),
            kind: DeviceKind::Partition,
            host_device: Some("/dev/sdb".into()),
            partitions: Vec::new(),
            filesystem: Some("ext4".into()),
            uuid: Some("ABCD-1234".into()),
            id: None,
            capacity_bytes: 0,
        });
        // BTreeMap order puts /dev/sda1 first
        assert_eq!(reg.device_for_uuid("ABCD-1234"), Some("/dev/sda1"));
    }

    #[test]
    fn skips_loop_and_rom_rows() {
        let extra = "PATH=\"/dev/sr0\" TYPE=\"rom\" PKNAME=\"\" FSTYPE=\"\" UUID=\"\" SIZE=\"0\"\n";
        let reg = parse_lsblk_pairs(extra);
        assert!(reg.get("/dev/sr0").is_none());
    }
}
