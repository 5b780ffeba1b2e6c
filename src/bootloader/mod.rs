pub mod detect;
pub mod grub2;
pub mod lilo;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::registry::{DiskRegistry, OsEntry, OsRegistry, PackageManager};

/// Known bootloader kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bootloader {
    Grub2,
    GrubUefi,
    GrubLegacy,
    Lilo,
    Elilo,
    IBoot,
    WindowsBootManager,
    NtLoader,
    AutoexecBat,
    Unknown,
}

impl Bootloader {
    pub fn name(&self) -> &'static str {
        match self {
            Bootloader::Grub2 => "GRUB2",
            Bootloader::GrubUefi => "GRUB-UEFI",
            Bootloader::GrubLegacy => "GRUB-LEGACY",
            Bootloader::Lilo => "LILO",
            Bootloader::Elilo => "ELILO",
            Bootloader::IBoot => "iBoot/BootX",
            Bootloader::WindowsBootManager => "Windows Boot Manager",
            Bootloader::NtLoader => "NTLoader",
            Bootloader::AutoexecBat => "AUTOEXEC.BAT",
            Bootloader::Unknown => "Unknown",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "GRUB2" => Bootloader::Grub2,
            "GRUB-UEFI" => Bootloader::GrubUefi,
            "GRUB-LEGACY" => Bootloader::GrubLegacy,
            "LILO" => Bootloader::Lilo,
            "ELILO" => Bootloader::Elilo,
            "iBoot/BootX" => Bootloader::IBoot,
            "Windows Boot Manager" => Bootloader::WindowsBootManager,
            "NTLoader" => Bootloader::NtLoader,
            "AUTOEXEC.BAT" => Bootloader::AutoexecBat,
            _ => Bootloader::Unknown,
        }
    }

    /// Boots through UEFI firmware rather than an MBR
    pub fn is_efi(&self) -> bool {
        matches!(self, Bootloader::GrubUefi | Bootloader::Elilo)
    }

    /// Can be freshly installed through a Linux package manager.
    /// GRUB-LEGACY is detect-only; the Windows/macOS loaders are not ours.
    pub fn installable(&self) -> bool {
        matches!(
            self,
            Bootloader::Grub2 | Bootloader::GrubUefi | Bootloader::Lilo | Bootloader::Elilo
        )
    }

    /// Package names providing this bootloader under the given package
    /// manager. First entry is the one passed to install/remove.
    pub fn packages(&self, pm: PackageManager) -> &'static [&'static str] {
        match (self, pm) {
            (Bootloader::Grub2, PackageManager::AptGet) => &["grub-pc"],
            (Bootloader::Grub2, PackageManager::Yum) => &["grub2"],
            (Bootloader::GrubUefi, PackageManager::AptGet) => &["grub-efi"],
            (Bootloader::GrubUefi, PackageManager::Yum) => &["grub2-efi"],
            (Bootloader::GrubLegacy, PackageManager::AptGet | PackageManager::Yum) => &["grub"],
            (Bootloader::Lilo, PackageManager::AptGet | PackageManager::Yum) => &["lilo"],
            (Bootloader::Elilo, PackageManager::AptGet | PackageManager::Yum) => &["elilo"],
            _ => &[],
        }
    }

    /// Driver for this kind, if bootmend can manage it
    pub fn driver(&self) -> Option<Box<dyn BootloaderOps>> {
        match self {
            Bootloader::Grub2 | Bootloader::GrubUefi | Bootloader::GrubLegacy => {
                Some(Box::new(grub2::Grub2Driver::new(*self)))
            }
            Bootloader::Lilo | Bootloader::Elilo => Some(Box::new(lilo::LiloDriver::new(*self))),
            _ => None,
        }
    }
}

impl std::fmt::Display for Bootloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One bootable choice in a bootloader menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub name: String,
    /// Bootloader-specific identifier; hierarchical for submenu members
    /// ("2>0" is the first entry of the submenu in slot 2)
    pub id: String,
    /// Boot device this entry targets, when it could be resolved
    pub partition: Option<String>,
    pub kernel_options: Vec<String>,
    /// Source lines kept verbatim for debugging and round-trips
    pub raw_data: Vec<String>,
}

/// One menu scope: entry display order plus the entries themselves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub order: Vec<String>,
    pub entries: BTreeMap<String, MenuEntry>,
}

impl Menu {
    pub fn push(&mut self, entry: MenuEntry) {
        self.order.push(entry.name.clone());
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&MenuEntry> {
        self.entries.get(name)
    }
}

/// Name of the top-level menu scope
pub const MAIN_MENU: &str = "MainMenu";

/// All menu scopes of one bootloader, keyed by menu name
pub type MenuSet = BTreeMap<String, Menu>;

/// Everything a driver's config parse produces
#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    pub menus: MenuSet,
    pub timeout: Option<u32>,
    pub global_kernel_options: Option<String>,
    /// The bootloader's own opaque default-entry reference (id or name)
    pub default_ref: Option<String>,
    /// Menu-entry display name the default reference resolved to
    pub default_entry: Option<String>,
}

/// User-editable operations for one OS's bootloader
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub reinstall: bool,
    pub update_config: bool,
    pub new_timeout: Option<u32>,
    pub new_kernel_options: Option<String>,
    pub install_new: bool,
    pub new_bootloader: Option<Bootloader>,
    pub default_os: Option<String>,
}

impl Settings {
    /// True when the apply orchestrator has anything to do for this OS
    pub fn any_operations(&self) -> bool {
        self.reinstall || self.update_config || self.install_new
    }
}

/// Per-OS bootloader record: detected state, parsed menu, user settings
#[derive(Debug, Clone)]
pub struct BootloaderEntry {
    pub os_name: String,
    pub bootloader: Bootloader,
    pub available_bootloaders: Vec<Bootloader>,
    pub menus: MenuSet,
    pub timeout: Option<u32>,
    pub global_kernel_options: Option<String>,
    /// Resolved to a known OS name by the matcher, if possible
    pub default_os: Option<String>,
    pub bl_specific_default_os: Option<String>,
    /// Device the bootloader is installed to
    pub boot_disk: Option<String>,
    pub is_modifyable: bool,
    pub comments: String,
    pub settings: Settings,
}

impl BootloaderEntry {
    pub fn new(os_name: &str) -> Self {
        Self {
            os_name: os_name.to_string(),
            bootloader: Bootloader::Unknown,
            available_bootloaders: Vec::new(),
            menus: MenuSet::new(),
            timeout: None,
            global_kernel_options: None,
            default_os: None,
            bl_specific_default_os: None,
            boot_disk: None,
            is_modifyable: true,
            comments: String::new(),
            settings: Settings::default(),
        }
    }

    pub fn main_menu(&self) -> Option<&Menu> {
        self.menus.get(MAIN_MENU)
    }

    /// Scan every menu scope for an entry with the given bootloader-specific
    /// id, or failing that, display name
    pub fn find_entry_by_ref(&self, reference: &str) -> Option<&MenuEntry> {
        for menu in self.menus.values() {
            for entry in menu.entries.values() {
                if entry.id == reference {
                    return Some(entry);
                }
            }
        }
        for menu in self.menus.values() {
            if let Some(entry) = menu.entries.get(reference) {
                return Some(entry);
            }
        }
        None
    }
}

/// Capability set of one bootloader kind. Selected through
/// [`Bootloader::driver`] so the orchestrator never branches on kind names.
pub trait BootloaderOps: Send + Sync {
    fn kind(&self) -> Bootloader;

    /// Parse this bootloader's menu and global settings from an OS root.
    /// Missing config files yield an empty [`ParsedConfig`], not an error.
    fn parse_config(&self, os_root: &Path, disks: &DiskRegistry) -> Result<ParsedConfig>;

    /// Rewrite config files with the user's settings and regenerate the boot
    /// menu where the bootloader has a generator
    fn write_config(&self, ctx: &WriteCtx<'_>) -> Result<()>;

    /// Physically install the bootloader to its boot device
    fn install(&self, ctx: &WriteCtx<'_>) -> Result<()>;

    /// Remove this bootloader's packages so another can take its place
    fn remove(&self, ctx: &WriteCtx<'_>) -> Result<()>;
}

/// Everything a driver needs to act on one OS
pub struct WriteCtx<'a> {
    pub os: &'a OsEntry,
    pub entry: &'a BootloaderEntry,
    /// "/" for the running OS, the mount point otherwise
    pub os_root: &'a Path,
    pub use_chroot: bool,
    pub disks: &'a DiskRegistry,
    pub oses: &'a OsRegistry,
    /// Device to install to (boot disk, or root partition's host device)
    pub boot_device: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            Bootloader::Grub2,
            Bootloader::GrubUefi,
            Bootloader::GrubLegacy,
            Bootloader::Lilo,
            Bootloader::Elilo,
            Bootloader::WindowsBootManager,
        ] {
            assert_eq!(Bootloader::from_name(kind.name()), kind);
        }
        assert_eq!(Bootloader::from_name("whatever"), Bootloader::Unknown);
    }

    #[test]
    fn grub_legacy_is_not_installable() {
        assert!(!Bootloader::GrubLegacy.installable());
        assert!(Bootloader::Grub2.installable());
    }

    #[test]
    fn non_linux_loaders_have_no_driver() {
        assert!(Bootloader::WindowsBootManager.driver().is_none());
        assert!(Bootloader::Grub2.driver().is_some());
        assert!(Bootloader::Elilo.driver().is_some());
    }

    #[test]
    fn find_entry_prefers_id_over_name() {
        let mut entry = BootloaderEntry::new("Test OS");
        let mut menu = Menu::default();
        menu.push(MenuEntry {
            name: "2".into(),
            id: "0".into(),
            partition: None,
            kernel_options: vec![],
            raw_data: vec![],
        });
        menu.push(MenuEntry {
            name: "Other".into(),
            id: "2".into(),
            partition: Some("/dev/sda3".into()),
            kernel_options: vec![],
            raw_data: vec![],
        });
        entry.menus.insert(MAIN_MENU.to_string(), menu);

        // "2" matches the second entry's id before the first entry's name
        let found = entry.find_entry_by_ref("2").unwrap();
        assert_eq!(found.name, "Other");
    }
}
