//! Resolves a bootloader's default boot entry to one of the known operating
//! systems. Two steps: find the menu entry the bootloader's own default
//! reference points at and take its boot device, then match that device
//! against every OS's root, /boot, and EFI partitions.

use crate::bootloader::BootloaderEntry;
use crate::registry::{DiskRegistry, OsEntry, OsRegistry};

/// The boot device of the menu entry referenced by the bootloader's recorded
/// default, if both resolve
pub fn resolve_default_boot_device(entry: &BootloaderEntry) -> Option<String> {
    let reference = entry.bl_specific_default_os.as_deref()?;
    entry
        .find_entry_by_ref(reference)
        .and_then(|e| e.partition.clone())
}

#[derive(Clone, Copy)]
enum FieldKind {
    Root,
    Boot,
    Efi,
}

/// Name of the first OS one of whose partitions is `device`. Field priority:
/// root partition, then /boot, then EFI; first match wins.
pub fn match_device_to_os(
    device: &str,
    oses: &OsRegistry,
    disks: &DiskRegistry,
) -> Option<String> {
    for field in [FieldKind::Root, FieldKind::Boot, FieldKind::Efi] {
        for os in oses.iter() {
            let candidate = match field {
                FieldKind::Root => Some(os.partition.as_str()),
                FieldKind::Boot => os.boot_partition.as_deref(),
                FieldKind::Efi => os.efi_partition.as_deref(),
            };
            if let Some(candidate) = candidate {
                if devices_match(device, candidate, disks) {
                    return Some(os.name.clone());
                }
            }
        }
    }
    None
}

/// True when a device belongs to the OS by any of its partition fields
pub fn device_belongs_to_os(device: &str, os: &OsEntry, disks: &DiskRegistry) -> bool {
    let mut candidates = vec![os.partition.as_str()];
    candidates.extend(os.boot_partition.as_deref());
    candidates.extend(os.efi_partition.as_deref());
    candidates
        .iter()
        .any(|c| devices_match(device, c, disks))
}

/// Device-string equality, or UUID equality via the disk registry
fn devices_match(a: &str, b: &str, disks: &DiskRegistry) -> bool {
    if a == b {
        return true;
    }
    match (disks.uuid_for(a), disks.uuid_for(b)) {
        (Some(ua), Some(ub)) => ua == ub,
        _ => false,
    }
}
