//! Bootloader detection through each OS's package database.
//!
//! The installed kind is found by scanning the installed-package list for
//! known package names, UEFI variants before BIOS variants before legacy.
//! What can be installed comes from a repository search filtered down to
//! exact package-name matches.

use anyhow::Result;
use std::path::Path;

use crate::cmd;
use crate::registry::{OsEntry, PackageManager};
use crate::util::FirmwareMode;

use super::Bootloader;

/// Detection priority: UEFI variants first, then BIOS, then legacy
const DETECT_ORDER: &[Bootloader] = &[
    Bootloader::GrubUefi,
    Bootloader::Elilo,
    Bootloader::Grub2,
    Bootloader::Lilo,
    Bootloader::GrubLegacy,
];

/// Kinds offered for fresh installation (GRUB-LEGACY is detect-only)
const INSTALL_CANDIDATES: &[Bootloader] = &[
    Bootloader::GrubUefi,
    Bootloader::Elilo,
    Bootloader::Grub2,
    Bootloader::Lilo,
];

/// Determine the installed bootloader and the kinds installable through this
/// OS's package manager. A failed package query is not fatal; it yields
/// Unknown and an empty availability list.
pub fn detect(
    os: &OsEntry,
    mount_point: &Path,
    use_chroot: bool,
    firmware: FirmwareMode,
) -> (Bootloader, Vec<Bootloader>) {
    let installed = match query_installed_packages(os.package_manager, mount_point, use_chroot) {
        Ok(output) => find_installed(&output, os.package_manager, firmware),
        Err(e) => {
            tracing::warn!("package query failed for {}: {}", os.name, e);
            return (Bootloader::Unknown, Vec::new());
        }
    };

    let available = match query_repository(os.package_manager, mount_point, use_chroot) {
        Ok(searches) => find_available(&searches, os.package_manager),
        Err(e) => {
            tracing::warn!("repository search failed for {}: {}", os.name, e);
            Vec::new()
        }
    };

    (installed, available)
}

fn query_installed_packages(
    pm: PackageManager,
    mount_point: &Path,
    use_chroot: bool,
) -> Result<String> {
    let (program, args): (&str, Vec<&str>) = match pm {
        PackageManager::AptGet => ("dpkg", vec!["--get-selections"]),
        PackageManager::Yum => ("yum", vec!["list", "installed"]),
        _ => anyhow::bail!("no package database to query for {}", pm.name()),
    };

    let (code, output) = cmd::run_in_os(program, &args, mount_point, use_chroot)?;
    if code != 0 {
        anyhow::bail!("{} exited with code {}", program, code);
    }
    Ok(output)
}

/// One repository search per candidate package token; results are paired
/// with the token they were searched for
fn query_repository(
    pm: PackageManager,
    mount_point: &Path,
    use_chroot: bool,
) -> Result<Vec<(Bootloader, &'static str, String)>> {
    let search_cmd: (&str, &str) = match pm {
        PackageManager::AptGet => ("apt-cache", "search"),
        PackageManager::Yum => ("yum", "search"),
        _ => anyhow::bail!("no package repository to search for {}", pm.name()),
    };

    let mut results = Vec::new();
    for kind in INSTALL_CANDIDATES {
        for token in kind.packages(pm) {
            let (code, output) =
                cmd::run_in_os(search_cmd.0, &[search_cmd.1, token], mount_point, use_chroot)?;
            if code == 0 {
                results.push((*kind, *token, output));
            }
        }
    }
    Ok(results)
}

/// Scan installed-package output for the first kind, in priority order,
/// whose package appears. On yum systems both GRUB2 variants are installed
/// by default, so a GRUB-UEFI hit is only trusted when the firmware actually
/// booted UEFI.
pub fn find_installed(output: &str, pm: PackageManager, firmware: FirmwareMode) -> Bootloader {
    for kind in DETECT_ORDER {
        if pm == PackageManager::Yum
            && *kind == Bootloader::GrubUefi
            && firmware == FirmwareMode::Bios
        {
            continue;
        }

        for token in kind.packages(pm) {
            if output
                .lines()
                .any(|line| first_segment(line) == Some(*token))
            {
                return *kind;
            }
        }
    }
    Bootloader::Unknown
}

/// Filter repository search results down to exact package-name hits
pub fn find_available(
    searches: &[(Bootloader, &'static str, String)],
    _pm: PackageManager,
) -> Vec<Bootloader> {
    let mut available = Vec::new();
    for (kind, token, output) in searches {
        let hit = output
            .lines()
            .any(|line| first_segment(line) == Some(*token));
        if hit && !available.contains(kind) {
            available.push(*kind);
        }
    }
    available
}

/// First whitespace-delimited token of a line, trimmed at the first dot so
/// "grub2.x86_64" compares as "grub2". An exact comparison against this
/// segment is what keeps "grub2-efi-x64-modules" from matching "grub2".
pub fn first_segment(line: &str) -> Option<&str> {
    let token = line.split_whitespace().next()?;
    Some(token.split('.').next().unwrap_or(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_segment_strips_arch_suffix() {
        assert_eq!(first_segment("grub2.x86_64  2.06  @anaconda"), Some("grub2"));
        assert_eq!(first_segment("grub-pc\t\tinstall"), Some("grub-pc"));
        assert_eq!(first_segment(""), None);
    }

    #[test]
    fn dpkg_selections_detect_grub_pc() {
        let output = "grub-common\tinstall\ngrub-pc\tinstall\ngrub2-common\tinstall\n";
        let found = find_installed(output, PackageManager::AptGet, FirmwareMode::Bios);
        assert_eq!(found, Bootloader::Grub2);
    }

    #[test]
    fn uefi_variant_outranks_bios_variant() {
        let output = "grub-pc\tinstall\ngrub-efi\tinstall\n";
        let found = find_installed(output, PackageManager::AptGet, FirmwareMode::Uefi);
        assert_eq!(found, Bootloader::GrubUefi);
    }

    #[test]
    fn yum_grub_uefi_skipped_under_bios_firmware() {
        // Fedora installs both variants; firmware decides which is active
        let output = "grub2-efi.x86_64  2.06\ngrub2.x86_64  2.06\n";
        let bios = find_installed(output, PackageManager::Yum, FirmwareMode::Bios);
        assert_eq!(bios, Bootloader::Grub2);

        let uefi = find_installed(output, PackageManager::Yum, FirmwareMode::Uefi);
        assert_eq!(uefi, Bootloader::GrubUefi);
    }

    #[test]
    fn unknown_when_nothing_matches() {
        let output = "vim\tinstall\ncoreutils\tinstall\n";
        let found = find_installed(output, PackageManager::AptGet, FirmwareMode::Bios);
        assert_eq!(found, Bootloader::Unknown);
    }

    #[test]
    fn availability_requires_exact_segment_match() {
        let searches = vec![(
            Bootloader::Grub2,
            "grub2",
            "grub2-efi-x64-modules - modules for EFI\n".to_string(),
        )];
        let available = find_available(&searches, PackageManager::Yum);
        assert!(available.is_empty());

        let searches = vec![(
            Bootloader::Grub2,
            "grub2",
            "grub2.x86_64 - GRand Unified Bootloader\n".to_string(),
        )];
        let available = find_available(&searches, PackageManager::Yum);
        assert_eq!(available, vec![Bootloader::Grub2]);
    }

    #[test]
    fn grub_legacy_never_offered_for_install() {
        assert!(!INSTALL_CANDIDATES.contains(&Bootloader::GrubLegacy));
    }
}
