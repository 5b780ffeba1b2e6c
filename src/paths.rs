use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Base directory for mounting non-running operating systems
pub const OS_MOUNT_BASE: &str = "/tmp/bootmend/mounts";

/// apt/dpkg database lock
pub const DPKG_LOCK: &str = "/var/lib/dpkg/lock";

/// yum holds a pid file while a transaction is running
pub const YUM_LOCK: &str = "/var/run/yum.pid";

/// Seconds between package-manager lock checks
pub const LOCK_POLL_SECS: u64 = 5;

/// Configuration files the privileged writer is allowed to touch. Paths are
/// relative to an OS root so the same whitelist covers chrooted systems.
pub static CONFIG_WRITE_WHITELIST: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "/etc/default/grub",
        "/etc/grub.conf",
        "/etc/lilo.conf",
        "/etc/elilo.conf",
        "/boot/grub/grub.cfg",
        "/boot/grub2/grub.cfg",
        "/boot/efi/EFI/fedora/grub.cfg",
        "/boot/grub/grubenv",
        "/boot/grub2/grubenv",
    ]
});

/// Mount point for an OS identified by its root partition
pub fn mount_point_for(partition: &str) -> PathBuf {
    let sanitized = partition.trim_start_matches('/').replace('/', "_");
    PathBuf::from(OS_MOUNT_BASE).join(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_point_strips_slashes() {
        assert_eq!(
            mount_point_for("/dev/sda2"),
            PathBuf::from("/tmp/bootmend/mounts/dev_sda2")
        );
    }

    #[test]
    fn whitelist_contains_grub_default() {
        assert!(CONFIG_WRITE_WHITELIST.contains(&"/etc/default/grub"));
    }
}
