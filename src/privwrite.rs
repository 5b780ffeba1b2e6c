//! Whitelisted writer for bootloader configuration files.
//!
//! Every config write in the crate funnels through [`write_config_file`],
//! which refuses paths outside a fixed whitelist before anything privileged
//! happens. The whitelist is expressed relative to an OS root so writes into
//! a mounted system ("/tmp/bootmend/mounts/dev_sda2/etc/default/grub") are
//! validated against the same table as writes into the running one.

use std::fs;
use std::path::Path;

use crate::paths::CONFIG_WRITE_WHITELIST;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("refusing to write {0}: not a whitelisted bootloader config path")]
    NotWhitelisted(String),
    #[error("refusing to write {0}: path contains whitespace")]
    UnsafePath(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Check a path against the whitelist without touching the filesystem
pub fn validate_config_path(os_root: &Path, path: &Path) -> Result<(), WriteError> {
    let display = path.display().to_string();

    if display.contains(char::is_whitespace) {
        return Err(WriteError::UnsafePath(display));
    }

    let relative = match path.strip_prefix(os_root) {
        Ok(rel) => rel,
        Err(_) => return Err(WriteError::NotWhitelisted(display)),
    };

    let rooted = format!("/{}", relative.display());
    if CONFIG_WRITE_WHITELIST.iter().any(|allowed| *allowed == rooted) {
        Ok(())
    } else {
        Err(WriteError::NotWhitelisted(display))
    }
}

/// Write a bootloader config file after whitelist validation.
/// `os_root` is "/" for the running OS or the mount point of a staged one.
pub fn write_config_file(os_root: &Path, path: &Path, contents: &str) -> Result<(), WriteError> {
    validate_config_path(os_root, path)?;

    fs::write(path, contents).map_err(|source| WriteError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn accepts_whitelisted_path_at_root() {
        let ok = validate_config_path(Path::new("/"), Path::new("/etc/default/grub"));
        assert!(ok.is_ok());
    }

    #[test]
    fn accepts_whitelisted_path_under_mount_point() {
        let root = PathBuf::from("/tmp/bootmend/mounts/dev_sda2");
        let path = root.join("etc/lilo.conf");
        assert!(validate_config_path(&root, &path).is_ok());
    }

    #[test]
    fn rejects_arbitrary_path() {
        let err = validate_config_path(Path::new("/"), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, WriteError::NotWhitelisted(_)));
    }

    #[test]
    fn rejects_path_with_space() {
        let err =
            validate_config_path(Path::new("/"), Path::new("/etc/default/gr ub")).unwrap_err();
        assert!(matches!(err, WriteError::UnsafePath(_)));
    }

    #[test]
    fn rejects_path_outside_os_root() {
        let root = PathBuf::from("/tmp/bootmend/mounts/dev_sda2");
        let err = validate_config_path(&root, Path::new("/etc/default/grub")).unwrap_err();
        assert!(matches!(err, WriteError::NotWhitelisted(_)));
    }

    #[test]
    fn write_refuses_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("etc/passwd");
        let err = write_config_file(dir.path(), &target, "nope").unwrap_err();
        assert!(matches!(err, WriteError::NotWhitelisted(_)));
        assert!(!target.exists());
    }
}
