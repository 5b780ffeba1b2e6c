//! bootmend - inspect and repair the bootloaders of every operating system
//! on a machine.
//!
//! The crate scans disks and partitions, identifies installed operating
//! systems, detects each one's bootloader through its package database,
//! parses the bootloader configuration, and can rewrite, reinstall, or
//! replace the bootloader per OS. Non-running systems are staged through
//! mount and chroot so their own package managers do the work.

pub mod apply;
pub mod backup;
pub mod bootloader;
pub mod chroot;
pub mod cli;
pub mod cmd;
pub mod discovery;
pub mod matcher;
pub mod network;
pub mod paths;
pub mod privwrite;
pub mod prompt;
pub mod registry;
pub mod util;
