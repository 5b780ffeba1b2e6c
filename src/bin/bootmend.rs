use anyhow::Result;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use bootmend::cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    let result = match args.get(1).map(|s| s.as_str()) {
        None | Some("interactive") => run_privileged(cli::interactive),
        Some("scan") => run_privileged(cli::scan_command),
        Some("backup") => run_privileged(|| backup(&args[2..])),
        Some("restore") => run_privileged(|| restore(&args[2..])),
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        report_failure(&e);
        std::process::exit(1);
    }
}

fn run_privileged(f: impl FnOnce() -> Result<()>) -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        eprintln!("Error: bootmend must be run as root (use sudo)");
        std::process::exit(1);
    }
    f()
}

fn backup(args: &[String]) -> Result<()> {
    match args {
        [path] => cli::backup_command(None, Path::new(path)),
        [os, path] => cli::backup_command(Some(os.as_str()), Path::new(path)),
        _ => {
            anyhow::bail!("Usage: bootmend backup [os-name] <file.wxfbc>")
        }
    }
}

fn restore(args: &[String]) -> Result<()> {
    match args {
        [path] => cli::restore_command(None, Path::new(path)),
        [os, path] => cli::restore_command(Some(os.as_str()), Path::new(path)),
        _ => {
            anyhow::bail!("Usage: bootmend restore [os-name] <file.wxfbc>")
        }
    }
}

/// Last-resort handler: print the full error chain and offer to save it for
/// a bug report, since the machine may be left in a half-configured state.
fn report_failure(error: &anyhow::Error) {
    eprintln!("\nbootmend ran into an unrecoverable problem:");
    eprintln!("  {:#}", error);
    eprintln!(
        "\nIf bootloader operations were interrupted partway, run \
         `bootmend scan` to see the current state before rebooting."
    );

    // Saving may be all the user can do at this point, so default to yes and
    // fall back to saving when the prompt itself is unusable
    let save = bootmend::prompt::prompt_yes_no("Save an error report to /tmp?", true).unwrap_or(true);
    if save {
        let report_path = "/tmp/bootmend-error.txt";
        let report = format!("bootmend {}\nerror: {:#}\n", env!("CARGO_PKG_VERSION"), error);
        match std::fs::write(report_path, report) {
            Ok(()) => eprintln!("An error report was saved to {}", report_path),
            Err(e) => eprintln!("Could not save an error report: {}", e),
        }
    }
}

fn print_usage() {
    println!(
        r#"bootmend - bootloader inspection and repair

Usage:
    bootmend                       Scan, then interactively fix bootloaders
    bootmend scan                  Scan and report, make no changes
    bootmend backup [os] <file>    Save an OS's bootloader config to a .wxfbc file
    bootmend restore [os] <file>   Restore an OS's bootloader config from a backup
    bootmend help                  Show this help message

Set RUST_LOG=debug for verbose logging.

Examples:
    sudo bootmend                          # Interactive repair session
    sudo bootmend scan                     # Report what is installed where
    sudo bootmend backup ubuntu.wxfbc      # Back up, choosing the OS at a prompt
    sudo bootmend restore ubuntu.wxfbc     # Restore onto the OS named in the backup
"#
    );
}
