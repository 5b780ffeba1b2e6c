use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

pub fn run<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().collect();
    let args_str: Vec<_> = args.iter().map(|s| s.as_ref().to_string_lossy()).collect();

    println!("{}> {} {}{}", CYAN, program, args_str.join(" "), RESET);

    let status = Command::new(program)
        .args(&args)
        .status()
        .with_context(|| format!("Failed to run {}", program))?;

    if !status.success() {
        anyhow::bail!("{} failed with exit code {:?}", program, status.code());
    }

    Ok(())
}

pub fn run_output<I, S>(program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().collect();
    let args_str: Vec<_> = args.iter().map(|s| s.as_ref().to_string_lossy()).collect();

    println!("{}> {} {}{}", CYAN, program, args_str.join(" "), RESET);

    let output = Command::new(program)
        .args(&args)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} failed with exit code {:?}",
            program,
            output.status.code()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command, echoing combined stdout/stderr line-by-line while it runs.
/// Returns the exit code and the captured output. Long-running bootloader
/// and package-manager commands go through here so the user can watch them.
pub fn run_status_output<I, S>(program: &str, args: I) -> Result<(i32, String)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().collect();
    let args_str: Vec<_> = args.iter().map(|s| s.as_ref().to_string_lossy()).collect();

    println!("{}> {} {}{}", CYAN, program, args_str.join(" "), RESET);

    let mut child = Command::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;

    let mut captured = String::new();

    if let Some(stdout) = child.stdout.take() {
        let stderr = child.stderr.take();
        let err_handle = stderr.map(|stderr| {
            std::thread::spawn(move || {
                let mut lines = Vec::new();
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    eprintln!("{}", line);
                    lines.push(line);
                }
                lines
            })
        });

        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            println!("{}", line);
            captured.push_str(&line);
            captured.push('\n');
        }

        if let Some(handle) = err_handle {
            if let Ok(lines) = handle.join() {
                for line in lines {
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }
        }
    }

    let status = child.wait()?;
    Ok((status.code().unwrap_or(-1), captured))
}

/// Run a command inside an OS. For the running OS this is a plain invocation;
/// for a mounted OS the command is wrapped in `chroot <mount_point>`.
pub fn run_in_os(
    program: &str,
    args: &[&str],
    mount_point: &Path,
    use_chroot: bool,
) -> Result<(i32, String)> {
    if use_chroot {
        let mp = mount_point.to_string_lossy().to_string();
        let mut wrapped: Vec<&str> = vec![&mp, program];
        wrapped.extend(args);
        run_status_output("chroot", wrapped)
    } else {
        run_status_output(program, args)
    }
}
