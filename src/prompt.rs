//! Console dialog surface used by the scan flow and the apply orchestrator.
//!
//! All prompts are synchronous; the orchestrator blocks on them between
//! steps. Factored here so the rest of the crate never touches stdin.

use anyhow::{bail, Result};
use std::io::{self, Write};

/// An option in a select prompt
#[derive(Debug, Clone)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

fn read_line() -> Result<String> {
    io::stdout().flush()?;
    let mut input = String::new();
    let bytes_read = io::stdin().read_line(&mut input)?;

    if bytes_read == 0 {
        bail!("Unexpected end of input. Is stdin connected to a terminal?");
    }

    Ok(input.trim().to_string())
}

pub fn show_message(message: &str) {
    println!("{}", message);
}

pub fn prompt_yes_no(prompt: &str, default: bool) -> Result<bool> {
    let default_str = if default { "Y/n" } else { "y/N" };
    print!("{} [{}]: ", prompt, default_str);
    io::stdout().flush()?;

    let input = read_line()?.to_lowercase();

    if input.is_empty() {
        Ok(default)
    } else if input == "y" || input == "yes" {
        Ok(true)
    } else if input == "n" || input == "no" {
        Ok(false)
    } else {
        Ok(default)
    }
}

pub fn prompt_text_default(prompt: &str, default: &str) -> Result<String> {
    print!("{} [{}]: ", prompt, default);
    io::stdout().flush()?;
    let input = read_line()?;
    if input.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(input)
    }
}

/// Numbered selection from a list, returning the chosen option's value
pub fn prompt_select(prompt: &str, options: &[SelectOption], default: usize) -> Result<String> {
    println!("{}:", prompt);
    for (i, opt) in options.iter().enumerate() {
        println!("  {}) {}", i + 1, opt.label);
    }

    loop {
        print!("Choice [{}]: ", default + 1);
        io::stdout().flush()?;
        let input = read_line()?;

        if input.is_empty() {
            return Ok(options[default].value.clone());
        }

        match input.parse::<usize>() {
            Ok(n) if n >= 1 && n <= options.len() => return Ok(options[n - 1].value.clone()),
            _ => println!("Enter a number between 1 and {}", options.len()),
        }
    }
}
