//! Operator-facing output lines.
//!
//! Diagnostics go through `tracing`; these lines are the deployment
//! narrative the operator reads.

use colored::Colorize;

pub fn step(message: &str) {
    println!("{} {}", "→".cyan(), message);
}

pub fn success(message: &str) {
    println!("{} {}", "✔".green(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "!".yellow().bold(), message.yellow());
}

pub fn failure(message: &str) {
    eprintln!("{} {}", "✖".red().bold(), message.red());
}

/// Indented block of captured command output
pub fn detail(title: &str, text: &str) {
    let text = text.trim_end();
    if text.is_empty() {
        return;
    }
    eprintln!("  {}", title.dimmed());
    for line in text.lines() {
        eprintln!("    {}", line);
    }
}

/// Dimmed trailing information, such as where the run log went
pub fn note(message: &str) {
    eprintln!("{}", message.dimmed());
}
