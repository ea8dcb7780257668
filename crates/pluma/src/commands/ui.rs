//! Console output helpers for consistent CLI formatting.

use console::{measure_text_width, style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use std::borrow::Cow;
use std::time::Duration;

/// Print a success message with green checkmark.
pub fn success(msg: impl std::fmt::Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print a warning message with yellow exclamation.
pub fn warn(msg: impl std::fmt::Display) {
    eprintln!("{} {}", style("!").yellow().bold(), msg);
}

/// Print a dim hint message.
pub fn hint(msg: impl std::fmt::Display) {
    println!("{} {}", style("→").dim(), msg);
}

/// Style text as a plugin name (cyan).
pub fn plugin(name: impl std::fmt::Display) -> StyledObject<String> {
    style(name.to_string()).cyan()
}

/// Style text as a version (cyan).
pub fn num<T: std::fmt::Display>(n: T) -> StyledObject<String> {
    style(n.to_string()).cyan()
}

/// Style text as dimmed/secondary.
pub fn dim(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

/// A steady spinner for a step of unknown length.
pub fn spinner(msg: impl Into<Cow<'static, str>>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(msg);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Print rows as an aligned table with a bold header.
pub fn table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(measure_text_width(cell));
        }
    }

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let pad = width.saturating_sub(measure_text_width(cell));
                format!("{}{}", cell, " ".repeat(pad))
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let header = line(headers.iter().map(|h| h.to_string()).collect());
    println!("{}", style(header).bold());
    for row in rows {
        println!("{}", line(row.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_styled_cells() {
        console::set_colors_enabled(true);
        let cell = plugin("login").to_string();
        assert_eq!(measure_text_width(&cell), 5);
    }
}
