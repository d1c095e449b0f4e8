//! Progress indicators for long-running stages
//!
//! Bars draw to stderr and stay hidden when stderr is not a terminal, so
//! they never interleave with the report on stdout.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Records fetched for one paginated year; length is set once the server
/// reports a total
pub fn create_record_progress(year: i32, enabled: bool) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(None, draw_target(enabled));
    pb.set_style(style(
        "{msg} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} records",
    ));
    pb.set_message(format!("{}", year));
    pb
}

/// One tick per finished year
pub fn create_year_progress(total: u64, message: &str, enabled: bool) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(total), draw_target(enabled));
    pb.set_style(style(
        "{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} years ({eta})",
    ));
    pb.set_message(message.to_string());
    pb
}

fn draw_target(enabled: bool) -> ProgressDrawTarget {
    if enabled {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    }
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
