//! Output helpers for consistent CLI formatting

use console::style;

/// Display a section header
pub fn section(title: &str) {
    println!();
    println!("{}", style(title).bold());
}

/// Display a success step
pub fn step_ok(message: &str) {
    println!("  {} {}", style("[OK]").green(), message);
}

/// Display a success step with detail
pub fn step_ok_detail(message: &str, detail: &str) {
    println!("  {} {} ({})", style("[OK]").green(), message, style(detail).dim());
}

/// Display an informational step
pub fn step_info(message: &str) {
    println!("  {} {}", style("[INFO]").cyan(), message);
}

/// Display a warning with a hint for fixing it
pub fn step_warn_hint(message: &str, hint: &str) {
    println!("  {} {}", style("[WARN]").yellow(), message);
    println!("         {}", style(hint).dim());
}

/// Display a failed step
pub fn step_error(message: &str) {
    println!("  {} {}", style("[FAIL]").red(), message);
}
