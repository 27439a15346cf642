//! Formatted output utilities.

use console::style;

/// Print a success message with checkmark.
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message with X.
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print an info message.
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a header/section title.
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print the TeleClaude banner.
pub fn banner() {
    println!(
        "{}",
        style(
            r"
  _____    _       ____ _                 _
 |_   _|__| | ___ / ___| | __ _ _   _  __| | ___
   | |/ _ \ |/ _ \ |   | |/ _` | | | |/ _` |/ _ \
   | |  __/ |  __/ |___| | (_| | |_| | (_| |  __/
   |_|\___|_|\___|\____|_|\__,_|\__,_|\__,_|\___|
"
        )
        .cyan()
    );
}

/// Print a key-value pair.
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", style(key).bold(), value);
}

/// Print a table row. A width of 0 leaves the column unpadded.
pub fn table_row(cols: &[(&str, usize)]) {
    for &(text, width) in cols {
        print!("{text:width$} ");
    }
    println!();
}
