//! Line output for pipe announcements.
//!
//! # Important
//!
//! - **stdout**: announcement lines only (one JSON object per line)
//! - **stderr**: logs, never parsed by the provider
//! - **Never use `println!`**: It may add `\r\n` on Windows

use std::io::Write;

/// Write `line` and a single `\n` to `writer`, then flush.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Write a line to stdout under a single stdout lock.
///
/// # Errors
///
/// Returns IO error if write or flush fails.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    write_line(&mut std::io::stdout().lock(), line)
}
