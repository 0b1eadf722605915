//! User-facing progress output.

use std::fmt::Display;
use std::io::Write;

/// Write one line to `stderr`, ignoring write failures.
///
/// Progress output is best effort; a closed stderr must not fail a pull.
///
/// # Examples
///
/// ```
/// use modpull::output::write_stderr_line;
///
/// let mut buffer = Vec::new();
/// write_stderr_line(&mut buffer, "Pulling ghcr.io/org/app:1.0.0");
/// assert_eq!(buffer, b"Pulling ghcr.io/org/app:1.0.0\n");
/// ```
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl Display) {
    if writeln!(stderr, "{message}").is_err() {
        log::trace!("stderr closed; dropping progress line");
    }
}

/// Progress reporter that stays silent in quiet mode.
pub struct Progress<'a> {
    stderr: &'a mut dyn Write,
    quiet: bool,
}

impl<'a> Progress<'a> {
    /// Report to `stderr` unless `quiet`.
    #[must_use]
    pub fn new(stderr: &'a mut dyn Write, quiet: bool) -> Self {
        Self { stderr, quiet }
    }

    /// Write `message` unless quiet.
    pub fn line(&mut self, message: impl Display) {
        if !self.quiet {
            write_stderr_line(self.stderr, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_progress_writes_nothing() {
        let mut buffer = Vec::new();
        Progress::new(&mut buffer, true).line("hidden");
        assert!(buffer.is_empty());
    }

    #[test]
    fn progress_writes_lines() {
        let mut buffer = Vec::new();
        let mut progress = Progress::new(&mut buffer, false);
        progress.line("one");
        progress.line(format_args!("two {}", 2));
        assert_eq!(String::from_utf8_lossy(&buffer), "one\ntwo 2\n");
    }
}
