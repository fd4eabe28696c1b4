//! Progress indicators for long-running fetches.
//!
//! Shows a spinner while a source is downloaded or exported. When stderr is
//! not a terminal the message is printed once instead.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

pub fn is_interactive() -> bool {
    std::io::stderr().is_terminal()
}

/// A status indicator that shows a spinner with a message.
/// Automatically hides when dropped.
pub struct Status {
    bar: Option<ProgressBar>,
}

impl Status {
    pub fn new(message: &str) -> Self {
        if !is_interactive() {
            eprintln!("{}", message);
            return Self { bar: None };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));

        Self { bar: Some(bar) }
    }

    /// Finish and clear the line (no message).
    pub fn finish_and_clear(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

impl Drop for Status {
    fn drop(&mut self) {
        if let Some(ref bar) = self.bar {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
    }
}

/// Show "fetching..." status
pub fn fetching(target: &str) -> Status {
    Status::new(&format!("fetching '{}'...", target))
}
