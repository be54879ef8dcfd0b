//! Progress bar for a share run

use crate::output::{format_bytes, format_elapsed};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use shareget_types::RunEvent;
use std::time::Duration;

/// Renders run events as a spinner during discovery and a bar while fetching
pub struct RunProgress {
    bar: ProgressBar,
    bytes: u64,
}

impl RunProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Looking for a share...");

        Self { bar, bytes: 0 }
    }

    /// Update the display from an event
    pub fn handle_event(&mut self, event: &RunEvent) {
        match event {
            RunEvent::ManifestAccepted { endpoint, expected } => {
                self.bar.set_length(u64::from(*expected));
                self.bar.set_position(0);
                self.bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▓▒░  "),
                );
                self.bar.println(format!(
                    "{} {} is sharing {} file(s)",
                    style("→").cyan(),
                    style(endpoint).bold(),
                    expected
                ));
            }

            RunEvent::ManifestRejected { endpoint, reason } => {
                self.bar.println(format!(
                    "{} {} {}",
                    style("·").dim(),
                    endpoint,
                    style(reason).dim()
                ));
            }

            RunEvent::Tick { elapsed_secs } if self.bar.length().is_none() => {
                self.bar
                    .set_message(format!("Looking for a share... {}", format_elapsed(*elapsed_secs)));
            }

            RunEvent::FetchRetrying { index, attempt } => {
                self.bar
                    .set_message(format!("retrying file {} (retry {})", index, attempt));
            }

            RunEvent::FileSaved {
                filename, bytes, ..
            } => {
                self.bytes += bytes;
                self.bar.inc(1);
                self.bar.set_message(format!(
                    "{} ({})",
                    filename,
                    format_bytes(self.bytes)
                ));
            }

            RunEvent::FileAbandoned { index, attempts } => {
                self.bar.println(format!(
                    "{} file {} abandoned after {} attempts",
                    style("✗").red().bold(),
                    index,
                    attempts
                ));
            }

            RunEvent::FileFailed { index, error } => {
                self.bar.println(format!(
                    "{} file {} could not be written: {}",
                    style("✗").red().bold(),
                    index,
                    error
                ));
            }

            RunEvent::Completed { received, .. } => {
                self.bar.finish_with_message(format!(
                    "{} {} file(s), {}",
                    style("✓").green().bold(),
                    received,
                    format_bytes(self.bytes)
                ));
            }

            RunEvent::Incomplete {
                received, expected, ..
            } => {
                self.bar.abandon_with_message(format!(
                    "{} only {}/{} file(s) arrived",
                    style("✗").red().bold(),
                    received,
                    expected
                ));
            }

            RunEvent::TimedOut { .. } => {
                self.bar.abandon_with_message(format!(
                    "{} No endpoint answered with a share",
                    style("✗").red().bold()
                ));
            }

            RunEvent::Cancelled { .. } => {
                self.bar
                    .abandon_with_message(format!("{} Cancelled", style("○").dim()));
            }

            _ => {}
        }
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}
