//! Progress bar for a CLI transfer

use console::style;
use dlbridge_types::TransferEvent;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar driven by a transfer's notifications
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        {
            bar.set_style(style.progress_chars("█▓▒░  "));
        }
        bar.set_message(name.to_string());
        Self { bar }
    }

    /// A bar that never draws, for machine-readable output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn handle_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::Progress {
                bytes_done,
                bytes_total,
                ..
            } => {
                if *bytes_total > 0 {
                    self.bar.set_length(*bytes_total);
                }
                self.bar.set_position(*bytes_done);
            }
            TransferEvent::Completed { error: None } => {
                self.bar.finish_with_message(format!(
                    "{} Download complete",
                    style("✓").green().bold()
                ));
            }
            TransferEvent::Completed { error: Some(error) } => {
                self.bar
                    .abandon_with_message(format!("{} {}", style("✗").red().bold(), error));
            }
        }
    }

    pub fn set_message(&self, message: String) {
        self.bar.set_message(message);
    }
}
