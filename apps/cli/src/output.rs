//! Output formatting utilities

use crate::OutputFormat;
use dlbridge_types::{Transfer, TransferStatus};
use serde::Serialize;

/// Summary printed once a transfer is over
#[derive(Debug, Serialize)]
pub struct TransferSummary {
    pub uri: String,
    pub destination: String,
    pub status: TransferStatus,
    pub bytes: u64,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

impl TransferSummary {
    pub fn new(transfer: &Transfer, elapsed_secs: f64) -> Self {
        Self {
            uri: transfer.uri.clone(),
            destination: transfer.destination.display().to_string(),
            status: transfer.status,
            bytes: transfer.bytes_done,
            elapsed_secs,
            error: transfer.error.clone(),
        }
    }
}

impl std::fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  File: {}", self.destination)?;
        write!(f, "  Size: {}", format_bytes(self.bytes))?;
        if self.elapsed_secs > 0.0 {
            let rate = (self.bytes as f64 / self.elapsed_secs) as u64;
            write!(f, " in {:.1}s ({})", self.elapsed_secs, format_speed(rate))?;
        }
        if let Some(error) = &self.error {
            write!(f, "\n  Error: {}", error)?;
        }
        Ok(())
    }
}

/// Print output in the specified format
pub fn print_output<T: Serialize + std::fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format speed as human-readable
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec as f64))
}

/// Format duration as human-readable
pub fn format_eta(seconds: u64) -> String {
    if seconds == 0 {
        return "-".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
