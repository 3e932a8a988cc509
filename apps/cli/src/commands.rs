//! CLI command implementations

use crate::output::{format_bytes, format_eta, format_speed, print_output, TransferSummary};
use crate::progress::TransferProgress;
use crate::{FetchArgs, OutputFormat};
use anyhow::{anyhow, Context, Result};
use console::style;
use dlbridge_core::{create_downloader_of_kind, SettingsProvider, StaticSettings};
use dlbridge_types::{DownloadClientSettings, DownloaderKind, Settings, TransferEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Settings equivalent of the fetch flags
fn settings_from_args(args: &FetchArgs) -> Settings {
    Settings {
        download_client: DownloadClientSettings {
            parallel_count: args.connections,
            chunk_count: args.chunks,
            max_speed: args.max_speed,
            timeout: args.timeout,
            proxy_server: args.proxy.clone(),
            downloader: if args.simple {
                DownloaderKind::Simple
            } else {
                DownloaderKind::Internal
            },
        },
        ..Settings::default()
    }
}

/// Where the file goes: `output` if it names a file, otherwise the URL's
/// file name inside `output` (or the current directory)
fn resolve_destination(url: &str, output: Option<&Path>) -> Result<PathBuf> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;
    let file_name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string();

    Ok(match output {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(file_name),
    })
}

pub async fn fetch(args: FetchArgs, format: OutputFormat) -> Result<()> {
    let destination = resolve_destination(&args.url, args.output.as_deref())?;
    let settings = settings_from_args(&args);
    let kind = settings.download_client.downloader;
    let provider: Arc<dyn SettingsProvider> = Arc::new(StaticSettings::new(settings));

    let engine = create_downloader_of_kind(kind, &args.url, destination.clone(), provider)?;

    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let progress = if format == OutputFormat::Human {
        TransferProgress::new(&name)
    } else {
        TransferProgress::hidden()
    };

    let mut subscription = engine.subscribe();
    let started = Instant::now();
    engine.start().await?;

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                progress.set_message(format!("{} cancelling", name));
                engine.cancel().await?;
            }
            event = subscription.recv() => {
                let Some(event) = event else {
                    break Some("transfer ended without a result".to_string());
                };
                progress.handle_event(&event);
                if let TransferEvent::Progress { speed, bytes_done, bytes_total } = &event {
                    tracing::debug!(
                        "{} of {} at {}, eta {}",
                        format_bytes(*bytes_done),
                        format_bytes(*bytes_total),
                        format_speed(*speed),
                        format_eta(if *speed > 0 { bytes_total.saturating_sub(*bytes_done) / speed } else { 0 })
                    );
                }
                if let TransferEvent::Completed { error } = event {
                    break error;
                }
            }
        }
    };

    let summary = TransferSummary::new(&engine.snapshot(), started.elapsed().as_secs_f64());
    if format == OutputFormat::Human {
        let mark = if outcome.is_none() {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        println!("{} {}", mark, style(&args.url).cyan());
    }
    print_output(&summary, format)?;

    match outcome {
        None => Ok(()),
        Some(error) => Err(anyhow!(error)),
    }
}
