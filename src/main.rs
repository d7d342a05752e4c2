//! CLI entry point: drives a single download through the agent.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use download_agent::{
    AgentConfig, AgentContext, ConfigSource, DownloadManager, DownloadProperty, DownloadState,
    DownloadStatus, JsonFileConfig, MemoryConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// How often the status is polled while the transfer runs.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let manager = DownloadManager::new(AgentContext::default().with_config(config_source(&args)))
        .context("failed to start download agent")?;

    let id = manager
        .create_download(&args.url, &args.output)
        .with_context(|| format!("cannot download to {}", args.output.display()))?;

    if args.no_progress_timeout > 0 {
        manager.set_property(
            &id,
            DownloadProperty::NoProgressTimeoutSeconds,
            &args.no_progress_timeout.to_string(),
        )?;
    }

    info!(id = %id, output = %args.output.display(), "Download starting");
    manager.start_download(&id)?;

    let bar = progress_bar(args.quiet);
    let outcome = wait_for_transfer(&manager, &id, &bar);
    bar.finish_and_clear();

    match outcome {
        Ok(status) => {
            manager.finalize_download(&id)?;
            info!(
                bytes = status.bytes_transferred,
                output = %args.output.display(),
                "Download complete"
            );
            Ok(())
        }
        Err(e) => {
            if let Err(abort_err) = manager.abort_download(&id) {
                warn!(error = %abort_err, "failed to abort download");
            }
            Err(e)
        }
    }
}

fn config_source(args: &Args) -> Arc<dyn ConfigSource> {
    match &args.config {
        Some(path) => {
            let mut source = JsonFileConfig::new(path);
            if let Some(sdk) = &args.sdk_config {
                source = source.with_sdk_config(sdk);
            }
            Arc::new(source)
        }
        None => Arc::new(MemoryConfig::new(AgentConfig {
            cache_host: args.cache_host.clone(),
            fallback_delay_background_secs: args.fallback_delay,
            ..AgentConfig::default()
        })),
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Polls until the download is Transferred or paused with an error.
fn wait_for_transfer(
    manager: &DownloadManager,
    id: &str,
    bar: &ProgressBar,
) -> Result<DownloadStatus> {
    loop {
        let status = manager.get_status(id)?;
        if status.bytes_total > 0 {
            bar.set_length(status.bytes_total);
        }
        bar.set_position(status.bytes_transferred);

        match status.state {
            DownloadState::Transferred => return Ok(status),
            DownloadState::Paused => {
                if let Some(code) = status.error {
                    bail!("download failed: {code}");
                }
                if let Some(code) = status.extended_error {
                    bar.set_message(format!("waiting ({code})"));
                }
            }
            DownloadState::Transferring => bar.set_message(String::new()),
            state => bail!("download ended unexpectedly in state {state}"),
        }
        thread::sleep(STATUS_POLL_INTERVAL);
    }
}
