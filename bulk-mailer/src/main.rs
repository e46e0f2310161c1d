//! Bulkmail CLI - send one application to every address found in a text.
//!
//! Usage: `bulkmail [FILE|-] [safe|fast|instant]`
//!
//! Recipient text is read from FILE, or stdin when FILE is absent or `-`.
//! The mode defaults to `SEND_MODE`. Ctrl-C stops the batch between sends;
//! the report is still printed, with unsent recipients marked cancelled.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncReadExt;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bulkmail::dispatch::ProgressObserver;
use bulkmail::extract::format_address_list;
use bulkmail::{extract, Campaign, Config, SendResult};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let source = args.next().filter(|arg| arg != "-");
    let mode_name = args.next().unwrap_or_default();

    let config = Arc::new(Config::from_env());
    info!(
        sender = %config.masked_sender_email(),
        smtp = %config.smtp_info(),
        dry_run = config.dry_run,
        default_mode = %config.default_mode,
        "config_loaded"
    );

    let text = read_input(source.as_deref()).await?;
    let extraction = extract(&text);

    eprintln!(
        "Found {} valid, {} invalid, {} duplicate address(es)",
        extraction.valid.len(),
        extraction.invalid.len(),
        extraction.duplicate_count
    );
    eprintln!("{}", format_address_list(&extraction.valid, 20));
    if !extraction.invalid.is_empty() {
        eprintln!("Skipping invalid:\n{}", format_address_list(&extraction.invalid, 20));
    }
    if extraction.valid.is_empty() {
        bail!("no valid recipient addresses found");
    }

    let campaign = Campaign::load(Arc::clone(&config))
        .await
        .context("Failed to prepare campaign")?;
    let mode = campaign.mode(&mode_name)?;

    if campaign.attachment().is_none() {
        warn!(path = %config.cv_path.display(), "sending_without_attachment");
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT");
            on_interrupt.cancel();
        }
    });

    let progress: Arc<dyn ProgressObserver> =
        Arc::new(|completed: usize, total: usize, latest: &SendResult| {
            eprintln!("[{}/{}] {}", completed, total, latest);
        });

    let outcome = campaign
        .run(&extraction.valid, mode, Some(progress), cancel)
        .await
        .context("Sending failed")?;

    let summary = outcome.report.summary();
    let output = serde_json::json!({
        "mode": outcome.mode.name(),
        "results": outcome.report.results,
        "summary": summary,
        "elapsed_time": outcome.elapsed.as_secs_f64(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    info!(
        total = summary.total,
        successful = summary.successful,
        failed = summary.failed,
        "bulkmail_finished"
    );

    Ok(())
}

async fn read_input(source: Option<&str>) -> Result<String> {
    match source {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path)),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}
