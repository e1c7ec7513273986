#![forbid(unsafe_code)]

//! Run-to-completion watcher. Reads its configuration from the environment
//! (with `.env` as a fallback), polls the channel until the run window
//! elapses, then exits.

use anyhow::{Context, Result};
use std::fs;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};
use tube_relay::{
    config::load_settings,
    notify::TelegramNotifier,
    poller::{PollWindow, Poller},
    sent_log::SentLog,
    source::{YtDlpSource, ensure_program_available},
};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();

    let settings = load_settings().context("loading configuration")?;
    ensure_program_available(&settings.ytdlp_path).await?;
    fs::create_dir_all(&settings.download_dir)
        .with_context(|| format!("creating {}", settings.download_dir.display()))?;

    if settings.cookie.is_none() {
        warn!("COOKIE is not set; every poll will fail until it is provided");
    }

    let sent_log = SentLog::load(&settings.sent_log_path);
    sent_log
        .save()
        .with_context(|| format!("writing {}", settings.sent_log_path.display()))?;
    let window = PollWindow::starting_now(settings.run_window);
    info!(
        channel = %settings.channel_url,
        already_sent = sent_log.len(),
        until = %window.end().format("%H:%M:%S"),
        "starting channel watch"
    );

    let source = YtDlpSource::from_settings(&settings);
    let notifier = TelegramNotifier::from_settings(&settings)?;
    let mut poller = Poller::new(&settings, source, notifier, sent_log);
    poller.run(&window).await;

    Ok(())
}
