//! Courier dispatch daemon
//!
//! Wires the SQLite queue, the Gmail credential manager and transport into
//! the ticking scheduler, then waits for SIGINT/SIGTERM. Shutdown lets the
//! in-flight tick finish before the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};

use dispatch::{
    CredentialManager, DispatchScheduler, Dispatcher, DispatcherConfig, FileAttachmentStore,
    GmailCredentials, GmailTransport, GoogleTokenProvider, SqliteQueueStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    config::init().context("Failed to initialize config directory")?;

    let cfg = DispatcherConfig::load()?;
    let credentials = GmailCredentials::load()?;
    let timeout = Duration::from_secs(cfg.http_timeout_secs);

    let token_path = config::config_path(dispatch::config::TOKEN_FILE)
        .context("Could not determine config directory")?;
    let provider = GoogleTokenProvider::new(&credentials, timeout);
    let credential_manager = CredentialManager::load(Box::new(provider), token_path)
        .context("No usable credential; run the grant flow first")?;

    let queue = SqliteQueueStore::open(cfg.queue_path()?)?;
    let attachments = FileAttachmentStore::new(cfg.attachment_root()?)?;
    let transport = GmailTransport::new(timeout);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(queue),
        Arc::new(attachments),
        Arc::new(credential_manager),
        Arc::new(transport),
    ));

    let interval = Duration::from_secs(cfg.tick_interval_secs);
    let scheduler = DispatchScheduler::start(dispatcher, interval)?;
    info!("courierd running, tick interval {}s", cfg.tick_interval_secs);

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, term.clone())?;
    signal_hook::flag::register(SIGTERM, term.clone())?;
    while !term.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, draining in-flight tick");
    scheduler.shutdown();
    Ok(())
}
