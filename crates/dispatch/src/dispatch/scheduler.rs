//! Fixed-cadence tick scheduler
//!
//! A single dedicated worker thread consumes the cadence, so two cycles can
//! never run concurrently from here; the dispatcher's own guard additionally
//! covers externally triggered ticks. Shutdown lets an in-flight tick finish
//! before the thread exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;

use super::tick::Dispatcher;

/// Drives `Dispatcher::run_tick` on a fixed interval
pub struct DispatchScheduler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchScheduler {
    /// Granularity at which the sleep checks the stop flag
    const STOP_POLL: Duration = Duration::from_millis(250);

    /// Spawn the worker thread and start ticking immediately
    pub fn start(dispatcher: Arc<Dispatcher>, interval: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("dispatch-scheduler".into())
            .spawn(move || {
                info!("dispatch scheduler started, interval {:?}", interval);
                while !flag.load(Ordering::Relaxed) {
                    dispatcher.run_tick(Utc::now());

                    // Sleep in short steps so shutdown is not delayed by a
                    // full interval
                    let mut slept = Duration::ZERO;
                    while slept < interval && !flag.load(Ordering::Relaxed) {
                        let step = Self::STOP_POLL.min(interval - slept);
                        std::thread::sleep(step);
                        slept += step;
                    }
                }
                info!("dispatch scheduler stopped");
            })
            .context("Failed to spawn scheduler thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Request shutdown and wait for the in-flight tick to finish
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatchScheduler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
