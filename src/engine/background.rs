//! Background expiry sweeper: periodic `sweep_expired` on its own thread.
//!
//! Each tick opens a fresh connection, expires overdue events, then
//! reconciles overdue prior imports. A failing tick is logged and the next
//! tick tries again.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::error::EngineError;
use super::sweeper::{reconcile_prior, sweep_expired};
use super::traits::{Clock, SignalDispatcher};
use crate::config::EngineConfig;
use crate::db::sqlite::open_database;

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(250);

/// Handle for the background sweeper thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on `Drop`.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request shutdown. A sweep already running finishes first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start the sweeper. The first sweep runs immediately, then every
/// `config.sweep_interval_secs`.
pub fn start_background_sweeper(
    db_path: PathBuf,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn SignalDispatcher>,
) -> SweeperHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(
            interval_secs = config.sweep_interval_secs,
            path = %db_path.display(),
            "Background sweeper started"
        );
        sweeper_loop(&db_path, &config, clock.as_ref(), dispatcher.as_ref(), &flag);
    });

    SweeperHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn sweeper_loop(
    db_path: &std::path::Path,
    config: &EngineConfig,
    clock: &dyn Clock,
    dispatcher: &dyn SignalDispatcher,
    shutdown: &AtomicBool,
) {
    let interval = Duration::from_secs(config.sweep_interval_secs.max(1));

    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = run_tick(db_path, config, clock, dispatcher) {
            tracing::warn!(error = %e, "Sweep tick failed, retrying next interval");
        }

        let mut slept = Duration::ZERO;
        while slept < interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(SLEEP_GRANULARITY);
            slept += SLEEP_GRANULARITY;
        }
    }
    tracing::info!("Background sweeper shutting down");
}

fn run_tick(
    db_path: &std::path::Path,
    config: &EngineConfig,
    clock: &dyn Clock,
    dispatcher: &dyn SignalDispatcher,
) -> Result<(), EngineError> {
    let conn = open_database(db_path)?;
    let now = clock.now();
    sweep_expired(&conn, now, config.sweep_batch_size, dispatcher)?;
    reconcile_prior(&conn, now, config.sweep_batch_size)?;
    Ok(())
}
