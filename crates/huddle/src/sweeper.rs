//! Background sweep for expired and stale rooms.
//!
//! The sweeper runs on its own task and goes through the same eviction
//! path request handlers use, so it never mutates registry state
//! directly. It ticks on a `tokio::time::interval`; a pass that overruns
//! the interval skips the missed ticks instead of running back-to-back
//! passes.
//!
//! Shutdown is signalled through a `watch` channel. A pass already in
//! progress runs to completion; the signal is only observed between
//! passes.

use std::sync::Arc;
use std::time::Duration;

use huddle_cache::CacheBackend;
use huddle_session::Authenticator;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ConnectionCoordinator;

/// How often the sweeper runs.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Spawns the sweep loop. It stops when `shutdown` flips to `true` or its
/// sender is dropped.
pub fn spawn_sweeper<A, B>(
    coordinator: Arc<ConnectionCoordinator<A, B>>,
    config: SweepConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    A: Authenticator,
    B: CacheBackend,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so the first pass
        // happens one interval after startup.
        interval.tick().await;

        tracing::info!(interval_secs = config.interval.as_secs(), "sweeper started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = coordinator.sweep().await;
                    if report.expired + report.stale > 0 {
                        tracing::info!(
                            expired = report.expired,
                            stale = report.stale,
                            tokens = report.tokens,
                            "sweep closed rooms"
                        );
                    } else {
                        tracing::trace!(tokens = report.tokens, "sweep found nothing");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("sweeper stopped");
    })
}
