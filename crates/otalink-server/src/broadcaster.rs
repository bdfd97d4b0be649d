//! Update-status event broadcaster.
//!
//! A single tick task reads the store once per interval, composes the
//! tick's four events and queues them for every connected observer. Each
//! observer is drained by its own connection task, so a slow client only
//! ever delays itself.
//!
//! - Join: an observer receives ticks composed after it subscribed.
//! - Leave: a closed or full queue removes the observer; nothing is retried.
//! - Idle: with no observers connected, ticks are skipped entirely and the
//!   progress counter does not move.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use otalink_core::{ServiceConfig, StatusSource, StatusStore};
use otalink_protocol::{DiagnosticLine, TickBatch};

use crate::observer::{ObserverHandle, ObserverRegistry};
use crate::statistics::BroadcastStats;

/// Broadcaster timing and buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Time between ticks.
    pub tick_interval: Duration,

    /// Batches buffered per observer before it is treated as stalled.
    pub queue_depth: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            queue_depth: 16,
        }
    }
}

impl From<&ServiceConfig> for BroadcasterConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            queue_depth: config.observer_queue_depth,
        }
    }
}

/// Fans store snapshots out to every connected observer.
///
/// Cloning is cheap; all clones share the same observers.
#[derive(Clone)]
pub struct EventBroadcaster {
    store: Arc<StatusStore>,
    source: Option<Arc<dyn StatusSource>>,
    registry: Arc<ObserverRegistry>,
    config: BroadcasterConfig,
}

impl EventBroadcaster {
    pub fn new(store: Arc<StatusStore>, config: BroadcasterConfig) -> Self {
        Self {
            store,
            source: None,
            registry: Arc::new(ObserverRegistry::new(config.queue_depth)),
            config,
        }
    }

    /// Reload link status from `source` at the start of every tick.
    pub fn with_source(mut self, source: Arc<dyn StatusSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn config(&self) -> BroadcasterConfig {
        self.config
    }

    /// Connect a new observer.
    ///
    /// Once the broadcaster has stopped, the returned handle's stream is
    /// already ended.
    pub fn subscribe(&self) -> ObserverHandle {
        self.registry.register()
    }

    /// Whether the broadcaster has stopped and refuses new observers.
    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }

    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn statistics(&self) -> BroadcastStats {
        self.registry.stats().snapshot()
    }

    /// Run one tick now.
    ///
    /// Returns the composed batch, or `None` if no observer was connected.
    pub async fn tick_once(&self) -> Option<Arc<TickBatch>> {
        if self.registry.len() == 0 {
            return None;
        }

        if let Some(source) = &self.source {
            self.reload(source.clone()).await;
        }

        let observers = self.registry.len();
        let view = self.store.advance_counter();
        let tick = self.registry.stats().record_tick();
        let diagnostic = DiagnosticLine {
            tick,
            at: Utc::now(),
            phase: view.phase,
            observers,
            dropped: self.registry.stats().snapshot().observers_dropped,
        };
        let batch = Arc::new(TickBatch::compose(tick, &view, diagnostic.to_string()));

        let delivered = self.registry.deliver(batch.clone());
        debug!(
            "Tick {} (progress {}, phase {}) queued for {} observers",
            tick,
            view.status.counter.value(),
            view.phase,
            delivered
        );
        Some(batch)
    }

    /// Refresh link status from `source` on the blocking pool.
    async fn reload(&self, source: Arc<dyn StatusSource>) {
        let store = self.store.clone();
        let result =
            tokio::task::spawn_blocking(move || store.load_static_snapshot(source.as_ref())).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Keeping previous link status: {}", e),
            Err(e) => warn!("Link status reload did not finish: {}", e),
        }
    }

    /// Tick until `shutdown` turns true or its sender is dropped.
    ///
    /// On exit every observer is removed, which ends all event streams, and
    /// later subscriptions are refused.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        info!(
            "Broadcaster running, tick interval {:?}",
            self.config.tick_interval
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let closed = self.registry.close_all();
        info!("Broadcaster stopped, closed {} observer streams", closed);
    }
}
