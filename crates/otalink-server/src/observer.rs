//! Observer registry and per-observer delivery.
//!
//! Each observer owns a bounded queue of tick batches. The broadcaster
//! pushes into every queue without waiting; the observer's connection task
//! drains its own queue at whatever pace its client reads. A queue that is
//! full means the client has stalled, and the observer is removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use otalink_protocol::{encode_batch, CodecError, TickBatch};

use crate::statistics::BroadcastStatistics;

/// Identifier of one connected observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that end an observer's delivery task.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// The client connection failed or was closed.
    #[error("Observer write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// Set of connected observers and their queues.
pub(crate) struct ObserverRegistry {
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<Arc<TickBatch>>>>,
    queue_depth: usize,
    stats: BroadcastStatistics,
    // Only changed while holding `observers`
    closed: AtomicBool,
}

impl ObserverRegistry {
    pub(crate) fn new(queue_depth: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
            stats: BroadcastStatistics::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObserverId, mpsc::Sender<Arc<TickBatch>>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn stats(&self) -> &BroadcastStatistics {
        &self.stats
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Add an observer; it receives batches from the next delivery on.
    ///
    /// After `close_all` the observer is not added and its queue is closed
    /// from the start.
    pub(crate) fn register(self: &Arc<Self>) -> ObserverHandle {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = ObserverId::new();
        {
            let mut observers = self.lock();
            if self.is_closed() {
                debug!("Observer {} refused, broadcaster stopped", id);
                drop(tx);
            } else {
                observers.insert(id, tx);
                self.stats.observer_connected();
                debug!("Observer {} connected", id);
            }
        }

        ObserverHandle {
            id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove an observer, closing its queue.
    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            self.stats.observer_disconnected();
            debug!("Observer {} disconnected", id);
        }
        removed
    }

    /// Queue `batch` for every observer, dropping those that cannot take it.
    ///
    /// Returns the number of observers the batch was queued for.
    pub(crate) fn deliver(&self, batch: Arc<TickBatch>) -> usize {
        let mut observers = self.lock();
        observers.retain(|id, tx| match tx.try_send(batch.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Observer {} stalled, dropping it", id);
                self.stats.observer_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Observer {} went away", id);
                self.stats.observer_dropped();
                false
            }
        });
        observers.len()
    }

    /// Remove every observer and refuse new ones. Streams end once drained.
    pub(crate) fn close_all(&self) -> usize {
        let mut observers = self.lock();
        self.closed.store(true, Ordering::Release);
        let count = observers.len();
        for _ in 0..count {
            self.stats.observer_disconnected();
        }
        observers.clear();
        count
    }
}

/// One connected event-stream client.
///
/// Dropping the handle deregisters the observer.
pub struct ObserverHandle {
    id: ObserverId,
    rx: mpsc::Receiver<Arc<TickBatch>>,
    registry: Weak<ObserverRegistry>,
}

impl ObserverHandle {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next tick batch.
    ///
    /// Returns `None` once the observer has been removed (stalled, or the
    /// broadcaster shut down) and its queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<TickBatch>> {
        self.rx.recv().await
    }

    /// Turn the handle into a stream of tick batches.
    pub fn into_stream(self) -> impl Stream<Item = Arc<TickBatch>> + Send + 'static {
        futures::stream::unfold(self, |mut handle| async move {
            let batch = handle.recv().await?;
            Some((batch, handle))
        })
    }

    /// Write every tick to `writer` as SSE frames until the stream ends.
    ///
    /// A write failure ends delivery to this observer only; the handle is
    /// dropped and the observer deregistered. Returns the number of ticks
    /// written.
    pub async fn forward<W>(mut self, writer: &mut W) -> Result<u64, ObserverError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;
        while let Some(batch) = self.recv().await {
            let frame = encode_batch(&batch)?;
            if let Err(e) = write_frame(writer, frame.as_bytes()).await {
                debug!("Observer {} write failed: {}", self.id, e);
                return Err(e.into());
            }
            written += 1;
        }
        Ok(written)
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle").field("id", &self.id).finish()
    }
}
