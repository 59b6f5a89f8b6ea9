use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;
use crate::observability::{POOL_DELIVERED_TOTAL, POOL_PUBLISHED_TOTAL};

type ReplySender<T> = oneshot::Sender<T>;

struct Receivers<T> {
    items: mpsc::Receiver<T>,
    subscribers: mpsc::Receiver<ReplySender<T>>,
}

/// Blocking broker that hands each published item to exactly one subscriber.
///
/// Items wait in a bounded buffer; `publish` blocks once it is full. Each
/// `subscribe` registers a one-shot reply channel and a single dispatcher
/// task (`run`) pairs waiting subscribers with buffered items. Registration
/// goes through a FIFO channel, so waiting subscribers are served roughly in
/// arrival order, but no strict ordering is promised.
pub struct ResourcePool<T> {
    name: &'static str,
    items_tx: mpsc::Sender<T>,
    subscribers_tx: mpsc::Sender<ReplySender<T>>,
    receivers: tokio::sync::Mutex<Option<Receivers<T>>>,
    closed: CancellationToken,
    /// Items the dispatcher took out of the buffer but could not deliver.
    held: Arc<AtomicUsize>,
}

impl<T: Send + 'static> ResourcePool<T> {
    pub fn new(name: &'static str, capacity: usize) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::InvalidConfiguration(format!(
                "pool {name}: capacity must be positive"
            )));
        }
        let (items_tx, items) = mpsc::channel(capacity);
        let (subscribers_tx, subscribers) = mpsc::channel(1);
        Ok(Self {
            name,
            items_tx,
            subscribers_tx,
            receivers: tokio::sync::Mutex::new(Some(Receivers { items, subscribers })),
            closed: CancellationToken::new(),
            held: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// `new` followed by `run`.
    pub fn start(name: &'static str, capacity: usize, ctx: CancellationToken) -> Result<Self, CoreError> {
        let pool = Self::new(name, capacity)?;
        pool.run(ctx)?;
        Ok(pool)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn the dispatcher. It stops when `ctx` is canceled or the pool is
    /// closed; either way the pool is closed afterwards.
    pub fn run(&self, ctx: CancellationToken) -> Result<JoinHandle<()>, CoreError> {
        let taken = self
            .receivers
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let Some(receivers) = taken else {
            return Err(CoreError::InvariantViolation(format!(
                "pool {}: dispatcher already started",
                self.name
            )));
        };
        Ok(tokio::spawn(dispatch_loop(
            self.name,
            receivers,
            ctx,
            self.closed.clone(),
            self.held.clone(),
        )))
    }

    /// Put an item into the buffer, waiting for room.
    pub async fn publish(&self, ctx: &CancellationToken, item: T) -> Result<(), CoreError> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CoreError::Canceled),
            _ = self.closed.cancelled() => Err(CoreError::Closed),
            sent = self.items_tx.send(item) => {
                sent.map_err(|_| CoreError::Closed)?;
                metrics::counter!(POOL_PUBLISHED_TOTAL, "pool" => self.name).increment(1);
                Ok(())
            }
        }
    }

    /// Put an item into the buffer only if there is room now. The item comes
    /// back in `Err` when the buffer is full or the pool is closed.
    pub fn try_publish(&self, item: T) -> Result<(), T> {
        if self.closed.is_cancelled() {
            return Err(item);
        }
        self.items_tx.try_send(item).map_err(|e| e.into_inner())?;
        metrics::counter!(POOL_PUBLISHED_TOTAL, "pool" => self.name).increment(1);
        Ok(())
    }

    /// Wait for one item.
    pub async fn subscribe(&self, ctx: &CancellationToken) -> Result<T, CoreError> {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(CoreError::Canceled),
            _ = self.closed.cancelled() => return Err(CoreError::Closed),
            sent = self.subscribers_tx.send(reply_tx) => sent.map_err(|_| CoreError::Closed)?,
        }

        // Once matched, the item is ours even if cancellation races it;
        // closing the receiver first hands an unsent item back to the dispatcher.
        tokio::select! {
            item = &mut reply_rx => item.map_err(|_| CoreError::Closed),
            _ = ctx.cancelled() => {
                reply_rx.close();
                reply_rx.try_recv().map_err(|_| CoreError::Canceled)
            }
            _ = self.closed.cancelled() => {
                reply_rx.close();
                reply_rx.try_recv().map_err(|_| CoreError::Closed)
            }
        }
    }

    /// Tear the broker down. Idempotent; blocked callers return `Closed`.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(pool = self.name, "closing pool");
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Items waiting for a subscriber, including one the dispatcher kept
    /// back after its subscriber canceled.
    pub fn buffered(&self) -> usize {
        self.items_tx.max_capacity() - self.items_tx.capacity() + self.held.load(Ordering::Acquire)
    }
}

async fn dispatch_loop<T>(
    name: &'static str,
    receivers: Receivers<T>,
    ctx: CancellationToken,
    closed: CancellationToken,
    held: Arc<AtomicUsize>,
) {
    let Receivers {
        mut items,
        mut subscribers,
    } = receivers;
    // An item whose subscriber went away between match and delivery.
    let mut pending: Option<T> = None;
    debug!(pool = name, "dispatcher started");

    loop {
        let mut subscriber = tokio::select! {
            _ = ctx.cancelled() => break,
            _ = closed.cancelled() => break,
            next = subscribers.recv() => match next {
                Some(s) => s,
                None => break,
            },
        };
        if subscriber.is_closed() {
            continue;
        }

        let item = match pending.take() {
            Some(item) => {
                held.fetch_sub(1, Ordering::AcqRel);
                item
            }
            None => tokio::select! {
                _ = ctx.cancelled() => break,
                _ = closed.cancelled() => break,
                _ = subscriber.closed() => continue,
                next = items.recv() => match next {
                    Some(item) => item,
                    None => break,
                },
            },
        };

        match subscriber.send(item) {
            Ok(()) => {
                metrics::counter!(POOL_DELIVERED_TOTAL, "pool" => name).increment(1);
            }
            Err(item) => {
                held.fetch_add(1, Ordering::AcqRel);
                pending = Some(item);
            }
        }
    }

    closed.cancel();
    debug!(pool = name, "dispatcher stopped");
}
