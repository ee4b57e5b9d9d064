//! Single-slot query submission with listener lifecycle management.
//!
//! A [`DataLoadService`] owns at most one live query. Submitting a new request
//! tears down the previous one synchronously (its listeners are cancelled and
//! any pending readiness wait is aborted) before the new request registers.
//! Once `submit` returns no further chunk of the old request reaches the
//! subscriber.
//!
//! Chunks are forwarded under a delivery lock that also guards the generation
//! bump in `submit`, `cancel` and `destroy`. Listeners are cancelled after
//! that lock is released. The subscriber must not call back into the service.
//!
//! State machine:
//! `Idle -> AwaitingChannel -> Registered -> Streaming -> Done`, with
//! `Superseded`, `TimedOut` and the terminal `Destroyed` reachable from any
//! live state.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pivot_core::{PivotChunk, QueryRequest};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::readiness::wait_until_ready;
use crate::channel::{MessageChannel, MessageHandler, Subscription};
use crate::config::LoadConfig;
use crate::error::LoadError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle of the current query slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing submitted yet.
    Idle,
    /// Waiting for the channel to become ready.
    AwaitingChannel,
    /// Listeners registered and request sent.
    Registered,
    /// At least one chunk received.
    Streaming,
    /// Terminal chunk received.
    Done,
    /// Replaced by a newer submission or cancelled before finishing.
    Superseded,
    /// Readiness wait exceeded `max_wait`.
    TimedOut,
    /// Service destroyed; terminal.
    Destroyed,
}

/// What the subscriber receives.
#[derive(Debug)]
pub enum LoadEvent {
    /// A chunk for the live request.
    Chunk { query_guid: String, chunk: PivotChunk },
    /// The live request could not be sent.
    Failed { query_guid: String, error: LoadError },
}

impl LoadEvent {
    #[must_use]
    pub fn query_guid(&self) -> &str {
        match self {
            Self::Chunk { query_guid, .. } | Self::Failed { query_guid, .. } => query_guid,
        }
    }
}

/// Callback receiving every event for the live request.
pub type LoadSubscriber = Arc<dyn Fn(LoadEvent) + Send + Sync>;

struct PendingWait {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

/// Listeners and wait taken out of the slot, released without any lock held.
struct Detached {
    subscriptions: Vec<Box<dyn Subscription>>,
    pending: Option<PendingWait>,
}

impl Detached {
    /// Cancels every listener and aborts the wait.
    ///
    /// Returns `true` if something was live.
    fn release(self) -> bool {
        let live = !self.subscriptions.is_empty() || self.pending.is_some();
        for subscription in self.subscriptions {
            subscription.cancel();
        }
        if let Some(pending) = self.pending {
            pending.token.cancel();
            pending.handle.abort();
        }
        live
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    query_guid: Option<String>,
    subscriptions: Vec<Box<dyn Subscription>>,
    pending: Option<PendingWait>,
    destroyed: bool,
}

impl Slot {
    /// Starts a new generation and takes out everything the old one owned.
    fn advance(&mut self) -> Detached {
        self.generation += 1;
        self.query_guid = None;
        Detached {
            subscriptions: std::mem::take(&mut self.subscriptions),
            pending: self.pending.take(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.destroyed && self.generation == generation
    }
}

struct Shared {
    channel: Arc<dyn MessageChannel>,
    config: LoadConfig,
    subscriber: LoadSubscriber,
    slot: Mutex<Slot>,
    /// Serializes `submit`, `cancel` and `destroy` including their listener
    /// cancellation.
    control: Mutex<()>,
    /// Held while an event is checked against the generation and forwarded.
    delivery: Mutex<()>,
    state: watch::Sender<LoadState>,
    shutdown: CancellationToken,
}

// ---------------------------------------------------------------------------
// DataLoadService
// ---------------------------------------------------------------------------

/// Submits queries over a [`MessageChannel`] and forwards their chunks.
pub struct DataLoadService {
    shared: Arc<Shared>,
}

impl DataLoadService {
    /// Creates a service in the `Idle` state.
    ///
    /// Cancelling `shutdown` aborts pending readiness waits and makes later
    /// submissions fail with [`LoadError::Destroyed`].
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        config: LoadConfig,
        subscriber: LoadSubscriber,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _rx) = watch::channel(LoadState::Idle);
        Self {
            shared: Arc::new(Shared {
                channel,
                config,
                subscriber,
                slot: Mutex::new(Slot::default()),
                control: Mutex::new(()),
                delivery: Mutex::new(()),
                state,
                shutdown,
            }),
        }
    }

    /// Makes `request` the live query.
    ///
    /// Any previous request is torn down before this returns. If the channel
    /// is ready the request is registered and sent immediately; otherwise a
    /// background task polls for readiness and sends once it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Destroyed`] after [`destroy`](Self::destroy) or
    /// once the shutdown token has fired. Send failures are reported to the
    /// subscriber as [`LoadEvent::Failed`], not returned.
    ///
    /// # Panics
    ///
    /// Panics if the channel is not ready and no Tokio runtime is running.
    pub fn submit(&self, request: QueryRequest) -> Result<(), LoadError> {
        let _control = self.shared.control.lock();
        let (generation, previous) = {
            let _delivery = self.shared.delivery.lock();
            let mut slot = self.shared.slot.lock();
            if slot.destroyed || self.shared.shutdown.is_cancelled() {
                return Err(LoadError::Destroyed);
            }
            let previous = slot.advance();
            slot.query_guid = Some(request.query_guid.clone());
            (slot.generation, previous)
        };

        if previous.release() {
            metrics::counter!("pivot_load_superseded_total").increment(1);
            debug!("previous query superseded");
            self.shared.set_state(LoadState::Superseded);
        }
        metrics::counter!("pivot_load_submissions_total").increment(1);
        info!(query_guid = %request.query_guid, generation, "query submitted");

        let mut slot = self.shared.slot.lock();
        if self.shared.channel.is_ready() {
            self.shared.register(&mut slot, &request);
            drop(slot);
            self.shared.send(generation, &request);
            return Ok(());
        }

        self.shared.set_state(LoadState::AwaitingChannel);
        let token = self.shared.shutdown.child_token();
        let shared = Arc::clone(&self.shared);
        let wait_token = token.clone();
        let handle = tokio::spawn(async move {
            let waited = wait_until_ready(
                &*shared.channel,
                shared.config.poll_interval,
                shared.config.max_wait,
                &wait_token,
            )
            .await;
            match waited {
                Ok(()) => shared.register_and_send(generation, &request),
                Err(LoadError::Cancelled) => {}
                Err(error) => shared.fail_wait(generation, &request.query_guid, error),
            }
        });
        slot.pending = Some(PendingWait { handle, token });
        Ok(())
    }

    /// Drops the live request, if any, without destroying the service.
    ///
    /// Its listeners are cancelled and a pending wait is aborted before this
    /// returns. Later submissions work as usual.
    pub fn cancel(&self) {
        let _control = self.shared.control.lock();
        let previous = {
            let _delivery = self.shared.delivery.lock();
            let mut slot = self.shared.slot.lock();
            if slot.destroyed {
                return;
            }
            slot.advance()
        };
        if previous.release() {
            metrics::counter!("pivot_load_superseded_total").increment(1);
            debug!("live query cancelled");
            self.shared.set_state(LoadState::Superseded);
        }
    }

    /// Cancels every listener and pending wait. Idempotent.
    pub fn destroy(&self) {
        let _control = self.shared.control.lock();
        let previous = {
            let _delivery = self.shared.delivery.lock();
            let mut slot = self.shared.slot.lock();
            if slot.destroyed {
                return;
            }
            slot.destroyed = true;
            slot.advance()
        };
        previous.release();
        self.shared.set_state(LoadState::Destroyed);
        info!("data load service destroyed");
    }

    #[must_use]
    pub fn state(&self) -> LoadState {
        *self.shared.state.borrow()
    }

    /// Returns a receiver observing state transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<LoadState> {
        self.shared.state.subscribe()
    }

    /// Correlation id of the live request, if any.
    #[must_use]
    pub fn current_query_guid(&self) -> Option<String> {
        self.shared.slot.lock().query_guid.clone()
    }

    /// Number of listeners currently registered for the live request.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.slot.lock().subscriptions.len()
    }
}

impl Drop for DataLoadService {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ---------------------------------------------------------------------------
// Shared internals
// ---------------------------------------------------------------------------

impl Shared {
    fn set_state(&self, state: LoadState) {
        self.state.send_replace(state);
    }

    /// Registers one listener per configured message type.
    fn register(self: &Arc<Self>, slot: &mut Slot, request: &QueryRequest) {
        let generation = slot.generation;
        for message_type in &self.config.message_types {
            let handler = chunk_handler(Arc::downgrade(self), generation, &request.query_guid);
            let subscription = self.channel.on_message(*message_type, &request.query_guid, handler);
            slot.subscriptions.push(subscription);
        }
        self.set_state(LoadState::Registered);
    }

    /// Sends without holding any lock; chunks may arrive synchronously.
    fn send(&self, generation: u64, request: &QueryRequest) {
        if let Err(err) = self.channel.send(&self.config.topic, request) {
            warn!(query_guid = %request.query_guid, error = %err, "query send failed");
            metrics::counter!("pivot_load_send_failures_total").increment(1);
            let _delivery = self.delivery.lock();
            if self.slot.lock().is_current(generation) {
                (self.subscriber)(LoadEvent::Failed {
                    query_guid: request.query_guid.clone(),
                    error: LoadError::Send(err),
                });
            }
        }
    }

    fn register_and_send(self: &Arc<Self>, generation: u64, request: &QueryRequest) {
        let mut slot = self.slot.lock();
        if !slot.is_current(generation) {
            return;
        }
        slot.pending = None;
        self.register(&mut slot, request);
        drop(slot);
        debug!(query_guid = %request.query_guid, "channel ready, sending query");
        self.send(generation, request);
    }

    fn fail_wait(&self, generation: u64, query_guid: &str, error: LoadError) {
        let _delivery = self.delivery.lock();
        {
            let mut slot = self.slot.lock();
            if !slot.is_current(generation) {
                return;
            }
            slot.pending = None;
            slot.query_guid = None;
            self.set_state(LoadState::TimedOut);
        }
        warn!(query_guid, error = %error, "gave up waiting for channel");
        (self.subscriber)(LoadEvent::Failed {
            query_guid: query_guid.to_string(),
            error,
        });
    }

    fn on_chunk(&self, generation: u64, query_guid: &str, chunk: PivotChunk) {
        let terminal = chunk.is_terminal();
        let delivery = self.delivery.lock();
        let finished = {
            let mut slot = self.slot.lock();
            // No subscriptions left means a terminal chunk already arrived.
            if !slot.is_current(generation) || slot.subscriptions.is_empty() {
                return;
            }
            if terminal {
                self.set_state(LoadState::Done);
                std::mem::take(&mut slot.subscriptions)
            } else {
                self.set_state(LoadState::Streaming);
                Vec::new()
            }
        };

        metrics::counter!("pivot_load_chunks_total", "type" => chunk.message_type().as_str())
            .increment(1);
        debug!(query_guid, message_type = %chunk.message_type(), "chunk received");
        (self.subscriber)(LoadEvent::Chunk {
            query_guid: query_guid.to_string(),
            chunk,
        });
        drop(delivery);

        for subscription in finished {
            subscription.cancel();
        }
    }
}

fn chunk_handler(shared: Weak<Shared>, generation: u64, query_guid: &str) -> MessageHandler {
    let query_guid = query_guid.to_string();
    Arc::new(move |chunk| {
        if let Some(shared) = shared.upgrade() {
            shared.on_chunk(generation, &query_guid, chunk);
        }
    })
}
