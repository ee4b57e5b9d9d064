//! In-process channel used by tests and embedders without a real transport.
//!
//! Listeners live in a `DashMap` keyed by `(message type, correlation id)`.
//! Delivery clones the matching handlers out of the map before invoking them,
//! so a handler may register or cancel listeners without deadlocking.
//!
//! Each listener carries a gate held across the active check and the handler
//! call. `cancel` takes the same gate, so it returns only once an in-flight
//! invocation on another thread has finished. The gate is reentrant and a
//! handler may cancel its own listener.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use pivot_core::messages::encode_request;
use pivot_core::{MessageType, PivotChunk, QueryRequest};
use tracing::trace;

use super::{MessageChannel, MessageHandler, Subscription};

/// Produces the chunks answering a request. Invoked synchronously on send.
pub type Responder = Arc<dyn Fn(&QueryRequest) -> Vec<PivotChunk> + Send + Sync>;

type ListenerKey = (MessageType, String);

struct ListenerGate {
    active: AtomicBool,
    lock: ReentrantMutex<()>,
}

struct Listener {
    id: u64,
    gate: Arc<ListenerGate>,
    handler: MessageHandler,
}

/// A request as it left the channel.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub topic: String,
    pub query_guid: String,
    /// Named `MsgPack` encoding of the request.
    pub bytes: Vec<u8>,
}

/// Channel backed by in-process maps.
pub struct InMemoryChannel {
    ready: AtomicBool,
    listeners: Arc<DashMap<ListenerKey, Vec<Listener>>>,
    next_listener_id: AtomicU64,
    frames: Mutex<Vec<SentFrame>>,
    responder: Mutex<Option<Responder>>,
}

impl InMemoryChannel {
    /// Creates a channel that starts out ready or not.
    #[must_use]
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            listeners: Arc::new(DashMap::new()),
            next_listener_id: AtomicU64::new(1),
            frames: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Installs a responder that answers every subsequent send.
    pub fn set_responder(&self, responder: Responder) {
        *self.responder.lock() = Some(responder);
    }

    /// Delivers `chunk` to listeners registered under its message type and
    /// `correlation_id`. Returns how many handlers ran.
    pub fn deliver(&self, correlation_id: &str, chunk: &PivotChunk) -> usize {
        let key = (chunk.message_type(), correlation_id.to_string());
        let handlers: Vec<(Arc<ListenerGate>, MessageHandler)> = match self.listeners.get(&key) {
            Some(entry) => entry
                .iter()
                .map(|listener| (Arc::clone(&listener.gate), Arc::clone(&listener.handler)))
                .collect(),
            None => Vec::new(),
        };

        let mut delivered = 0;
        for (gate, handler) in handlers {
            let _held = gate.lock.lock();
            if gate.active.load(Ordering::Acquire) {
                handler(chunk.clone());
                delivered += 1;
            }
        }
        trace!(correlation_id, message_type = %key.0, delivered, "chunk delivered");
        delivered
    }

    /// Total number of registered listeners across all keys.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|entry| entry.value().len()).sum()
    }

    /// Every request sent so far, oldest first.
    #[must_use]
    pub fn frames(&self) -> Vec<SentFrame> {
        self.frames.lock().clone()
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MessageChannel for InMemoryChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn send(&self, topic: &str, request: &QueryRequest) -> anyhow::Result<()> {
        if !self.is_ready() {
            return Err(anyhow!("channel not ready"));
        }
        let bytes = encode_request(request).context("encoding query request")?;
        self.frames.lock().push(SentFrame {
            topic: topic.to_string(),
            query_guid: request.query_guid.clone(),
            bytes,
        });

        let responder = self.responder.lock().clone();
        if let Some(responder) = responder {
            for chunk in responder(request) {
                self.deliver(&request.query_guid, &chunk);
            }
        }
        Ok(())
    }

    fn on_message(
        &self,
        message_type: MessageType,
        correlation_id: &str,
        handler: MessageHandler,
    ) -> Box<dyn Subscription> {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let gate = Arc::new(ListenerGate {
            active: AtomicBool::new(true),
            lock: ReentrantMutex::new(()),
        });
        let key = (message_type, correlation_id.to_string());
        self.listeners.entry(key.clone()).or_default().push(Listener {
            id,
            gate: Arc::clone(&gate),
            handler,
        });
        Box::new(InMemorySubscription {
            listeners: Arc::clone(&self.listeners),
            key,
            id,
            gate,
        })
    }
}

struct InMemorySubscription {
    listeners: Arc<DashMap<ListenerKey, Vec<Listener>>>,
    key: ListenerKey,
    id: u64,
    gate: Arc<ListenerGate>,
}

impl Subscription for InMemorySubscription {
    fn cancel(&self) {
        {
            let _held = self.gate.lock.lock();
            self.gate.active.store(false, Ordering::Release);
        }
        if let Some(mut entry) = self.listeners.get_mut(&self.key) {
            entry.retain(|listener| listener.id != self.id);
        }
        self.listeners.remove_if(&self.key, |_, listeners| listeners.is_empty());
    }
}
