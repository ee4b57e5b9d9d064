//! Message channel abstraction the data loader talks to.
//!
//! A channel sends query requests on a topic and delivers inbound chunks to
//! listeners keyed by `(message type, correlation id)`. Handlers may be
//! invoked from any thread, including synchronously from within
//! [`MessageChannel::send`].

pub mod memory;

use std::sync::Arc;

use pivot_core::{MessageType, PivotChunk, QueryRequest};

pub use memory::{InMemoryChannel, Responder, SentFrame};

/// Callback invoked for every chunk matching a listener's key.
pub type MessageHandler = Arc<dyn Fn(PivotChunk) + Send + Sync>;

/// Handle returned by [`MessageChannel::on_message`].
///
/// After `cancel` returns, the handler is not running on any other thread and
/// is never invoked again. A handler may cancel its own subscription.
pub trait Subscription: Send + Sync {
    fn cancel(&self);
}

/// Transport for pivot queries.
pub trait MessageChannel: Send + Sync {
    /// Whether the channel can accept sends right now.
    fn is_ready(&self) -> bool;

    /// Sends a request on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the request.
    fn send(&self, topic: &str, request: &QueryRequest) -> anyhow::Result<()>;

    /// Registers `handler` for chunks of `message_type` tagged with `correlation_id`.
    fn on_message(
        &self,
        message_type: MessageType,
        correlation_id: &str,
        handler: MessageHandler,
    ) -> Box<dyn Subscription>;
}
