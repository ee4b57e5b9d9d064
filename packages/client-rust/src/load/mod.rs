//! Query submission over a message channel.

pub mod readiness;
pub mod service;

pub use readiness::wait_until_ready;
pub use service::{DataLoadService, LoadEvent, LoadState, LoadSubscriber};
