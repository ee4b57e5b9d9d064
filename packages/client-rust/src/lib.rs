//! Pivot client: message channel, single-slot data loading, grid memoization,
//! and the paged pivot data builder.

pub mod builder;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod grid_cache;
pub mod load;
pub mod logging;
pub mod traits;

pub use builder::{
    LoadOptions, LoadedPivot, Pagination, PivotDataBuilder, PivotResult, PivotState, QueryUpdate,
};
pub use channel::{InMemoryChannel, MessageChannel, MessageHandler, Subscription};
pub use config::{LoadConfig, LoggingConfig, PivotConfig};
pub use context::PivotContext;
pub use error::{ClientError, LoadError};
pub use grid_cache::GridService;
pub use load::{wait_until_ready, DataLoadService, LoadEvent, LoadState, LoadSubscriber};
pub use traits::PivotDataSource;
