//! Shared client context: configuration, channel, grid memo and shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::builder::PivotDataBuilder;
use crate::channel::MessageChannel;
use crate::config::PivotConfig;
use crate::grid_cache::GridService;

/// Owns what every builder of one application shares.
///
/// Builders hold a child of the context's shutdown token, so
/// [`shutdown`](Self::shutdown) aborts their pending loads and rejects
/// further calls.
pub struct PivotContext {
    config: PivotConfig,
    channel: Arc<dyn MessageChannel>,
    grids: Arc<GridService>,
    shutdown: CancellationToken,
}

impl PivotContext {
    pub fn new(config: PivotConfig, channel: Arc<dyn MessageChannel>) -> Self {
        let grids = Arc::new(GridService::new(config.grid_cache_capacity));
        Self {
            config,
            channel,
            grids,
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a builder bound to this context.
    #[must_use]
    pub fn builder(&self) -> PivotDataBuilder {
        PivotDataBuilder::new(
            self.config.clone(),
            Arc::clone(&self.channel),
            Arc::clone(&self.grids),
            self.shutdown.child_token(),
        )
    }

    #[must_use]
    pub fn config(&self) -> &PivotConfig {
        &self.config
    }

    #[must_use]
    pub fn grids(&self) -> &Arc<GridService> {
        &self.grids
    }

    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("pivot context shutting down");
            self.shutdown.cancel();
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use pivot_core::{AxisItem, Jaql, PivotChunk, QueryDescription, QueryRequest, TreeNode};

    use super::*;
    use crate::builder::{LoadOptions, PivotState};
    use crate::channel::InMemoryChannel;
    use crate::error::ClientError;
    use crate::traits::PivotDataSource;

    fn description(dim: &str) -> QueryDescription {
        QueryDescription {
            rows: vec![AxisItem::new("row", Jaql::dimension("Row", dim, "text"))],
            ..QueryDescription::default()
        }
    }

    fn context() -> (PivotContext, Arc<InMemoryChannel>) {
        let channel = Arc::new(InMemoryChannel::default());
        channel.set_responder(Arc::new(|_request: &QueryRequest| {
            vec![
                PivotChunk::Headers {
                    axis: pivot_core::HeaderAxis::Rows,
                    tree: TreeNode::root(vec![
                        TreeNode::member("a", "A"),
                        TreeNode::member("b", "B"),
                    ]),
                    depth: None,
                },
                PivotChunk::Finish,
            ]
        }));
        let context = PivotContext::new(
            PivotConfig::default(),
            Arc::clone(&channel) as Arc<dyn MessageChannel>,
        );
        (context, channel)
    }

    #[tokio::test]
    async fn builders_share_the_grid_memo() {
        let (context, _channel) = context();
        let first = context.builder();
        let second = context.builder();

        first
            .load_init_data(description("[T.A]"), LoadOptions::default())
            .await
            .unwrap();
        second
            .load_init_data(description("[T.B]"), LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(context.grids().misses(), 6);
        assert_eq!(context.grids().len(), 6);
    }

    #[tokio::test]
    async fn shutdown_rejects_every_builder() {
        let (context, _channel) = context();
        let builder = context.builder();
        builder
            .load_init_data(description("[T.A]"), LoadOptions::default())
            .await
            .unwrap();

        context.shutdown();
        assert!(context.is_shut_down());
        let err = builder
            .load_init_data(description("[T.B]"), LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Destroyed));
        assert!(matches!(context.builder().state(), PivotState::Init));
    }
}
