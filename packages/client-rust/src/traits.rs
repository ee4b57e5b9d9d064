use async_trait::async_trait;
use pivot_core::QueryDescription;

use crate::builder::{LoadOptions, PivotResult, PivotState, QueryUpdate};
use crate::error::ClientError;

/// Source of paged pivot results.
/// Implementations: [`crate::PivotDataBuilder`], mocks (tests).
#[async_trait]
pub trait PivotDataSource: Send + Sync {
    /// Loads `description` from scratch, resetting pagination.
    async fn load_init_data(
        &self,
        description: QueryDescription,
        options: LoadOptions,
    ) -> Result<PivotResult, ClientError>;

    /// Applies a partial change. Page-only changes reuse the loaded result.
    async fn update_query(&self, update: QueryUpdate) -> Result<PivotResult, ClientError>;

    /// Cancels every listener and rejects later calls. Idempotent.
    fn destroy(&self);

    fn state(&self) -> PivotState;
}
