//! Pivot data builder: turns query descriptions into paged grid results.
//!
//! Each builder owns one [`DataLoadService`] slot. A load normalizes the
//! description into metadata, submits it under a fresh correlation id,
//! collects the streamed chunks and builds the header grids through the
//! shared [`GridService`]. Completed results are cached by their serialized
//! metadata, so a repeated query or a page-only change never hits the engine.

pub mod assembly;
pub mod pagination;

use std::ops::Range;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use pivot_core::{
    build_metadata, AxisItem, CellMap, CellValue, GrandTotals, Grid, NormalizeError,
    QueryDescription, QueryRequest, RowSort,
};
use quick_cache::sync::Cache;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub use assembly::LoadedPivot;
pub use pagination::Pagination;

use self::assembly::ChunkAssembly;
use crate::channel::MessageChannel;
use crate::config::PivotConfig;
use crate::error::ClientError;
use crate::grid_cache::GridService;
use crate::load::{DataLoadService, LoadEvent, LoadSubscriber};
use crate::traits::PivotDataSource;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle of a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotState {
    Init,
    Loading,
    Ready,
    Failed,
    Destroyed,
}

/// Options for the initial load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub is_paginated: bool,
    /// Falls back to [`PivotConfig::default_page_size`].
    pub page_size: Option<usize>,
    /// Serve repeated queries from the result cache.
    pub use_cache: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            is_paginated: false,
            page_size: None,
            use_cache: true,
        }
    }
}

/// Partial change to the loaded query. Unset fields keep their value.
///
/// The page position survives query and sort changes unless
/// `reset_pagination` is set. An update touching only paging fields is
/// answered from the loaded result without a new query.
#[derive(Debug, Clone, Default)]
pub struct QueryUpdate {
    pub rows: Option<Vec<AxisItem>>,
    pub columns: Option<Vec<AxisItem>>,
    pub measures: Option<Vec<AxisItem>>,
    pub filters: Option<Vec<AxisItem>>,
    /// Sets or clears the sort of one row item.
    pub row_sort: Option<(usize, Option<RowSort>)>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub is_paginated: Option<bool>,
    pub use_cache: Option<bool>,
    /// Go back to the first page unless `page` is set.
    pub reset_pagination: bool,
}

impl QueryUpdate {
    /// A page-only update.
    #[must_use]
    pub fn page(page: usize) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }

    /// A sort change on row item `row_index`.
    #[must_use]
    pub fn sort_row(row_index: usize, sort: Option<RowSort>) -> Self {
        Self {
            row_sort: Some((row_index, sort)),
            ..Self::default()
        }
    }

    /// Whether the update changes what the engine has to compute.
    #[must_use]
    pub fn changes_query(&self) -> bool {
        self.rows.is_some()
            || self.columns.is_some()
            || self.measures.is_some()
            || self.filters.is_some()
            || self.row_sort.is_some()
    }

    fn apply_to(&self, description: &mut QueryDescription) -> Result<(), NormalizeError> {
        if let Some((row_index, _)) = &self.row_sort {
            let rows_count = self.rows.as_ref().map_or(description.rows.len(), Vec::len);
            if *row_index >= rows_count {
                return Err(NormalizeError::RowOutOfRange {
                    row_index: *row_index,
                    rows_count,
                });
            }
        }
        if let Some(rows) = &self.rows {
            description.rows.clone_from(rows);
        }
        if let Some(columns) = &self.columns {
            description.columns.clone_from(columns);
        }
        if let Some(measures) = &self.measures {
            description.measures.clone_from(measures);
        }
        if let Some(filters) = &self.filters {
            description.filters.clone_from(filters);
        }
        if let Some((row_index, sort)) = &self.row_sort {
            description.rows[*row_index].sort.clone_from(sort);
        }
        Ok(())
    }
}

/// What a load or update hands back to the caller.
#[derive(Debug, Clone)]
pub struct PivotResult {
    pub query_guid: String,
    pub rows: Arc<Grid>,
    pub columns: Arc<Grid>,
    pub corner: Arc<Grid>,
    /// Data rows of the current page.
    pub data: Vec<Vec<CellValue>>,
    /// Leaf rows covered by `data`.
    pub visible_rows: Range<usize>,
    pub pagination: Pagination,
}

impl PivotResult {
    /// Row header entries overlapping the current page.
    pub fn visible_row_headers(&self) -> impl Iterator<Item = &CellMap> {
        self.rows.entries_in_range(self.visible_rows.clone())
    }
}

#[derive(Debug, Clone, Default)]
struct QueryState {
    description: Option<QueryDescription>,
    is_paginated: bool,
    page: usize,
    page_size: usize,
    use_cache: bool,
}

struct Sink {
    query_guid: String,
    tx: mpsc::UnboundedSender<LoadEvent>,
}

// ---------------------------------------------------------------------------
// PivotDataBuilder
// ---------------------------------------------------------------------------

/// Loads pivot queries and serves paged results.
pub struct PivotDataBuilder {
    config: PivotConfig,
    loader: DataLoadService,
    sink: Arc<Mutex<Option<Sink>>>,
    grids: Arc<GridService>,
    results: Cache<String, Arc<LoadedPivot>>,
    current: ArcSwapOption<LoadedPivot>,
    query: Mutex<QueryState>,
    state: watch::Sender<PivotState>,
    shutdown: CancellationToken,
}

impl PivotDataBuilder {
    /// Creates a builder in the `Init` state.
    ///
    /// `shutdown` is cancelled by [`PivotDataSource::destroy`]; pass a child
    /// of a wider token to tie the builder to it.
    pub fn new(
        config: PivotConfig,
        channel: Arc<dyn MessageChannel>,
        grids: Arc<GridService>,
        shutdown: CancellationToken,
    ) -> Self {
        let sink: Arc<Mutex<Option<Sink>>> = Arc::new(Mutex::new(None));
        let routed = Arc::clone(&sink);
        let subscriber: LoadSubscriber = Arc::new(move |event: LoadEvent| {
            if let Some(sink) = routed.lock().as_ref() {
                if sink.query_guid == event.query_guid() && sink.tx.send(event).is_err() {
                    trace!(query_guid = %sink.query_guid, "collector gone, event dropped");
                }
            }
        });
        let loader =
            DataLoadService::new(channel, config.load.clone(), subscriber, shutdown.clone());
        let (state, _rx) = watch::channel(PivotState::Init);
        Self {
            results: Cache::new(config.result_cache_capacity.max(1)),
            config,
            loader,
            sink,
            grids,
            current: ArcSwapOption::empty(),
            query: Mutex::new(QueryState::default()),
            state,
            shutdown,
        }
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<PivotState> {
        self.state.subscribe()
    }

    /// The most recently completed result.
    #[must_use]
    pub fn current(&self) -> Option<Arc<LoadedPivot>> {
        self.current.load_full()
    }

    /// The description the next update applies to.
    #[must_use]
    pub fn description(&self) -> Option<QueryDescription> {
        self.query.lock().description.clone()
    }

    fn set_state(&self, state: PivotState) {
        self.state.send_replace(state);
    }

    fn ensure_alive(&self) -> Result<(), ClientError> {
        if self.shutdown.is_cancelled() {
            Err(ClientError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Clears the sink if it still belongs to `query_guid`.
    fn release_sink(&self, query_guid: &str) -> bool {
        let mut sink = self.sink.lock();
        if sink.as_ref().is_some_and(|sink| sink.query_guid == query_guid) {
            *sink = None;
            true
        } else {
            false
        }
    }

    /// Runs the query described by `query`, clamping its page to the result.
    ///
    /// `query` is a working copy; the caller stores it only on success.
    async fn run_query(&self, query: &mut QueryState) -> Result<PivotResult, ClientError> {
        let description = query.description.as_ref().ok_or(ClientError::NotLoaded)?;
        let metadata = build_metadata(description)?;
        let cache_key = serde_json::to_string(&metadata).context("serializing query metadata")?;
        let use_cache = query.use_cache;

        if use_cache {
            if let Some(hit) = self.results.get(&cache_key) {
                metrics::counter!("pivot_result_cache_hits_total").increment(1);
                self.loader.cancel();
                self.sink.lock().take();
                debug!(query_guid = %hit.query_guid, "result served from cache");
                self.current.store(Some(Arc::clone(&hit)));
                self.set_state(PivotState::Ready);
                return Ok(present(&hit, query));
            }
        }

        let query_guid = Uuid::new_v4().to_string();
        let request = QueryRequest::new(
            query_guid.clone(),
            metadata,
            GrandTotals {
                title: self.config.grand_totals_title.clone(),
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.sink.lock() = Some(Sink {
            query_guid: query_guid.clone(),
            tx,
        });
        self.set_state(PivotState::Loading);

        if let Err(err) = self.loader.submit(request) {
            self.release_sink(&query_guid);
            return Err(err.into());
        }

        let collected = self.collect(&query_guid, &mut rx).await;
        if self.shutdown.is_cancelled() {
            PivotDataSource::destroy(self);
            return Err(ClientError::Destroyed);
        }
        if !self.release_sink(&query_guid) {
            return Err(ClientError::Superseded);
        }

        match collected {
            Ok(loaded) => {
                let loaded = Arc::new(loaded);
                if use_cache {
                    self.results.insert(cache_key, Arc::clone(&loaded));
                }
                self.current.store(Some(Arc::clone(&loaded)));
                self.set_state(PivotState::Ready);
                info!(%query_guid, total_rows = loaded.total_rows, "pivot loaded");
                Ok(present(&loaded, query))
            }
            Err(err) => {
                warn!(%query_guid, error = %err, "pivot load failed");
                self.set_state(PivotState::Failed);
                Err(err)
            }
        }
    }

    async fn collect(
        &self,
        query_guid: &str,
        rx: &mut mpsc::UnboundedReceiver<LoadEvent>,
    ) -> Result<LoadedPivot, ClientError> {
        let mut assembly = ChunkAssembly::default();
        loop {
            let event = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(ClientError::Destroyed),
                event = rx.recv() => event,
            };
            match event {
                None => return Err(ClientError::Superseded),
                Some(LoadEvent::Failed { error, .. }) => return Err(error.into()),
                Some(LoadEvent::Chunk { chunk, .. }) => {
                    if assembly.apply(chunk)? {
                        break;
                    }
                }
            }
        }
        assembly.finish(query_guid, &self.grids)
    }
}

/// Slices `loaded` to the page in `query`, clamping that page index.
fn present(loaded: &LoadedPivot, query: &mut QueryState) -> PivotResult {
    let pagination = Pagination::new(
        query.is_paginated,
        query.page_size,
        loaded.total_rows,
        query.page,
    );
    query.page = pagination.current_page;
    let visible_rows = pagination.visible_rows();
    let end = visible_rows.end.min(loaded.data.len());
    let start = visible_rows.start.min(end);
    PivotResult {
        query_guid: loaded.query_guid.clone(),
        rows: Arc::clone(&loaded.rows),
        columns: Arc::clone(&loaded.columns),
        corner: Arc::clone(&loaded.corner),
        data: loaded.data[start..end].to_vec(),
        visible_rows,
        pagination,
    }
}

#[async_trait]
impl PivotDataSource for PivotDataBuilder {
    async fn load_init_data(
        &self,
        description: QueryDescription,
        options: LoadOptions,
    ) -> Result<PivotResult, ClientError> {
        self.ensure_alive()?;
        let mut query = QueryState {
            description: Some(description),
            is_paginated: options.is_paginated,
            page: 0,
            page_size: options.page_size.unwrap_or(self.config.default_page_size),
            use_cache: options.use_cache,
        };
        let result = self.run_query(&mut query).await?;
        *self.query.lock() = query;
        Ok(result)
    }

    async fn update_query(&self, update: QueryUpdate) -> Result<PivotResult, ClientError> {
        self.ensure_alive()?;
        let mut query = self.query.lock().clone();
        let description = query.description.as_mut().ok_or(ClientError::NotLoaded)?;
        update.apply_to(description)?;
        if let Some(is_paginated) = update.is_paginated {
            query.is_paginated = is_paginated;
        }
        if let Some(page_size) = update.page_size {
            query.page_size = page_size;
        }
        if let Some(use_cache) = update.use_cache {
            query.use_cache = use_cache;
        }
        match update.page {
            Some(page) => query.page = page,
            None if update.reset_pagination => query.page = 0,
            None => {}
        }

        let loaded = self.current.load_full().filter(|_| !update.changes_query());
        let result = match loaded {
            Some(loaded) => {
                self.set_state(PivotState::Loading);
                let result = present(&loaded, &mut query);
                self.set_state(PivotState::Ready);
                result
            }
            None => self.run_query(&mut query).await?,
        };
        *self.query.lock() = query;
        Ok(result)
    }

    fn destroy(&self) {
        if self.shutdown.is_cancelled() && self.state() == PivotState::Destroyed {
            return;
        }
        self.shutdown.cancel();
        self.loader.destroy();
        *self.sink.lock() = None;
        self.set_state(PivotState::Destroyed);
        info!("pivot builder destroyed");
    }

    fn state(&self) -> PivotState {
        *self.state.borrow()
    }
}
