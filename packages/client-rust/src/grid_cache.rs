//! Memoized tree-to-grid computation.
//!
//! Grids are keyed by tree identity (the `Arc` pointer), axis and corner
//! depth. The cached entry keeps its tree alive, so a pointer cannot be
//! reused by another tree while the entry exists; hits are still confirmed
//! with `Arc::ptr_eq`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pivot_core::{build_grid, Grid, GridAxis, GridError, TreeNode};
use quick_cache::sync::Cache;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridKey {
    tree: usize,
    axis: GridAxis,
    corner_depth: Option<usize>,
}

#[derive(Clone)]
struct CachedGrid {
    tree: Arc<TreeNode>,
    grid: Arc<Grid>,
}

/// Bounded grid memo shared by every builder of a context.
pub struct GridService {
    cache: Cache<GridKey, CachedGrid>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GridService {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Cache::new(capacity.max(1)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the grid for `tree`, building it on first request.
    ///
    /// # Errors
    ///
    /// Propagates [`GridError::MalformedTree`] from [`build_grid`]; failures
    /// are not cached.
    pub fn grid(
        &self,
        tree: &Arc<TreeNode>,
        axis: GridAxis,
        corner_depth: Option<usize>,
    ) -> Result<Arc<Grid>, GridError> {
        let key = GridKey {
            tree: Arc::as_ptr(tree) as usize,
            axis,
            corner_depth,
        };
        if let Some(cached) = self.cache.get(&key) {
            if Arc::ptr_eq(&cached.tree, tree) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.grid);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let grid = Arc::new(build_grid(tree, axis, corner_depth)?);
        trace!(?axis, ?corner_depth, entries = grid.len(), "grid built");
        self.cache.insert(
            key,
            CachedGrid {
                tree: Arc::clone(tree),
                grid: Arc::clone(&grid),
            },
        );
        Ok(grid)
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
