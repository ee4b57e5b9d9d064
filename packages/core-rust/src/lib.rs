//! Pivot core: header trees, tree-to-grid spans, JAQL metadata, sort
//! normalization, and wire messages.
//!
//! Everything in this crate is synchronous and free of I/O; the async data
//! loading lives in `pivot-client`.

pub mod error;
pub mod grid;
pub mod jaql;
pub mod messages;
pub mod normalize;
pub mod tree;
pub mod types;

pub use error::{CodecError, GridError, NormalizeError, QueryError};
pub use grid::{build_grid, CellMap, Grid, GridAxis, GridCoord};
pub use jaql::{FieldRef, Jaql, JaqlKind, JaqlPanel, Panel, SortDetails, SortDirection};
pub use messages::{GrandTotals, HeaderAxis, MessageType, PivotChunk, QueryRequest};
pub use normalize::{
    build_metadata, build_row_sort_descriptor, compute_axis_stats, relocate_last_row_sort,
    to_protocol_sort_direction, AxisItem, AxisStats, QueryDescription, RowSort, SortBy,
};
pub use tree::{count_leaves, NodeKind, TreeNode};
pub use types::CellValue;
