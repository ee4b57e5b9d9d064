//! Accumulates the chunks of one response into a loaded result.

use std::sync::Arc;

use pivot_core::{CellValue, Grid, GridAxis, HeaderAxis, PivotChunk, TreeNode};

use crate::error::ClientError;
use crate::grid_cache::GridService;

/// Fully received response with its header grids.
#[derive(Debug, Clone)]
pub struct LoadedPivot {
    pub query_guid: String,
    pub rows: Arc<Grid>,
    pub columns: Arc<Grid>,
    pub corner: Arc<Grid>,
    /// Data rows indexed by leaf row.
    pub data: Vec<Vec<CellValue>>,
    pub total_rows: usize,
}

/// Row bound for data chunks that arrive before the total row count.
const MAX_UNANNOUNCED_ROWS: usize = 1 << 20;

#[derive(Debug, Default)]
pub(crate) struct ChunkAssembly {
    rows: Option<TreeNode>,
    columns: Option<TreeNode>,
    corner: Option<TreeNode>,
    corner_depth: Option<usize>,
    data: Vec<Vec<CellValue>>,
    total_rows: Option<usize>,
}

impl ChunkAssembly {
    /// Folds one chunk in. Returns `true` once the response is complete.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Engine`] for an error chunk and
    /// [`ClientError::MalformedChunk`] for data rows outside the announced
    /// total.
    pub(crate) fn apply(&mut self, chunk: PivotChunk) -> Result<bool, ClientError> {
        match chunk {
            PivotChunk::Headers { axis, tree, depth } => match axis {
                HeaderAxis::Rows => self.rows = Some(tree),
                HeaderAxis::Columns => self.columns = Some(tree),
                HeaderAxis::Corner => {
                    self.corner = Some(tree);
                    self.corner_depth = depth;
                }
            },
            PivotChunk::Data { start_row, rows } => {
                let limit = self.total_rows.unwrap_or(MAX_UNANNOUNCED_ROWS);
                let end = start_row
                    .checked_add(rows.len())
                    .filter(|end| *end <= limit)
                    .ok_or_else(|| ClientError::MalformedChunk {
                        reason: format!(
                            "{} rows at startRow {start_row} exceed the {limit} row limit",
                            rows.len()
                        ),
                    })?;
                if self.data.len() < end {
                    self.data.resize_with(end, Vec::new);
                }
                for (slot, row) in self.data[start_row..end].iter_mut().zip(rows) {
                    *slot = row;
                }
            }
            PivotChunk::TotalRows { total } => {
                if total < self.data.len() {
                    return Err(ClientError::MalformedChunk {
                        reason: format!("total {total} below {} received rows", self.data.len()),
                    });
                }
                self.total_rows = Some(total);
            }
            PivotChunk::Finish => return Ok(true),
            PivotChunk::Error { message } => return Err(ClientError::Engine { message }),
        }
        Ok(false)
    }

    /// Builds the header grids through the shared memo.
    ///
    /// Missing header trees become empty grids. The corner depth defaults to
    /// the column grid depth, at least one level.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Grid`] if a header tree is malformed.
    pub(crate) fn finish(
        self,
        query_guid: &str,
        grids: &GridService,
    ) -> Result<LoadedPivot, ClientError> {
        let empty = || Arc::new(TreeNode::root(Vec::new()));
        let rows_tree = self.rows.map_or_else(empty, Arc::new);
        let columns_tree = self.columns.map_or_else(empty, Arc::new);
        let corner_tree = self.corner.map_or_else(empty, Arc::new);

        let rows = grids.grid(&rows_tree, GridAxis::Rows, None)?;
        let columns = grids.grid(&columns_tree, GridAxis::Columns, None)?;
        let corner_depth = self
            .corner_depth
            .unwrap_or_else(|| columns.axis_depth().max(1));
        let corner = grids.grid(&corner_tree, GridAxis::Columns, Some(corner_depth))?;

        let total_rows = self.total_rows.unwrap_or_else(|| rows.total_leaves());
        Ok(LoadedPivot {
            query_guid: query_guid.to_string(),
            rows,
            columns,
            corner,
            data: self.data,
            total_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_chunks_land_at_their_start_row() {
        let mut assembly = ChunkAssembly::default();
        assembly
            .apply(PivotChunk::Data {
                start_row: 2,
                rows: vec![vec![CellValue::Int(3)]],
            })
            .unwrap();
        assembly
            .apply(PivotChunk::Data {
                start_row: 0,
                rows: vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]],
            })
            .unwrap();
        assert_eq!(
            assembly.data,
            vec![
                vec![CellValue::Int(1)],
                vec![CellValue::Int(2)],
                vec![CellValue::Int(3)]
            ]
        );
    }

    #[test]
    fn data_beyond_total_rows_is_rejected() {
        let mut assembly = ChunkAssembly::default();
        assembly.apply(PivotChunk::TotalRows { total: 2 }).unwrap();
        let err = assembly
            .apply(PivotChunk::Data {
                start_row: 1,
                rows: vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]],
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::MalformedChunk { .. }));
        assert!(assembly.data.is_empty());
    }

    #[test]
    fn overflowing_start_row_is_rejected() {
        let mut assembly = ChunkAssembly::default();
        let err = assembly
            .apply(PivotChunk::Data {
                start_row: usize::MAX,
                rows: vec![vec![CellValue::Int(1)]],
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::MalformedChunk { .. }));

        let err = assembly
            .apply(PivotChunk::Data {
                start_row: MAX_UNANNOUNCED_ROWS,
                rows: vec![vec![CellValue::Int(1)]],
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::MalformedChunk { .. }));
        assert!(assembly.data.is_empty());
    }

    #[test]
    fn total_below_received_rows_is_rejected() {
        let mut assembly = ChunkAssembly::default();
        assembly
            .apply(PivotChunk::Data {
                start_row: 0,
                rows: vec![Vec::new(), Vec::new(), Vec::new()],
            })
            .unwrap();
        let err = assembly.apply(PivotChunk::TotalRows { total: 2 }).unwrap_err();
        assert!(matches!(err, ClientError::MalformedChunk { .. }));
    }

    #[test]
    fn finish_and_error_chunks() {
        let mut assembly = ChunkAssembly::default();
        assert!(!assembly.apply(PivotChunk::TotalRows { total: 1 }).unwrap());
        assert!(assembly.apply(PivotChunk::Finish).unwrap());
        let err = assembly
            .apply(PivotChunk::Error {
                message: "bad jaql".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Engine { message } if message == "bad jaql"));
    }

    #[test]
    fn missing_headers_become_empty_grids() {
        let loaded = ChunkAssembly::default()
            .finish("q-1", &GridService::new(4))
            .unwrap();
        assert!(loaded.rows.is_empty());
        assert!(loaded.columns.is_empty());
        assert!(loaded.corner.is_empty());
        assert_eq!(loaded.total_rows, 0);
    }

    #[test]
    fn corner_depth_follows_columns() {
        let mut assembly = ChunkAssembly::default();
        assembly
            .apply(PivotChunk::Headers {
                axis: HeaderAxis::Columns,
                tree: TreeNode::root(vec![TreeNode::member("y", "2013")
                    .with_children(vec![TreeNode::member("m", "Revenue")])]),
                depth: None,
            })
            .unwrap();
        assembly
            .apply(PivotChunk::Headers {
                axis: HeaderAxis::Corner,
                tree: TreeNode::root(vec![TreeNode::member("c", "Country")]),
                depth: None,
            })
            .unwrap();
        let loaded = assembly.finish("q-1", &GridService::new(4)).unwrap();
        assert_eq!(loaded.columns.axis_depth(), 2);
        assert_eq!(loaded.corner.axis_depth(), 2);
    }
}
