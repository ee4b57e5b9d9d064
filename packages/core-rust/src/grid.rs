//! Tree-to-grid transformation for pivot headers.
//!
//! Turns one axis tree into an indexed grid of [`CellMap`] entries with merged
//! cell geometry. Each coordinate is expressed as a pair of
//!
//! - a **leaf offset**: the cumulative leaf count of all preceding sibling
//!   subtrees (the row index on the row axis, the column index on the column
//!   axis), and
//! - a **level**: the traversal depth (the column index on the row axis, the
//!   row index on the column axis).
//!
//! A node spans as many leaf offsets as it has leaves. A leaf shallower than
//! the axis depth (typically a grand-total marker) stretches across the
//! remaining levels as one cell of its own. Every `(offset, level)` pair of
//! the grid is occupied by exactly one entry: either the anchor that owns a
//! tree node, or a fill cell belonging to exactly one anchor.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GridError;
use crate::tree::TreeNode;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Orientation of a header grid.
///
/// The corner region uses `Columns` orientation with a fixed depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridAxis {
    /// Row headers: leaf offset is the row, level is the column.
    Rows,
    /// Column headers: leaf offset is the column, level is the row.
    Columns,
}

/// Absolute, zero-based grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub row: usize,
    pub col: usize,
}

impl GridCoord {
    fn on_axis(axis: GridAxis, offset: usize, level: usize) -> Self {
        match axis {
            GridAxis::Rows => Self {
                row: offset,
                col: level,
            },
            GridAxis::Columns => Self {
                row: level,
                col: offset,
            },
        }
    }
}

/// One occupied grid coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMap {
    pub coord: GridCoord,
    /// Child-index path from the root to the anchored node. `None` for fills.
    pub node_path: Option<Vec<usize>>,
    /// Index of the owning anchor entry. `None` for anchors.
    pub anchor: Option<usize>,
    /// Fill entries merged into this anchor along the row direction.
    pub child_rows: Vec<usize>,
    /// Fill entries merged into this anchor along the column direction.
    pub child_cols: Vec<usize>,
    /// Position of the anchored node among its siblings.
    pub index_in_parent: usize,
    /// Number of siblings including the anchored node itself.
    pub sibling_count: usize,
    /// Set for subtotal and grand-total markers.
    pub is_total: bool,
    /// Last row covered by this cell (inclusive).
    pub span_end_row: usize,
    /// Last column covered by this cell (inclusive).
    pub span_end_col: usize,
}

impl CellMap {
    /// Returns `true` if this entry owns a tree node.
    #[must_use]
    pub fn is_anchor(&self) -> bool {
        self.node_path.is_some()
    }

    /// Number of rows this cell covers.
    #[must_use]
    pub fn row_span(&self) -> usize {
        self.span_end_row - self.coord.row + 1
    }

    /// Number of columns this cell covers.
    #[must_use]
    pub fn col_span(&self) -> usize {
        self.span_end_col - self.coord.col + 1
    }

    fn offset(&self, axis: GridAxis) -> usize {
        match axis {
            GridAxis::Rows => self.coord.row,
            GridAxis::Columns => self.coord.col,
        }
    }

    fn level(&self, axis: GridAxis) -> usize {
        match axis {
            GridAxis::Rows => self.coord.col,
            GridAxis::Columns => self.coord.row,
        }
    }

    fn offset_end(&self, axis: GridAxis) -> usize {
        match axis {
            GridAxis::Rows => self.span_end_row,
            GridAxis::Columns => self.span_end_col,
        }
    }

    fn level_end(&self, axis: GridAxis) -> usize {
        match axis {
            GridAxis::Rows => self.span_end_col,
            GridAxis::Columns => self.span_end_row,
        }
    }
}

/// Indexed header grid built from one axis tree.
///
/// Entries are ordered by leaf offset, then level: row-major for the row axis,
/// column-major for the column axis.
#[derive(Debug, Clone)]
pub struct Grid {
    axis: GridAxis,
    axis_depth: usize,
    total_leaves: usize,
    entries: Vec<CellMap>,
    source: Arc<TreeNode>,
}

impl Grid {
    #[must_use]
    pub fn axis(&self) -> GridAxis {
        self.axis
    }

    /// Number of header levels laid out.
    #[must_use]
    pub fn axis_depth(&self) -> usize {
        self.axis_depth
    }

    /// Number of leaf offsets (rows on the row axis, columns on the column axis).
    #[must_use]
    pub fn total_leaves(&self) -> usize {
        self.total_leaves
    }

    #[must_use]
    pub fn entries(&self) -> &[CellMap] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The tree this grid was built from.
    #[must_use]
    pub fn source(&self) -> &Arc<TreeNode> {
        &self.source
    }

    /// Resolves the tree node anchored by `entry`.
    #[must_use]
    pub fn node(&self, entry: &CellMap) -> Option<&TreeNode> {
        entry
            .node_path
            .as_deref()
            .and_then(|path| self.source.descendant(path))
    }

    /// Entries that own a tree node.
    pub fn anchors(&self) -> impl Iterator<Item = &CellMap> {
        self.entries.iter().filter(|entry| entry.is_anchor())
    }

    /// Anchors that reach the deepest level, one per leaf offset.
    pub fn leaf_entries(&self) -> impl Iterator<Item = &CellMap> {
        let last_level = self.axis_depth.saturating_sub(1);
        self.anchors()
            .filter(move |entry| entry.level_end(self.axis) == last_level)
    }

    /// Entries overlapping the given range of leaf offsets.
    pub fn entries_in_range(&self, range: Range<usize>) -> impl Iterator<Item = &CellMap> {
        self.entries.iter().filter(move |entry| {
            entry.offset(self.axis) < range.end && entry.offset_end(self.axis) >= range.start
        })
    }
}

// ---------------------------------------------------------------------------
// build_grid
// ---------------------------------------------------------------------------

/// Builds the header grid for one axis tree.
///
/// `corner_depth` fixes the number of levels (used for the corner region) and
/// truncates any deeper nodes. Without it the depth is the tree's own level
/// count.
///
/// # Errors
///
/// Returns [`GridError::MalformedTree`] when a declared span or depth
/// disagrees with the traversal, a total marker has children, a node id
/// repeats within its own ancestry, or a non-empty tree is bounded to zero
/// levels.
pub fn build_grid(
    root: &Arc<TreeNode>,
    axis: GridAxis,
    corner_depth: Option<usize>,
) -> Result<Grid, GridError> {
    let axis_depth = corner_depth.unwrap_or_else(|| root.levels());
    if root.children.is_empty() {
        return Ok(Grid {
            axis,
            axis_depth,
            total_leaves: 0,
            entries: Vec::new(),
            source: Arc::clone(root),
        });
    }
    if axis_depth == 0 {
        return Err(GridError::malformed(&root.id, "tree bounded to zero levels"));
    }

    let mut builder = GridBuilder {
        axis,
        axis_depth,
        cursor: 0,
        entries: Vec::new(),
        ancestry: HashSet::new(),
        path: Vec::new(),
    };
    builder.ancestry.insert(root.id.clone());
    let sibling_count = root.children.len();
    for (index, child) in root.children.iter().enumerate() {
        builder.path.push(index);
        builder.visit(child, 0, index, sibling_count)?;
        builder.path.pop();
    }

    let total_leaves = builder.cursor;
    let entries = builder.into_sorted_entries();
    debug!(
        ?axis,
        axis_depth,
        total_leaves,
        entries = entries.len(),
        "grid built"
    );
    Ok(Grid {
        axis,
        axis_depth,
        total_leaves,
        entries,
        source: Arc::clone(root),
    })
}

struct GridBuilder {
    axis: GridAxis,
    axis_depth: usize,
    cursor: usize,
    entries: Vec<CellMap>,
    ancestry: HashSet<String>,
    path: Vec<usize>,
}

/// Outcome of laying out one subtree.
struct Visited {
    span: usize,
    truncated: bool,
}

impl GridBuilder {
    fn visit(
        &mut self,
        node: &TreeNode,
        depth: usize,
        index_in_parent: usize,
        sibling_count: usize,
    ) -> Result<Visited, GridError> {
        if let Some(declared) = node.depth.filter(|declared| *declared != depth) {
            return Err(GridError::malformed(
                &node.id,
                format!("declared depth {declared} but found at depth {depth}"),
            ));
        }
        if node.kind.is_total() && !node.is_leaf() {
            return Err(GridError::malformed(&node.id, "total marker has children"));
        }
        if self.ancestry.contains(&node.id) {
            return Err(GridError::malformed(
                &node.id,
                "node id repeats within its own ancestry",
            ));
        }

        let start = self.cursor;
        let anchor = self.entries.len();
        self.entries.push(CellMap {
            coord: GridCoord::on_axis(self.axis, start, depth),
            node_path: Some(self.path.clone()),
            anchor: None,
            child_rows: Vec::new(),
            child_cols: Vec::new(),
            index_in_parent,
            sibling_count,
            is_total: node.kind.is_total(),
            span_end_row: 0,
            span_end_col: 0,
        });

        let bounded = depth + 1 >= self.axis_depth;
        let mut truncated = false;
        let mut level_fills = Vec::new();
        if node.is_leaf() || bounded {
            if !node.is_leaf() {
                debug!(
                    node_id = %node.id,
                    depth,
                    "children beyond the fixed depth are not laid out"
                );
                truncated = true;
            }
            self.cursor += 1;
            for level in depth + 1..self.axis_depth {
                level_fills.push(self.push_fill(anchor, start, level));
            }
        } else {
            self.ancestry.insert(node.id.clone());
            let count = node.children.len();
            for (index, child) in node.children.iter().enumerate() {
                self.path.push(index);
                let visited = self.visit(child, depth + 1, index, count);
                self.path.pop();
                truncated |= visited?.truncated;
            }
            self.ancestry.remove(&node.id);
        }

        let span = self.cursor - start;
        if let Some(declared) = node.span {
            if !truncated && declared != span {
                return Err(GridError::malformed(
                    &node.id,
                    format!("declared span {declared} but children sum to {span}"),
                ));
            }
        }

        let offset_fills: Vec<usize> = (start + 1..start + span)
            .map(|offset| self.push_fill(anchor, offset, depth))
            .collect();
        let offset_end = start + span - 1;
        let level_end = depth + level_fills.len();
        let entry = &mut self.entries[anchor];
        match self.axis {
            GridAxis::Rows => {
                entry.child_rows = offset_fills;
                entry.child_cols = level_fills;
                entry.span_end_row = offset_end;
                entry.span_end_col = level_end;
            }
            GridAxis::Columns => {
                entry.child_cols = offset_fills;
                entry.child_rows = level_fills;
                entry.span_end_col = offset_end;
                entry.span_end_row = level_end;
            }
        }
        Ok(Visited { span, truncated })
    }

    fn push_fill(&mut self, anchor: usize, offset: usize, level: usize) -> usize {
        let coord = GridCoord::on_axis(self.axis, offset, level);
        let owner = &self.entries[anchor];
        let fill = CellMap {
            coord,
            node_path: None,
            anchor: Some(anchor),
            child_rows: Vec::new(),
            child_cols: Vec::new(),
            index_in_parent: owner.index_in_parent,
            sibling_count: owner.sibling_count,
            is_total: owner.is_total,
            span_end_row: coord.row,
            span_end_col: coord.col,
        };
        self.entries.push(fill);
        self.entries.len() - 1
    }

    /// Reorders entries by (leaf offset, level) and rewrites every index.
    fn into_sorted_entries(self) -> Vec<CellMap> {
        let axis = self.axis;
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| (self.entries[i].offset(axis), self.entries[i].level(axis)));

        let mut remap = vec![0; order.len()];
        for (new_index, &old_index) in order.iter().enumerate() {
            remap[old_index] = new_index;
        }

        let mut slots: Vec<Option<CellMap>> = self.entries.into_iter().map(Some).collect();
        order
            .iter()
            .filter_map(|&old_index| slots[old_index].take())
            .map(|mut entry| {
                entry.anchor = entry.anchor.map(|i| remap[i]);
                for child in entry.child_rows.iter_mut().chain(entry.child_cols.iter_mut()) {
                    *child = remap[*child];
                }
                entry
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;
    use crate::tree::{count_leaves, NodeKind};

    fn members(prefix: &str, count: usize) -> Vec<TreeNode> {
        (0..count)
            .map(|i| TreeNode::member(format!("{prefix}{i}"), format!("{prefix}{i}")))
            .collect()
    }

    fn two_by_three() -> Arc<TreeNode> {
        Arc::new(TreeNode::root(vec![
            TreeNode::member("a", "A").with_children(members("a", 3)),
            TreeNode::member("b", "B").with_children(members("b", 3)),
        ]))
    }

    #[test]
    fn empty_tree_yields_empty_grid() {
        let grid = build_grid(&Arc::new(TreeNode::root(Vec::new())), GridAxis::Rows, None).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.total_leaves(), 0);
    }

    #[test]
    fn single_leaf_yields_single_entry() {
        let root = Arc::new(TreeNode::root(members("x", 1)));
        let grid = build_grid(&root, GridAxis::Rows, None).unwrap();
        assert_eq!(grid.len(), 1);
        let entry = &grid.entries()[0];
        assert_eq!(entry.coord, GridCoord { row: 0, col: 0 });
        assert_eq!(entry.row_span(), 1);
        assert_eq!(entry.col_span(), 1);
    }

    #[test]
    fn two_level_rows_span_three_each() {
        let grid = build_grid(&two_by_three(), GridAxis::Rows, None).unwrap();
        let top: Vec<&CellMap> = grid.anchors().filter(|e| e.coord.col == 0).collect();
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].coord.row, top[0].span_end_row + 1), (0, 3));
        assert_eq!((top[1].coord.row, top[1].span_end_row + 1), (3, 6));
        assert_eq!(grid.leaf_entries().count(), 6);
        assert_eq!(grid.len(), 12);
    }

    #[test]
    fn entries_are_row_major_on_row_axis() {
        let grid = build_grid(&two_by_three(), GridAxis::Rows, None).unwrap();
        let coords: Vec<(usize, usize)> =
            grid.entries().iter().map(|e| (e.coord.row, e.coord.col)).collect();
        let mut sorted = coords.clone();
        sorted.sort_unstable();
        assert_eq!(coords, sorted);
    }

    #[test]
    fn flat_column_tree_has_single_spans() {
        let root = Arc::new(TreeNode::root(members("c", 4)));
        let grid = build_grid(&root, GridAxis::Columns, None).unwrap();
        assert_eq!(grid.len(), 4);
        for (col, entry) in grid.entries().iter().enumerate() {
            assert_eq!(entry.coord, GridCoord { row: 0, col });
            assert_eq!(entry.col_span(), 1);
            assert_eq!(entry.index_in_parent, col);
            assert_eq!(entry.sibling_count, 4);
        }
    }

    #[test]
    fn fills_point_back_to_their_anchor() {
        let grid = build_grid(&two_by_three(), GridAxis::Rows, None).unwrap();
        let first = &grid.entries()[0];
        assert_eq!(first.child_rows.len(), 2);
        for &fill in &first.child_rows {
            assert_eq!(grid.entries()[fill].anchor, Some(0));
            assert!(grid.node(&grid.entries()[fill]).is_none());
        }
        assert_eq!(grid.node(first).map(|n| n.id.as_str()), Some("a"));
    }

    #[test]
    fn grand_total_stretches_across_levels() {
        let root = Arc::new(TreeNode::root(vec![
            TreeNode::member("a", "A").with_children(members("a", 2)),
            TreeNode::total("gt", "Grand Total", NodeKind::GrandTotal),
        ]));
        let grid = build_grid(&root, GridAxis::Rows, None).unwrap();
        let total = grid.anchors().find(|e| e.is_total).unwrap();
        assert_eq!(total.coord, GridCoord { row: 2, col: 0 });
        assert_eq!(total.span_end_col, 1);
        assert_eq!(total.child_cols.len(), 1);
        assert_eq!(total.row_span(), 1);
        assert_eq!(grid.leaf_entries().count(), 3);
    }

    #[test]
    fn corner_depth_spans_rows_down_to_fixed_depth() {
        let corner = Arc::new(TreeNode::root(vec![
            TreeNode::member("country", "Country"),
            TreeNode::member("city", "City"),
        ]));
        let grid = build_grid(&corner, GridAxis::Columns, Some(3)).unwrap();
        assert_eq!(grid.axis_depth(), 3);
        let anchors: Vec<&CellMap> = grid.anchors().collect();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[1].coord, GridCoord { row: 0, col: 1 });
        assert_eq!(anchors[1].span_end_row, 2);
        assert_eq!(anchors[1].child_rows.len(), 2);
    }

    #[test]
    fn corner_depth_truncates_deeper_nodes() {
        let grid = build_grid(&two_by_three(), GridAxis::Columns, Some(1)).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.total_leaves(), 2);
    }

    #[test]
    fn zero_corner_depth_is_malformed() {
        let err = build_grid(&two_by_three(), GridAxis::Columns, Some(0)).unwrap_err();
        assert!(matches!(err, GridError::MalformedTree { .. }));
    }

    #[test]
    fn declared_span_mismatch_fails_fast() {
        let mut bad = TreeNode::member("a", "A").with_children(members("a", 2));
        bad.span = Some(3);
        let err = build_grid(&Arc::new(TreeNode::root(vec![bad])), GridAxis::Rows, None)
            .unwrap_err();
        assert_eq!(
            err,
            GridError::malformed("a", "declared span 3 but children sum to 2")
        );
    }

    #[test]
    fn declared_depth_mismatch_fails_fast() {
        let mut root =
            TreeNode::root(vec![TreeNode::member("a", "A").with_children(members("a", 1))]);
        root.children[0].children[0].depth = Some(5);
        let err = build_grid(&Arc::new(root), GridAxis::Rows, None).unwrap_err();
        assert!(matches!(err, GridError::MalformedTree { node_id, .. } if node_id == "a0"));
    }

    #[test]
    fn nested_engine_tree_without_depths_builds() {
        let json = r#"{"id":"root","value":"","children":[
            {"id":"a","value":"A","children":[{"id":"a1","value":"A1"},{"id":"a2","value":"A2"}]},
            {"id":"b","value":"B","depth":0}
        ]}"#;
        let root: TreeNode = serde_json::from_str(json).unwrap();
        let grid = build_grid(&Arc::new(root), GridAxis::Rows, None).unwrap();
        assert_eq!(grid.total_leaves(), 3);
        assert_eq!(grid.axis_depth(), 2);
        let spans: Vec<usize> = grid
            .anchors()
            .filter(|entry| entry.coord.col == 0)
            .map(CellMap::row_span)
            .collect();
        assert_eq!(spans, vec![2, 1]);
    }

    #[test]
    fn repeated_id_in_ancestry_fails_fast() {
        let looped = TreeNode::member("a", "A")
            .with_children(vec![TreeNode::member("a", "again")]);
        let err = build_grid(&Arc::new(TreeNode::root(vec![looped])), GridAxis::Rows, None)
            .unwrap_err();
        assert!(err.to_string().contains("ancestry"));
    }

    #[test]
    fn total_with_children_fails_fast() {
        let total = TreeNode::total("st", "Subtotal", NodeKind::Subtotal)
            .with_children(members("x", 1));
        let err = build_grid(&Arc::new(TreeNode::root(vec![total])), GridAxis::Rows, None)
            .unwrap_err();
        assert!(err.to_string().contains("total marker"));
    }

    #[test]
    fn entries_in_range_includes_overlapping_spans() {
        let grid = build_grid(&two_by_three(), GridAxis::Rows, None).unwrap();
        let page: Vec<&CellMap> = grid.entries_in_range(2..4).collect();
        // Rows 2 and 3 at both levels.
        assert_eq!(page.len(), 4);
        assert!(page.iter().any(|e| e.anchor == Some(0)));
    }

    // -- property tests ----------------------------------------------------

    fn arb_tree() -> impl Strategy<Value = TreeNode> {
        let leaf = Just(Vec::<TreeNode>::new());
        let children = leaf.prop_recursive(4, 48, 4, |inner| {
            prop::collection::vec(inner, 1..4).prop_map(|grand| {
                grand
                    .into_iter()
                    .map(|children| TreeNode::member("", "").with_children(children))
                    .collect::<Vec<_>>()
            })
        });
        children.prop_map(|top| {
            let mut root = TreeNode::root(top);
            assign_ids(&mut root, &mut 0);
            root
        })
    }

    fn assign_ids(node: &mut TreeNode, next: &mut usize) {
        for child in &mut node.children {
            child.id = format!("n{next}");
            *next += 1;
            assign_ids(child, next);
        }
    }

    fn span_of(grid: &Grid, entry: &CellMap) -> usize {
        match grid.axis() {
            GridAxis::Rows => entry.row_span(),
            GridAxis::Columns => entry.col_span(),
        }
    }

    proptest! {
        #[test]
        fn leaf_entries_match_leaf_count(tree in arb_tree()) {
            let root = Arc::new(tree);
            let grid = build_grid(&root, GridAxis::Rows, None).unwrap();
            prop_assert_eq!(grid.leaf_entries().count(), count_leaves(&root));
            prop_assert_eq!(grid.total_leaves(), count_leaves(&root));
        }

        #[test]
        fn spans_sum_over_children(tree in arb_tree()) {
            let root = Arc::new(tree);
            let grid = build_grid(&root, GridAxis::Columns, None).unwrap();
            let by_path: HashMap<Vec<usize>, &CellMap> = grid
                .anchors()
                .map(|e| (e.node_path.clone().unwrap_or_default(), e))
                .collect();
            let top: usize = grid.anchors()
                .filter(|e| e.node_path.as_ref().is_some_and(|p| p.len() == 1))
                .map(|e| span_of(&grid, e))
                .sum();
            prop_assert_eq!(top, grid.total_leaves());
            for (path, entry) in &by_path {
                let node = grid.node(entry).unwrap();
                if node.is_leaf() {
                    prop_assert_eq!(span_of(&grid, entry), 1);
                } else {
                    let sum: usize = (0..node.children.len())
                        .map(|i| {
                            let mut child = path.clone();
                            child.push(i);
                            span_of(&grid, by_path[&child])
                        })
                        .sum();
                    prop_assert_eq!(span_of(&grid, entry), sum);
                }
            }
        }

        #[test]
        fn every_coordinate_covered_once(tree in arb_tree()) {
            let root = Arc::new(tree);
            let grid = build_grid(&root, GridAxis::Rows, None).unwrap();
            let coords: HashSet<GridCoord> = grid.entries().iter().map(|e| e.coord).collect();
            prop_assert_eq!(coords.len(), grid.len());
            prop_assert_eq!(grid.len(), grid.total_leaves() * grid.axis_depth());
            for entry in grid.anchors() {
                prop_assert_eq!(entry.span_end_row - entry.coord.row, entry.child_rows.len());
                prop_assert_eq!(entry.span_end_col - entry.coord.col, entry.child_cols.len());
            }
        }
    }
}
