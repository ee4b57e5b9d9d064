//! Header trees produced by the query engine, one per axis (rows, columns, corner).
//!
//! A tree is an immutable snapshot of one query result. The root is a
//! container whose children are the level-0 members; it is never rendered.
//! Re-query, expand/collapse, or a sort change replaces the tree wholesale.

use serde::{Deserialize, Serialize};

/// Marks whether a node is a regular dimension member or a total marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Regular dimension member.
    #[default]
    Member,
    /// Subtotal of the enclosing member.
    Subtotal,
    /// Grand total of the whole axis.
    GrandTotal,
}

impl NodeKind {
    /// Returns `true` for subtotal and grand-total markers.
    #[must_use]
    pub fn is_total(self) -> bool {
        matches!(self, Self::Subtotal | Self::GrandTotal)
    }
}

/// One dimension member (or total marker) in a header tree.
///
/// Children keep insertion order; siblings with identical display values are
/// never reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Stable identifier, unique within its ancestry.
    pub id: String,
    /// Display value of the member.
    #[serde(default)]
    pub value: String,
    /// Level within the axis as reported by the engine. Level-0 members sit
    /// directly under the root. Checked against the traversal when present.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub depth: Option<usize>,
    /// Member or total marker.
    #[serde(default)]
    pub kind: NodeKind,
    /// Span as reported by the query engine, checked against the derived one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub span: Option<usize>,
    /// Ordered child members.
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Creates the container root of an axis.
    #[must_use]
    pub fn root(children: Vec<TreeNode>) -> Self {
        let mut root = Self {
            id: String::from("root"),
            value: String::new(),
            depth: None,
            kind: NodeKind::Member,
            span: None,
            children,
        };
        for child in &mut root.children {
            child.set_depth(0);
        }
        root
    }

    /// Creates a childless member at level 0.
    pub fn member(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            depth: Some(0),
            kind: NodeKind::Member,
            span: None,
            children: Vec::new(),
        }
    }

    /// Creates a total marker of the given kind.
    pub fn total(id: impl Into<String>, value: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            kind,
            ..Self::member(id, value)
        }
    }

    /// Replaces the children, re-levelling them under this node.
    #[must_use]
    pub fn with_children(mut self, children: Vec<TreeNode>) -> Self {
        self.children = children;
        let depth = self.depth.map_or(0, |depth| depth + 1);
        for child in &mut self.children {
            child.set_depth(depth);
        }
        self
    }

    /// Returns `true` if the node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Resolves a child-index path starting at this node.
    #[must_use]
    pub fn descendant(&self, path: &[usize]) -> Option<&TreeNode> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }

    /// Number of member levels below the root container.
    #[must_use]
    pub fn levels(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.levels())
            .max()
            .unwrap_or(0)
    }

    fn set_depth(&mut self, depth: usize) {
        self.depth = Some(depth);
        for child in &mut self.children {
            child.set_depth(depth + 1);
        }
    }
}

/// Counts the leaf members below a root container.
///
/// The root itself never counts, so an empty root yields 0.
#[must_use]
pub fn count_leaves(root: &TreeNode) -> usize {
    root.children.iter().map(subtree_leaves).sum()
}

fn subtree_leaves(node: &TreeNode) -> usize {
    if node.is_leaf() {
        1
    } else {
        node.children.iter().map(subtree_leaves).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level() -> TreeNode {
        TreeNode::root(vec![
            TreeNode::member("a", "A").with_children(vec![
                TreeNode::member("a1", "A1"),
                TreeNode::member("a2", "A2"),
            ]),
            TreeNode::member("b", "B"),
        ])
    }

    #[test]
    fn root_relevels_children() {
        let root = two_level();
        assert_eq!(root.children[0].depth, Some(0));
        assert_eq!(root.children[0].children[1].depth, Some(1));
        assert_eq!(root.children[1].depth, Some(0));
        assert_eq!(root.depth, None);
    }

    #[test]
    fn count_leaves_ignores_root() {
        assert_eq!(count_leaves(&two_level()), 3);
        assert_eq!(count_leaves(&TreeNode::root(Vec::new())), 0);
    }

    #[test]
    fn levels_tracks_deepest_branch() {
        assert_eq!(two_level().levels(), 2);
        assert_eq!(TreeNode::root(Vec::new()).levels(), 0);
    }

    #[test]
    fn descendant_follows_path() {
        let root = two_level();
        assert_eq!(root.descendant(&[0, 1]).map(|n| n.id.as_str()), Some("a2"));
        assert!(root.descendant(&[1, 0]).is_none());
        assert_eq!(root.descendant(&[]).map(|n| n.id.as_str()), Some("root"));
    }

    #[test]
    fn total_marker_kind() {
        let total = TreeNode::total("gt", "Grand Total", NodeKind::GrandTotal);
        assert!(total.kind.is_total());
        assert!(!NodeKind::Member.is_total());
    }

    #[test]
    fn deserializes_engine_tree_with_defaults() {
        let json = r#"{"id":"root","value":"","children":[{"id":"x","value":"X","span":1}]}"#;
        let root: TreeNode = serde_json::from_str(json).unwrap();
        assert_eq!(root.children[0].kind, NodeKind::Member);
        assert_eq!(root.children[0].span, Some(1));
        assert!(root.children[0].children.is_empty());
        assert_eq!(root.children[0].depth, None);
    }

    #[test]
    fn engine_depth_survives_round_trip() {
        let json = r#"{"id":"root","value":"","children":[{"id":"x","value":"X","depth":0}]}"#;
        let root: TreeNode = serde_json::from_str(json).unwrap();
        assert_eq!(root.children[0].depth, Some(0));
        let value = serde_json::to_value(&root).unwrap();
        assert!(value.get("depth").is_none());
        assert_eq!(value["children"][0]["depth"], 0);
    }
}
