//! Error taxonomy for the synchronous pivot core.
//!
//! Every variant here signals a data-contract bug in the caller or the query
//! engine. None of them are retryable.

/// Structural failure while turning a header tree into a grid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("malformed tree at node '{node_id}': {reason}")]
    MalformedTree { node_id: String, reason: String },
}

impl GridError {
    pub(crate) fn malformed(node_id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedTree {
            node_id: node_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure while fixing up query metadata before submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("sort on row {row_index} targets field {field}, but no measure has that index")]
    SortTargetNotFound { field: usize, row_index: usize },
    #[error("sort references row {row_index}, but only {rows_count} rows are defined")]
    RowOutOfRange { row_index: usize, rows_count: usize },
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// A metadata item that does not fit the closed set of panel shapes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid panel '{field_id}': {reason}")]
    InvalidPanel { field_id: String, reason: String },
}

/// Failure while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_tree_message_names_node() {
        let err = GridError::malformed("n1", "declared span 3 but derived 2");
        assert_eq!(
            err.to_string(),
            "malformed tree at node 'n1': declared span 3 but derived 2"
        );
    }

    #[test]
    fn query_error_converts_into_normalize_error() {
        let err: NormalizeError = QueryError::InvalidPanel {
            field_id: "f".into(),
            reason: "missing dim".into(),
        }
        .into();
        assert!(matches!(err, NormalizeError::Query(_)));
    }
}
