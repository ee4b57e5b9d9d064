//! Response chunks streamed back for one correlation id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tree::TreeNode;
use crate::types::CellValue;

/// Message types a pivot query listens for, one listener each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Headers,
    Data,
    TotalRows,
    Finish,
    Error,
}

impl MessageType {
    /// Every message type a query response may carry.
    pub const ALL: [MessageType; 5] = [
        MessageType::Headers,
        MessageType::Data,
        MessageType::TotalRows,
        MessageType::Finish,
        MessageType::Error,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::Data => "data",
            Self::TotalRows => "totalRows",
            Self::Finish => "finish",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which header region a tree describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderAxis {
    Rows,
    Columns,
    Corner,
}

/// One inbound chunk, internally tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PivotChunk {
    /// Complete header tree for one region.
    Headers {
        axis: HeaderAxis,
        tree: TreeNode,
        /// Fixed header depth, only meaningful for the corner.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        depth: Option<usize>,
    },
    /// A run of data rows starting at leaf row `start_row`.
    Data {
        #[serde(rename = "startRow")]
        start_row: usize,
        rows: Vec<Vec<CellValue>>,
    },
    /// Total number of leaf rows in the full result.
    TotalRows { total: usize },
    /// No more chunks follow for this correlation id.
    Finish,
    /// The engine rejected or aborted the query.
    Error { message: String },
}

impl PivotChunk {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Headers { .. } => MessageType::Headers,
            Self::Data { .. } => MessageType::Data,
            Self::TotalRows { .. } => MessageType::TotalRows,
            Self::Finish => MessageType::Finish,
            Self::Error { .. } => MessageType::Error,
        }
    }

    /// Returns `true` for chunks after which nothing else arrives.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish | Self::Error { .. })
    }
}
