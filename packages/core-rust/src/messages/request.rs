use serde::{Deserialize, Serialize};

use crate::jaql::JaqlPanel;

/// Grand-totals configuration sent with every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrandTotals {
    /// Label of the grand-total row/column.
    pub title: String,
}

impl Default for GrandTotals {
    fn default() -> Self {
        Self {
            title: "Grand Total".to_string(),
        }
    }
}

/// Query request envelope.
///
/// Consumed exactly once by the data loader; the correlation id ties every
/// response chunk back to this submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Correlation id, fresh per submission.
    pub query_guid: String,
    pub metadata: Vec<JaqlPanel>,
    pub grand_totals: GrandTotals,
}

impl QueryRequest {
    pub fn new(
        query_guid: impl Into<String>,
        metadata: Vec<JaqlPanel>,
        grand_totals: GrandTotals,
    ) -> Self {
        Self {
            query_guid: query_guid.into(),
            metadata,
            grand_totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_uses_camel_case_keys() {
        let request = QueryRequest::new("q-1", Vec::new(), GrandTotals::default());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"queryGuid": "q-1", "metadata": [], "grandTotals": {"title": "Grand Total"}})
        );
    }
}
