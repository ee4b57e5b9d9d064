//! JAQL metadata items: the per-axis entries of a pivot query request.
//!
//! Panel payloads form a closed set of shapes (dimension reference, measure
//! aggregate, calculated formula) that may additionally be wrapped by a
//! filter. The shape is decided once when the item is deserialized or
//! constructed, and [`JaqlPanel::validate`] checks it against its panel, so
//! downstream code matches on [`JaqlKind`] instead of probing optional
//! fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Axis a metadata item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Rows,
    Columns,
    Measures,
    /// Filters that scope the whole query without occupying an axis.
    Scope,
}

/// Sort direction in the query protocol's string form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
    #[default]
    None,
}

// ---------------------------------------------------------------------------
// Sort descriptor
// ---------------------------------------------------------------------------

/// Resolved sort annotation attached to a metadata item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortDetails {
    /// Absolute field index the sort targets.
    pub field: usize,
    pub dir: SortDirection,
    /// Absolute column field index -> member value pinning the sorted slice.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub measure_path: Option<BTreeMap<usize, String>>,
    /// Set when the sort belongs to the deepest row grouping level.
    #[serde(default)]
    pub sorting_last_dimension: bool,
}

// ---------------------------------------------------------------------------
// Jaql payload
// ---------------------------------------------------------------------------

/// Field reference carried by every metadata item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Absolute index across rows, columns and measures.
    pub index: usize,
    pub id: String,
}

/// Shape of a JAQL payload.
///
/// Untagged on the wire; variants are tried in declaration order, so the
/// presence of `formula` or `agg` decides the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JaqlKind {
    /// Calculated measure over named sub-expressions.
    Formula {
        formula: String,
        #[serde(default)]
        context: BTreeMap<String, Jaql>,
    },
    /// Aggregated measure over a dimension.
    Aggregate {
        dim: String,
        datatype: String,
        agg: String,
    },
    /// Plain dimension reference.
    Dimension {
        dim: String,
        datatype: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        level: Option<String>,
    },
}

/// JAQL payload of one metadata item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Jaql {
    pub title: String,
    #[serde(flatten)]
    pub kind: JaqlKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sort: Option<SortDirection>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sort_details: Option<SortDetails>,
    /// Opaque filter expression from the query builder.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filter: Option<serde_json::Value>,
}

impl Jaql {
    pub fn dimension(
        title: impl Into<String>,
        dim: impl Into<String>,
        datatype: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            title,
            JaqlKind::Dimension {
                dim: dim.into(),
                datatype: datatype.into(),
                level: None,
            },
        )
    }

    pub fn aggregate(
        title: impl Into<String>,
        dim: impl Into<String>,
        datatype: impl Into<String>,
        agg: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            title,
            JaqlKind::Aggregate {
                dim: dim.into(),
                datatype: datatype.into(),
                agg: agg.into(),
            },
        )
    }

    pub fn formula(
        title: impl Into<String>,
        formula: impl Into<String>,
        context: BTreeMap<String, Jaql>,
    ) -> Self {
        Self::with_kind(
            title,
            JaqlKind::Formula {
                formula: formula.into(),
                context,
            },
        )
    }

    /// Wraps the payload in a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: serde_json::Value) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn is_filter_wrapped(&self) -> bool {
        self.filter.is_some()
    }

    fn with_kind(title: impl Into<String>, kind: JaqlKind) -> Self {
        Self {
            title: title.into(),
            kind,
            sort: None,
            sort_details: None,
            filter: None,
        }
    }

    fn check_shape(&self, field_id: &str) -> Result<(), QueryError> {
        let invalid = |reason: &str| QueryError::InvalidPanel {
            field_id: field_id.to_string(),
            reason: reason.to_string(),
        };
        match &self.kind {
            JaqlKind::Dimension { dim, .. } | JaqlKind::Aggregate { dim, .. } if dim.is_empty() => {
                Err(invalid("empty dimension expression"))
            }
            JaqlKind::Formula { formula, .. } if formula.trim().is_empty() => {
                Err(invalid("empty formula"))
            }
            JaqlKind::Formula { context, .. } if context.is_empty() => {
                Err(invalid("formula without context"))
            }
            JaqlKind::Formula { context, .. } => context
                .values()
                .try_for_each(|inner| inner.check_shape(field_id)),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// JaqlPanel
// ---------------------------------------------------------------------------

/// One axis entry of a query request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaqlPanel {
    pub panel: Panel,
    pub field: FieldRef,
    pub jaql: Jaql,
}

impl JaqlPanel {
    /// Creates a validated metadata item.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidPanel`] if the payload shape does not fit
    /// the panel (see [`JaqlPanel::validate`]).
    pub fn new(panel: Panel, field: FieldRef, jaql: Jaql) -> Result<Self, QueryError> {
        let item = Self { panel, field, jaql };
        item.validate()?;
        Ok(item)
    }

    /// Checks the payload shape against the panel.
    ///
    /// Rows and columns hold dimension references, measures hold aggregates or
    /// formulas, scope items must carry a filter. Formulas need text and a
    /// non-empty context.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidPanel`] naming the offending field.
    pub fn validate(&self) -> Result<(), QueryError> {
        let invalid = |reason: &str| QueryError::InvalidPanel {
            field_id: self.field.id.clone(),
            reason: reason.to_string(),
        };
        match (self.panel, &self.jaql.kind) {
            (Panel::Rows | Panel::Columns, JaqlKind::Dimension { .. })
            | (Panel::Measures, JaqlKind::Aggregate { .. } | JaqlKind::Formula { .. }) => {}
            (Panel::Scope, _) if self.jaql.is_filter_wrapped() => {}
            (Panel::Scope, _) => return Err(invalid("scope item without filter")),
            (Panel::Rows | Panel::Columns, _) => {
                return Err(invalid("axis item must reference a dimension"));
            }
            (Panel::Measures, JaqlKind::Dimension { .. }) => {
                return Err(invalid("measure must aggregate or compute a formula"));
            }
        }
        self.jaql.check_shape(&self.field.id)
    }

    /// Returns `true` if the item carries a sort annotation.
    #[must_use]
    pub fn has_sort(&self) -> bool {
        self.jaql.sort.is_some() || self.jaql.sort_details.is_some()
    }

    /// Removes and returns the sort annotation.
    pub fn take_sort(&mut self) -> (Option<SortDirection>, Option<SortDetails>) {
        (self.jaql.sort.take(), self.jaql.sort_details.take())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn field(index: usize, id: &str) -> FieldRef {
        FieldRef {
            index,
            id: id.to_string(),
        }
    }

    #[test]
    fn wire_shape_is_flat_jaql_object() {
        let item = JaqlPanel::new(
            Panel::Rows,
            field(0, "country"),
            Jaql::dimension("Country", "[Geo.Country]", "text"),
        )
        .unwrap();
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({
                "panel": "rows",
                "field": {"index": 0, "id": "country"},
                "jaql": {"title": "Country", "dim": "[Geo.Country]", "datatype": "text"}
            })
        );
    }

    #[test]
    fn deserialize_decides_shape_once() {
        let aggregate: Jaql = serde_json::from_value(json!({
            "title": "Revenue", "dim": "[Sales.Amount]", "datatype": "numeric", "agg": "sum"
        }))
        .unwrap();
        assert!(matches!(aggregate.kind, JaqlKind::Aggregate { ref agg, .. } if agg == "sum"));

        let formula: Jaql = serde_json::from_value(json!({
            "title": "Margin",
            "formula": "[a] - [b]",
            "context": {
                "[a]": {"title": "a", "dim": "[Sales.Amount]", "datatype": "numeric", "agg": "sum"},
                "[b]": {
                    "title": "b", "dim": "[Sales.Cost]", "datatype": "numeric", "agg": "sum"
                }
            }
        }))
        .unwrap();
        assert!(matches!(
            formula.kind,
            JaqlKind::Formula { ref context, .. } if context.len() == 2
        ));

        let dimension: Jaql = serde_json::from_value(json!({
            "title": "Year", "dim": "[Time.Date]", "datatype": "datetime", "level": "years",
            "sort": "desc"
        }))
        .unwrap();
        assert_eq!(dimension.sort, Some(SortDirection::Desc));
        assert!(matches!(dimension.kind, JaqlKind::Dimension { level: Some(_), .. }));
    }

    #[test]
    fn sort_details_serialize_measure_path_keys() {
        let details = SortDetails {
            field: 4,
            dir: SortDirection::Asc,
            measure_path: Some(BTreeMap::from([(2, "2013".to_string())])),
            sorting_last_dimension: true,
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(
            value,
            json!({
                "field": 4,
                "dir": "asc",
                "measurePath": {"2": "2013"},
                "sortingLastDimension": true
            })
        );
        let back: SortDetails = serde_json::from_value(value).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn rows_reject_aggregates() {
        let err = JaqlPanel::new(
            Panel::Rows,
            field(0, "rev"),
            Jaql::aggregate("Revenue", "[Sales.Amount]", "numeric", "sum"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn measures_reject_plain_dimensions() {
        let err = JaqlPanel::new(
            Panel::Measures,
            field(2, "country"),
            Jaql::dimension("Country", "[Geo.Country]", "text"),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidPanel { field_id, .. } if field_id == "country"));
    }

    #[test]
    fn scope_requires_filter() {
        let bare = Jaql::dimension("Region", "[Geo.Region]", "text");
        assert!(JaqlPanel::new(Panel::Scope, field(3, "region"), bare.clone()).is_err());
        let filtered = bare.with_filter(json!({"members": ["West"]}));
        assert!(JaqlPanel::new(Panel::Scope, field(3, "region"), filtered).is_ok());
    }

    #[test]
    fn formula_needs_context() {
        let err = JaqlPanel::new(
            Panel::Measures,
            field(2, "m"),
            Jaql::formula("Margin", "[a] - [b]", BTreeMap::new()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("context"));
    }

    #[test]
    fn take_sort_strips_annotation() {
        let mut item = JaqlPanel::new(
            Panel::Rows,
            field(0, "country"),
            Jaql::dimension("Country", "[Geo.Country]", "text"),
        )
        .unwrap();
        item.jaql.sort = Some(SortDirection::Asc);
        assert!(item.has_sort());
        let (sort, details) = item.take_sort();
        assert_eq!(sort, Some(SortDirection::Asc));
        assert!(details.is_none());
        assert!(!item.has_sort());
    }
}
