//! Query and sort normalization applied before a pivot query is sent.
//!
//! Field indexes are absolute across axes: rows come first, then columns,
//! then measures, then scope filters. The query protocol only honors a sort on
//! the deepest row level when the annotation sits on the measure it sorts by,
//! so [`relocate_last_row_sort`] moves it there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NormalizeError;
use crate::jaql::{FieldRef, Jaql, JaqlPanel, Panel, SortDetails, SortDirection};

// ---------------------------------------------------------------------------
// Axis statistics
// ---------------------------------------------------------------------------

/// Item counts per axis, used as base offsets for absolute field indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisStats {
    pub rows_count: usize,
    pub columns_count: usize,
    pub measures_count: usize,
}

impl AxisStats {
    /// Absolute field index of the `k`-th column.
    #[must_use]
    pub fn column_field_index(&self, k: usize) -> usize {
        self.rows_count + k
    }

    /// Absolute field index of the `k`-th measure.
    #[must_use]
    pub fn measure_field_index(&self, k: usize) -> usize {
        self.rows_count + self.columns_count + k
    }

    /// Absolute field index of the `k`-th scope filter.
    #[must_use]
    pub fn scope_field_index(&self, k: usize) -> usize {
        self.rows_count + self.columns_count + self.measures_count + k
    }

    /// Returns `true` if `row_index` is the deepest row level.
    #[must_use]
    pub fn is_last_row(&self, row_index: usize) -> bool {
        row_index + 1 == self.rows_count
    }
}

/// Counts the items on each axis.
#[must_use]
pub fn compute_axis_stats<R, C, M>(rows: &[R], columns: &[C], measures: &[M]) -> AxisStats {
    AxisStats {
        rows_count: rows.len(),
        columns_count: columns.len(),
        measures_count: measures.len(),
    }
}

// ---------------------------------------------------------------------------
// Sort descriptors
// ---------------------------------------------------------------------------

/// Maps the UI sort enum value onto the protocol form.
///
/// Anything other than `sortAsc` / `sortDesc` means no sort.
#[must_use]
pub fn to_protocol_sort_direction(ui_direction: &str) -> SortDirection {
    match ui_direction {
        "sortAsc" => SortDirection::Asc,
        "sortDesc" => SortDirection::Desc,
        _ => SortDirection::None,
    }
}

/// What a row sort orders by when it is not the row's own members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortBy {
    /// Index into the measures whose values drive the order.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub values_index: Option<usize>,
    /// One member value per preceding column position, pinning the pivoted slice.
    #[serde(default)]
    pub columns_members: Vec<String>,
}

/// Sort requested by the UI for one row level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSort {
    /// UI enum value, e.g. `sortAsc`.
    pub direction: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub by: Option<SortBy>,
}

impl RowSort {
    pub fn new(direction: impl Into<String>) -> Self {
        Self {
            direction: direction.into(),
            by: None,
        }
    }

    /// Sorts by the values of the `values_index`-th measure.
    #[must_use]
    pub fn by_measure(mut self, values_index: usize, columns_members: Vec<String>) -> Self {
        self.by = Some(SortBy {
            values_index: Some(values_index),
            columns_members,
        });
        self
    }
}

/// Resolves a UI row sort into the protocol's sort descriptor.
#[must_use]
pub fn build_row_sort_descriptor(
    sort: &RowSort,
    row_index: usize,
    stats: &AxisStats,
) -> SortDetails {
    let by = sort.by.as_ref();
    let field = by
        .and_then(|by| by.values_index)
        .map_or(row_index, |values_index| stats.measure_field_index(values_index));
    let measure_path = by
        .filter(|by| !by.columns_members.is_empty())
        .map(|by| {
            by.columns_members
                .iter()
                .enumerate()
                .map(|(k, member)| (stats.column_field_index(k), member.clone()))
                .collect::<BTreeMap<_, _>>()
        });
    SortDetails {
        field,
        dir: to_protocol_sort_direction(&sort.direction),
        measure_path,
        sorting_last_dimension: stats.is_last_row(row_index),
    }
}

/// Moves a deepest-row sort that targets a measure onto that measure's item.
///
/// Items other than the last row and the target measure are returned
/// unchanged. Running it on already relocated metadata is a no-op.
///
/// # Errors
///
/// Returns [`NormalizeError::SortTargetNotFound`] if no measure item has the
/// field index the sort targets.
pub fn relocate_last_row_sort(
    items: &[JaqlPanel],
    stats: &AxisStats,
) -> Result<Vec<JaqlPanel>, NormalizeError> {
    let mut items = items.to_vec();
    let Some(row_pos) = items.iter().rposition(|item| item.panel == Panel::Rows) else {
        return Ok(items);
    };
    let row_index = items[row_pos].field.index;
    let target = match &items[row_pos].jaql.sort_details {
        Some(details) if details.field != row_index => details.field,
        _ => return Ok(items),
    };
    let Some(measure_pos) = items
        .iter()
        .position(|item| item.panel == Panel::Measures && item.field.index == target)
    else {
        return Err(NormalizeError::SortTargetNotFound {
            field: target,
            row_index,
        });
    };

    let (sort, details) = items[row_pos].take_sort();
    let measure = &mut items[measure_pos].jaql;
    if measure.sort_details.is_some() {
        debug!(field = target, "replacing existing sort on measure");
    }
    measure.sort = sort.or(details.as_ref().map(|d| d.dir));
    measure.sort_details = details;
    debug!(row_index, field = target, rows_count = stats.rows_count, "relocated last row sort");
    Ok(items)
}

// ---------------------------------------------------------------------------
// Metadata assembly
// ---------------------------------------------------------------------------

/// One caller-supplied axis entry before field indexes are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisItem {
    pub id: String,
    pub jaql: Jaql,
    /// Only honored on row items.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sort: Option<RowSort>,
}

impl AxisItem {
    pub fn new(id: impl Into<String>, jaql: Jaql) -> Self {
        Self {
            id: id.into(),
            jaql,
            sort: None,
        }
    }

    #[must_use]
    pub fn sorted(mut self, sort: RowSort) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// Dimensions, measures and filters of a pivot query as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescription {
    pub rows: Vec<AxisItem>,
    pub columns: Vec<AxisItem>,
    pub measures: Vec<AxisItem>,
    #[serde(default)]
    pub filters: Vec<AxisItem>,
}

impl QueryDescription {
    #[must_use]
    pub fn axis_stats(&self) -> AxisStats {
        compute_axis_stats(&self.rows, &self.columns, &self.measures)
    }
}

/// Builds the validated, sort-normalized metadata list for a query.
///
/// # Errors
///
/// Returns [`NormalizeError::Query`] for an item whose shape does not fit its
/// panel and [`NormalizeError::SortTargetNotFound`] for a row sort pointing at
/// a missing measure.
pub fn build_metadata(description: &QueryDescription) -> Result<Vec<JaqlPanel>, NormalizeError> {
    let stats = description.axis_stats();
    let mut items = Vec::with_capacity(
        stats.rows_count + stats.columns_count + stats.measures_count + description.filters.len(),
    );

    for (k, item) in description.rows.iter().enumerate() {
        let mut jaql = item.jaql.clone();
        if let Some(sort) = &item.sort {
            let details = build_row_sort_descriptor(sort, k, &stats);
            if details.dir == SortDirection::None {
                jaql.sort = None;
                jaql.sort_details = None;
            } else {
                jaql.sort = Some(details.dir);
                jaql.sort_details = Some(details);
            }
        }
        items.push(panel_item(Panel::Rows, k, item, jaql)?);
    }
    for (k, item) in description.columns.iter().enumerate() {
        let index = stats.column_field_index(k);
        items.push(panel_item(Panel::Columns, index, item, item.jaql.clone())?);
    }
    for (k, item) in description.measures.iter().enumerate() {
        let index = stats.measure_field_index(k);
        items.push(panel_item(Panel::Measures, index, item, item.jaql.clone())?);
    }
    for (k, item) in description.filters.iter().enumerate() {
        let index = stats.scope_field_index(k);
        items.push(panel_item(Panel::Scope, index, item, item.jaql.clone())?);
    }

    relocate_last_row_sort(&items, &stats)
}

fn panel_item(
    panel: Panel,
    index: usize,
    item: &AxisItem,
    jaql: Jaql,
) -> Result<JaqlPanel, NormalizeError> {
    let field = FieldRef {
        index,
        id: item.id.clone(),
    };
    JaqlPanel::new(panel, field, jaql).map_err(NormalizeError::from)
}
