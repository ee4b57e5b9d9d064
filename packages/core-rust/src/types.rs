use serde::{Deserialize, Serialize};

/// A single data value at a (row leaf, column leaf) intersection.
///
/// Untagged on the wire so that the query engine's plain JSON/MsgPack scalars
/// map directly onto variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Empty intersection.
    #[default]
    Null,
    Bool(bool),
    /// Integer measure (signed 64-bit).
    Int(i64),
    /// Floating-point measure (64-bit IEEE 754).
    Float(f64),
    /// Pre-formatted or textual value.
    String(String),
}

impl CellValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_scalars_pick_matching_variant() {
        let row: Vec<CellValue> = serde_json::from_str(r#"[null, true, 7, 2.5, "n/a"]"#).unwrap();
        assert_eq!(
            row,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Int(7),
                CellValue::Float(2.5),
                CellValue::String("n/a".into()),
            ]
        );
    }

    #[test]
    fn numeric_view() {
        assert_eq!(CellValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(CellValue::String("3".into()).as_f64(), None);
        assert!(CellValue::default().is_null());
    }
}
