use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::db::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Matched,
    Mismatched,
    MissingSource,
    MissingTarget,
}

impl RowStatus {
    pub const ALL: [RowStatus; 4] = [
        RowStatus::Matched,
        RowStatus::Mismatched,
        RowStatus::MissingSource,
        RowStatus::MissingTarget,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Matched => "matched",
            RowStatus::Mismatched => "mismatched",
            RowStatus::MissingSource => "missing_source",
            RowStatus::MissingTarget => "missing_target",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == input.trim())
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cell as it appears in diff output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiffValue {
    Null,
    Text(String),
    Unreadable { unreadable: String },
}

impl DiffValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DiffValue::Null)
    }

    /// Display form used by CSV, tables and search.
    pub fn display(&self) -> String {
        match self {
            DiffValue::Null => "NULL".to_string(),
            DiffValue::Text(text) => text.clone(),
            DiffValue::Unreadable { unreadable } => format!("<unreadable: {}>", unreadable),
        }
    }
}

impl From<&Value> for DiffValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => DiffValue::Null,
            Value::Unreadable(reason) => DiffValue::Unreadable {
                unreadable: reason.clone(),
            },
            other => other
                .render()
                .map(DiffValue::Text)
                .unwrap_or(DiffValue::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueDifference {
    pub source_value: DiffValue,
    pub target_value: DiffValue,
}

/// One disagreeing column, named by its source column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDifference {
    pub column: String,
    pub source_value: DiffValue,
    pub target_value: DiffValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub id: u64,
    pub status: RowStatus,
    #[serde(with = "ordered_differences")]
    pub differences: Vec<ColumnDifference>,
    pub row_key: Vec<DiffValue>,
}

impl ComparisonResult {
    pub fn difference(&self, column: &str) -> Option<&ColumnDifference> {
        self.differences.iter().find(|d| d.column == column)
    }

    pub fn row_key_display(&self) -> String {
        self.row_key
            .iter()
            .map(DiffValue::display)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Differences are ordered internally and serialize as a JSON object whose
/// key order follows the column mapping.
mod ordered_differences {
    use super::*;

    pub fn serialize<S>(differences: &[ColumnDifference], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(differences.len()))?;
        for diff in differences {
            map.serialize_entry(
                &diff.column,
                &ValueDifferenceRef {
                    source_value: &diff.source_value,
                    target_value: &diff.target_value,
                },
            )?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<ColumnDifference>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(DifferencesVisitor)
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ValueDifferenceRef<'a> {
        source_value: &'a DiffValue,
        target_value: &'a DiffValue,
    }

    struct DifferencesVisitor;

    impl<'de> Visitor<'de> for DifferencesVisitor {
        type Value = Vec<ColumnDifference>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of column differences")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((column, value)) = access.next_entry::<String, ValueDifference>()? {
                out.push(ColumnDifference {
                    column,
                    source_value: value.source_value,
                    target_value: value.target_value,
                });
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ComparisonResult {
        ComparisonResult {
            id: 1,
            status: RowStatus::Mismatched,
            differences: vec![
                ColumnDifference {
                    column: "zeta".to_string(),
                    source_value: DiffValue::Text("Alicia".to_string()),
                    target_value: DiffValue::Text("Alice".to_string()),
                },
                ColumnDifference {
                    column: "alpha".to_string(),
                    source_value: DiffValue::Unreadable {
                        unreadable: "invalid utf-8".to_string(),
                    },
                    target_value: DiffValue::Null,
                },
            ],
            row_key: vec![DiffValue::Text("1".to_string())],
        }
    }

    #[test]
    fn serializes_differences_as_ordered_object() {
        let json = serde_json::to_string(&sample()).expect("json");
        assert_eq!(
            json,
            r#"{"id":1,"status":"mismatched","differences":{"zeta":{"sourceValue":"Alicia","targetValue":"Alice"},"alpha":{"sourceValue":{"unreadable":"invalid utf-8"},"targetValue":null}},"rowKey":["1"]}"#
        );
    }

    #[test]
    fn json_round_trip_preserves_order_and_sentinels() {
        let original = sample();
        let json = serde_json::to_string(&original).expect("json");
        let back: ComparisonResult = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, original);
    }

    #[test]
    fn renders_values_for_output() {
        assert_eq!(DiffValue::from(&Value::Null), DiffValue::Null);
        assert_eq!(DiffValue::from(&Value::Int(5)), DiffValue::Text("5".to_string()));
        assert_eq!(RowStatus::parse("missing_source"), Some(RowStatus::MissingSource));
    }
}
