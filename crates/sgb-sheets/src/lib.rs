//! Usage ledger backends.
//!
//! Both backends store the `Activity!A:E` table as rows of text cells and plug
//! into `sgb_core::ledger::TableLedger`, which owns the read-modify-write.

pub mod auth;
pub mod file;
pub mod sheets;

pub use auth::{ServiceAccountAuth, StaticToken, TokenSource};
pub use file::FileTable;
pub use sheets::SheetsTable;

/// Wire shape of a Sheets `ValueRange`; also the on-disk shape of the file ledger.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default)]
    pub range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_dimension: Option<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

impl ValueRange {
    pub fn from_rows(range: &str, rows: Vec<Vec<String>>) -> Self {
        Self {
            range: range.to_string(),
            major_dimension: Some("ROWS".to_string()),
            values: rows
                .into_iter()
                .map(|row| row.into_iter().map(serde_json::Value::String).collect())
                .collect(),
        }
    }

    /// Cells as text; numbers and booleans are rendered, nulls become empty.
    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect()
    }
}

fn cell_text(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cells_are_normalized_to_text() {
        let vr: ValueRange = serde_json::from_value(json!({
            "range": "Activity!A1:E2",
            "majorDimension": "ROWS",
            "values": [["U1", 3, "2026-10-18T09:00:00+09:00", 120, null]]
        }))
        .unwrap();
        assert_eq!(
            vr.into_rows(),
            vec![vec![
                "U1".to_string(),
                "3".to_string(),
                "2026-10-18T09:00:00+09:00".to_string(),
                "120".to_string(),
                String::new(),
            ]]
        );
    }

    #[test]
    fn empty_sheet_has_no_values_key() {
        let vr: ValueRange =
            serde_json::from_value(json!({ "range": "Activity!A1:E1000", "majorDimension": "ROWS" }))
                .unwrap();
        assert!(vr.into_rows().is_empty());
    }
}
