//! UUID utilities

use crate::{Error, Result};
use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse a GUID column value, naming the column in the error
pub fn parse_column(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid {} GUID '{}': {}", column, value, e)))
}

/// Parse an optional GUID column value
pub fn parse_optional_column(value: Option<&str>, column: &str) -> Result<Option<Uuid>> {
    value.map(|v| parse_column(v, column)).transpose()
}

/// Encode a list of GUIDs as a JSON array string for storage
pub fn to_json_list(ids: &[Uuid]) -> String {
    let strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    serde_json::Value::from(strings).to_string()
}

/// Decode a JSON array of GUID strings
///
/// NULL or empty columns decode to an empty list.
pub fn from_json_list(value: Option<&str>, column: &str) -> Result<Vec<Uuid>> {
    let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    let strings: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Invalid {} JSON list: {}", column, e)))?;
    strings.iter().map(|s| parse_column(s, column)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_list_preserves_order() {
        let ids = vec![generate(), generate(), generate()];
        let encoded = to_json_list(&ids);
        assert_eq!(from_json_list(Some(&encoded), "ids").unwrap(), ids);
    }

    #[test]
    fn test_json_list_null_is_empty() {
        assert!(from_json_list(None, "ids").unwrap().is_empty());
        assert!(from_json_list(Some("  "), "ids").unwrap().is_empty());
    }

    #[test]
    fn test_parse_column_rejects_garbage() {
        let err = parse_column("not-a-guid", "camp_id").unwrap_err();
        assert!(err.to_string().contains("camp_id"));
    }
}
