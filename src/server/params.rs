use serde_json::{Map, Value};
use std::collections::HashMap;

/// Request parameters: JSON body fields first, query string second.
///
/// A body that is not a JSON object is treated as empty. Blank values count as
/// absent in both sources.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    body: Map<String, Value>,
    query: HashMap<String, String>,
}

impl RequestParams {
    pub fn new(body: &[u8], query: HashMap<String, String>) -> Self {
        let body = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self { body, query }
    }

    pub fn from_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Self {
        Self {
            body: Map::new(),
            query: pairs
                .iter()
                .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.body
            .get(key)
            .and_then(scalar)
            .and_then(non_blank)
            .or_else(|| self.query.get(key).cloned().and_then(non_blank))
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // recipient lists may arrive as arrays
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Null | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_wins_over_query() {
        let query = HashMap::from([
            ("vm_name".to_string(), "from-query".to_string()),
            ("location".to_string(), "westeurope".to_string()),
        ]);
        let params = RequestParams::new(br#"{"vm_name": "from-body"}"#, query);
        assert_eq!(params.get("vm_name").as_deref(), Some("from-body"));
        assert_eq!(params.get("location").as_deref(), Some("westeurope"));
        assert_eq!(params.get("domain"), None);
    }

    #[test]
    fn invalid_body_falls_back_to_query() {
        let query = HashMap::from([("vm_name".to_string(), "web01".to_string())]);
        let params = RequestParams::new(b"not json", query);
        assert_eq!(params.get("vm_name").as_deref(), Some("web01"));
    }

    #[test]
    fn blank_body_value_defers_to_query() {
        let query = HashMap::from([("domain".to_string(), "example.com".to_string())]);
        let params = RequestParams::new(br#"{"domain": "  "}"#, query);
        assert_eq!(params.get("domain").as_deref(), Some("example.com"));
    }

    #[test]
    fn scalars_and_arrays_become_strings() {
        let params = RequestParams::new(
            br#"{"os_disk_gb": 128, "recipient_emails": ["a@x.io", "b@x.io"], "extra": {}}"#,
            HashMap::new(),
        );
        assert_eq!(params.get("os_disk_gb").as_deref(), Some("128"));
        assert_eq!(params.get("recipient_emails").as_deref(), Some("a@x.io,b@x.io"));
        assert_eq!(params.get("extra"), None);
    }
}
