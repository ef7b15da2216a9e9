//! Query parameters carried by a `start` payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{HeraldError, Result};

/// The GraphQL request of a `start` operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameters {
    /// Query document text.
    pub query: String,
    /// Named operation to execute, if the document holds several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variable values. Empty when the client sent none.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl QueryParameters {
    /// Build parameters for `query` with no variables.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Parse a `start` payload.
    ///
    /// `query` must be a string. `variables` may be an object, `null`, or a
    /// string holding a JSON-encoded object (some clients send it that way).
    pub fn from_payload(payload: Option<&Value>) -> Result<Self> {
        let Some(object) = payload.and_then(Value::as_object) else {
            return Err(HeraldError::InvalidQuery("payload must be an object".into()));
        };

        let query = match object.get("query") {
            Some(Value::String(q)) => q.clone(),
            Some(_) => return Err(HeraldError::InvalidQuery("query must be a string".into())),
            None => return Err(HeraldError::InvalidQuery("query is required".into())),
        };

        let operation_name = match object.get("operationName") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => {
                return Err(HeraldError::InvalidQuery(
                    "operationName must be a string".into(),
                ));
            }
        };

        let variables = match object.get("variables") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(vars)) => vars.clone(),
            Some(Value::String(encoded)) => parse_encoded_variables(encoded)?,
            Some(_) => {
                return Err(HeraldError::InvalidQuery(
                    "variables must be an object".into(),
                ));
            }
        };

        Ok(Self {
            query,
            operation_name,
            variables,
        })
    }
}

fn parse_encoded_variables(encoded: &str) -> Result<Map<String, Value>> {
    if encoded.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(encoded) {
        Ok(Value::Object(vars)) => Ok(vars),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(HeraldError::InvalidQuery(
            "variables must be an object".into(),
        )),
        Err(e) => Err(HeraldError::InvalidQuery(format!(
            "variables are not valid JSON: {e}"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn parses_full_payload() {
        let payload = json!({
            "query": "subscription($id: ID) { tick(id: $id) }",
            "operationName": "Ticks",
            "variables": {"id": "a"}
        });
        let params = QueryParameters::from_payload(Some(&payload)).unwrap();
        assert_eq!(params.operation_name.as_deref(), Some("Ticks"));
        assert_eq!(params.variables["id"], "a");
    }

    #[test]
    fn variables_as_encoded_string() {
        let payload = json!({"query": "{ a }", "variables": "{\"x\": 1}"});
        let params = QueryParameters::from_payload(Some(&payload)).unwrap();
        assert_eq!(params.variables["x"], 1);
    }

    #[test]
    fn empty_encoded_variables() {
        let payload = json!({"query": "{ a }", "variables": "{}"});
        let params = QueryParameters::from_payload(Some(&payload)).unwrap();
        assert!(params.variables.is_empty());

        let payload = json!({"query": "{ a }", "variables": ""});
        let params = QueryParameters::from_payload(Some(&payload)).unwrap();
        assert!(params.variables.is_empty());
    }

    #[test]
    fn missing_query_rejected() {
        let payload = json!({"variables": {}});
        let err = QueryParameters::from_payload(Some(&payload)).unwrap_err();
        assert_matches!(err, HeraldError::InvalidQuery(msg) if msg == "query is required");
    }

    #[test]
    fn non_string_query_rejected() {
        let payload = json!({"query": 42});
        assert!(QueryParameters::from_payload(Some(&payload)).is_err());
    }

    #[test]
    fn missing_payload_rejected() {
        assert!(QueryParameters::from_payload(None).is_err());
        assert!(QueryParameters::from_payload(Some(&json!("query"))).is_err());
    }

    #[test]
    fn malformed_encoded_variables_rejected() {
        let payload = json!({"query": "{ a }", "variables": "{not json"});
        let err = QueryParameters::from_payload(Some(&payload)).unwrap_err();
        assert!(err.to_string().contains("variables are not valid JSON"));
    }

    #[test]
    fn array_variables_rejected() {
        let payload = json!({"query": "{ a }", "variables": [1]});
        assert!(QueryParameters::from_payload(Some(&payload)).is_err());
    }
}
