//! Wire types for the RPC endpoint.
use crate::store::StoreError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

pub type Params = Map<String, Value>;

/// Failures a method call can end with. The `Display` text is what the client sees.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid or missing '{0}'")]
    InvalidParam(&'static str),

    #[error("Location not found: {0}")]
    NotFound(String),

    #[error("Query failed: {0}")]
    QueryFailed(StoreError),

    /// No usable store session. Surfaced as HTTP 503 rather than a failure response.
    #[error("Database unavailable")]
    Unavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Closed => RpcError::Unavailable,
            err => RpcError::QueryFailed(err),
        }
    }
}

/// A validated `{"method": ..., "params": {...}}` request.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub method: String,
    pub params: Params,
}

impl Envelope {
    pub fn new<M: Into<String>>(method: M, params: Params) -> Self {
        Envelope {
            method: method.into(),
            params,
        }
    }

    /// Checks the envelope shape: `method` must be a non-empty string and `params` an
    /// object. Unknown top level keys are ignored.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Object(mut body) = value else {
            return Err(RpcError::InvalidRequest(
                "request body must be a JSON object".into(),
            ));
        };

        let method = match body.remove("method") {
            Some(Value::String(method)) if !method.is_empty() => method,
            _ => {
                return Err(RpcError::InvalidRequest(
                    "'method' must be a non-empty string".into(),
                ));
            }
        };

        let params = match body.remove("params") {
            Some(Value::Object(params)) => params,
            _ => {
                return Err(RpcError::InvalidRequest("'params' must be an object".into()));
            }
        };

        Ok(Envelope { method, params })
    }

    /// The caller's user id, if one was supplied and is non-empty.
    pub fn userid(&self) -> Option<&str> {
        self.params
            .get("userid")
            .and_then(Value::as_str)
            .filter(|userid| !userid.is_empty())
    }
}

/// `{"success": true, "data": ...}` or `{"success": false, "error": "..."}`.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcResponse {
    Success(Value),
    Failure(String),
}

impl RpcResponse {
    pub fn failure<E: ToString>(error: E) -> Self {
        RpcResponse::Failure(error.to_string())
    }
}

impl From<Result<Value, RpcError>> for RpcResponse {
    fn from(result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(data) => RpcResponse::Success(data),
            Err(err) => RpcResponse::failure(err),
        }
    }
}

impl Serialize for RpcResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            RpcResponse::Success(data) => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", data)?;
            }
            RpcResponse::Failure(error) => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_parsing() {
        let envelope = Envelope::from_value(json!({
            "method": "getLocationById",
            "params": {"id": "zion", "userid": "u1"}
        }))
        .unwrap();
        assert_eq!(envelope.method, "getLocationById");
        assert_eq!(envelope.params.get("id"), Some(&json!("zion")));
        assert_eq!(envelope.userid(), Some("u1"));
    }

    #[test]
    fn test_envelope_shape_errors() {
        let cases = [
            json!([1, 2]),
            json!({"params": {}}),
            json!({"method": "", "params": {}}),
            json!({"method": 3, "params": {}}),
            json!({"method": "getTopLocations"}),
            json!({"method": "getTopLocations", "params": [10]}),
        ];

        for case in cases {
            assert!(
                matches!(Envelope::from_value(case.clone()), Err(RpcError::InvalidRequest(_))),
                "{case} should be rejected"
            );
        }
    }

    #[test]
    fn test_userid_must_be_non_empty_string() {
        let envelope = Envelope::new("m", Map::new());
        assert_eq!(envelope.userid(), None);

        let mut params = Map::new();
        params.insert("userid".into(), json!(""));
        assert_eq!(Envelope::new("m", params.clone()).userid(), None);

        params.insert("userid".into(), json!(42));
        assert_eq!(Envelope::new("m", params).userid(), None);
    }

    #[test]
    fn test_response_serialization() {
        let ok = RpcResponse::Success(json!([1]));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "data": [1]})
        );

        let err: RpcResponse = Err(RpcError::InvalidParam("id")).into();
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"success": false, "error": "Invalid or missing 'id'"})
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err = RpcError::from(StoreError::Query("timeout".into()));
        assert_eq!(err.to_string(), "Query failed: timeout");

        assert_eq!(RpcError::from(StoreError::Closed), RpcError::Unavailable);
    }
}
