use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Value,
    json,
};
use std::fmt;

/// Maximum allowed JSON payload size (10MB)
pub const MAX_JSON_SIZE: usize = 10 * 1024 * 1024;

/// Maximum number of calls in a batch request
pub const MAX_BATCH_SIZE: usize = 100;

/// JSON-RPC error codes used by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    ServerError = -32000,
    ResourceUnavailable = -32002,
    LimitExceeded = -32005,
}

impl JsonRpcErrorCode {
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// Validated JSON-RPC request structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    /// Positional (array) or named (object) params, an empty array when absent.
    pub params: Value,
    pub id: Value,
}

impl JsonRpcRequest {
    /// Validates and parses a JSON-RPC request from raw JSON value
    pub fn validate(json: Value) -> Result<Self, (JsonRpcErrorCode, &'static str)> {
        let obj = json.as_object().ok_or((
            JsonRpcErrorCode::InvalidRequest,
            "Request must be a JSON object",
        ))?;

        let jsonrpc = obj.get("jsonrpc").and_then(|v| v.as_str()).ok_or((
            JsonRpcErrorCode::InvalidRequest,
            "Missing or invalid 'jsonrpc' field",
        ))?;

        if jsonrpc != "2.0" {
            return Err((
                JsonRpcErrorCode::InvalidRequest,
                "JSON-RPC version must be 2.0",
            ));
        }

        let method = obj.get("method").and_then(|v| v.as_str()).ok_or((
            JsonRpcErrorCode::InvalidRequest,
            "Missing or invalid 'method' field",
        ))?;

        // Validate id (can be number, string, or null)
        let id = obj.get("id").cloned().unwrap_or(Value::Null);
        if !(id.is_number() || id.is_string() || id.is_null()) {
            return Err((
                JsonRpcErrorCode::InvalidRequest,
                "'id' must be a number, string or null",
            ));
        }

        let params = match obj.get("params") {
            Some(Value::Array(arr)) => Value::Array(arr.clone()),
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(Value::Null) | None => Value::Array(Vec::new()),
            Some(_) => {
                return Err((
                    JsonRpcErrorCode::InvalidParams,
                    "Params must be an array, an object or null",
                ));
            }
        };

        Ok(JsonRpcRequest {
            jsonrpc: jsonrpc.to_string(),
            method: method.to_string(),
            params,
            id,
        })
    }
}

/// Builds a success response object.
pub fn success_response(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

/// Builds an error response object, `data` is omitted when `None`.
pub fn error_response(id: &Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message,
    });
    if let Some(data) = data {
        error["data"] = data;
    }

    json!({
        "jsonrpc": "2.0",
        "error": error,
        "id": id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_json_rpc_request() {
        let json = json!({
            "jsonrpc": "2.0",
            "method": "cfx_getBalance",
            "params": ["cfx:aaejuaaaaaaaaaaaaaaaaaaaaaaaaaaaajrwuc9jnb", "latest_state"],
            "id": 1
        });

        let request = JsonRpcRequest::validate(json).unwrap();
        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method, "cfx_getBalance");
        assert_eq!(request.params.as_array().unwrap().len(), 2);
        assert_eq!(request.id, 1);
    }

    #[test]
    fn test_missing_params_default_to_empty_array() {
        let request = JsonRpcRequest::validate(json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "id": "abc"
        }))
        .unwrap();
        assert_eq!(request.params, json!([]));
        assert_eq!(request.id, json!("abc"));
    }

    #[test]
    fn test_named_params_are_kept() {
        let request = JsonRpcRequest::validate(json!({
            "jsonrpc": "2.0",
            "method": "cfx_getLogs",
            "params": {"fromEpoch": "0x1"},
            "id": 2
        }))
        .unwrap();
        assert_eq!(request.params, json!({"fromEpoch": "0x1"}));
    }

    #[test]
    fn test_invalid_requests() {
        let cases = [
            (json!([1, 2]), JsonRpcErrorCode::InvalidRequest),
            (
                json!({"jsonrpc": "1.0", "method": "m", "id": 1}),
                JsonRpcErrorCode::InvalidRequest,
            ),
            (json!({"jsonrpc": "2.0", "id": 1}), JsonRpcErrorCode::InvalidRequest),
            (
                json!({"jsonrpc": "2.0", "method": "m", "id": {"a": 1}}),
                JsonRpcErrorCode::InvalidRequest,
            ),
            (
                json!({"jsonrpc": "2.0", "method": "m", "params": "x", "id": 1}),
                JsonRpcErrorCode::InvalidParams,
            ),
        ];

        for (json, expected) in cases {
            let (code, _) = JsonRpcRequest::validate(json).unwrap_err();
            assert_eq!(code, expected);
        }
    }

    #[test]
    fn test_error_response_shape() {
        let response = error_response(&json!(7), -32005, "too many requests", None);
        assert_eq!(
            response,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32005, "message": "too many requests"},
                "id": 7
            })
        );

        let response = error_response(&Value::Null, -32000, "reverted", Some(json!("0x01")));
        assert_eq!(response["error"]["data"], json!("0x01"));
    }
}
