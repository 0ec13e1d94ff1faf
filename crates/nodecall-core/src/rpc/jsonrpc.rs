//! JSON-RPC 2.0 envelopes shared by the HTTP and WebSocket transports.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{RpcError, CODE_INTERNAL_ERROR};
use crate::types::{CallRequest, Outcome};

#[derive(Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub(crate) jsonrpc: &'static str,
    pub(crate) id: u64,
    pub(crate) method: &'a str,
    pub(crate) params: &'a [Value],
}

impl<'a> JsonRpcRequest<'a> {
    /// `request` sent under a wire id other than its batch id.
    pub(crate) fn with_id(id: u64, request: &'a CallRequest) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: request.method(),
            params: request.params(),
        }
    }
}

impl<'a> From<&'a CallRequest> for JsonRpcRequest<'a> {
    fn from(request: &'a CallRequest) -> Self {
        Self::with_id(u64::from(request.id()), request)
    }
}

#[derive(Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub(crate) id: Value,
    #[serde(default)]
    pub(crate) result: Option<Box<RawValue>>,
    #[serde(default)]
    pub(crate) error: Option<Value>,
}

/// Encode a batch as a JSON-RPC request body.
///
/// Exactly one request encodes as a bare object; two or more as an array.
/// Some nodes reject single-element batch arrays, so the distinction matters.
pub(crate) fn encode_request_body(requests: &[CallRequest]) -> Result<Vec<u8>, RpcError> {
    let encoded: Vec<JsonRpcRequest<'_>> = requests.iter().map(JsonRpcRequest::from).collect();
    encode_requests(&encoded)
}

/// Same framing as [`encode_request_body`] for requests that already carry
/// their wire ids.
pub(crate) fn encode_requests(encoded: &[JsonRpcRequest<'_>]) -> Result<Vec<u8>, RpcError> {
    let body = match encoded {
        [single] => serde_json::to_vec(single),
        many => serde_json::to_vec(many),
    };
    body.map_err(|e| RpcError::Encode(e.to_string()))
}

/// Parse a JSON-RPC response body holding either one response object or an
/// array of them.
pub(crate) fn parse_response_body(body: &[u8]) -> Result<Vec<JsonRpcResponse>, RpcError> {
    let first = body.iter().copied().find(|b| !b.is_ascii_whitespace());
    let parsed = match first {
        Some(b'[') => serde_json::from_slice::<Vec<JsonRpcResponse>>(body),
        Some(b'{') => serde_json::from_slice::<JsonRpcResponse>(body).map(|single| vec![single]),
        _ => {
            return Err(RpcError::Transport(format!(
                "expected JSON-RPC object or array, got: {}",
                String::from_utf8_lossy(body)
            )))
        }
    };
    parsed.map_err(|e| RpcError::Transport(format!("decode JSON-RPC response: {e}")))
}

/// Convert one parsed response into the outcome for its originating request.
pub(crate) fn convert_response(request: &CallRequest, response: JsonRpcResponse) -> Outcome {
    if let Some(err) = response.error {
        return Outcome::failure(request.id(), parse_jsonrpc_error(err));
    }
    match response.result {
        Some(raw) => request.decode_outcome(raw.get().as_bytes()),
        None => request.decode_outcome(b"null"),
    }
}

/// Parse a JSON-RPC error value into a structured `RpcError`.
///
/// JSON-RPC 2.0 errors have the shape `{"code": <int>, "message": <string>}`.
/// If the error value matches that shape, we produce a `Remote` error with the
/// server's code; otherwise the raw JSON becomes the message of an internal error.
pub(crate) fn parse_jsonrpc_error(err: Value) -> RpcError {
    #[derive(Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => RpcError::Remote {
            code: parsed.code,
            message: parsed.message,
        },
        Err(_) => RpcError::Remote {
            code: CODE_INTERNAL_ERROR,
            message: format!("non-standard JSON-RPC error: {err}"),
        },
    }
}

/// Numeric response id. Numeric strings are accepted as well.
pub(crate) fn parse_response_id(id: &Value) -> Option<u64> {
    if let Some(n) = id.as_u64() {
        return Some(n);
    }
    id.as_str().and_then(|s| s.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::call::Call;

    fn request(id: u32, method: &str, params: Vec<Value>) -> CallRequest {
        CallRequest::new(id, Call::<Value>::new(method, params).expect("valid call"))
    }

    #[test]
    fn single_request_encodes_as_object() {
        let body = encode_request_body(&[request(1, "eth_test", Vec::new())]).expect("encodes");
        let parsed: Value = serde_json::from_slice(&body).expect("valid JSON");
        assert_eq!(
            parsed,
            json!({"jsonrpc": "2.0", "id": 1, "method": "eth_test", "params": []})
        );
    }

    #[test]
    fn multiple_requests_encode_as_array() {
        let body = encode_request_body(&[
            request(1, "eth_test", Vec::new()),
            request(2, "eth_test2", vec![json!("test"), json!(14)]),
        ])
        .expect("encodes");
        let parsed: Value = serde_json::from_slice(&body).expect("valid JSON");
        assert_eq!(
            parsed,
            json!([
                {"jsonrpc": "2.0", "id": 1, "method": "eth_test", "params": []},
                {"jsonrpc": "2.0", "id": 2, "method": "eth_test2", "params": ["test", 14]},
            ])
        );
    }

    fn rich_params() -> Vec<Value> {
        vec![
            json!([[1, [2, [3]]], [], {"k": [null]}]),
            json!({"to": "0xabc", "nested": {"flag": true, "list": [false, null]}}),
            Value::Null,
            json!(true),
            json!(u64::MAX),
            json!(i64::MIN),
            json!(1.5),
            json!(-0.375),
            json!("héllo ✓ 日本 \"quoted\" \n"),
        ]
    }

    #[test]
    fn params_survive_encoding_unchanged() {
        let params = rich_params();
        for requests in [
            vec![request(1, "eth_call", params.clone())],
            vec![request(1, "eth_call", params.clone()), request(2, "eth_call", Vec::new())],
        ] {
            let body = encode_request_body(&requests).expect("encodes");
            let parsed: Value = serde_json::from_slice(&body).expect("valid JSON");
            let first = match &parsed {
                Value::Array(items) => &items[0],
                single => single,
            };
            let decoded: Vec<Value> =
                serde_json::from_value(first["params"].clone()).expect("params array");
            assert_eq!(decoded, params);
        }
    }

    #[test]
    fn parse_response_body_accepts_object_and_array() {
        let single = parse_response_body(b" {\"id\":1,\"result\":\"0x1\"}").expect("object parses");
        assert_eq!(single.len(), 1);

        let many = parse_response_body(b"[{\"id\":1,\"result\":1},{\"id\":2,\"result\":2}]")
            .expect("array parses");
        assert_eq!(many.len(), 2);
    }

    #[test]
    fn parse_response_body_rejects_garbage() {
        let err = parse_response_body(b"<html>bad gateway</html>")
            .err()
            .expect("must reject non-JSON");
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[test]
    fn convert_response_maps_error_object() {
        let responses = parse_response_body(
            br#"{"id":2,"error":{"code":-32602,"message":"Invalid params"}}"#,
        )
        .expect("parses");
        let response = responses.into_iter().next().expect("one response");
        let outcome = convert_response(&request(2, "eth_call", Vec::new()), response);

        assert_eq!(
            outcome.error(),
            Some(&RpcError::Remote {
                code: -32602,
                message: "Invalid params".into()
            })
        );
    }

    #[test]
    fn convert_response_treats_null_result_as_null() {
        let responses = parse_response_body(br#"{"id":1,"result":null}"#).expect("parses");
        let response = responses.into_iter().next().expect("one response");
        let outcome = convert_response(&request(1, "eth_getTransactionByHash", Vec::new()), response);

        assert_eq!(outcome.value::<Value>(), Some(&Value::Null));
    }

    #[test]
    fn parse_jsonrpc_error_non_standard_shape() {
        let err = parse_jsonrpc_error(json!("boom"));
        assert!(matches!(err, RpcError::Remote { code: CODE_INTERNAL_ERROR, .. }));
    }

    #[test]
    fn parse_response_id_number() {
        assert_eq!(parse_response_id(&json!(42)), Some(42));
    }

    #[test]
    fn parse_response_id_string() {
        assert_eq!(parse_response_id(&json!("123")), Some(123));
    }

    #[test]
    fn parse_response_id_invalid() {
        assert_eq!(parse_response_id(&json!(true)), None);
        assert_eq!(parse_response_id(&json!(-1)), None);
        assert_eq!(parse_response_id(&json!("0x1")), None);
    }
}
