//! Conversions between command-line text and calls/outcomes.

use nodecall_core::{Call, Outcome, RpcError};
use serde::Deserialize;
use serde_json::{json, Value};

/// One entry of a batch file.
#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl BatchEntry {
    pub fn into_call(self) -> Result<Call<Value>, RpcError> {
        Call::new(self.method, self.params)
    }
}

pub fn parse_batch(text: &str) -> Result<Vec<BatchEntry>, serde_json::Error> {
    serde_json::from_str(text)
}

/// A positional param: JSON when it parses as JSON, otherwise a string.
pub fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// One JSON line for an outcome, tagged with the method it answered.
pub fn outcome_line(method: &str, outcome: &Outcome) -> Value {
    match &outcome.result {
        Ok(_) => json!({
            "id": outcome.id,
            "method": method,
            "result": outcome.value::<Value>().cloned().unwrap_or(Value::Null),
        }),
        Err(err) => json!({
            "id": outcome.id,
            "method": method,
            "error": {"code": err.code(), "message": err.to_string()},
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn parse_param_prefers_json() {
        assert_eq!(parse_param("14"), json!(14));
        assert_eq!(parse_param("true"), json!(true));
        assert_eq!(parse_param(r#"{"to":"0x0"}"#), json!({"to": "0x0"}));
        assert_eq!(parse_param("latest"), json!("latest"));
        assert_eq!(parse_param("0x1b4"), json!("0x1b4"));
    }

    #[test]
    fn parse_batch_defaults_missing_params() {
        let entries = parse_batch(
            r#"[{"method":"eth_blockNumber"},{"method":"eth_getBalance","params":["0x0","latest"]}]"#,
        )
        .expect("valid batch file");
        assert_eq!(entries.len(), 2);
        assert!(entries[0].params.is_empty());

        let call = entries
            .into_iter()
            .nth(1)
            .expect("second entry")
            .into_call()
            .expect("method is set");
        assert_eq!(call.to_string(), r#"eth_getBalance("0x0", "latest")"#);
    }

    #[test]
    fn blank_method_in_batch_file_is_rejected() {
        let entries = parse_batch(r#"[{"method":"  ","params":[]}]"#).expect("valid JSON");
        let err = entries
            .into_iter()
            .next()
            .expect("one entry")
            .into_call()
            .expect_err("blank method");
        assert!(matches!(err, RpcError::InvalidCall(_)));
    }

    #[test]
    fn parse_batch_rejects_object() {
        assert!(parse_batch(r#"{"method":"eth_blockNumber"}"#).is_err());
    }

    #[test]
    fn outcome_line_renders_value_and_error() {
        let ok = Outcome::success(1, Arc::new(json!("0x10")));
        assert_eq!(
            outcome_line("eth_blockNumber", &ok),
            json!({"id": 1, "method": "eth_blockNumber", "result": "0x10"})
        );

        let failed = Outcome::failure(2, RpcError::internal("Test error"));
        assert_eq!(
            outcome_line("eth_call", &failed),
            json!({
                "id": 2,
                "method": "eth_call",
                "error": {"code": -32603, "message": "server error -32603: Test error"},
            })
        );
    }
}
