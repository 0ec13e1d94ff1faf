//! Values exchanged between a batch and its transport.
//!
//! A transport sees each batch item only as a read-only [`CallRequest`] and
//! reports back one [`Outcome`] per id it received an answer for.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::batch::DecodedValue;
use crate::call::Call;
use crate::error::RpcError;

type ErasedDecoder = dyn Fn(&[u8]) -> Result<DecodedValue, RpcError> + Send + Sync;

// ==============================================================================
// Call Request
// ==============================================================================

/// Read-only wire view of one batch item: correlation id, method, params,
/// and the decoder for the declared result type.
pub struct CallRequest {
    id: u32,
    method: String,
    params: Vec<Value>,
    decoder: Arc<ErasedDecoder>,
}

impl CallRequest {
    pub fn new<T: Send + Sync + 'static>(id: u32, call: Call<T>) -> Self {
        let (method, params, decoder) = call.into_parts();
        Self {
            id,
            method,
            params,
            decoder: Arc::new(move |payload: &[u8]| {
                decoder(payload).map(|value| Arc::new(value) as DecodedValue)
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Decode a raw JSON result payload with this item's declared result type.
    pub fn decode(&self, payload: &[u8]) -> Result<DecodedValue, RpcError> {
        (self.decoder)(payload)
    }

    /// Decode the payload and wrap the result as an outcome for this id.
    /// Decode failures become a per-item failure.
    pub fn decode_outcome(&self, payload: &[u8]) -> Outcome {
        Outcome {
            id: self.id,
            result: self.decode(payload),
        }
    }
}

impl fmt::Debug for CallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// ==============================================================================
// Outcome
// ==============================================================================

/// Success value or failure for one request id.
pub struct Outcome {
    pub id: u32,
    pub result: Result<DecodedValue, RpcError>,
}

impl Outcome {
    pub fn success(id: u32, value: DecodedValue) -> Self {
        Self {
            id,
            result: Ok(value),
        }
    }

    pub fn failure(id: u32, error: RpcError) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The decoded value, if the call succeeded and its result type is `T`.
    pub fn value<T: 'static>(&self) -> Option<&T> {
        match &self.result {
            Ok(value) => (**value).downcast_ref::<T>(),
            Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.result.as_ref().err()
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Outcome");
        out.field("id", &self.id);
        match &self.result {
            Ok(_) => out.field("result", &"Ok(..)"),
            Err(err) => out.field("error", err),
        };
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_outcome_wraps_typed_value() {
        let request = CallRequest::new(
            3,
            Call::<String>::new("web3_clientVersion", Vec::new()).expect("valid call"),
        );
        let outcome = request.decode_outcome(b"\"Geth/v1.10.0\"");

        assert_eq!(outcome.id, 3);
        assert_eq!(outcome.value::<String>().map(String::as_str), Some("Geth/v1.10.0"));
        assert!(outcome.value::<u64>().is_none());
    }

    #[test]
    fn decode_outcome_keeps_failure_per_item() {
        let request = CallRequest::new(
            4,
            Call::<u64>::new("eth_blockNumber", vec![json!(1)]).expect("valid call"),
        );
        let outcome = request.decode_outcome(b"{\"not\":\"a number\"}");

        assert!(!outcome.is_ok());
        assert!(matches!(outcome.error(), Some(RpcError::Decode(_))));
    }
}
