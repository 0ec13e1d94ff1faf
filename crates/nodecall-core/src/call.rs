//! Immutable descriptions of a single RPC invocation.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::RpcError;

type DecodeFn<T> = dyn Fn(&[u8]) -> Result<T, RpcError> + Send + Sync;

/// One RPC invocation: method name, ordered params, and the decoder for its
/// declared result type `T`.
///
/// A `Call` is never mutated after construction. Structurally equal calls
/// compare equal, but a batch still treats each added call as its own item.
pub struct Call<T> {
    method: String,
    params: Vec<Value>,
    decoder: Arc<DecodeFn<T>>,
}

impl<T: DeserializeOwned + 'static> Call<T> {
    /// Create a call whose result is decoded from JSON into `T`.
    ///
    /// Surrounding whitespace is trimmed from the method name; a name that
    /// is empty after trimming is rejected with [`RpcError::InvalidCall`].
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Result<Self, RpcError> {
        let method = method.into();
        let method = method.trim();
        if method.is_empty() {
            return Err(RpcError::InvalidCall("method name is blank".to_owned()));
        }
        Ok(Self {
            method: method.to_owned(),
            params,
            decoder: Arc::new(decode_json::<T>),
        })
    }

    /// Create a call from any serializable params value.
    ///
    /// The value must encode to a JSON array (or `null`, meaning no params);
    /// JSON-RPC positional params are the only shape the transports carry.
    pub fn with_params<P>(method: impl Into<String>, params: &P) -> Result<Self, RpcError>
    where
        P: Serialize + ?Sized,
    {
        match serde_json::to_value(params).map_err(|e| RpcError::Encode(e.to_string()))? {
            Value::Array(items) => Self::new(method, items),
            Value::Null => Self::new(method, Vec::new()),
            other => Err(RpcError::Encode(format!(
                "params must encode to a JSON array, got `{other}`"
            ))),
        }
    }
}

impl<T: 'static> Call<T> {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Decode a raw JSON result payload into the declared result type.
    pub fn decode(&self, payload: &[u8]) -> Result<T, RpcError> {
        (self.decoder)(payload)
    }

    /// Derive a call with the same method and params whose decoded result
    /// is passed through `convert`. Conversion failures stay per item.
    pub fn map<U, F>(self, convert: F) -> Call<U>
    where
        U: 'static,
        F: Fn(T) -> Result<U, RpcError> + Send + Sync + 'static,
    {
        let decoder = self.decoder;
        Call {
            method: self.method,
            params: self.params,
            decoder: Arc::new(move |payload: &[u8]| decoder(payload).and_then(&convert)),
        }
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Value>, Arc<DecodeFn<T>>) {
        (self.method, self.params, self.decoder)
    }
}

fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, RpcError> {
    serde_json::from_slice(payload).map_err(|e| RpcError::Decode(e.to_string()))
}

impl<T> Clone for Call<T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            params: self.params.clone(),
            decoder: Arc::clone(&self.decoder),
        }
    }
}

impl<T> PartialEq for Call<T> {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.params == other.params
    }
}

impl<T> fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("result", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> fmt::Display for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}
