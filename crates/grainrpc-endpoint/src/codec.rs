//! Value, object and exception encoding.
//!
//! Per-type read/write code comes from `Serialize`/`DeserializeOwned`
//! impls resolved at compile time. `serde_json` is the concrete encoding.
//! By-reference values ([`crate::ByRef`]) need an active marshalling scope,
//! which the dispatcher provides around every encode and decode.
//!
//! Message payloads go through [`write_value`] and [`read_value`]. Typed
//! application errors carry a [`TaggedValue`]; [`write_object`] and
//! [`read_object`] are its byte form.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallResult, RpcError};

/// A value together with the runtime type tag it was written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedValue {
    pub type_name: String,
    pub value: Value,
}

impl TaggedValue {
    pub fn of<T: Serialize + ?Sized>(value: &T) -> CallResult<Self> {
        Ok(Self {
            type_name: std::any::type_name::<T>().to_string(),
            value: to_value(value)?,
        })
    }

    /// True when the value was written as a `T`.
    pub fn is<T: ?Sized>(&self) -> bool {
        self.type_name == std::any::type_name::<T>()
    }

    /// Decodes the value, if it was written as a `T`.
    pub fn downcast<T: DeserializeOwned>(&self) -> Option<T> {
        if !self.is::<T>() {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }
}

pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CallResult<Value> {
    serde_json::to_value(value).map_err(RpcError::marshal)
}

pub fn from_value<T: DeserializeOwned>(value: Value) -> CallResult<T> {
    serde_json::from_value(value).map_err(RpcError::marshal)
}

pub fn write_value<T: Serialize + ?Sized>(out: &mut Vec<u8>, value: &T) -> CallResult<()> {
    serde_json::to_writer(out, value).map_err(RpcError::marshal)
}

pub fn read_value<T: DeserializeOwned>(input: &[u8]) -> CallResult<T> {
    serde_json::from_slice(input).map_err(RpcError::marshal)
}

/// Writes a value with its runtime type tag.
pub fn write_object<T: Serialize + ?Sized>(out: &mut Vec<u8>, value: &T) -> CallResult<()> {
    write_value(out, &TaggedValue::of(value)?)
}

pub fn read_object(input: &[u8]) -> CallResult<TaggedValue> {
    read_value(input)
}

pub fn write_exception(out: &mut Vec<u8>, err: &RpcError) -> CallResult<()> {
    write_value(out, &exception_to_value(err))
}

/// Reads an exception record. Never fails: a record this version cannot
/// interpret is returned as [`RpcError::Unserializable`].
pub fn read_exception(input: &[u8]) -> RpcError {
    match serde_json::from_slice::<Value>(input) {
        Ok(value) => exception_from_value(value),
        Err(err) => RpcError::Unserializable {
            type_name: "unknown".to_string(),
            message: format!("unreadable exception record: {err}"),
            remote_trace: String::new(),
        },
    }
}

pub(crate) fn exception_to_value(err: &RpcError) -> Value {
    serde_json::to_value(err).unwrap_or_else(|encode_err| {
        Value::String(format!("{err} (record could not be encoded: {encode_err})"))
    })
}

pub(crate) fn exception_from_value(value: Value) -> RpcError {
    match serde_json::from_value::<RpcError>(value.clone()) {
        Ok(err) => err,
        Err(_) => {
            let field = |name: &str| {
                value
                    .get(name)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };
            RpcError::Unserializable {
                type_name: field("type_name")
                    .or_else(|| field("kind"))
                    .unwrap_or_else(|| "unknown".to_string()),
                message: field("message")
                    .or_else(|| value.as_str().map(str::to_string))
                    .unwrap_or_else(|| value.to_string()),
                remote_trace: field("remote_trace").unwrap_or_default(),
            }
        }
    }
}
