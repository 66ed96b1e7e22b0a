//! JSON codec for task arguments and results
//!
//! Arguments arrive as nullable JSON text written by external producers:
//! ```text
//! NULL | "" | "null"      -> decoded from JSON null
//! {"id": "nextcloud"}     -> decoded into the handler's argument type
//! ```
//! Handlers that take no arguments decode into `serde::de::IgnoredAny`,
//! which accepts any payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during decoding/encoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed task arguments: {0}")]
    MalformedArgs(#[source] serde_json::Error),

    #[error("Task arguments do not match the handler: {0}")]
    MismatchedArgs(#[source] serde_json::Error),

    #[error("Result encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Decode the raw `args` column into a typed argument value
pub fn decode_args<T: DeserializeOwned>(raw: Option<&str>) -> Result<T, CodecError> {
    let value = match raw.map(str::trim) {
        None | Some("") => Value::Null,
        Some(text) => serde_json::from_str(text).map_err(CodecError::MalformedArgs)?,
    };

    serde_json::from_value(value).map_err(CodecError::MismatchedArgs)
}

/// Encode a handler result for the `result` column
pub fn encode_result<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}
