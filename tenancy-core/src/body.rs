//! Replacement bodies for rewritten requests.
//!
//! Once a pre-forward hook has parsed and mutated the request body, the
//! original bytes are stale. [`rebuild`] serializes the mutated value into a
//! fresh body and fixes `content-length` so the forwarder can send it in
//! place of the consumed original.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH};
use http::HeaderMap;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{Result, TenancyError};

/// A serialized request body, consumed when the upstream request is built.
#[derive(Debug)]
pub struct RebuiltBody {
    bytes: Bytes,
}

impl RebuiltBody {
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the serialized bytes; the body cannot be reused afterwards.
    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Serialize `value` as the new request body and set `content-length`.
///
/// Objects, arrays and `null` are written as JSON. A string is taken to be
/// an already-serialized body and sent verbatim.
///
/// # Errors
///
/// [`TenancyError::UnsupportedBodyType`] for numbers and booleans.
pub fn rebuild(value: &Value, headers: &mut HeaderMap) -> Result<RebuiltBody> {
    let bytes = match value {
        Value::String(s) => Bytes::copy_from_slice(s.as_bytes()),
        Value::Object(_) | Value::Array(_) | Value::Null => Bytes::from(value.to_string()),
        Value::Number(_) | Value::Bool(_) => {
            let kind = if value.is_number() { "number" } else { "boolean" };
            error!(kind, "Unknown body type");
            return Err(TenancyError::UnsupportedBodyType { kind });
        }
    };

    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    debug!(len = bytes.len(), "Rebuilt request body");

    Ok(RebuiltBody { bytes })
}
