//! Value encoding shared by every store.
//!
//! A stored value is `base64(transcoder.marshal(value))`, so the database
//! only ever sees plain ASCII strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CodecError;

/// Turns session values into bytes and back.
pub trait Transcoder: Send + Sync {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn unmarshal(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Default transcoder: compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTranscoder;

impl Transcoder for JsonTranscoder {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serialize and base64-encode a value for storage.
pub fn encode_value(transcoder: &dyn Transcoder, value: &Value) -> Result<String, CodecError> {
    let bytes = transcoder.marshal(value)?;
    Ok(STANDARD.encode(bytes))
}

/// Reverse of [`encode_value`].
pub fn decode_value(transcoder: &dyn Transcoder, stored: &str) -> Result<Value, CodecError> {
    let bytes = STANDARD.decode(stored)?;
    transcoder.unmarshal(&bytes)
}

/// Encode an expiry timestamp for the bootstrap record.
pub fn encode_expiry(transcoder: &dyn Transcoder, at: DateTime<Utc>) -> Result<String, CodecError> {
    encode_value(transcoder, &Value::String(at.to_rfc3339()))
}

/// Decode the bootstrap record's expiry timestamp.
pub fn decode_expiry(transcoder: &dyn Transcoder, stored: &str) -> Result<DateTime<Utc>, CodecError> {
    let value = decode_value(transcoder, stored)?;
    let at: DateTime<Utc> = serde_json::from_value(value)?;
    Ok(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_is_base64_of_json() {
        let encoded = encode_value(&JsonTranscoder, &json!("iris")).unwrap();
        assert_eq!(encoded, STANDARD.encode(b"\"iris\""));
    }

    #[test]
    fn test_decode_structured_value() {
        let value = json!({"name": "iris", "visits": 3, "tags": ["a", "b"]});
        let encoded = encode_value(&JsonTranscoder, &value).unwrap();
        assert_eq!(decode_value(&JsonTranscoder, &encoded).unwrap(), value);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_value(&JsonTranscoder, "not base64 at all!").unwrap_err();
        assert!(matches!(err, CodecError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let stored = STANDARD.encode(b"{unterminated");
        let err = decode_value(&JsonTranscoder, &stored).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn test_expiry_keeps_instant() {
        let at = DateTime::parse_from_rfc3339("2026-10-16T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let stored = encode_expiry(&JsonTranscoder, at).unwrap();
        assert_eq!(decode_expiry(&JsonTranscoder, &stored).unwrap(), at);
    }

    #[test]
    fn test_expiry_rejects_non_timestamp() {
        let stored = encode_value(&JsonTranscoder, &json!(42)).unwrap();
        assert!(decode_expiry(&JsonTranscoder, &stored).is_err());
    }
}
