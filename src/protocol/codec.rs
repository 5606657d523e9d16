//! Wire frame codec.
//!
//! A frame is a JSON header object immediately followed by the raw body:
//!
//! ```text
//! {"id":"125","method":"POST","path":"/topics/test","type":"application/json"}{"records":[]}
//! └──────────────────────────── headers ──────────────────────────────────────┘└── body ──┘
//! ```
//!
//! Decoding consumes exactly the bytes of the JSON object; whatever follows
//! is the body, verbatim.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::{Deserializer, Map, Value};

use crate::error::{Error, Result};

use super::{HEADER_CODE, HEADER_CONTINUE, HEADER_ID, HEADER_TYPE};

// ============================================================================
// Types
// ============================================================================

/// Frame header mapping.
///
/// Keys serialize in sorted order.
pub type Headers = Map<String, Value>;

// ============================================================================
// Frame
// ============================================================================

/// One decoded wire message: headers plus raw body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Header object.
    pub headers: Headers,
    /// Raw body bytes following the header object.
    pub body: Vec<u8>,
}

impl Frame {
    /// Creates a frame from headers and body.
    #[inline]
    #[must_use]
    pub fn new(headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Returns a string header, or `None` if absent or not a string.
    #[inline]
    #[must_use]
    pub fn string_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(Value::as_str)
    }

    /// Returns the correlation id (empty if absent).
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        self.string_header(HEADER_ID).unwrap_or_default()
    }

    /// Returns `true` if this frame is a non-final fragment.
    #[inline]
    #[must_use]
    pub fn is_continued(&self) -> bool {
        self.headers
            .get(HEADER_CONTINUE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the status code of a response frame.
    #[inline]
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        self.headers
            .get(HEADER_CODE)
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
    }

    /// Returns the declared media type, if any.
    #[inline]
    #[must_use]
    pub fn media_type(&self) -> Option<&str> {
        self.string_header(HEADER_TYPE)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Encodes and decodes wire frames.
///
/// The protocol handler and the client transport take any implementation;
/// [`DefaultCodec`] is the JSON-header-plus-raw-body format.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Splits a wire message into its headers and body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the leading bytes are not a JSON object.
    fn decode(&self, data: &[u8]) -> Result<Frame>;

    /// Joins headers and body into one wire message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the headers cannot be serialized.
    fn encode(&self, headers: &Headers, body: &[u8]) -> Result<Vec<u8>>;
}

// ============================================================================
// DefaultCodec
// ============================================================================

/// JSON header object immediately followed by the raw body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl DefaultCodec {
    /// Creates the default codec.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Codec for DefaultCodec {
    fn decode(&self, data: &[u8]) -> Result<Frame> {
        let mut stream = Deserializer::from_slice(data).into_iter::<Headers>();

        let mut headers = match stream.next() {
            Some(Ok(headers)) => headers,
            Some(Err(e)) => return Err(Error::decode(e.to_string())),
            None => return Err(Error::decode("empty frame")),
        };
        let offset = stream.byte_offset();

        normalize_code(&mut headers);

        Ok(Frame {
            headers,
            body: data[offset..].to_vec(),
        })
    }

    fn encode(&self, headers: &Headers, body: &[u8]) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec(headers)?;
        data.extend_from_slice(body);
        Ok(data)
    }
}

/// Coerces a floating point `code` with an integral value to an integer.
fn normalize_code(headers: &mut Headers) {
    let Some(code) = headers.get_mut(HEADER_CODE) else {
        return;
    };

    if code.is_f64()
        && let Some(float) = code.as_f64()
        && float.fract() == 0.0
        && float >= 0.0
        && float <= u16::MAX as f64
    {
        *code = Value::from(float as u64);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn headers(value: Value) -> Headers {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_decode_request_without_body() {
        let data = br#"{"id": "123", "method": "GET",
            "path": "/ws/consumers/my_group/instances/my_instance/topics/my_topic",
            "accept": "application/vnd.kafka.json.v1+json"}"#;

        let frame = DefaultCodec.decode(data).expect("decode");
        assert_eq!(frame.id(), "123");
        assert_eq!(frame.string_header("method"), Some("GET"));
        assert_eq!(
            frame.string_header("accept"),
            Some("application/vnd.kafka.json.v1+json")
        );
        assert!(frame.body.is_empty());
        assert!(!frame.is_continued());
    }

    #[test]
    fn test_decode_request_with_body() {
        let data = br#"{"id": "125", "method": "POST", "path": "/topics/test",
            "type": "application/vnd.kafka.binary.v1+json"}{"records":[{"value":"S2Fma2E="}]}"#;

        let frame = DefaultCodec.decode(data).expect("decode");
        assert_eq!(frame.id(), "125");
        assert_eq!(frame.media_type(), Some("application/vnd.kafka.binary.v1+json"));
        assert_eq!(frame.body, br#"{"records":[{"value":"S2Fma2E="}]}"#);
    }

    #[test]
    fn test_decode_response_code() {
        let data = br#"{"id": "127", "code": 200, "type": "application/json"}[{"partition":0}]"#;

        let frame = DefaultCodec.decode(data).expect("decode");
        assert_eq!(frame.code(), Some(200));
        assert_eq!(frame.headers.get("code"), Some(&json!(200)));
        assert_eq!(frame.body, br#"[{"partition":0}]"#);
    }

    #[test]
    fn test_decode_float_code_is_normalized() {
        let frame = DefaultCodec.decode(br#"{"id":"1","code":404.0}"#).expect("decode");
        assert_eq!(frame.headers.get("code"), Some(&json!(404)));
        assert_eq!(frame.code(), Some(404));
    }

    #[test]
    fn test_decode_nested_headers() {
        let data = br#"{"id": "131", "method": "GET", "headers":{"x-shopping-ref":"4126"}, "path": "/shopping/bag"}"#;

        let frame = DefaultCodec.decode(data).expect("decode");
        assert_eq!(
            frame.headers.get("headers"),
            Some(&json!({"x-shopping-ref": "4126"}))
        );
    }

    #[test]
    fn test_decode_continued_flag() {
        let data = br#"{"id": "129", "method": "POST", "continue": true}{"recor"#;

        let frame = DefaultCodec.decode(data).expect("decode");
        assert!(frame.is_continued());
        assert_eq!(frame.body, br#"{"recor"#);
    }

    #[test]
    fn test_decode_invalid() {
        let result = DefaultCodec.decode(br#"{"id": "123", "method": "GET", invalid}"#);
        assert!(matches!(result, Err(Error::Decode { .. })));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(DefaultCodec.decode(br#"["id"]"#).is_err());
        assert!(DefaultCodec.decode(b"").is_err());
    }

    #[test]
    fn test_encode_sorted_keys_then_body() {
        let h = headers(json!({"type": "application/json", "id": "1", "code": 200}));
        let data = DefaultCodec.encode(&h, br#"{"pong":0}"#).expect("encode");
        assert_eq!(
            String::from_utf8(data).expect("utf8"),
            r#"{"code":200,"id":"1","type":"application/json"}{"pong":0}"#
        );
    }

    #[test]
    fn test_encode_empty_body_is_headers_only() {
        let h = headers(json!({"id": "3", "code": 404}));
        let data = DefaultCodec.encode(&h, &[]).expect("encode");
        assert_eq!(data, br#"{"code":404,"id":"3"}"#);
    }

    fn header_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<String>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            prop::collection::btree_map("[a-z-]{1,12}", "[ -~]{0,16}", 0..4)
                .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            map in prop::collection::btree_map("[a-z]{1,8}", header_value(), 0..6),
            body in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let h: Headers = map.into_iter().collect();
            let data = DefaultCodec.encode(&h, &body).expect("encode");
            let frame = DefaultCodec.decode(&data).expect("decode");
            prop_assert_eq!(frame.headers, h);
            prop_assert_eq!(frame.body, body);
        }
    }
}
