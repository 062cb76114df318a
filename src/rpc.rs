//! MessagePack-RPC framing for the prised wire protocol.
//!
//! Three message shapes, distinguished by a leading integer type tag:
//!
//! - `[0, msgid, method, params]` is a request
//! - `[1, msgid, error, result]` is a response (`error` is nil on success)
//! - `[2, method, params]` is a notification
//!
//! Each message is a single self-delimiting MessagePack value, so there is
//! no outer length prefix. The transport reads whatever chunk sizes the
//! socket delivers; the [`Decoder`] buffers partial values and yields
//! complete messages as they become available.

use bytes::{Buf, Bytes, BytesMut};
use rmpv::Value;
use std::io::Cursor;
use thiserror::Error;

const TYPE_REQUEST: u64 = 0;
const TYPE_RESPONSE: u64 = 1;
const TYPE_NOTIFICATION: u64 = 2;

#[derive(Error, Debug)]
pub enum RpcError {
    /// The value decoded cleanly but is not a valid message tuple. The
    /// offending bytes have been consumed; the stream remains usable.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The byte stream is not valid MessagePack. Framing cannot be
    /// recovered; the caller should drop the connection.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        msgid: u32,
        method: String,
        params: Value,
    },
    Response {
        msgid: u32,
        error: Value,
        result: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Message {
    pub fn request(msgid: u32, method: &str, params: Vec<Value>) -> Self {
        Message::Request {
            msgid,
            method: method.to_string(),
            params: Value::Array(params),
        }
    }

    pub fn notification(method: &str, params: Vec<Value>) -> Self {
        Message::Notification {
            method: method.to_string(),
            params: Value::Array(params),
        }
    }

    /// A successful response: error is nil.
    pub fn response_ok(msgid: u32, result: Value) -> Self {
        Message::Response {
            msgid,
            error: Value::Nil,
            result,
        }
    }

    /// A failed response: error is a descriptive string, result is nil.
    pub fn response_err(msgid: u32, error: &str) -> Self {
        Message::Response {
            msgid,
            error: Value::from(error),
            result: Value::Nil,
        }
    }

    /// Encode this message into its wire bytes.
    pub fn encode(&self) -> Bytes {
        let value = match self {
            Message::Request {
                msgid,
                method,
                params,
            } => Value::Array(vec![
                Value::from(TYPE_REQUEST),
                Value::from(*msgid),
                Value::from(method.as_str()),
                params.clone(),
            ]),
            Message::Response {
                msgid,
                error,
                result,
            } => Value::Array(vec![
                Value::from(TYPE_RESPONSE),
                Value::from(*msgid),
                error.clone(),
                result.clone(),
            ]),
            Message::Notification { method, params } => Value::Array(vec![
                Value::from(TYPE_NOTIFICATION),
                Value::from(method.as_str()),
                params.clone(),
            ]),
        };
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value)
            .expect("writing msgpack to a Vec does not fail");
        Bytes::from(buf)
    }

    /// Validate a decoded top-level value as a message tuple.
    fn from_value(value: Value) -> Result<Self, RpcError> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(RpcError::Malformed(format!(
                    "top-level value is not an array: {other}"
                )))
            }
        };

        let tag = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Malformed("missing message type tag".into()))?;

        match (tag, items.len()) {
            (TYPE_REQUEST, 4) => {
                let mut it = items.into_iter().skip(1);
                let msgid = take_msgid(it.next())?;
                let method = take_method(it.next())?;
                let params = it.next().unwrap_or(Value::Nil);
                Ok(Message::Request {
                    msgid,
                    method,
                    params,
                })
            }
            (TYPE_RESPONSE, 4) => {
                let mut it = items.into_iter().skip(1);
                let msgid = take_msgid(it.next())?;
                let error = it.next().unwrap_or(Value::Nil);
                let result = it.next().unwrap_or(Value::Nil);
                Ok(Message::Response {
                    msgid,
                    error,
                    result,
                })
            }
            (TYPE_NOTIFICATION, 3) => {
                let mut it = items.into_iter().skip(1);
                let method = take_method(it.next())?;
                let params = it.next().unwrap_or(Value::Nil);
                Ok(Message::Notification { method, params })
            }
            (tag, len) => Err(RpcError::Malformed(format!(
                "invalid message shape: tag {tag}, {len} elements"
            ))),
        }
    }
}

fn take_msgid(value: Option<Value>) -> Result<u32, RpcError> {
    value
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| RpcError::Malformed("msgid is not a u32".into()))
}

fn take_method(value: Option<Value>) -> Result<String, RpcError> {
    match value {
        Some(Value::String(s)) => s
            .into_str()
            .ok_or_else(|| RpcError::Malformed("method is not valid UTF-8".into())),
        _ => Err(RpcError::Malformed("method is not a string".into())),
    }
}

/// Incremental message decoder over a byte stream.
///
/// Feed arbitrary read chunks with [`extend`](Decoder::extend) and drain
/// complete messages with [`next`](Decoder::next). A chunk that ends in the
/// middle of a value is never an error; the remainder is combined with the
/// next chunk.
#[derive(Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered, not-yet-decoded bytes.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete message, if one is buffered.
    ///
    /// `Ok(None)` means more bytes are needed. `Err(Malformed)` has consumed
    /// the offending value and decoding may continue; `Err(CorruptStream)`
    /// means the connection must be dropped.
    pub fn next(&mut self) -> Result<Option<Message>, RpcError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let mut cursor = Cursor::new(&self.buf[..]);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buf.advance(consumed);
                Message::from_value(value).map(Some)
            }
            Err(err) if is_truncated(&err) => Ok(None),
            Err(err) => Err(RpcError::CorruptStream(err.to_string())),
        }
    }
}

/// A decode failure caused by running out of input, as opposed to an
/// invalid marker, means the buffer holds a prefix of a valid value.
fn is_truncated(err: &rmpv::decode::Error) -> bool {
    use rmpv::decode::Error;
    match err {
        Error::InvalidMarkerRead(e) | Error::InvalidDataRead(e) => {
            e.kind() == std::io::ErrorKind::UnexpectedEof
        }
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Result<Option<Message>, RpcError> {
        let mut decoder = Decoder::new();
        decoder.extend(bytes);
        decoder.next()
    }

    #[test]
    fn request_round_trip() {
        let msg = Message::request(7, "spawn_pty", vec![Value::from(24u64), Value::from(80u64)]);
        let encoded = msg.encode();
        let decoded = decode_one(&encoded).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn response_round_trip() {
        let msg = Message::response_ok(1, Value::from("pong"));
        let decoded = decode_one(&msg.encode()).unwrap().unwrap();
        assert_eq!(decoded, msg);

        let err = Message::response_err(2, "session not found");
        let decoded = decode_one(&err.encode()).unwrap().unwrap();
        assert_eq!(decoded, err);
    }

    #[test]
    fn notification_round_trip() {
        let msg = Message::notification(
            "write_pty",
            vec![Value::from(0u64), Value::Binary(b"ls\n".to_vec())],
        );
        let decoded = decode_one(&msg.encode()).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn encode_decode_encode_is_byte_identical() {
        let messages = vec![
            Message::request(0, "ping", vec![]),
            Message::request(u32::MAX, "resize_pty", vec![
                Value::from(0u64),
                Value::from(50u64),
                Value::from(132u64),
            ]),
            Message::response_ok(9, Value::from(3u64)),
            Message::response_err(10, "write failed"),
            Message::notification("key_input", vec![
                Value::from(1u64),
                Value::Map(vec![
                    (Value::from("key"), Value::from("a")),
                    (Value::from("ctrlKey"), Value::Boolean(true)),
                ]),
            ]),
        ];
        for msg in messages {
            let first = msg.encode();
            let decoded = decode_one(&first).unwrap().unwrap();
            let second = decoded.encode();
            assert_eq!(first, second, "re-encoding changed bytes for {msg:?}");
        }
    }

    #[test]
    fn partial_message_is_not_an_error() {
        let msg = Message::request(1, "ping", vec![]);
        let encoded = msg.encode();

        let mut decoder = Decoder::new();
        // Feed one byte at a time; only the final byte completes the message.
        for (i, byte) in encoded.iter().enumerate() {
            decoder.extend(&[*byte]);
            let result = decoder.next().unwrap();
            if i + 1 < encoded.len() {
                assert!(result.is_none(), "message completed early at byte {i}");
            } else {
                assert_eq!(result.unwrap(), msg);
            }
        }
    }

    #[test]
    fn trailing_bytes_carry_over_to_next_message() {
        let first = Message::request(1, "ping", vec![]);
        let second = Message::request(2, "ping", vec![]);
        let mut bytes = first.encode().to_vec();
        bytes.extend_from_slice(&second.encode());

        // Split the concatenation in the middle of the second message.
        let split = bytes.len() - 3;
        let mut decoder = Decoder::new();
        decoder.extend(&bytes[..split]);
        assert_eq!(decoder.next().unwrap().unwrap(), first);
        assert!(decoder.next().unwrap().is_none());
        decoder.extend(&bytes[split..]);
        assert_eq!(decoder.next().unwrap().unwrap(), second);
    }

    #[test]
    fn malformed_tuple_is_recoverable() {
        // A complete msgpack value that is not a message: [9, 9].
        let bad = Value::Array(vec![Value::from(9u64), Value::from(9u64)]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &bad).unwrap();
        let good = Message::request(5, "ping", vec![]);
        bytes.extend_from_slice(&good.encode());

        let mut decoder = Decoder::new();
        decoder.extend(&bytes);
        assert!(matches!(decoder.next(), Err(RpcError::Malformed(_))));
        // The stream stays decodable after the malformed value.
        assert_eq!(decoder.next().unwrap().unwrap(), good);
    }

    #[test]
    fn non_array_top_level_is_malformed() {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &Value::from("hello")).unwrap();
        assert!(matches!(decode_one(&bytes), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn bad_type_tag_is_malformed() {
        let bad = Value::Array(vec![
            Value::from(7u64),
            Value::from(1u64),
            Value::from("ping"),
            Value::Array(vec![]),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &bad).unwrap();
        assert!(matches!(decode_one(&bytes), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn wrong_arity_is_malformed() {
        // A request with only 3 elements.
        let bad = Value::Array(vec![
            Value::from(0u64),
            Value::from(1u64),
            Value::from("ping"),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &bad).unwrap();
        assert!(matches!(decode_one(&bytes), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn reserved_marker_is_corrupt() {
        // 0xc1 is the reserved ("never used") msgpack marker.
        assert!(matches!(
            decode_one(&[0xc1]),
            Err(RpcError::CorruptStream(_))
        ));
    }

    #[test]
    fn empty_decoder_yields_nothing() {
        let mut decoder = Decoder::new();
        assert!(decoder.next().unwrap().is_none());
        assert_eq!(decoder.pending(), 0);
    }
}
