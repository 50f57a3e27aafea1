use bytes::{Buf, Bytes, BytesMut};
use clap::ValueEnum;
use itertools::Itertools;
use num_traits::Zero;
use std::collections::HashMap;
use std::env;
use std::io::Cursor;
use std::str::FromStr;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::frame::{self, Frame};
use crate::{Error, Result};

/// How the typed accessors react to a reply they cannot decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DecodeMode {
    /// Every failure is returned to the caller.
    #[default]
    Strict,
    /// Failures collapse to a zero value: `0`, empty bytes or an empty collection. Error replies
    /// are returned as their message text, except by [`FrameCodec::integer`] which yields `0`.
    Lenient,
}

/// Translates between requests, reply frames and RESP bytes.
///
/// The accessors (`simple_string`, `integer`, `array`, ...) each expect one complete reply frame,
/// as returned by [`crate::Connection::read_reply`].
#[derive(Clone, Debug)]
pub struct FrameCodec {
    mode: DecodeMode,
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DecodeMode::Strict, FrameCodec::max_frame_size_from_env())
    }
}

impl FrameCodec {
    pub fn new(mode: DecodeMode, max_frame_size: usize) -> FrameCodec {
        FrameCodec {
            mode,
            max_frame_size,
        }
    }

    pub fn lenient() -> FrameCodec {
        FrameCodec {
            mode: DecodeMode::Lenient,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn max_frame_size_from_env() -> usize {
        match env::var("MAX_FRAME_SIZE") {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                warn!(%value, "MAX_FRAME_SIZE is not a number, using the default");
                DEFAULT_MAX_FRAME_SIZE
            }),
            Err(_) => DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Encodes a text command. Empty arguments are dropped.
    pub fn encode<I, A>(&self, command: &str, args: I) -> Result<Bytes>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        Command::new(command)
            .args_from(args)
            .serialize()
            .map(Bytes::from)
    }

    /// Encodes a command with binary arguments. Every argument is emitted, empty or not.
    pub fn encode_bytes<I, A>(&self, command: &str, args: I) -> Result<Bytes>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        args.into_iter()
            .fold(Command::new(command), |cmd, arg| {
                cmd.raw(Bytes::copy_from_slice(arg.as_ref()))
            })
            .serialize()
            .map(Bytes::from)
    }

    /// Decodes the first frame in `data`, whatever its type.
    pub fn decode_reply(&self, data: &[u8]) -> Result<Frame> {
        let mut cursor = Cursor::new(data);
        Ok(Frame::parse(&mut cursor)?)
    }

    /// Strips the tag and terminator of a simple string reply.
    pub fn simple_string(&self, data: &[u8]) -> Result<Bytes> {
        let result = self.decode_reply(data).and_then(|frame| match frame {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            frame => Err(unexpected("simple string", frame)),
        });
        self.fallback(self.error_as_value(result), Bytes::new)
    }

    pub fn simple_error(&self, data: &[u8]) -> Result<Bytes> {
        let result = self.decode_reply(data).and_then(|frame| match frame {
            Frame::Error(message) => Ok(Bytes::from(message)),
            frame => Err(unexpected("simple error", frame)),
        });
        self.fallback(result, Bytes::new)
    }

    /// Returns the payload of a bulk string reply, or `None` for the null bulk string.
    pub fn bulk_string(&self, data: &[u8]) -> Result<Option<Bytes>> {
        let result = self.decode_reply(data).and_then(|frame| match frame {
            Frame::Bulk(bytes) => Ok(Some(bytes)),
            Frame::Null => Ok(None),
            frame => Err(unexpected("bulk string", frame)),
        });
        self.fallback(self.error_as_value(result), || Some(Bytes::new()))
    }

    pub fn integer(&self, data: &[u8]) -> Result<i64> {
        let result = self.decode_reply(data).and_then(|frame| match frame {
            Frame::Integer(i) => Ok(i),
            frame => Err(unexpected("integer", frame)),
        });
        self.fallback(result, || 0)
    }

    /// Returns the elements of an array, set or push reply. Nested aggregates are decoded
    /// recursively; a null array has no elements.
    pub fn array(&self, data: &[u8]) -> Result<Vec<Frame>> {
        let result = self.decode_reply(data).and_then(|frame| match frame {
            Frame::Array(elements) | Frame::Set(elements) | Frame::Push(elements) => Ok(elements),
            Frame::Null => Ok(Vec::new()),
            frame => Err(unexpected("array", frame)),
        });
        self.fallback(result, Vec::new)
    }

    /// Like [`FrameCodec::array`], with every element rendered as text.
    pub fn strings(&self, data: &[u8]) -> Result<Vec<String>> {
        let result = self.array(data).and_then(|elements| {
            elements
                .into_iter()
                .map(frame_to_string)
                .collect::<Result<Vec<_>>>()
        });
        self.fallback(result, Vec::new)
    }

    /// Decodes a map reply, or a flat array whose elements alternate between keys and values. A
    /// trailing key without a value is ignored.
    pub fn hash_map(&self, data: &[u8]) -> Result<HashMap<String, String>> {
        let result = self.decode_reply(data).and_then(|frame| match frame {
            Frame::Map(pairs) => pairs
                .into_iter()
                .map(|(key, value)| Ok((frame_to_string(key)?, frame_to_string(value)?)))
                .collect::<Result<HashMap<_, _>>>(),
            Frame::Array(elements) | Frame::Set(elements) => elements
                .into_iter()
                .map(frame_to_string)
                .collect::<Result<Vec<_>>>()
                .map(|strings| {
                    strings
                        .into_iter()
                        .tuples::<(String, String)>()
                        .collect::<HashMap<_, _>>()
                }),
            Frame::Null => Ok(HashMap::new()),
            frame => Err(unexpected("map", frame)),
        });
        self.fallback(result, HashMap::new)
    }

    /// The flat scan older callers depend on. Every line of the reply that is not an aggregate or
    /// bulk header becomes one element. Integers lose their `:` tag, other scalars keep theirs.
    /// Nested aggregates are flattened rather than decoded.
    pub fn legacy_array(&self, data: &[u8]) -> Vec<Bytes> {
        let mut elements = Vec::new();
        let mut from = 0;
        let mut to = 0;

        while to < data.len() {
            if data[to] == b'\r' {
                if data[from] != b'*' && data[from] != b'$' {
                    let start = if data[from] == b':' { from + 1 } else { from };
                    elements.push(Bytes::copy_from_slice(&data[start..to]));
                }
                from = to + 2;
                to += 1;
            }
            to += 1;
        }

        elements
    }

    /// Parses a number out of a payload that may carry quotes or padding, e.g. `" 42"`.
    pub fn to_long(&self, data: &[u8]) -> Result<i64> {
        self.parse_number(data)
    }

    pub fn to_int(&self, data: &[u8]) -> Result<i32> {
        self.parse_number(data)
    }

    fn parse_number<T: FromStr + Zero>(&self, data: &[u8]) -> Result<T> {
        let text = String::from_utf8_lossy(data).replace('"', "");
        let result = text.trim().parse::<T>().map_err(|_| {
            Error::Protocol(frame::Error::Invalid(format!(
                "expected a number, got {:?}",
                text
            )))
        });
        self.fallback(result, T::zero)
    }

    /// Cuts exactly one complete raw frame off the front of `src`.
    pub fn split_frame(&self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        self.check_frame_size(src)?;

        let mut cursor = Cursor::new(&src[..]);
        match Frame::parse(&mut cursor) {
            Ok(_) => {}
            Err(frame::Error::Incomplete) => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let position = frame_end(&cursor)?;
        Ok(Some(src.split_to(position).freeze()))
    }

    // Check the frame size limit to avoid buffering an unbounded reply.
    fn check_frame_size(&self, src: &BytesMut) -> Result<()> {
        if src.len() > self.max_frame_size {
            return Err(frame::Error::Invalid(format!(
                "frame size exceeds limit of {} bytes",
                self.max_frame_size
            ))
            .into());
        }
        Ok(())
    }

    fn error_as_value<T>(&self, result: Result<T>) -> Result<T>
    where
        T: From<Bytes>,
    {
        match result {
            Err(Error::Server(message)) if self.mode == DecodeMode::Lenient => {
                Ok(T::from(Bytes::from(message)))
            }
            result => result,
        }
    }

    fn fallback<T>(&self, result: Result<T>, default: impl FnOnce() -> T) -> Result<T> {
        match result {
            Err(err) if self.mode == DecodeMode::Lenient && !err.is_connection_error() => {
                debug!(%err, "lenient decode fell back to the default value");
                Ok(default())
            }
            result => result,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.check_frame_size(src)?;

        let mut cursor = Cursor::new(&src[..]);
        let frame = match Frame::parse(&mut cursor) {
            Ok(frame) => frame,
            Err(frame::Error::Incomplete) => return Ok(None), // Not enough data to parse a frame.
            Err(err) => return Err(err.into()),
        };

        let position = frame_end(&cursor)?;

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }
}

fn frame_end(cursor: &Cursor<&[u8]>) -> Result<usize> {
    usize::try_from(cursor.position())
        .map_err(|_| frame::Error::Invalid("cursor position is too large".to_string()).into())
}

fn unexpected(expected: &'static str, actual: Frame) -> Error {
    match actual {
        Frame::Error(message) => Error::Server(message),
        actual => frame::Error::Unexpected { expected, actual }.into(),
    }
}

fn frame_to_string(frame: Frame) -> Result<String> {
    match frame.as_bytes() {
        Some(bytes) => String::from_utf8(bytes.to_vec())
            .map_err(|_| frame::Error::Invalid("element is not valid utf-8".to_string()).into()),
        None => Err(frame::Error::Unexpected {
            expected: "scalar element",
            actual: frame,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    fn strict() -> FrameCodec {
        FrameCodec::new(DecodeMode::Strict, DEFAULT_MAX_FRAME_SIZE)
    }

    fn lenient() -> FrameCodec {
        FrameCodec::new(DecodeMode::Lenient, DEFAULT_MAX_FRAME_SIZE)
    }

    #[test]
    fn encode_set() {
        let bytes = strict().encode("SET", ["k", "v"]).unwrap();

        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn encode_drops_empty_arguments() {
        let bytes = strict().encode("SET", ["k", "", "v"]).unwrap();

        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn encode_bytes_keeps_every_argument() {
        let bytes = strict()
            .encode_bytes("SET", [&b"k"[..], &b""[..]])
            .unwrap();

        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[test]
    fn encode_rejects_empty_command() {
        let result = strict().encode("", ["k"]);

        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[test]
    fn decode_of_encode_keeps_non_empty_arguments_in_order() {
        let codec = strict();
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let args: Vec<String> = (0..rng.gen_range(0..8))
                .map(|_| {
                    let len = if rng.gen_bool(0.3) { 0 } else { rng.gen_range(1..16) };
                    (&mut rng)
                        .sample_iter(&Alphanumeric)
                        .take(len)
                        .map(char::from)
                        .collect()
                })
                .collect();

            let bytes = codec.encode("LPUSH", &args).unwrap();
            let decoded = codec.strings(&bytes).unwrap();

            let mut expected = vec!["LPUSH".to_string()];
            expected.extend(args.into_iter().filter(|arg| !arg.is_empty()));

            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn simple_string() {
        assert_eq!(strict().simple_string(b"+OK\r\n").unwrap(), Bytes::from("OK"));
    }

    #[test]
    fn simple_string_error_reply() {
        let result = strict().simple_string(b"-ERR wrong type\r\n");

        assert!(matches!(result, Err(Error::Server(ref msg)) if msg == "ERR wrong type"));
        assert_eq!(
            lenient().simple_string(b"-ERR wrong type\r\n").unwrap(),
            Bytes::from("ERR wrong type")
        );
    }

    #[test]
    fn simple_error() {
        assert_eq!(
            strict().simple_error(b"-Error message\r\n").unwrap(),
            Bytes::from("Error message")
        );
        assert!(strict().simple_error(b"+OK\r\n").is_err());
        assert_eq!(lenient().simple_error(b"+OK\r\n").unwrap(), Bytes::new());
    }

    #[test]
    fn bulk_string() {
        assert_eq!(
            strict().bulk_string(b"$5\r\nhello\r\n").unwrap(),
            Some(Bytes::from("hello"))
        );
    }

    #[test]
    fn bulk_string_null_is_not_empty() {
        assert_eq!(strict().bulk_string(b"$-1\r\n").unwrap(), None);
        assert_eq!(lenient().bulk_string(b"$-1\r\n").unwrap(), None);
        assert_eq!(
            strict().bulk_string(b"$0\r\n\r\n").unwrap(),
            Some(Bytes::new())
        );
    }

    #[test]
    fn bulk_string_error_reply() {
        assert!(matches!(
            strict().bulk_string(b"-ERR no\r\n"),
            Err(Error::Server(_))
        ));
        assert_eq!(
            lenient().bulk_string(b"-ERR no\r\n").unwrap(),
            Some(Bytes::from("ERR no"))
        );
    }

    #[test]
    fn integer() {
        assert_eq!(strict().integer(b":42\r\n").unwrap(), 42);
        assert_eq!(strict().integer(b":-7\r\n").unwrap(), -7);
    }

    #[test]
    fn integer_malformed() {
        assert!(matches!(
            strict().integer(b""),
            Err(Error::Protocol(frame::Error::Incomplete))
        ));
        assert!(strict().integer(b":4x\r\n").is_err());

        assert_eq!(lenient().integer(b"").unwrap(), 0);
        assert_eq!(lenient().integer(b":4x\r\n").unwrap(), 0);
        assert_eq!(lenient().integer(b"-ERR\r\n").unwrap(), 0);
    }

    #[test]
    fn array_of_simple_strings() {
        let elements = strict().array(b"*2\r\n+first\r\n+second\r\n").unwrap();

        assert_eq!(
            elements,
            vec![
                Frame::Simple("first".to_string()),
                Frame::Simple("second".to_string())
            ]
        );
    }

    #[test]
    fn array_nested() {
        let elements = strict()
            .array(b"*2\r\n$1\r\na\r\n*2\r\n:1\r\n:2\r\n")
            .unwrap();

        assert_eq!(
            elements,
            vec![
                Frame::Bulk(Bytes::from("a")),
                Frame::Array(vec![Frame::Integer(1), Frame::Integer(2)])
            ]
        );
    }

    #[test]
    fn array_malformed() {
        assert!(strict().array(b":1\r\n").is_err());
        assert!(lenient().array(b":1\r\n").unwrap().is_empty());
        assert!(strict().array(b"*-1\r\n").unwrap().is_empty());
    }

    #[test]
    fn array_too_deep() {
        let mut data = b"*1\r\n".repeat(200_000);
        data.extend_from_slice(b":1\r\n");

        assert!(matches!(strict().array(&data), Err(Error::Protocol(_))));
        assert!(lenient().array(&data).unwrap().is_empty());

        let mut buffer = BytesMut::from(&data[..]);
        assert!(strict().decode(&mut buffer).is_err());
    }

    #[test]
    fn strings() {
        let strings = strict()
            .strings(b"*3\r\n$3\r\nfoo\r\n:12\r\n+bar\r\n")
            .unwrap();

        assert_eq!(strings, vec!["foo", "12", "bar"]);
    }

    #[test]
    fn strings_rejects_nested_elements() {
        assert!(strict().strings(b"*1\r\n*0\r\n").is_err());
        assert!(lenient().strings(b"*1\r\n*0\r\n").unwrap().is_empty());
    }

    #[test]
    fn hash_map_from_flat_array() {
        let map = strict()
            .hash_map(b"*5\r\n$4\r\nname\r\n$3\r\nbob\r\n$3\r\nage\r\n:30\r\n$4\r\nlone\r\n")
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map["name"], "bob");
        assert_eq!(map["age"], "30");
    }

    #[test]
    fn hash_map_from_map() {
        let map = strict()
            .hash_map(b"%2\r\n+first\r\n:1\r\n+second\r\n:2\r\n")
            .unwrap();

        assert_eq!(map["first"], "1");
        assert_eq!(map["second"], "2");
    }

    #[test]
    fn hash_map_error_reply() {
        assert!(strict().hash_map(b"-WRONGTYPE\r\n").is_err());
        assert!(lenient().hash_map(b"-WRONGTYPE\r\n").unwrap().is_empty());
    }

    #[test]
    fn legacy_array_flattens_scalars() {
        let codec = strict();

        assert_eq!(
            codec.legacy_array(b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n:5\r\n"),
            vec![
                Bytes::from("message"),
                Bytes::from("news"),
                Bytes::from("5")
            ]
        );
        assert_eq!(
            codec.legacy_array(b"*2\r\n+first\r\n+second\r\n"),
            vec![Bytes::from("+first"), Bytes::from("+second")]
        );
        assert!(codec.legacy_array(b"").is_empty());
    }

    #[test]
    fn to_long_strips_quotes_and_whitespace() {
        assert_eq!(strict().to_long(b"\" 42 \"").unwrap(), 42);
        assert_eq!(strict().to_long(b"-9").unwrap(), -9);
        assert_eq!(strict().to_int(b" \"7\"\n").unwrap(), 7);
    }

    #[test]
    fn to_long_malformed() {
        assert!(strict().to_long(b"abc").is_err());
        assert!(strict().to_long(b"").is_err());
        assert_eq!(lenient().to_long(b"abc").unwrap(), 0);
        assert_eq!(lenient().to_int(b"").unwrap(), 0);
    }

    #[test]
    fn split_frame_takes_one_frame() {
        let mut buffer = BytesMut::from(&b"+OK\r\n:1\r\n$3\r\nfo"[..]);
        let codec = strict();

        assert_eq!(
            codec.split_frame(&mut buffer).unwrap(),
            Some(Bytes::from("+OK\r\n"))
        );
        assert_eq!(
            codec.split_frame(&mut buffer).unwrap(),
            Some(Bytes::from(":1\r\n"))
        );
        assert_eq!(codec.split_frame(&mut buffer).unwrap(), None);
        assert_eq!(&buffer[..], b"$3\r\nfo");
    }

    #[test]
    fn decoder_rejects_oversized_buffers() {
        let mut codec = FrameCodec::new(DecodeMode::Strict, 8);
        let mut buffer = BytesMut::from(&b"$10\r\n0123456789\r\n"[..]);

        assert!(matches!(
            codec.decode(&mut buffer),
            Err(Error::Protocol(frame::Error::Invalid(_)))
        ));
    }

    #[test]
    fn decoder_waits_for_complete_frames() {
        let mut codec = strict();
        let mut buffer = BytesMut::from(&b">3\r\n+message\r\n+news"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(b"\r\n+hello\r\n");

        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(Frame::Push(vec![
                Frame::Simple("message".to_string()),
                Frame::Simple("news".to_string()),
                Frame::Simple("hello".to_string()),
            ]))
        );
        assert!(buffer.is_empty());
    }
}
