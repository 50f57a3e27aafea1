// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::Buf;
use bytes::Bytes;
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

pub(crate) static CRLF: &[u8; 2] = b"\r\n";

/// Aggregates nested deeper than this are rejected before they can exhaust the stack.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    /// The tag is valid RESP3 but this client does not decode it.
    #[error("unsupported frame data type: {}", char::from(*.0))]
    UnsupportedDataType(u8),
    #[error("invalid frame format; {0}")]
    Invalid(String),
    #[error("unexpected frame; expected {expected}, got {actual:?}")]
    Unexpected {
        expected: &'static str,
        actual: Frame,
    },
}

/// A decoded reply value.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
    Map(Vec<(Frame, Frame)>),
    Set(Vec<Frame>),
    Push(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_at(src, 0)
    }

    fn parse_at(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let bytes = get_frame_bytes(src)?.to_vec();
                let string = String::from_utf8(bytes)?;
                Ok(Frame::Simple(string))
            }
            DataType::SimpleError => {
                let bytes = get_frame_bytes(src)?.to_vec();
                let string = String::from_utf8(bytes)?;
                Ok(Frame::Error(string))
            }
            DataType::Integer => {
                let bytes = get_frame_bytes(src)?;
                let integer = parse_decimal::<i64>(bytes)?;
                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = match get_length(src)? {
                    Some(length) => length,
                    None => return Ok(Frame::Null),
                };

                let data = get_exact_bytes(src, length)?;

                Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => match get_length(src)? {
                Some(length) => Ok(Frame::Array(parse_elements(src, length, depth)?)),
                None => Ok(Frame::Null),
            },
            // ~<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Set => match get_length(src)? {
                Some(length) => Ok(Frame::Set(parse_elements(src, length, depth)?)),
                None => Ok(Frame::Null),
            },
            // ><number-of-elements>\r\n<element-1>...<element-n>
            DataType::Push => match get_length(src)? {
                Some(length) => Ok(Frame::Push(parse_elements(src, length, depth)?)),
                None => Ok(Frame::Null),
            },
            // %<number-of-entries>\r\n<key-1><value-1>...<key-n><value-n>
            DataType::Map => {
                let length = match get_length(src)? {
                    Some(length) => length,
                    None => return Ok(Frame::Null),
                };

                let depth = nested(depth)?;
                let mut pairs = Vec::with_capacity(length.min(1024));
                for _ in 0..length {
                    let key = Self::parse_at(src, depth)?;
                    let value = Self::parse_at(src, depth)?;
                    pairs.push((key, value));
                }

                Ok(Frame::Map(pairs))
            }
            data_type => Err(Error::UnsupportedDataType(u8::from(data_type))),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleString));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Error(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleError));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Integer(i) => {
                let digits = i.to_string();
                let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
                bytes.push(u8::from(DataType::Integer));
                bytes.extend_from_slice(digits.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(bytes) => {
                let length_str = bytes.len().to_string();
                let mut result = Vec::with_capacity(
                    1 + length_str.len() + CRLF.len() + bytes.len() + CRLF.len(),
                );
                result.push(u8::from(DataType::BulkString));
                result.extend_from_slice(length_str.as_bytes());
                result.extend_from_slice(CRLF);
                result.extend_from_slice(bytes);
                result.extend_from_slice(CRLF);
                result
            }
            // RESP2 peers only understand the null bulk string.
            Frame::Null => b"$-1\r\n".to_vec(),
            Frame::Array(arr) => serialize_aggregate(DataType::Array, arr),
            Frame::Set(set) => serialize_aggregate(DataType::Set, set),
            Frame::Push(push) => serialize_aggregate(DataType::Push, push),
            Frame::Map(pairs) => {
                let length_str = pairs.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
                bytes.push(u8::from(DataType::Map));
                bytes.extend_from_slice(length_str.as_bytes());
                bytes.extend_from_slice(CRLF);
                for (key, value) in pairs {
                    bytes.extend(key.serialize());
                    bytes.extend(value.serialize());
                }
                bytes
            }
        }
    }

    /// The payload of a scalar frame. Integers are rendered as their decimal text.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            Frame::Simple(s) | Frame::Error(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Frame::Bulk(bytes) => Some(bytes.clone()),
            Frame::Integer(i) => Some(Bytes::from(i.to_string())),
            _ => None,
        }
    }

    /// The elements of any sequence-like aggregate.
    pub fn into_elements(self) -> Result<Vec<Frame>, Error> {
        match self {
            Frame::Array(elements) | Frame::Set(elements) | Frame::Push(elements) => Ok(elements),
            frame => Err(Error::Unexpected {
                expected: "array, set or push",
                actual: frame,
            }),
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => write_aggregate(f, '*', arr),
            Frame::Set(set) => write_aggregate(f, '~', set),
            Frame::Push(push) => write_aggregate(f, '>', push),
            Frame::Map(pairs) => {
                write!(f, "%{}\r\n", pairs.len())?;
                for (key, value) in pairs {
                    write!(f, "{}\r\n{}\r\n", key, value)?;
                }
                Ok(())
            }
        }
    }
}

fn write_aggregate(f: &mut fmt::Formatter<'_>, tag: char, frames: &[Frame]) -> fmt::Result {
    write!(f, "{}{}\r\n", tag, frames.len())?;
    for frame in frames {
        write!(f, "{}\r\n", frame)?;
    }
    Ok(())
}

fn serialize_aggregate(data_type: DataType, frames: &[Frame]) -> Vec<u8> {
    let length_str = frames.len().to_string();
    let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
    bytes.push(u8::from(data_type));
    bytes.extend_from_slice(length_str.as_bytes());
    bytes.extend_from_slice(CRLF);
    for frame in frames {
        bytes.extend(frame.serialize());
    }
    bytes
}

fn parse_elements(
    src: &mut Cursor<&[u8]>,
    length: usize,
    depth: usize,
) -> Result<Vec<Frame>, Error> {
    let depth = nested(depth)?;
    // The declared count comes from the peer, don't trust it for the allocation.
    let mut frames = Vec::with_capacity(length.min(1024));
    for _ in 0..length {
        frames.push(Frame::parse_at(src, depth)?);
    }
    Ok(frames)
}

fn nested(depth: usize) -> Result<usize, Error> {
    if depth >= MAX_DEPTH {
        return Err(Error::Invalid(format!(
            "nesting too deep; more than {} levels",
            MAX_DEPTH
        )));
    }
    Ok(depth + 1)
}

/// Reads an aggregate or bulk length prefix. `-1` denotes null.
fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    let length = parse_decimal::<isize>(get_frame_bytes(src)?)?;

    match length {
        -1 => Ok(None),
        length if length < 0 => Err(Error::Invalid(format!("negative length {}", length))),
        length => Ok(Some(length as usize)),
    }
}

fn parse_decimal<T: std::str::FromStr>(bytes: &[u8]) -> Result<T, Error> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| {
            Error::Invalid(format!(
                "expected a decimal number, got {:?}",
                String::from_utf8_lossy(bytes)
            ))
        })
}

fn get_frame_bytes<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len();

    let frame_end_position = src.get_ref()[start..end]
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)
        .map(|index| start + index)?;

    src.set_position((frame_end_position + CRLF.len()) as u64);

    Ok(&src.get_ref()[start..frame_end_position])
}

/// Reads exactly `length` payload bytes followed by CRLF. Payloads may contain CRLF themselves.
fn get_exact_bytes<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buffer = *src.get_ref();

    let end = start
        .checked_add(length)
        .ok_or_else(|| Error::Invalid("bulk length overflow".to_string()))?;

    if buffer.len() < end + CRLF.len() {
        return Err(Error::Incomplete);
    }

    if &buffer[end..end + CRLF.len()] != CRLF {
        return Err(Error::Invalid(format!(
            "bulk payload is not {} bytes long",
            length
        )));
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buffer[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum DataType {
    SimpleString,   // '+'
    BulkString,     // '$'
    VerbatimString, // '='
    SimpleError,    // '-'
    BulkError,      // '!'
    Boolean,        // '#'
    Integer,        // ':'
    Double,         // ','
    BigNumber,      // '('
    Array,          // '*'
    Map,            // '%'
    Set,            // '~'
    Push,           // '>'
    Null,           // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'!' => Ok(Self::BulkError),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            b'#' => Ok(Self::Boolean),
            b',' => Ok(Self::Double),
            b'(' => Ok(Self::BigNumber),
            b'=' => Ok(Self::VerbatimString),
            b'%' => Ok(Self::Map),
            b'~' => Ok(Self::Set),
            b'>' => Ok(Self::Push),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::BulkError => b'!',
            DataType::Array => b'*',
            DataType::Null => b'_',
            DataType::Boolean => b'#',
            DataType::Double => b',',
            DataType::BigNumber => b'(',
            DataType::VerbatimString => b'=',
            DataType::Map => b'%',
            DataType::Set => b'~',
            DataType::Push => b'>',
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "invalid utf-8 in simple frame".into()
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Invalid(src)
    }
}
