//! Canonical bencode, the encoding spoken on the extension channel.
//!
//! Two layers live here. `Bencode` is the raw form, where every string is a
//! byte string; the extended handshake is read at this level because it
//! carries binary keys and signatures. `Value` is the deep-decoded form used
//! for application messages, where every byte string has been decoded as
//! UTF-8 text.
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

use snafu::{ensure, OptionExt, Snafu};

/// A raw bencoded value.
#[derive(Clone, PartialEq, Eq)]
pub enum Bencode {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

/// A bencoded value whose byte strings have been decoded to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Text(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

// Input nested deeper than this is rejected rather than recursed into.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum DecodeError {
    #[snafu(display("unexpected end of input at offset {}", offset))]
    UnexpectedEof { offset: usize },

    #[snafu(display("unexpected byte {:#04x} at offset {}", byte, offset))]
    UnexpectedByte { byte: u8, offset: usize },

    #[snafu(display("malformed integer at offset {}", offset))]
    BadInteger { offset: usize },

    #[snafu(display("dictionary keys out of order at offset {}", offset))]
    UnsortedKeys { offset: usize },

    #[snafu(display("input nested deeper than {} levels", MAX_DEPTH))]
    TooDeep,

    #[snafu(display("{} trailing bytes after value", count))]
    TrailingBytes { count: usize },

    #[snafu(display("byte string is not valid UTF-8"))]
    InvalidUtf8,
}

/// Decode exactly one value spanning the whole input.
pub fn decode(input: &[u8]) -> Result<Bencode, DecodeError> {
    let mut decoder = Decoder { input, pos: 0 };
    let value = decoder.value(0)?;
    let count = input.len() - decoder.pos;
    ensure!(count == 0, TrailingBytesSnafu { count });
    Ok(value)
}

/// Decode a value and convert every byte string to text.
pub fn decode_text(input: &[u8]) -> Result<Value, DecodeError> {
    decode(input)?.into_text()
}

pub fn encode(value: &Bencode) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Bencode, out: &mut Vec<u8>) {
    match value {
        Bencode::Integer(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Bencode::Bytes(bytes) => write_bytes(bytes, out),
        Bencode::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Bencode::Dict(entries) => {
            out.push(b'd');
            for (key, value) in entries {
                write_bytes(key, out);
                encode_into(value, out);
            }
            out.push(b'e');
        }
    }
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, DecodeError> {
        self.input
            .get(self.pos)
            .copied()
            .context(UnexpectedEofSnafu { offset: self.pos })
    }

    fn value(&mut self, depth: usize) -> Result<Bencode, DecodeError> {
        ensure!(depth < MAX_DEPTH, TooDeepSnafu);
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                Ok(Bencode::Integer(self.integer(b'e')?))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Bencode::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut entries = BTreeMap::new();
                let mut last_key: Option<Vec<u8>> = None;
                while self.peek()? != b'e' {
                    let offset = self.pos;
                    let key = self.bytes()?;
                    if let Some(last) = &last_key {
                        ensure!(*last < key, UnsortedKeysSnafu { offset });
                    }
                    let value = self.value(depth + 1)?;
                    last_key = Some(key.clone());
                    entries.insert(key, value);
                }
                self.pos += 1;
                Ok(Bencode::Dict(entries))
            }
            b'0'..=b'9' => Ok(Bencode::Bytes(self.bytes()?)),
            byte => UnexpectedByteSnafu {
                byte,
                offset: self.pos,
            }
            .fail(),
        }
    }

    // Reads a canonical decimal integer up to `terminator`: no sign other
    // than a single leading '-', no leading zeros, no "-0".
    fn integer(&mut self, terminator: u8) -> Result<i64, DecodeError> {
        let offset = self.pos;
        let end = self.input[offset..]
            .iter()
            .position(|&b| b == terminator)
            .map(|i| offset + i)
            .context(UnexpectedEofSnafu {
                offset: self.input.len(),
            })?;
        let digits = &self.input[offset..end];
        let (negative, body) = match digits.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, digits),
        };
        let canonical = !body.is_empty()
            && body.iter().all(u8::is_ascii_digit)
            && !(body[0] == b'0' && (body.len() > 1 || negative));
        ensure!(canonical, BadIntegerSnafu { offset });
        let n = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .context(BadIntegerSnafu { offset })?;
        self.pos = end + 1;
        Ok(n)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let offset = self.pos;
        let byte = self.peek()?;
        if !byte.is_ascii_digit() {
            return UnexpectedByteSnafu { byte, offset }.fail();
        }
        let len = self.integer(b':')?;
        let len = usize::try_from(len)
            .ok()
            .context(BadIntegerSnafu { offset })?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .context(UnexpectedEofSnafu {
                offset: self.input.len(),
            })?;
        let bytes = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }
}

impl Bencode {
    /// Deep-convert all byte strings, dictionary keys included, to text.
    pub fn into_text(self) -> Result<Value, DecodeError> {
        Ok(match self {
            Bencode::Integer(n) => Value::Integer(n),
            Bencode::Bytes(bytes) => Value::Text(utf8(bytes)?),
            Bencode::List(items) => Value::List(
                items
                    .into_iter()
                    .map(Bencode::into_text)
                    .collect::<Result<_, _>>()?,
            ),
            Bencode::Dict(entries) => Value::Dict(
                entries
                    .into_iter()
                    .map(|(key, value)| Ok((utf8(key)?, value.into_text()?)))
                    .collect::<Result<_, DecodeError>>()?,
            ),
        })
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Bencode::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Bencode>> {
        match self {
            Bencode::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String, DecodeError> {
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}

// Byte strings are mostly printable here, so show them as text when possible.
impl fmt::Debug for Bencode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bencode::Integer(n) => write!(f, "{}", n),
            Bencode::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => write!(f, "{:?}", text),
                Err(_) => write!(f, "<{}>", hex::encode(bytes)),
            },
            Bencode::List(items) => f.debug_list().entries(items).finish(),
            Bencode::Dict(entries) => f
                .debug_map()
                .entries(
                    entries
                        .iter()
                        .map(|(k, v)| (String::from_utf8_lossy(k), v)),
                )
                .finish(),
        }
    }
}

impl From<Value> for Bencode {
    fn from(value: Value) -> Self {
        match value {
            Value::Integer(n) => Bencode::Integer(n),
            Value::Text(text) => Bencode::Bytes(text.into_bytes()),
            Value::List(items) => Bencode::List(items.into_iter().map(Bencode::from).collect()),
            Value::Dict(entries) => Bencode::Dict(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.into_bytes(), Bencode::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Value {
    /// Build a dictionary from `(key, value)` pairs.
    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dict(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&Bencode::from(self.clone()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}
