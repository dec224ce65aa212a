//! Little-endian binary codec for packet payload fields.
//!
//! The wire vocabulary is small: fixed-width integers and floats, a single
//! ASCII character, a `u32`-length-prefixed string, and the zero-width
//! [`Format::Nul`] used by id-only packets. Decoding works on a byte cursor
//! (`&mut &[u8]`) that advances past whatever was consumed, so a failed
//! decode leaves the caller's original slice untouched.
//!
//! ```rust
//! use cartpole_rig::codec::{Format, Value, pack, unpack};
//!
//! let bytes = pack(Format::String, &Value::Str("hello".into())).unwrap();
//! let mut cursor = bytes.as_slice();
//! assert_eq!(unpack(Format::String, &mut cursor).unwrap(), Value::Str("hello".into()));
//! assert!(cursor.is_empty());
//! ```

use thiserror::Error;

/// Carriage return + line feed terminating message packets.
pub const CRLF: &[u8; 2] = b"\r\n";

/// Upper bound on string payload length accepted from the wire.
///
/// A corrupted length prefix would otherwise look like a very long string
/// that is still arriving.
pub const MAX_STRING_LEN: usize = 4096;

/// Errors raised while decoding (or encoding) payload fields.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("short read: needed {needed} bytes, {available} available")]
    ShortRead { needed: usize, available: usize },

    #[error("string length {length} exceeds limit of {max} bytes", max = MAX_STRING_LEN)]
    StringTooLong { length: usize },

    #[error("invalid string payload: {details}")]
    InvalidString { details: String },

    #[error("byte {byte:#04x} is not an ASCII character")]
    InvalidAscii { byte: u8 },

    #[error("expected CRLF terminator, found {found:02X?}")]
    InvalidTerminator { found: [u8; 2] },

    #[error("unknown {kind} specifier {value:#04x}")]
    UnknownSpecifier { kind: &'static str, value: u8 },

    #[error("invalid {kind} value {value:?}")]
    InvalidEnum { kind: &'static str, value: char },

    #[error("value {value:?} does not match format {format:?}")]
    FormatMismatch { format: Format, value: Value },
}

/// Field formats understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    AsciiChar,
    String,
    Nul,
}

impl Format {
    /// Size in bytes of a fixed-width format; `None` for [`Format::String`].
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Format::Nul => Some(0),
            Format::Int8 | Format::UInt8 | Format::AsciiChar => Some(1),
            Format::Int16 | Format::UInt16 => Some(2),
            Format::Int32 | Format::UInt32 | Format::Float32 => Some(4),
            Format::Int64 | Format::UInt64 | Format::Float64 => Some(8),
            Format::String => None,
        }
    }

    /// Number of bytes this format occupies when encoding `value`.
    pub fn size_of(self, value: &Value) -> usize {
        match (self, value) {
            (Format::String, Value::Str(s)) => 4 + s.len(),
            _ => self.fixed_size().unwrap_or(4),
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    Str(String),
    Nul,
}

/// Encodes `value` as `format`.
pub fn pack(format: Format, value: &Value) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(format.size_of(value));
    pack_into(format, value, &mut out)?;
    Ok(out)
}

/// Appends the encoding of `value` to `out`.
pub fn pack_into(format: Format, value: &Value, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    match (format, value) {
        (Format::Int8, Value::I8(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::UInt8, Value::U8(v)) => out.push(*v),
        (Format::Int16, Value::I16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::UInt16, Value::U16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::Int32, Value::I32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::UInt32, Value::U32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::Int64, Value::I64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::UInt64, Value::U64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::Float32, Value::F32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::Float64, Value::F64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Format::AsciiChar, Value::Char(c)) if c.is_ascii() => out.push(*c as u8),
        (Format::String, Value::Str(s)) => {
            if s.len() > MAX_STRING_LEN {
                return Err(DecodeError::StringTooLong { length: s.len() });
            }
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        (Format::Nul, Value::Nul) => {}
        _ => return Err(DecodeError::FormatMismatch { format, value: value.clone() }),
    }
    Ok(())
}

/// Decodes one `format` field from the front of `source`, advancing it.
pub fn unpack(format: Format, source: &mut &[u8]) -> Result<Value, DecodeError> {
    let mut reader = Reader::new(*source);
    let value = match format {
        Format::Int8 => Value::I8(reader.i8()?),
        Format::UInt8 => Value::U8(reader.u8()?),
        Format::Int16 => Value::I16(reader.i16()?),
        Format::UInt16 => Value::U16(reader.u16()?),
        Format::Int32 => Value::I32(reader.i32()?),
        Format::UInt32 => Value::U32(reader.u32()?),
        Format::Int64 => Value::I64(reader.i64()?),
        Format::UInt64 => Value::U64(reader.u64()?),
        Format::Float32 => Value::F32(reader.f32()?),
        Format::Float64 => Value::F64(reader.f64()?),
        Format::AsciiChar => Value::Char(reader.ascii_char()?),
        Format::String => Value::Str(reader.string()?),
        Format::Nul => Value::Nul,
    };
    *source = reader.remaining();
    Ok(value)
}

/// Cursor over a byte slice with typed little-endian reads.
///
/// Reads are all-or-nothing: a short read returns an error without
/// advancing the cursor.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

macro_rules! read_le {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> Result<$ty, DecodeError> {
                let bytes = self.take(std::mem::size_of::<$ty>())?;
                let mut array = [0u8; std::mem::size_of::<$ty>()];
                array.copy_from_slice(bytes);
                Ok(<$ty>::from_le_bytes(array))
            }
        )*
    };
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.position
    }

    /// The unread tail of the underlying slice.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.data.len() - self.position;
        if n > available {
            return Err(DecodeError::ShortRead { needed: n, available });
        }
        let bytes = &self.data[self.position..self.position + n];
        self.position += n;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.u8()? as i8)
    }

    read_le! {
        i16 => i16,
        u16 => u16,
        i32 => i32,
        u32 => u32,
        i64 => i64,
        u64 => u64,
        f32 => f32,
        f64 => f64,
    }

    pub fn ascii_char(&mut self) -> Result<char, DecodeError> {
        let start = self.position;
        let byte = self.u8()?;
        if !byte.is_ascii() {
            self.position = start;
            return Err(DecodeError::InvalidAscii { byte });
        }
        Ok(byte as char)
    }

    pub fn string(&mut self) -> Result<String, DecodeError> {
        let start = self.position;
        let length = self.u32()? as usize;
        if length > MAX_STRING_LEN {
            self.position = start;
            return Err(DecodeError::StringTooLong { length });
        }
        let bytes = match self.take(length) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.position = start;
                return Err(e);
            }
        };
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::InvalidString { details: e.to_string() })
    }

    /// Consumes a CRLF terminator.
    pub fn crlf(&mut self) -> Result<(), DecodeError> {
        let bytes = self.take(2)?;
        if bytes != CRLF {
            return Err(DecodeError::InvalidTerminator { found: [bytes[0], bytes[1]] });
        }
        Ok(())
    }
}

/// Appending writer mirroring [`Reader`].
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: u8) -> Self {
        Self { buffer: vec![id] }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn ascii_char(&mut self, value: char) -> Result<&mut Self, DecodeError> {
        pack_into(Format::AsciiChar, &Value::Char(value), &mut self.buffer)?;
        Ok(self)
    }

    pub fn string(&mut self, value: &str) -> Result<&mut Self, DecodeError> {
        pack_into(Format::String, &Value::Str(value.to_owned()), &mut self.buffer)?;
        Ok(self)
    }

    pub fn crlf(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(CRLF);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(pack(Format::Int16, &Value::I16(-2)).unwrap(), vec![0xFE, 0xFF]);
        assert_eq!(pack(Format::UInt32, &Value::U32(0x0403_0201)).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(pack(Format::Float32, &Value::F32(1.0)).unwrap(), vec![0, 0, 0x80, 0x3F]);
    }

    #[test]
    fn nul_is_zero_width() {
        assert!(pack(Format::Nul, &Value::Nul).unwrap().is_empty());
        let mut cursor: &[u8] = &[0xAA];
        assert_eq!(unpack(Format::Nul, &mut cursor).unwrap(), Value::Nul);
        assert_eq!(cursor, &[0xAAu8][..]);
    }

    #[test]
    fn short_read_does_not_advance() {
        let data = [0x01, 0x02, 0x03];
        let mut cursor: &[u8] = &data;
        let err = unpack(Format::UInt32, &mut cursor).unwrap_err();
        assert_eq!(err, DecodeError::ShortRead { needed: 4, available: 3 });
        assert_eq!(cursor.len(), 3);
    }

    #[test]
    fn short_string_body_rewinds_past_prefix() {
        let mut data = 10u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"abc");
        let mut reader = Reader::new(&data);
        assert!(matches!(reader.string(), Err(DecodeError::ShortRead { needed: 10, .. })));
        assert_eq!(reader.consumed(), 0);
    }

    #[test]
    fn oversized_string_prefix_is_rejected() {
        let data = u32::MAX.to_le_bytes();
        let mut cursor: &[u8] = &data;
        assert!(matches!(
            unpack(Format::String, &mut cursor),
            Err(DecodeError::StringTooLong { .. })
        ));
    }

    #[test]
    fn non_ascii_char_is_rejected_both_ways() {
        assert!(matches!(
            pack(Format::AsciiChar, &Value::Char('é')),
            Err(DecodeError::FormatMismatch { .. })
        ));
        let mut cursor: &[u8] = &[0xA7];
        assert_eq!(
            unpack(Format::AsciiChar, &mut cursor),
            Err(DecodeError::InvalidAscii { byte: 0xA7 })
        );
    }

    #[test]
    fn crlf_is_validated() {
        assert!(Reader::new(b"\r\n").crlf().is_ok());
        assert_eq!(
            Reader::new(b"\n\r").crlf(),
            Err(DecodeError::InvalidTerminator { found: [b'\n', b'\r'] })
        );
    }

    #[test]
    fn mismatched_value_is_rejected() {
        assert!(matches!(
            pack(Format::Int32, &Value::U8(1)),
            Err(DecodeError::FormatMismatch { format: Format::Int32, .. })
        ));
    }

    #[test]
    fn size_of_matches_encoding() {
        let value = Value::Str("abcd".into());
        assert_eq!(Format::String.size_of(&value), pack(Format::String, &value).unwrap().len());
        assert_eq!(Format::Float64.fixed_size(), Some(8));
        assert_eq!(Format::String.fixed_size(), None);
    }

    proptest! {
        #[test]
        fn ascii_strings_round_trip(s in "[ -~]{0,200}") {
            let bytes = pack(Format::String, &Value::Str(s.clone())).unwrap();
            let mut cursor = bytes.as_slice();
            prop_assert_eq!(unpack(Format::String, &mut cursor).unwrap(), Value::Str(s));
            prop_assert!(cursor.is_empty());
        }

        #[test]
        fn decoding_consumes_exactly_the_field(v in any::<i32>(), trailing in prop::collection::vec(any::<u8>(), 0..8)) {
            let mut bytes = pack(Format::Int32, &Value::I32(v)).unwrap();
            bytes.extend_from_slice(&trailing);
            let mut cursor = bytes.as_slice();
            prop_assert_eq!(unpack(Format::Int32, &mut cursor).unwrap(), Value::I32(v));
            prop_assert_eq!(cursor, trailing.as_slice());
        }
    }
}
