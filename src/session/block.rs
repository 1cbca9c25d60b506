//! ASCII value blocks and IEEE 488.2 binary blocks.
//!
//! Binary blocks use the definite-length form `#<n><length><data>`, where
//! `<n>` is the number of digits of `<length>`. The indefinite form `#0<data>`
//! is accepted when parsing.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::error::DeviceError;

/// Errors raised while building or parsing value blocks.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BlockError {
    /// No `#` marker in the received data.
    #[error("Binary block header '#' not found")]
    MissingHeader,

    /// Header digits are missing or not numeric.
    #[error("Invalid binary block header")]
    InvalidHeader,

    /// Fewer data bytes than announced by the header.
    #[error("Binary block truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Announced length.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Data length is not a multiple of the element size.
    #[error("Binary block of {length} bytes is not a multiple of the {size}-byte element size")]
    Misaligned {
        /// Data length in bytes.
        length: usize,
        /// Element size in bytes.
        size: usize,
    },

    /// Value cannot be represented by the datatype.
    #[error("Value {value} at index {index} cannot be encoded as {datatype}")]
    ValueOutOfRange {
        /// Offending value.
        value: f64,
        /// Position in the input.
        index: usize,
        /// Requested datatype.
        datatype: DataType,
    },

    /// Payload too large for a definite-length header.
    #[error("Binary block of {0} bytes exceeds the definite-length header limit")]
    TooLarge(usize),
}

/// Element type of a binary block, named by a single-character format tag.
///
/// Tags follow the packed-binary convention: lower case is signed, upper case
/// unsigned; `f` and `d` are IEEE single and double precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// `b`
    Int8,
    /// `B`
    UInt8,
    /// `h`
    Int16,
    /// `H`
    UInt16,
    /// `i` or `l`
    Int32,
    /// `I` or `L`
    UInt32,
    /// `q`
    Int64,
    /// `Q`
    UInt64,
    /// `f`
    #[default]
    Float32,
    /// `d`
    Float64,
}

impl DataType {
    /// Looks up the datatype for a format tag.
    pub fn from_tag(tag: char) -> Option<Self> {
        let datatype = match tag {
            'b' => DataType::Int8,
            'B' => DataType::UInt8,
            'h' => DataType::Int16,
            'H' => DataType::UInt16,
            'i' | 'l' => DataType::Int32,
            'I' | 'L' => DataType::UInt32,
            'q' => DataType::Int64,
            'Q' => DataType::UInt64,
            'f' => DataType::Float32,
            'd' => DataType::Float64,
            _ => return None,
        };
        Some(datatype)
    }

    /// Canonical format tag.
    pub fn tag(self) -> char {
        match self {
            DataType::Int8 => 'b',
            DataType::UInt8 => 'B',
            DataType::Int16 => 'h',
            DataType::UInt16 => 'H',
            DataType::Int32 => 'i',
            DataType::UInt32 => 'I',
            DataType::Int64 => 'q',
            DataType::UInt64 => 'Q',
            DataType::Float32 => 'f',
            DataType::Float64 => 'd',
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    /// Half-open `[min, end)` range of an integer datatype. `end` is a power
    /// of two, exact in `f64` for every width.
    fn integer_range(self) -> Option<(f64, f64)> {
        let (min, bits) = match self {
            DataType::Int8 => (-(2f64.powi(7)), 7),
            DataType::UInt8 => (0.0, 8),
            DataType::Int16 => (-(2f64.powi(15)), 15),
            DataType::UInt16 => (0.0, 16),
            DataType::Int32 => (-(2f64.powi(31)), 31),
            DataType::UInt32 => (0.0, 32),
            DataType::Int64 => (-(2f64.powi(63)), 63),
            DataType::UInt64 => (0.0, 64),
            DataType::Float32 | DataType::Float64 => return None,
        };
        Some((min, 2f64.powi(bits)))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.tag())
    }
}

impl FromStr for DataType {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let datatype = match (chars.next(), chars.next()) {
            (Some(tag), None) => DataType::from_tag(tag),
            _ => None,
        };
        datatype.ok_or_else(|| DeviceError::UnsupportedDatatype(s.to_string()))
    }
}

/// Byte order of multi-byte elements in a binary block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// Maps an `is_big_endian` flag to a byte order.
    pub fn from_big_endian(is_big_endian: bool) -> Self {
        if is_big_endian {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// Returns `true` for [`ByteOrder::Big`].
    pub fn is_big_endian(self) -> bool {
        self == ByteOrder::Big
    }
}

/// Renders values as text joined by `separator`.
pub fn to_ascii_block(values: &[f64], separator: &str) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

macro_rules! put_ordered {
    ($buf:expr, $order:expr, $big:ident, $little:ident, $value:expr) => {
        match $order {
            ByteOrder::Big => $buf.$big($value),
            ByteOrder::Little => $buf.$little($value),
        }
    };
}

macro_rules! get_ordered {
    ($buf:expr, $order:expr, $big:ident, $little:ident) => {
        match $order {
            ByteOrder::Big => $buf.$big() as f64,
            ByteOrder::Little => $buf.$little() as f64,
        }
    };
}

fn put_value(
    buf: &mut BytesMut,
    index: usize,
    value: f64,
    datatype: DataType,
    order: ByteOrder,
) -> Result<(), BlockError> {
    if let Some((min, end)) = datatype.integer_range() {
        if !value.is_finite() || value.fract() != 0.0 || value < min || value >= end {
            return Err(BlockError::ValueOutOfRange {
                value,
                index,
                datatype,
            });
        }
    }

    match datatype {
        DataType::Int8 => buf.put_i8(value as i8),
        DataType::UInt8 => buf.put_u8(value as u8),
        DataType::Int16 => put_ordered!(buf, order, put_i16, put_i16_le, value as i16),
        DataType::UInt16 => put_ordered!(buf, order, put_u16, put_u16_le, value as u16),
        DataType::Int32 => put_ordered!(buf, order, put_i32, put_i32_le, value as i32),
        DataType::UInt32 => put_ordered!(buf, order, put_u32, put_u32_le, value as u32),
        DataType::Int64 => put_ordered!(buf, order, put_i64, put_i64_le, value as i64),
        DataType::UInt64 => put_ordered!(buf, order, put_u64, put_u64_le, value as u64),
        DataType::Float32 => put_ordered!(buf, order, put_f32, put_f32_le, value as f32),
        DataType::Float64 => put_ordered!(buf, order, put_f64, put_f64_le, value),
    }
    Ok(())
}

fn get_value(buf: &mut &[u8], datatype: DataType, order: ByteOrder) -> f64 {
    match datatype {
        DataType::Int8 => buf.get_i8() as f64,
        DataType::UInt8 => buf.get_u8() as f64,
        DataType::Int16 => get_ordered!(buf, order, get_i16, get_i16_le),
        DataType::UInt16 => get_ordered!(buf, order, get_u16, get_u16_le),
        DataType::Int32 => get_ordered!(buf, order, get_i32, get_i32_le),
        DataType::UInt32 => get_ordered!(buf, order, get_u32, get_u32_le),
        DataType::Int64 => get_ordered!(buf, order, get_i64, get_i64_le),
        DataType::UInt64 => get_ordered!(buf, order, get_u64, get_u64_le),
        DataType::Float32 => get_ordered!(buf, order, get_f32, get_f32_le),
        DataType::Float64 => get_ordered!(buf, order, get_f64, get_f64_le),
    }
}

/// Encodes values as a definite-length IEEE 488.2 block.
///
/// # Errors
/// Integer datatypes reject non-finite, fractional and out-of-range values.
pub fn to_ieee_block(
    values: &[f64],
    datatype: DataType,
    order: ByteOrder,
) -> Result<Vec<u8>, BlockError> {
    let mut data = BytesMut::with_capacity(values.len() * datatype.size());
    for (index, &value) in values.iter().enumerate() {
        put_value(&mut data, index, value, datatype, order)?;
    }

    let length = data.len().to_string();
    if length.len() > 9 {
        return Err(BlockError::TooLarge(data.len()));
    }

    let mut block = Vec::with_capacity(2 + length.len() + data.len());
    block.push(b'#');
    block.extend_from_slice(length.len().to_string().as_bytes());
    block.extend_from_slice(length.as_bytes());
    block.extend_from_slice(&data);
    Ok(block)
}

/// Decodes an IEEE 488.2 block into values.
///
/// Bytes before the `#` marker are skipped. For the indefinite form, a
/// trailing `\n` or `\r\n` terminator is not part of the data.
///
/// # Errors
/// Returns a [`BlockError`] for missing or malformed headers, truncated data,
/// and data lengths that are not a multiple of the element size.
pub fn from_ieee_block(
    block: &[u8],
    datatype: DataType,
    order: ByteOrder,
) -> Result<Vec<f64>, BlockError> {
    let start = block
        .iter()
        .position(|&byte| byte == b'#')
        .ok_or(BlockError::MissingHeader)?;
    let header = &block[start + 1..];

    let digits = header
        .first()
        .and_then(|&digit| char::from(digit).to_digit(10))
        .ok_or(BlockError::InvalidHeader)? as usize;

    let data = if digits == 0 {
        let mut data = &header[1..];
        if let Some(rest) = data.strip_suffix(&b"\n"[..]) {
            data = rest;
            if let Some(rest) = data.strip_suffix(&b"\r"[..]) {
                data = rest;
            }
        }
        data
    } else {
        let length = header
            .get(1..1 + digits)
            .and_then(|digits| std::str::from_utf8(digits).ok())
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or(BlockError::InvalidHeader)?;
        let data = &header[1 + digits..];
        if data.len() < length {
            return Err(BlockError::Truncated {
                expected: length,
                actual: data.len(),
            });
        }
        &data[..length]
    };

    let size = datatype.size();
    if data.len() % size != 0 {
        return Err(BlockError::Misaligned {
            length: data.len(),
            size,
        });
    }

    let mut buf = data;
    let mut values = Vec::with_capacity(data.len() / size);
    while buf.has_remaining() {
        values.push(get_value(&mut buf, datatype, order));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_tags() {
        assert_eq!(DataType::from_tag('f'), Some(DataType::Float32));
        assert_eq!(DataType::from_tag('l'), Some(DataType::Int32));
        assert_eq!(DataType::from_tag('L'), Some(DataType::UInt32));
        assert_eq!(DataType::from_tag('x'), None);
        assert_eq!(DataType::Float64.tag(), 'd');
        assert_eq!(DataType::UInt16.size(), 2);
        assert_eq!(DataType::default(), DataType::Float32);
    }

    #[test]
    fn test_datatype_from_str() {
        assert_eq!("h".parse::<DataType>().ok(), Some(DataType::Int16));
        assert!(matches!(
            "ff".parse::<DataType>(),
            Err(DeviceError::UnsupportedDatatype(tag)) if tag == "ff"
        ));
        assert!("".parse::<DataType>().is_err());
        assert!("s".parse::<DataType>().is_err());
    }

    #[test]
    fn test_ascii_block() {
        assert_eq!(to_ascii_block(&[1.0, 2.0, 3.0], ","), "1,2,3");
        assert_eq!(to_ascii_block(&[0.5, -2.25], "; "), "0.5; -2.25");
        assert_eq!(to_ascii_block(&[], ","), "");
    }

    #[test]
    fn test_ieee_block_header() {
        let block = to_ieee_block(&[1.0, 2.0], DataType::Int16, ByteOrder::Big).unwrap();
        assert_eq!(block, b"#14\x00\x01\x00\x02".to_vec());

        let block = to_ieee_block(&[1.0, 2.0], DataType::Int16, ByteOrder::Little).unwrap();
        assert_eq!(block, b"#14\x01\x00\x02\x00".to_vec());

        let block = to_ieee_block(&[0.0; 3], DataType::Float32, ByteOrder::Little).unwrap();
        assert_eq!(&block[..4], b"#212");
        assert_eq!(block.len(), 4 + 12);

        assert_eq!(
            to_ieee_block(&[], DataType::Float32, ByteOrder::Little).unwrap(),
            b"#10".to_vec()
        );
    }

    #[test]
    fn test_float_byte_order() {
        let block = to_ieee_block(&[1.0], DataType::Float32, ByteOrder::Big).unwrap();
        assert_eq!(&block[3..], &1.0f32.to_be_bytes());
        let block = to_ieee_block(&[1.0], DataType::Float64, ByteOrder::Little).unwrap();
        assert_eq!(&block[3..], &1.0f64.to_le_bytes());
    }

    #[test]
    fn test_integer_range_checks() {
        let err = to_ieee_block(&[1.0, 300.0], DataType::Int8, ByteOrder::Little).unwrap_err();
        assert_eq!(
            err,
            BlockError::ValueOutOfRange {
                value: 300.0,
                index: 1,
                datatype: DataType::Int8
            }
        );
        assert!(to_ieee_block(&[-1.0], DataType::UInt16, ByteOrder::Big).is_err());
        assert!(to_ieee_block(&[1.5], DataType::Int32, ByteOrder::Big).is_err());
        assert!(to_ieee_block(&[f64::NAN], DataType::Int64, ByteOrder::Big).is_err());
        assert!(to_ieee_block(&[1.5], DataType::Float32, ByteOrder::Big).is_ok());
    }

    #[test]
    fn test_integer_range_bounds_are_exact() {
        let block = to_ieee_block(&[-128.0, 127.0], DataType::Int8, ByteOrder::Little).unwrap();
        assert_eq!(&block[3..], &[0x80, 0x7f]);
        assert!(to_ieee_block(&[128.0], DataType::Int8, ByteOrder::Little).is_err());
        assert!(to_ieee_block(&[65535.0], DataType::UInt16, ByteOrder::Big).is_ok());
        assert!(to_ieee_block(&[65536.0], DataType::UInt16, ByteOrder::Big).is_err());

        // 2^63 and 2^64 are the f64 images of i64::MAX and u64::MAX
        let two_63 = 2f64.powi(63);
        let two_64 = 2f64.powi(64);
        assert!(to_ieee_block(&[two_63], DataType::Int64, ByteOrder::Big).is_err());
        assert!(to_ieee_block(&[i64::MAX as f64], DataType::Int64, ByteOrder::Big).is_err());
        assert!(to_ieee_block(&[-two_63], DataType::Int64, ByteOrder::Big).is_ok());
        assert!(to_ieee_block(&[two_64], DataType::UInt64, ByteOrder::Big).is_err());
        assert!(to_ieee_block(&[u64::MAX as f64], DataType::UInt64, ByteOrder::Big).is_err());

        let largest = two_63 - 1024.0;
        let block = to_ieee_block(&[largest], DataType::Int64, ByteOrder::Big).unwrap();
        assert_eq!(&block[3..], &(largest as i64).to_be_bytes());
        assert_eq!(largest as i64, i64::MAX - 1023);
    }

    #[test]
    fn test_byte_order_flag() {
        assert_eq!(ByteOrder::from_big_endian(true), ByteOrder::Big);
        assert!(ByteOrder::from_big_endian(true).is_big_endian());
        assert!(!ByteOrder::default().is_big_endian());
    }

    #[test]
    fn test_decode_definite_block() {
        let mut block = b"#18".to_vec();
        block.extend_from_slice(&1.5f32.to_le_bytes());
        block.extend_from_slice(&(-4.0f32).to_le_bytes());
        block.push(b'\n');

        let values = from_ieee_block(&block, DataType::Float32, ByteOrder::Little).unwrap();
        assert_eq!(values, vec![1.5, -4.0]);
    }

    #[test]
    fn test_decode_skips_leading_bytes() {
        let block = b"CURV \x20#14\xff\xfe\x00\x10";
        let values = from_ieee_block(block, DataType::Int16, ByteOrder::Big).unwrap();
        assert_eq!(values, vec![-2.0, 16.0]);
    }

    #[test]
    fn test_decode_indefinite_block() {
        let mut block = b"#0".to_vec();
        block.extend_from_slice(&7u16.to_be_bytes());
        block.extend_from_slice(b"\r\n");
        let values = from_ieee_block(&block, DataType::UInt16, ByteOrder::Big).unwrap();
        assert_eq!(values, vec![7.0]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            from_ieee_block(b"1,2,3", DataType::Float32, ByteOrder::Little),
            Err(BlockError::MissingHeader)
        );
        assert_eq!(
            from_ieee_block(b"#x12", DataType::Float32, ByteOrder::Little),
            Err(BlockError::InvalidHeader)
        );
        assert_eq!(
            from_ieee_block(b"#18abcd", DataType::Float32, ByteOrder::Little),
            Err(BlockError::Truncated {
                expected: 8,
                actual: 4
            })
        );
        assert_eq!(
            from_ieee_block(b"#13abc", DataType::Float32, ByteOrder::Little),
            Err(BlockError::Misaligned { length: 3, size: 4 })
        );
    }
}
