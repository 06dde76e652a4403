//! Element types and typed data buffers.

use std::str::FromStr;

/// The byte order of stored elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
    /// Single-byte types (`|` prefix).
    NotApplicable,
}

/// Numeric element types supported by the readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DataType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }
}

/// A numpy-style dtype string such as `<f4` or `|u1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumpyDtype {
    pub data_type: DataType,
    pub endianness: Endianness,
}

impl FromStr for NumpyDtype {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || crate::Error::UnsupportedDataType(s.to_string());
        let mut chars = s.chars();
        let endianness = match chars.next() {
            Some('<') => Endianness::Little,
            Some('>') => Endianness::Big,
            Some('|') => Endianness::NotApplicable,
            _ => return Err(unsupported()),
        };
        let data_type = match chars.as_str() {
            "b1" => DataType::Bool,
            "i1" => DataType::Int8,
            "i2" => DataType::Int16,
            "i4" => DataType::Int32,
            "i8" => DataType::Int64,
            "u1" => DataType::UInt8,
            "u2" => DataType::UInt16,
            "u4" => DataType::UInt32,
            "u8" => DataType::UInt64,
            "f4" => DataType::Float32,
            "f8" => DataType::Float64,
            _ => return Err(unsupported()),
        };
        let endianness = if data_type.size() == 1 {
            Endianness::NotApplicable
        } else {
            endianness
        };
        Ok(Self {
            data_type,
            endianness,
        })
    }
}

impl std::fmt::Display for NumpyDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let order = match self.endianness {
            Endianness::Little => '<',
            Endianness::Big => '>',
            Endianness::NotApplicable => '|',
        };
        let code = match self.data_type {
            DataType::Bool => "b1",
            DataType::Int8 => "i1",
            DataType::Int16 => "i2",
            DataType::Int32 => "i4",
            DataType::Int64 => "i8",
            DataType::UInt8 => "u1",
            DataType::UInt16 => "u2",
            DataType::UInt32 => "u4",
            DataType::UInt64 => "u8",
            DataType::Float32 => "f4",
            DataType::Float64 => "f8",
        };
        write!(f, "{order}{code}")
    }
}

impl NumpyDtype {
    /// The dtype of `data_type` in native byte order.
    #[must_use]
    pub fn native(data_type: DataType) -> Self {
        let endianness = if data_type.size() == 1 {
            Endianness::NotApplicable
        } else if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        };
        Self {
            data_type,
            endianness,
        }
    }
}

/// A single element value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
}

impl Scalar {
    /// The value widened to `f64`, lossy for large 64-bit integers.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Bool(v) => f64::from(u8::from(v)),
            Self::Int8(v) => f64::from(v),
            Self::Int16(v) => f64::from(v),
            Self::Int32(v) => f64::from(v),
            Self::Int64(v) => v as f64,
            Self::UInt8(v) => f64::from(v),
            Self::UInt16(v) => f64::from(v),
            Self::UInt32(v) => f64::from(v),
            Self::UInt64(v) => v as f64,
            Self::Float32(v) => f64::from(v),
            Self::Float64(v) => v,
        }
    }
}

/// A flat, row-major typed buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! from_ne_chunks {
    ($bytes:expr, $ty:ty) => {
        $bytes
            .chunks_exact(size_of::<$ty>())
            .map(|c| {
                let mut element = [0u8; size_of::<$ty>()];
                element.copy_from_slice(c);
                <$ty>::from_ne_bytes(element)
            })
            .collect()
    };
}

macro_rules! for_each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($v) => $body,
            ArrayData::Int8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::UInt64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
        }
    };
}

impl ArrayData {
    /// Interpret native-order bytes as elements of `data_type`.
    ///
    /// # Errors
    /// Returns an error if the byte length is not a multiple of the element size.
    pub fn from_ne_bytes(data_type: DataType, bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() % data_type.size() != 0 {
            return Err(crate::Error::general(format!(
                "{} bytes is not a whole number of {data_type:?} elements",
                bytes.len()
            )));
        }
        let data = match data_type {
            DataType::Bool => Self::Bool(bytes.iter().map(|&b| b != 0).collect()),
            DataType::Int8 => Self::Int8(bytes.iter().map(|&b| b as i8).collect()),
            DataType::UInt8 => Self::UInt8(bytes.to_vec()),
            DataType::Int16 => Self::Int16(from_ne_chunks!(bytes, i16)),
            DataType::Int32 => Self::Int32(from_ne_chunks!(bytes, i32)),
            DataType::Int64 => Self::Int64(from_ne_chunks!(bytes, i64)),
            DataType::UInt16 => Self::UInt16(from_ne_chunks!(bytes, u16)),
            DataType::UInt32 => Self::UInt32(from_ne_chunks!(bytes, u32)),
            DataType::UInt64 => Self::UInt64(from_ne_chunks!(bytes, u64)),
            DataType::Float32 => Self::Float32(from_ne_chunks!(bytes, f32)),
            DataType::Float64 => Self::Float64(from_ne_chunks!(bytes, f64)),
        };
        Ok(data)
    }

    /// The elements as native-order bytes.
    #[must_use]
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bool(v) => v.iter().map(|&b| u8::from(b)).collect(),
            Self::Int8(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::Int16(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::Int32(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::Int64(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::UInt8(v) => v.clone(),
            Self::UInt16(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::UInt32(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::UInt64(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::Float32(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            Self::Float64(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
        }
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Int8(_) => DataType::Int8,
            Self::Int16(_) => DataType::Int16,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::UInt8(_) => DataType::UInt8,
            Self::UInt16(_) => DataType::UInt16,
            Self::UInt32(_) => DataType::UInt32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element at `index`, if in bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Scalar> {
        let scalar = match self {
            Self::Bool(v) => Scalar::Bool(*v.get(index)?),
            Self::Int8(v) => Scalar::Int8(*v.get(index)?),
            Self::Int16(v) => Scalar::Int16(*v.get(index)?),
            Self::Int32(v) => Scalar::Int32(*v.get(index)?),
            Self::Int64(v) => Scalar::Int64(*v.get(index)?),
            Self::UInt8(v) => Scalar::UInt8(*v.get(index)?),
            Self::UInt16(v) => Scalar::UInt16(*v.get(index)?),
            Self::UInt32(v) => Scalar::UInt32(*v.get(index)?),
            Self::UInt64(v) => Scalar::UInt64(*v.get(index)?),
            Self::Float32(v) => Scalar::Float32(*v.get(index)?),
            Self::Float64(v) => Scalar::Float64(*v.get(index)?),
        };
        Some(scalar)
    }

    /// Narrow 64-bit integer buffers to 32 bits.
    ///
    /// This is lossy: values outside the 32-bit range wrap around.
    #[must_use]
    pub fn downcast_big_int(self) -> Self {
        match self {
            Self::Int64(v) => Self::Int32(v.into_iter().map(|x| x as i32).collect()),
            Self::UInt64(v) => Self::UInt32(v.into_iter().map(|x| x as u32).collect()),
            other => other,
        }
    }
}

/// The result of a dataset data read.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetValue {
    Array(ArrayData),
    /// A length-1 dataset flagged `_SCALAR` in its attributes.
    Scalar(Scalar),
}

impl DatasetValue {
    /// Unwrap a length-1 buffer into a scalar if `is_scalar` is set.
    #[must_use]
    pub fn from_array(data: ArrayData, is_scalar: bool) -> Self {
        if is_scalar && data.len() == 1 {
            if let Some(value) = data.get(0) {
                return Self::Scalar(value);
            }
        }
        Self::Array(data)
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            Self::Array(data) => Some(data),
            Self::Scalar(_) => None,
        }
    }

    #[must_use]
    pub fn into_array(self) -> Option<ArrayData> {
        match self {
            Self::Array(data) => Some(data),
            Self::Scalar(_) => None,
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Array(_) => None,
            Self::Scalar(value) => Some(*value),
        }
    }

    /// Apply the default 64-to-32-bit narrowing unless `allow_big_int` is set.
    #[must_use]
    pub fn with_big_int_policy(self, allow_big_int: bool) -> Self {
        if allow_big_int {
            return self;
        }
        match self {
            Self::Array(data) => Self::Array(data.downcast_big_int()),
            Self::Scalar(Scalar::Int64(v)) => Self::Scalar(Scalar::Int32(v as i32)),
            Self::Scalar(Scalar::UInt64(v)) => Self::Scalar(Scalar::UInt32(v as u32)),
            scalar => scalar,
        }
    }
}
