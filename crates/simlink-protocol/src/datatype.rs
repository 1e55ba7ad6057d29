//! Numeric datatypes for simulator reads
//!
//! The vendor SDK hands back subscribed values as raw little-endian payloads.
//! Devices only ever see decimal text, so every value is decoded here.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// Numeric encoding of a subscribed simulator value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit IEEE float
    Float32,
    /// 64-bit IEEE float
    #[default]
    Float64,
}

impl DataType {
    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    /// Payload width in bytes
    pub fn size(&self) -> usize {
        match self {
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }

    /// Decode a little-endian payload into its decimal representation
    ///
    /// Integers print plainly, floats with six decimals. Trailing bytes
    /// beyond [`DataType::size`] are ignored.
    pub fn decode(&self, payload: &[u8]) -> Result<String, ProtocolError> {
        let size = self.size();
        let bytes = payload
            .get(..size)
            .ok_or(ProtocolError::InvalidPayloadLength {
                datatype: self.name(),
                expected: size,
                actual: payload.len(),
            })?;

        let text = match self {
            DataType::Int32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                i32::from_le_bytes(raw).to_string()
            }
            DataType::Int64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                i64::from_le_bytes(raw).to_string()
            }
            DataType::Float32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                format!("{:.6}", f32::from_le_bytes(raw))
            }
            DataType::Float64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                format!("{:.6}", f64::from_le_bytes(raw))
            }
        };
        Ok(text)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "float32" => Ok(DataType::Float32),
            "float64" => Ok(DataType::Float64),
            _ => Err(ProtocolError::UnknownDataType(s.to_string())),
        }
    }
}
