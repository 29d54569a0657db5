//! Field codecs: conversion between a byte range and a [`Value`].
//!
//! Every codec has a fixed byte length. `encode` always produces exactly that
//! many bytes and `decode` accepts any byte pattern of that length, falling
//! back to an "unset" value instead of failing. Numbers are big-endian unless
//! declared otherwise.

mod enumeration;
mod numeric;
mod text;

use alloc::{collections::BTreeMap, format, string::String, vec, vec::Vec};

pub use enumeration::{EnumEntry, EnumTable, UNKNOWN_LABEL};
pub use numeric::{ByteOrder, UInt};
pub use text::{append_tail, remove_tail};

use crate::model::{ModelError, Value};

/// Fill unit terminating basic-action lists.
pub const ACTION_FILL: &[u8] = &[0xFF, 0xFF];

/// A stateless field encoder/decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Codec {
    /// Fixed length Latin-1 string padded with `fill`.
    Text { length: u16, fill: u8 },
    UInt(UInt),
    /// Half-degree temperature, `0xFF` is unset.
    Temperature { min: f64, max: f64 },
    /// Small temperature offset, sign bit plus half-degree magnitude.
    SignedTemperature,
    /// Time of day in ten minute steps.
    Time,
    /// Comma separated byte list terminated by `fill` units.
    Csv { length: u16, fill: &'static [u8] },
    /// Dotted byte string such as an address or a version.
    Dotted { length: u16, zero_pad: bool },
    Enum(EnumTable),
    Bool {
        true_value: u8,
        false_value: u8,
        fallback: bool,
    },
    /// `0xFF` is false, anything else is true.
    Flag,
    Bytes { length: u16 },
    /// Fixed number of integers of the same width.
    Array { count: u16, element: UInt },
    /// Contiguous group of named codecs, decoded as a map.
    Nested(Vec<(&'static str, Codec)>),
}

/// Generates unsigned big-endian integer constructors (`Codec::u8()`, ...).
macro_rules! uint_constructors {
    ($($bits:literal),*) => {
        $(
            paste::paste! {
                #[doc = "Unsigned " $bits " bit big-endian integer."]
                pub const fn [<u $bits>]() -> Self {
                    Codec::UInt(UInt::new($bits / 8))
                }
            }
        )*
    };
}

impl Codec {
    uint_constructors!(8, 16, 24, 32);

    pub const fn uint(length: u8) -> Self {
        Codec::UInt(UInt::new(length))
    }

    pub const fn text(length: u16) -> Self {
        Codec::Text { length, fill: 0xFF }
    }

    pub const fn text_with_fill(length: u16, fill: u8) -> Self {
        Codec::Text { length, fill }
    }

    pub const fn temperature() -> Self {
        Codec::Temperature {
            min: -32.0,
            max: 95.0,
        }
    }

    pub const fn temperature_within(min: f64, max: f64) -> Self {
        Codec::Temperature { min, max }
    }

    pub const fn signed_temperature() -> Self {
        Codec::SignedTemperature
    }

    pub const fn time() -> Self {
        Codec::Time
    }

    pub const fn csv(length: u16) -> Self {
        Codec::Csv {
            length,
            fill: &[0xFF],
        }
    }

    /// Basic-action list holding `count` two byte actions.
    pub const fn actions(count: u16) -> Self {
        Codec::Csv {
            length: count * 2,
            fill: ACTION_FILL,
        }
    }

    /// Dotted quad address such as `001.002.003.004`.
    pub const fn address(length: u16) -> Self {
        Codec::Dotted {
            length,
            zero_pad: true,
        }
    }

    /// Three part version string such as `3.143.102`.
    pub const fn version() -> Self {
        Codec::Dotted {
            length: 3,
            zero_pad: false,
        }
    }

    pub const fn enumeration(table: EnumTable) -> Self {
        Codec::Enum(table)
    }

    pub const fn boolean(true_value: u8, false_value: u8, fallback: bool) -> Self {
        Codec::Bool {
            true_value,
            false_value,
            fallback,
        }
    }

    pub const fn flag() -> Self {
        Codec::Flag
    }

    pub const fn bytes(length: u16) -> Self {
        Codec::Bytes { length }
    }

    pub const fn array(count: u16, element: UInt) -> Self {
        Codec::Array { count, element }
    }

    pub fn nested(fields: impl IntoIterator<Item = (&'static str, Codec)>) -> Self {
        Codec::Nested(fields.into_iter().collect())
    }

    /// Restricts an integer codec to `min..=max`; other codecs are unchanged.
    pub fn with_limits(self, min: i64, max: i64) -> Self {
        match self {
            Codec::UInt(uint) => Codec::UInt(uint.limits(min, max)),
            other => other,
        }
    }

    /// Switches an integer codec to little-endian; other codecs are unchanged.
    pub fn little_endian(self) -> Self {
        match self {
            Codec::UInt(uint) => Codec::UInt(uint.little_endian()),
            other => other,
        }
    }

    /// Number of bytes this codec occupies.
    pub fn length(&self) -> u16 {
        match self {
            Codec::Text { length, .. }
            | Codec::Csv { length, .. }
            | Codec::Dotted { length, .. }
            | Codec::Bytes { length } => *length,
            Codec::UInt(uint) => u16::from(uint.length),
            Codec::Enum(table) => u16::from(table.base.length),
            Codec::Temperature { .. }
            | Codec::SignedTemperature
            | Codec::Time
            | Codec::Bool { .. }
            | Codec::Flag => 1,
            Codec::Array { count, element } => count * u16::from(element.length),
            Codec::Nested(fields) => fields.iter().map(|(_, codec)| codec.length()).sum(),
        }
    }

    /// The integer representation, for codecs that carry composite sub-fields.
    pub fn as_uint(&self) -> Option<&UInt> {
        match self {
            Codec::UInt(uint) => Some(uint),
            _ => None,
        }
    }

    /// Checks the declaration itself (widths, member names).
    pub fn validate(&self) -> Result<(), String> {
        let check_uint = |uint: &UInt| {
            if (1..=8).contains(&uint.length) {
                Ok(())
            } else {
                Err(format!("integer width {} not within 1..=8", uint.length))
            }
        };
        match self {
            Codec::UInt(uint) => check_uint(uint),
            Codec::Enum(table) => check_uint(&table.base),
            Codec::Array { element, .. } => check_uint(element),
            Codec::Csv { fill, .. } if fill.is_empty() => Err("csv fill unit is empty".into()),
            Codec::Nested(fields) => {
                for (i, (name, codec)) in fields.iter().enumerate() {
                    if fields[..i].iter().any(|(other, _)| other == name) {
                        return Err(format!("duplicate nested member `{name}`"));
                    }
                    codec.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }?;
        if self.length() == 0 {
            return Err("codec has zero length".into());
        }
        Ok(())
    }

    /// Decodes `data`, which holds exactly [`length`](Self::length) bytes.
    pub fn decode(&self, data: &[u8]) -> Value {
        debug_assert_eq!(data.len(), self.length() as usize);
        let first = data.first().copied().unwrap_or(0xFF);
        match self {
            Codec::Text { fill, .. } => text::decode_text(data, *fill),
            Codec::UInt(uint) => uint.decode(data),
            Codec::Temperature { min, max } => numeric::decode_temperature(first, *min, *max),
            Codec::SignedTemperature => numeric::decode_signed_temperature(first),
            Codec::Time => numeric::decode_time(first),
            Codec::Csv { fill, .. } => text::decode_csv(data, fill),
            Codec::Dotted { zero_pad, .. } => text::decode_dotted(data, *zero_pad),
            Codec::Enum(table) => table.decode(data),
            Codec::Bool {
                true_value,
                false_value,
                fallback,
            } => numeric::decode_bool(first, *true_value, *false_value, *fallback),
            Codec::Flag => Value::Bool(first != 0xFF),
            Codec::Bytes { .. } => Value::Bytes(data.to_vec()),
            Codec::Array { element, .. } => Value::List(
                data.chunks(element.length as usize)
                    .map(|chunk| element.decode(chunk))
                    .collect(),
            ),
            Codec::Nested(fields) => {
                let mut map = BTreeMap::new();
                let mut offset = 0;
                for (name, codec) in fields {
                    let end = (offset + codec.length() as usize).min(data.len());
                    map.insert(String::from(*name), codec.decode(&data[offset..end]));
                    offset = end;
                }
                Value::Map(map)
            }
        }
    }

    /// Encodes `value` into exactly [`length`](Self::length) bytes.
    ///
    /// # Errors
    /// * [`ModelError::OutOfRange`] - integer outside the declared limits
    /// * [`ModelError::InvalidValue`] - wrong value type, too long, or not representable
    pub fn encode(&self, field: &str, value: &Value) -> Result<Vec<u8>, ModelError> {
        let length = self.length() as usize;
        let bytes = match self {
            Codec::Text { fill, .. } => text::encode_text(field, value, length, *fill)?,
            Codec::UInt(uint) => uint.encode(field, value)?,
            Codec::Temperature { min, max } => {
                vec![numeric::encode_temperature(field, value, *min, *max)?]
            }
            Codec::SignedTemperature => vec![numeric::encode_signed_temperature(field, value)?],
            Codec::Time => vec![numeric::encode_time(field, value)?],
            Codec::Csv { fill, .. } => text::encode_csv(field, value, length, fill)?,
            Codec::Dotted { .. } => text::encode_dotted(field, value, length)?,
            Codec::Enum(table) => table.encode(field, value)?,
            Codec::Bool {
                true_value,
                false_value,
                ..
            } => {
                if numeric::bool_of(field, value)? {
                    vec![*true_value]
                } else {
                    vec![*false_value]
                }
            }
            Codec::Flag => vec![numeric::encode_flag(field, value)?],
            Codec::Bytes { .. } => encode_bytes(field, value, length)?,
            Codec::Array { count, element } => encode_array(field, value, *count, element)?,
            Codec::Nested(fields) => encode_nested(field, value, fields)?,
        };
        debug_assert_eq!(bytes.len(), length);
        Ok(bytes)
    }
}

fn encode_bytes(field: &str, value: &Value, length: usize) -> Result<Vec<u8>, ModelError> {
    let bytes = match value {
        Value::Null => return Ok(vec![0xFF; length]),
        Value::Bytes(bytes) => bytes.clone(),
        Value::List(items) => items
            .iter()
            .map(|item| item.as_u8())
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| ModelError::invalid_value(field, "list holds non-byte values"))?,
        other => {
            return Err(ModelError::invalid_value(
                field,
                format!("expected bytes, got {other:?}"),
            ));
        }
    };
    if bytes.len() != length {
        return Err(ModelError::invalid_value(
            field,
            format!("{} bytes given, field holds {length}", bytes.len()),
        ));
    }
    Ok(bytes)
}

fn encode_array(field: &str, value: &Value, count: u16, element: &UInt) -> Result<Vec<u8>, ModelError> {
    let items = match value {
        Value::Null => return Ok(vec![0xFF; count as usize * element.length as usize]),
        Value::List(items) => items,
        other => {
            return Err(ModelError::invalid_value(
                field,
                format!("expected a list, got {other:?}"),
            ));
        }
    };
    if items.len() != count as usize {
        return Err(ModelError::invalid_value(
            field,
            format!("{} items given, expected {count}", items.len()),
        ));
    }
    let mut out = Vec::with_capacity(count as usize * element.length as usize);
    for item in items {
        out.extend(element.encode(field, item)?);
    }
    Ok(out)
}

fn encode_nested(
    field: &str,
    value: &Value,
    fields: &[(&'static str, Codec)],
) -> Result<Vec<u8>, ModelError> {
    let map = value
        .as_map()
        .ok_or_else(|| ModelError::invalid_value(field, format!("expected a map, got {value:?}")))?;
    if let Some(key) = map.keys().find(|key| !fields.iter().any(|(name, _)| name == key)) {
        return Err(ModelError::invalid_value(field, format!("unknown member `{key}`")));
    }
    let mut out = Vec::new();
    for (name, codec) in fields {
        let member = format!("{field}.{name}");
        let item = map
            .get(*name)
            .ok_or_else(|| ModelError::invalid_value(&member, "member missing"))?;
        out.extend(codec.encode(&member, item)?);
    }
    Ok(out)
}
