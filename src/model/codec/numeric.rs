use alloc::{format, vec, vec::Vec};

use crate::model::{ModelError, Value};

/// Byte order of a multi-byte integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Most significant byte first, used by every core-generation field.
    Big,
    /// Least significant byte first, used by some classic-generation words.
    Little,
}

/// Unsigned integer of 1 to 8 bytes with inclusive value limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UInt {
    pub length: u8,
    pub order: ByteOrder,
    pub min: i64,
    pub max: i64,
}

impl UInt {
    pub const fn new(length: u8) -> Self {
        let max = if length >= 8 {
            i64::MAX
        } else {
            (1i64 << (8 * length as u32)) - 1
        };
        Self {
            length,
            order: ByteOrder::Big,
            min: 0,
            max,
        }
    }

    pub const fn little_endian(mut self) -> Self {
        self.order = ByteOrder::Little;
        self
    }

    pub const fn limits(mut self, min: i64, max: i64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Assembles the raw integer stored in `data`.
    pub fn decode_raw(&self, data: &[u8]) -> u64 {
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        match self.order {
            ByteOrder::Big => data.iter().fold(0, fold),
            ByteOrder::Little => data.iter().rev().fold(0, fold),
        }
    }

    /// Splits `raw` into `length` bytes without limit checking.
    pub fn encode_raw(&self, raw: u64) -> Vec<u8> {
        let len = self.length as usize;
        let be = raw.to_be_bytes();
        let mut out = be[be.len() - len..].to_vec();
        if self.order == ByteOrder::Little {
            out.reverse();
        }
        out
    }

    pub fn decode(&self, data: &[u8]) -> Value {
        // Raw values above i64::MAX only occur for 8-byte fields
        Value::Int(self.decode_raw(data) as i64)
    }

    pub fn encode(&self, field: &str, value: &Value) -> Result<Vec<u8>, ModelError> {
        let v = match value {
            Value::Null => return Ok(vec![0xFF; self.length as usize]),
            Value::Int(v) => *v,
            other => {
                return Err(ModelError::invalid_value(
                    field,
                    format!("expected an integer, got {other:?}"),
                ));
            }
        };
        if v < self.min || v > self.max {
            return Err(ModelError::OutOfRange {
                field: field.into(),
                value: v,
                min: self.min,
                max: self.max,
            });
        }
        Ok(self.encode_raw(v as u64))
    }
}

const TEMPERATURE_UNSET: u8 = 0xFF;

/// Decodes a half-degree temperature byte (`raw / 2 - 32`).
pub fn decode_temperature(raw: u8, min: f64, max: f64) -> Value {
    if raw == TEMPERATURE_UNSET {
        return Value::Null;
    }
    let t = f64::from(raw) / 2.0 - 32.0;
    if t < min || t > max {
        return Value::Null;
    }
    Value::Float(t)
}

pub fn encode_temperature(field: &str, value: &Value, min: f64, max: f64) -> Result<u8, ModelError> {
    if value.is_null() {
        return Ok(TEMPERATURE_UNSET);
    }
    let t = float_of(field, value)?;
    if t < min || t > max {
        return Err(ModelError::invalid_value(
            field,
            format!("{t} out of limits: {min} <= value <= {max}"),
        ));
    }
    let raw = ((t + 32.0) * 2.0) as i64;
    if !(0..i64::from(TEMPERATURE_UNSET)).contains(&raw) {
        return Err(ModelError::invalid_value(field, format!("{t} is not representable")));
    }
    Ok(raw as u8)
}

/// Decodes a sign + magnitude temperature offset (bit 7 sign, low nibble half degrees).
pub fn decode_signed_temperature(raw: u8) -> Value {
    if raw == 0xFF {
        return Value::Float(0.0);
    }
    let magnitude = f64::from(raw & 0x0F) / 2.0;
    Value::Float(if raw & 0x80 == 0 { magnitude } else { -magnitude })
}

pub fn encode_signed_temperature(field: &str, value: &Value) -> Result<u8, ModelError> {
    if value.is_null() {
        return Ok(0xFF);
    }
    let t = float_of(field, value)?;
    if t == 0.0 {
        return Ok(0xFF);
    }
    if !(-7.5..=7.5).contains(&t) {
        return Err(ModelError::invalid_value(
            field,
            format!("{t} out of limits: -7.5 <= value <= 7.5"),
        ));
    }
    let (sign, magnitude) = if t > 0.0 { (0x00, t) } else { (0x80, -t) };
    Ok(sign | (magnitude * 2.0) as u8)
}

/// Decodes a time of day stored as `hours * 6 + minutes / 10`.
pub fn decode_time(raw: u8) -> Value {
    if raw == 0xFF {
        return Value::Null;
    }
    let hours = raw / 6;
    let minutes = (raw % 6) * 10;
    Value::Text(format!("{hours:02}:{minutes:02}"))
}

pub fn encode_time(field: &str, value: &Value) -> Result<u8, ModelError> {
    let text = match value {
        Value::Null => return Ok(0xFF),
        Value::Text(text) => text,
        other => {
            return Err(ModelError::invalid_value(
                field,
                format!("expected HH:MM, got {other:?}"),
            ));
        }
    };
    let malformed = || ModelError::invalid_value(field, format!("time is not in HH:MM format: {text}"));
    let (hours, minutes) = text.split_once(':').ok_or_else(malformed)?;
    let hours: u32 = hours.trim().parse().map_err(|_| malformed())?;
    let minutes: u32 = minutes.trim().parse().map_err(|_| malformed())?;
    if minutes >= 60 {
        return Err(malformed());
    }
    let raw = hours * 6 + minutes / 10;
    if raw >= 0xFF {
        return Err(malformed());
    }
    Ok(raw as u8)
}

pub fn decode_bool(raw: u8, true_value: u8, false_value: u8, fallback: bool) -> Value {
    Value::Bool(if raw == true_value {
        true
    } else if raw == false_value {
        false
    } else {
        fallback
    })
}

/// Encodes a flag where `0xFF` (erased) means false.
pub fn encode_flag(field: &str, value: &Value) -> Result<u8, ModelError> {
    Ok(if bool_of(field, value)? { 0x00 } else { 0xFF })
}

pub fn bool_of(field: &str, value: &Value) -> Result<bool, ModelError> {
    value
        .as_bool()
        .ok_or_else(|| ModelError::invalid_value(field, format!("{value:?} is no boolean")))
}

fn float_of(field: &str, value: &Value) -> Result<f64, ModelError> {
    let t = value
        .as_float()
        .ok_or_else(|| ModelError::invalid_value(field, format!("{value:?} is no number")))?;
    if !t.is_finite() {
        return Err(ModelError::invalid_value(field, format!("{t} is not a finite number")));
    }
    Ok(t)
}
