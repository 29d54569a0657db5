//! Bit-packed sub-fields sharing one integer field.

use alloc::{format, string::String, vec::Vec};
use core::fmt;

use crate::model::{ModelError, Value, ValueMap};

/// Bit position generator signature: record id to start bit.
pub type BitFn = fn(u32) -> u32;

/// Start bit of a sub-field, fixed or derived from the record id.
#[derive(Clone, Copy)]
pub enum BitPosition {
    Fixed(u32),
    PerId(BitFn),
}

impl BitPosition {
    /// Resolves the start bit; records without id resolve generators with id 0.
    pub fn resolve(&self, id: Option<u32>) -> u32 {
        match self {
            BitPosition::Fixed(bit) => *bit,
            BitPosition::PerId(generator) => generator(id.unwrap_or(0)),
        }
    }
}

impl fmt::Debug for BitPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitPosition::Fixed(bit) => write!(f, "Fixed({bit})"),
            BitPosition::PerId(_) => f.write_str("PerId(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFieldKind {
    /// `stored * factor - offset`, valid while `stored <= max_value`.
    Number {
        width: u32,
        value_offset: i64,
        value_factor: i64,
        max_value: u64,
    },
    Bit { inverted: bool },
}

/// One logical value packed into the bits of a composite field.
#[derive(Debug, Clone, Copy)]
pub struct SubField {
    pub name: &'static str,
    pub start: BitPosition,
    pub kind: SubFieldKind,
}

#[inline]
fn mask(width: u32) -> u64 {
    1u64.checked_shl(width).map_or(u64::MAX, |v| v - 1)
}

impl SubField {
    /// Numeric sub-field of `width` bits, accepting every stored value.
    pub const fn number(name: &'static str, start: u32, width: u32) -> Self {
        Self::number_at(name, BitPosition::Fixed(start), width)
    }

    pub const fn number_at(name: &'static str, start: BitPosition, width: u32) -> Self {
        let max_value = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        Self {
            name,
            start,
            kind: SubFieldKind::Number {
                width,
                value_offset: 0,
                value_factor: 1,
                max_value,
            },
        }
    }

    pub const fn bit(name: &'static str, bit: u32) -> Self {
        Self::bit_at(name, BitPosition::Fixed(bit))
    }

    pub const fn bit_at(name: &'static str, bit: BitPosition) -> Self {
        Self {
            name,
            start: bit,
            kind: SubFieldKind::Bit { inverted: false },
        }
    }

    /// Bit sub-field where a cleared bit means `true`.
    pub const fn inverted(mut self) -> Self {
        if let SubFieldKind::Bit { .. } = self.kind {
            self.kind = SubFieldKind::Bit { inverted: true };
        }
        self
    }

    pub const fn offset(mut self, offset: i64) -> Self {
        if let SubFieldKind::Number {
            ref mut value_offset,
            ..
        } = self.kind
        {
            *value_offset = offset;
        }
        self
    }

    pub const fn factor(mut self, factor: i64) -> Self {
        if let SubFieldKind::Number {
            ref mut value_factor,
            ..
        } = self.kind
        {
            *value_factor = factor;
        }
        self
    }

    pub const fn max_value(mut self, max: u64) -> Self {
        if let SubFieldKind::Number {
            ref mut max_value, ..
        } = self.kind
        {
            *max_value = max;
        }
        self
    }

    pub const fn width(&self) -> u32 {
        match self.kind {
            SubFieldKind::Number { width, .. } => width,
            SubFieldKind::Bit { .. } => 1,
        }
    }

    fn shifted_mask(&self, start: u32) -> u64 {
        mask(self.width()).checked_shl(start).unwrap_or(0)
    }

    fn stored(&self, raw: u64, start: u32) -> u64 {
        raw.checked_shr(start).unwrap_or(0) & mask(self.width())
    }

    /// Extracts this sub-field's value from the composite integer `raw`.
    ///
    /// Numeric values above `max_value` (typically erased `0xFF..` memory)
    /// decode to [`Value::Null`].
    pub fn decompose(&self, raw: u64, id: Option<u32>) -> Value {
        let stored = self.stored(raw, self.start.resolve(id));
        match self.kind {
            SubFieldKind::Number {
                value_offset,
                value_factor,
                max_value,
                ..
            } => {
                if stored > max_value {
                    return Value::Null;
                }
                i64::try_from(stored)
                    .ok()
                    .and_then(|stored| stored.checked_mul(value_factor))
                    .and_then(|scaled| scaled.checked_sub(value_offset))
                    .map_or(Value::Null, Value::Int)
            }
            SubFieldKind::Bit { inverted } => Value::Bool((stored == 1) != inverted),
        }
    }

    /// Replaces this sub-field's bits in `raw`, leaving all other bits of the
    /// `width_bits` wide composite untouched.
    ///
    /// # Errors
    /// * [`ModelError::OutOfRange`] - the stored value would exceed `max_value`
    /// * [`ModelError::InvalidValue`] - the value has the wrong type
    pub fn compose(
        &self,
        field: &str,
        raw: u64,
        value: &Value,
        width_bits: u32,
        id: Option<u32>,
    ) -> Result<u64, ModelError> {
        if self.decompose(raw, id) == *value {
            return Ok(raw);
        }
        let qualified = format!("{field}.{}", self.name);
        let stored = match self.kind {
            SubFieldKind::Number {
                value_offset,
                value_factor,
                max_value,
                ..
            } => {
                let v = value.as_int().ok_or_else(|| {
                    ModelError::invalid_value(&qualified, format!("expected an integer, got {value:?}"))
                })?;
                let max = i64::try_from(max_value).unwrap_or(i64::MAX);
                let out_of_range = |value| ModelError::OutOfRange {
                    field: qualified.clone(),
                    value,
                    min: 0,
                    max,
                };
                let processed = v
                    .checked_add(value_offset)
                    .ok_or_else(|| out_of_range(v))?
                    .div_euclid(value_factor.max(1));
                if !(0..=max).contains(&processed) {
                    return Err(ModelError::OutOfRange {
                        field: qualified,
                        value: processed,
                        min: 0,
                        max,
                    });
                }
                processed as u64
            }
            SubFieldKind::Bit { inverted } => {
                let v = value.as_bool().ok_or_else(|| {
                    ModelError::invalid_value(&qualified, format!("expected a boolean, got {value:?}"))
                })?;
                u64::from(v != inverted)
            }
        };
        let start = self.start.resolve(id);
        let field_mask = self.shifted_mask(start);
        let composing = stored.checked_shl(start).unwrap_or(0) & field_mask;
        Ok((raw & !field_mask & mask(width_bits)) | composing)
    }
}

/// Sub-field layout of a composite field.
#[derive(Debug, Clone)]
pub struct Composite {
    subs: Vec<SubField>,
}

impl Composite {
    pub fn new(subs: impl IntoIterator<Item = SubField>) -> Self {
        Self {
            subs: subs.into_iter().collect(),
        }
    }

    pub fn sub(&self, name: &str) -> Option<&SubField> {
        self.subs.iter().find(|sub| sub.name == name)
    }

    pub fn subs(&self) -> &[SubField] {
        &self.subs
    }

    pub(crate) fn sub_or_err(&self, field: &str, name: &str) -> Result<&SubField, ModelError> {
        self.sub(name).ok_or_else(|| ModelError::UnknownSubField {
            field: field.into(),
            sub: name.into(),
        })
    }

    pub fn decompose_all(&self, raw: u64, id: Option<u32>) -> ValueMap {
        self.subs
            .iter()
            .map(|sub| (String::from(sub.name), sub.decompose(raw, id)))
            .collect()
    }

    /// Composes every entry of `values` onto `raw`, in sub-field order.
    pub fn compose_all(
        &self,
        field: &str,
        raw: u64,
        values: &ValueMap,
        width_bits: u32,
        id: Option<u32>,
    ) -> Result<u64, ModelError> {
        if let Some(key) = values.keys().find(|key| self.sub(key).is_none()) {
            return Err(ModelError::UnknownSubField {
                field: field.into(),
                sub: key.clone(),
            });
        }
        let mut raw = raw;
        for sub in &self.subs {
            if let Some(value) = values.get(sub.name) {
                raw = sub.compose(field, raw, value, width_bits, id)?;
            }
        }
        Ok(raw)
    }

    /// Checks names and fixed bit ranges against a `width_bits` wide field.
    pub(crate) fn validate(&self, width_bits: u32) -> Result<(), String> {
        for (i, sub) in self.subs.iter().enumerate() {
            if self.subs[..i].iter().any(|other| other.name == sub.name) {
                return Err(format!("duplicate sub-field `{}`", sub.name));
            }
            if sub.width() == 0 {
                return Err(format!("sub-field `{}` has zero width", sub.name));
            }
            if let BitPosition::Fixed(start) = sub.start {
                if start + sub.width() > width_bits {
                    return Err(format!(
                        "sub-field `{}` exceeds the {width_bits} bit field",
                        sub.name
                    ));
                }
            }
        }
        Ok(())
    }
}
