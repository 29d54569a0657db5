use alloc::{format, vec::Vec};

use super::numeric::UInt;
use crate::model::{ModelError, Value};

/// Label returned for codes without a matching entry when no default is declared.
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

/// One label of an [`EnumTable`] and the raw codes that map to it.
///
/// The first code is the one written on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumEntry {
    pub label: &'static str,
    pub codes: &'static [u64],
    pub default: bool,
}

impl EnumEntry {
    pub const fn new(label: &'static str, codes: &'static [u64]) -> Self {
        Self {
            label,
            codes,
            default: false,
        }
    }

    /// Marks this entry as the fallback for unknown codes.
    pub const fn default(mut self) -> Self {
        self.default = true;
        self
    }
}

/// Code to label lookup table stored in an unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumTable {
    pub base: UInt,
    pub entries: &'static [EnumEntry],
}

impl EnumTable {
    pub const fn new(base: UInt, entries: &'static [EnumEntry]) -> Self {
        Self { base, entries }
    }

    /// Label for a raw code; unknown codes fall back instead of failing.
    pub fn label(&self, code: u64) -> &'static str {
        self.entries
            .iter()
            .find(|entry| entry.codes.contains(&code))
            .or_else(|| self.entries.iter().find(|entry| entry.default))
            .map_or(UNKNOWN_LABEL, |entry| entry.label)
    }

    pub fn code(&self, label: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .and_then(|entry| entry.codes.first().copied())
    }

    pub fn decode(&self, data: &[u8]) -> Value {
        Value::from(self.label(self.base.decode_raw(data)))
    }

    pub fn encode(&self, field: &str, value: &Value) -> Result<Vec<u8>, ModelError> {
        let label = value
            .as_str()
            .ok_or_else(|| ModelError::invalid_value(field, format!("expected a label, got {value:?}")))?;
        let code = self
            .code(label)
            .ok_or_else(|| ModelError::invalid_value(field, format!("`{label}` is not a known label")))?;
        Ok(self.base.encode_raw(code))
    }
}
