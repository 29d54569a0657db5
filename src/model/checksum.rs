use alloc::{string::String, vec::Vec};

use crate::model::{AddressSpec, Codec, ModelError, Value};

/// How the shadow bytes are derived from the primary bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Every byte bitwise inverted.
    Inverted,
}

/// Result of comparing a primary field against its shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumState {
    Valid,
    /// Primary and shadow together are all `0x00` or all `0xFF`.
    Uninitialized,
    Invalid,
}

/// Integrity guard storing a checksum of a field in a shadow location.
#[derive(Debug, Clone)]
pub struct Checksum {
    pub kind: ChecksumKind,
    /// Shadow location, in the same memory space as the primary field.
    pub shadow: AddressSpec,
    /// Value returned instead of failing when the checksum does not match.
    pub default: Option<Value>,
}

impl Checksum {
    pub const fn inverted(shadow: AddressSpec) -> Self {
        Self {
            kind: ChecksumKind::Inverted,
            shadow,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Shadow bytes for `primary`.
    pub fn compute(&self, primary: &[u8]) -> Vec<u8> {
        match self.kind {
            ChecksumKind::Inverted => primary.iter().map(|b| !b).collect(),
        }
    }

    pub fn state(&self, primary: &[u8], shadow: &[u8]) -> ChecksumState {
        let mut bytes = primary.iter().chain(shadow);
        if let Some(first) = bytes.next() {
            if (*first == 0x00 || *first == 0xFF) && bytes.all(|b| b == first) {
                return ChecksumState::Uninitialized;
            }
        }
        if self.compute(primary) == shadow {
            ChecksumState::Valid
        } else {
            ChecksumState::Invalid
        }
    }

    /// Decodes `primary` with `codec` after checking it against `shadow`.
    ///
    /// # Errors
    /// * [`ModelError::InvalidChecksum`] - mismatch and no default declared
    pub fn decode(
        &self,
        field: &str,
        codec: &Codec,
        primary: &[u8],
        shadow: &[u8],
    ) -> Result<Value, ModelError> {
        match self.state(primary, shadow) {
            ChecksumState::Valid | ChecksumState::Uninitialized => Ok(codec.decode(primary)),
            ChecksumState::Invalid => match &self.default {
                Some(default) => {
                    log::warn!("checksum mismatch on `{field}`, using default {default:?}");
                    Ok(default.clone())
                }
                None => Err(ModelError::InvalidChecksum {
                    field: String::from(field),
                }),
            },
        }
    }
}
