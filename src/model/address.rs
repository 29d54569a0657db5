use core::{fmt, ops::Range};

use crate::model::ModelError;

/// Kind of remote memory a field lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpaceId {
    /// Bank/page addressed EEPROM, persistent configuration.
    Eeprom,
    /// Paged FRAM, live state that changes without gateway writes.
    Fram,
}

impl SpaceId {
    /// Single-letter code used by the master protocol and in log lines.
    pub const fn code(self) -> char {
        match self {
            SpaceId::Eeprom => 'E',
            SpaceId::Fram => 'F',
        }
    }
}

/// Cache key and read unit: one page (or bank) of one memory space.
pub type PageKey = (SpaceId, u16);

/// A contiguous byte range in remote memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryAddress {
    pub space: SpaceId,
    pub page: u16,
    pub offset: u16,
    pub length: u16,
}

impl MemoryAddress {
    pub const fn new(space: SpaceId, page: u16, offset: u16, length: u16) -> Self {
        Self {
            space,
            page,
            offset,
            length,
        }
    }

    #[inline]
    pub const fn page_key(&self) -> PageKey {
        (self.space, self.page)
    }

    /// Byte range of this address inside its page buffer.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Address({}{}, {}, {})",
            self.space.code(),
            self.page,
            self.offset,
            self.length
        )
    }
}

/// Address generator signature: record id to `(page, offset)`.
pub type AddressFn = fn(u32) -> (u16, u16);

/// Where a field lives: a fixed location, or a location derived from the record id.
#[derive(Clone, Copy)]
pub enum AddressSpec {
    Static { page: u16, offset: u16 },
    PerId(AddressFn),
}

impl AddressSpec {
    pub const fn at(page: u16, offset: u16) -> Self {
        AddressSpec::Static { page, offset }
    }

    pub const fn per_id(generator: AddressFn) -> Self {
        AddressSpec::PerId(generator)
    }

    pub const fn needs_id(&self) -> bool {
        matches!(self, AddressSpec::PerId(_))
    }

    /// Computes the concrete address for `id`.
    ///
    /// # Errors
    /// * [`ModelError::MissingId`] - a generator was declared but no id given
    /// * [`ModelError::UnexpectedId`] - a static address was declared but an id given
    pub fn resolve(
        &self,
        record: &str,
        space: SpaceId,
        length: u16,
        id: Option<u32>,
    ) -> Result<MemoryAddress, ModelError> {
        let (page, offset) = match (self, id) {
            (AddressSpec::Static { page, offset }, None) => (*page, *offset),
            (AddressSpec::PerId(generator), Some(id)) => generator(id),
            (AddressSpec::Static { .. }, Some(id)) => {
                return Err(ModelError::UnexpectedId {
                    record: record.into(),
                    id,
                });
            }
            (AddressSpec::PerId(_), None) => {
                return Err(ModelError::MissingId {
                    record: record.into(),
                });
            }
        };
        Ok(MemoryAddress::new(space, page, offset, length))
    }
}

impl fmt::Debug for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Static { page, offset } => f
                .debug_struct("Static")
                .field("page", page)
                .field("offset", offset)
                .finish(),
            AddressSpec::PerId(_) => f.write_str("PerId(..)"),
        }
    }
}
