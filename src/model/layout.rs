use core::ops::Range;

use heapless::LinearMap;

use crate::model::{MemoryAddress, ModelError, SpaceId, helpers::range_span};

/// Upper bound for a single remote write transaction, in bytes.
pub const MAX_BATCH_SIZE: usize = 32;

/// Write batch size used by the master firmware for EEPROM writes.
pub const DEFAULT_BATCH_SIZE: usize = 10;

const MAX_SPACES: usize = 2;

/// Core master writes never span both halves of a page.
const CORE_HALF_PAGE: u16 = 128;

/// Geometry of one memory space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceLayout {
    pub page_count: u16,
    pub page_size: u16,
    /// Volatile pages are re-read from the transport on every read call.
    pub volatile: bool,
    /// Page offset no single write may cross.
    pub write_boundary: Option<u16>,
}

impl SpaceLayout {
    pub const fn new(page_count: u16, page_size: u16) -> Self {
        Self {
            page_count,
            page_size,
            volatile: false,
            write_boundary: None,
        }
    }

    pub const fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Splits writes at `offset`, e.g. the 127/128 half-page split of the core master.
    pub const fn write_boundary(mut self, offset: u16) -> Self {
        self.write_boundary = Some(offset);
        self
    }
}

/// Memory geometry of a master controller generation.
#[derive(Debug, Clone)]
pub struct MemoryLayout {
    spaces: LinearMap<SpaceId, SpaceLayout, MAX_SPACES>,
    batch_size: usize,
}

impl MemoryLayout {
    pub fn builder() -> MemoryLayoutBuilder {
        MemoryLayoutBuilder::new()
    }

    /// Classic master: 256 EEPROM banks of 256 bytes.
    pub fn classic() -> Self {
        Self::from_parts(&[(SpaceId::Eeprom, SpaceLayout::new(256, 256))], DEFAULT_BATCH_SIZE)
    }

    /// Core master: 512 EEPROM pages and 128 volatile FRAM pages of 256 bytes,
    /// written in 32-byte chunks that stay within one half page.
    pub fn core() -> Self {
        Self::from_parts(
            &[
                (SpaceId::Eeprom, SpaceLayout::new(512, 256).write_boundary(CORE_HALF_PAGE)),
                (
                    SpaceId::Fram,
                    SpaceLayout::new(128, 256).volatile().write_boundary(CORE_HALF_PAGE),
                ),
            ],
            MAX_BATCH_SIZE,
        )
    }

    fn from_parts(spaces: &[(SpaceId, SpaceLayout)], batch_size: usize) -> Self {
        let mut map = LinearMap::new();
        for (id, layout) in spaces.iter().take(MAX_SPACES) {
            let _ = map.insert(*id, *layout);
        }
        Self {
            spaces: map,
            batch_size,
        }
    }

    pub fn space(&self, id: SpaceId) -> Result<&SpaceLayout, ModelError> {
        self.spaces.get(&id).ok_or(ModelError::UnknownSpace(id))
    }

    /// Maximum number of bytes pushed in one remote write.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Validates `address` against the layout and returns its range within the page.
    ///
    /// # Errors
    /// * [`ModelError::UnknownSpace`] - the space is not part of this layout
    /// * [`ModelError::OutOfBounds`] - page number or byte range out of bounds
    /// * [`ModelError::ZeroLength`] - the address has no length
    pub fn check(&self, address: &MemoryAddress) -> Result<Range<usize>, ModelError> {
        let space = self.space(address.space)?;
        if address.page >= space.page_count {
            return Err(ModelError::OutOfBounds { address: *address });
        }
        range_span(address, space.page_size)
    }
}

/// Builder for custom [`MemoryLayout`]s.
#[derive(Debug, Clone)]
pub struct MemoryLayoutBuilder {
    spaces: LinearMap<SpaceId, SpaceLayout, MAX_SPACES>,
    batch_size: usize,
}

impl MemoryLayoutBuilder {
    pub fn new() -> Self {
        Self {
            spaces: LinearMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Declares (or replaces) the geometry of a memory space.
    pub fn space(mut self, id: SpaceId, layout: SpaceLayout) -> Self {
        // Every SpaceId fits, the map holds one slot per variant.
        let _ = self.spaces.insert(id, layout);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn build(self) -> Result<MemoryLayout, ModelError> {
        if self.spaces.is_empty() {
            return Err(ModelError::InvalidConfig("at least one memory space is required"));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ModelError::InvalidConfig("batch size must be within 1..=32"));
        }
        for (_, space) in self.spaces.iter() {
            if space.page_size == 0 || space.page_count == 0 {
                return Err(ModelError::InvalidConfig("page size and page count must be > 0"));
            }
        }
        Ok(MemoryLayout {
            spaces: self.spaces,
            batch_size: self.batch_size,
        })
    }
}

impl Default for MemoryLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}
