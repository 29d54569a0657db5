use alloc::vec::Vec;

use crate::model::{SpaceId, TransportError};

/// Link to the master controller's memory.
///
/// Implementations perform the actual serial requests and are expected to
/// apply their own timeouts. The store never retries a failed call.
pub trait Transport {
    /// Reads one whole page (or bank) of `space`.
    fn read_page(&mut self, space: SpaceId, page: u16) -> Result<Vec<u8>, TransportError>;

    /// Writes a contiguous run of at most one write batch starting at `offset`.
    fn write_chunk(
        &mut self,
        space: SpaceId,
        page: u16,
        offset: u16,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Tells the controller to reload its configuration after writes.
    fn activate(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_page(&mut self, space: SpaceId, page: u16) -> Result<Vec<u8>, TransportError> {
        (**self).read_page(space, page)
    }

    fn write_chunk(
        &mut self,
        space: SpaceId,
        page: u16,
        offset: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        (**self).write_chunk(space, page, offset, data)
    }

    fn activate(&mut self) -> Result<(), TransportError> {
        (**self).activate()
    }
}
