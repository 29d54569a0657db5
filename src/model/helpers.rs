//! Utility functions for byte-range and page calculations.
//!
//! These helpers are useful when implementing a custom
//! [`Transport`](crate::model::Transport) or tooling that needs to reason
//! about which pages a set of addresses touches.

use alloc::collections::BTreeSet;
use core::ops::Range;

use crate::model::{MemoryAddress, ModelError, PageKey};

/// Calculates the byte range of `address` within a page of `page_size` bytes.
///
/// Returns `start..end` (end exclusive), or an error if the range is invalid.
///
/// # Errors
/// * [`ModelError::ZeroLength`] - if the address length is 0
/// * [`ModelError::OutOfBounds`] - if the range runs past the end of the page
///
/// # Example
/// ```
/// use memory_model::model::{MemoryAddress, SpaceId, helpers::range_span};
///
/// let name = MemoryAddress::new(SpaceId::Eeprom, 3, 240, 16);
/// assert_eq!(range_span(&name, 256).unwrap(), 240..256);
///
/// let too_long = MemoryAddress::new(SpaceId::Eeprom, 3, 250, 16);
/// assert!(range_span(&too_long, 256).is_err());
/// ```
pub fn range_span(address: &MemoryAddress, page_size: u16) -> Result<Range<usize>, ModelError> {
    if address.length == 0 {
        return Err(ModelError::ZeroLength);
    }

    let range = address.range();
    if range.end > page_size as usize {
        return Err(ModelError::OutOfBounds { address: *address });
    }

    Ok(range)
}

/// Collects the distinct pages spanned by `addresses`, in ascending order.
pub fn page_set<'a>(addresses: impl IntoIterator<Item = &'a MemoryAddress>) -> BTreeSet<PageKey> {
    addresses.into_iter().map(MemoryAddress::page_key).collect()
}
