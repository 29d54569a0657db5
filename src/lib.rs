//! A `no_std` addressable memory model for remote EEPROM/FRAM configuration records.
//!
//! A master controller keeps its configuration in paged memory that can only
//! be reached over a slow link. This crate maps named, typed records onto that
//! memory and keeps the link traffic low.
//!
//! # Features
//!
//! - **Declarative records** - fields bound to byte ranges through codecs
//! - **Page cache** - every page is read once, writes only push changed bytes
//! - **Composite and checksum fields** - bit-packed sub-values, shadow checksums
//! - **Dirty tracking** - a check-and-clear flag for background synchronizers
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐    ┌───────────────┐    ┌──────────────┐    ┌───────────┐
//! │ Record         │───▶│ RecordStore   │───▶│ MemoryCache  │───▶│ Transport │
//! │ get/set fields │    │ read / write  │    │ pages + diff │    │ (serial)  │
//! └────────────────┘    └───────────────┘    └──────────────┘    └───────────┘
//!         ▲                     │
//!         └─ RecordDefinition ◀─┘ SchemaRegistry
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use memory_model::prelude::*;
//!
//! let output = RecordDefinition::builder("Output")
//!     .id(IdSpec::fixed(240))
//!     .field(
//!         "name",
//!         Field::eeprom(AddressSpec::per_id(|id| (1 + id as u16 / 8, 4 + (id as u16 % 8) * 16)), Codec::text(16)),
//!     )
//!     .build()?;
//!
//! let store = RecordStoreBuilder::new()
//!     .classic()
//!     .transport(serial)
//!     .definition(output)
//!     .build()?;
//!
//! let mut record = store.read("Output", Some(3), None)?;
//! record.set("name", "Kitchen")?;
//! store.write(&record)?;
//! assert!(store.get_and_clear_dirty());
//! ```

#![deny(unsafe_code)]
#![no_std]

extern crate alloc;

pub mod model;

pub mod prelude {
    pub use crate::model::prelude::*;
}
