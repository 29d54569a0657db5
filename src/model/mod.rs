pub mod address;
pub mod builder;
pub mod cache;
pub mod checksum;
pub mod codec;
pub mod composite;
pub mod definition;
pub mod error;
pub mod helpers;
pub mod layout;
pub mod record;
pub mod registry;
pub mod store;
pub mod transport;
pub mod value;

#[cfg(test)]
mod test_support;

pub use address::{AddressFn, AddressSpec, MemoryAddress, PageKey, SpaceId};
pub use builder::RecordStoreBuilder;
pub use cache::{CacheStats, DiffRun, MemoryCache, diff_runs};
pub use checksum::{Checksum, ChecksumKind, ChecksumState};
pub use codec::{ByteOrder, Codec, EnumEntry, EnumTable, UInt};
pub use composite::{BitPosition, Composite, SubField};
pub use definition::{Field, IdBound, IdSpec, RecordDefinition, Relation};
pub use error::{ErrorKind, ModelError, TransportError};
pub use layout::{MemoryLayout, SpaceLayout};
pub use record::Record;
pub use registry::SchemaRegistry;
pub use store::RecordStore;
pub use transport::Transport;
pub use value::{Value, ValueMap};

pub mod prelude {
    pub use super::{
        AddressSpec, Checksum, Codec, Composite, ErrorKind, Field, IdSpec, MemoryAddress,
        MemoryLayout, ModelError, Record, RecordDefinition, RecordStore, RecordStoreBuilder,
        Relation, SpaceId, SubField, Transport, TransportError, Value, ValueMap,
    };
}
