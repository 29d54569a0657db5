//! Test support utilities - only compiled in test builds.

use alloc::{collections::BTreeMap, rc::Rc, sync::Arc, vec, vec::Vec};
use core::cell::RefCell;

use crate::model::{
    AddressSpec, Checksum, Codec, Composite, Field, IdSpec, MemoryAddress, PageKey,
    RecordDefinition, RecordStore, RecordStoreBuilder, Relation, SpaceId, SubField, Transport,
    TransportError,
};

#[derive(Default)]
struct MockState {
    pages: BTreeMap<PageKey, Vec<u8>>,
    reads: Vec<PageKey>,
    writes: Vec<(SpaceId, u16, u16, Vec<u8>)>,
    activations: usize,
    fail_reads: bool,
    fail_writes: bool,
    fail_activate: bool,
}

/// In-memory controller; clones share the same memory and call log.
///
/// Pages never written read as erased (`0xFF`).
#[derive(Clone)]
pub struct MockTransport {
    page_size: usize,
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            state: Rc::new(RefCell::new(MockState::default())),
        }
    }

    /// Changes remote memory behind the cache's back.
    pub fn set_bytes(&self, space: SpaceId, page: u16, offset: u16, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        let page = state
            .pages
            .entry((space, page))
            .or_insert_with(|| vec![0xFF; self.page_size]);
        let start = offset as usize;
        page[start..start + data.len()].copy_from_slice(data);
    }

    pub fn bytes(&self, space: SpaceId, page: u16, offset: u16, length: usize) -> Vec<u8> {
        let start = offset as usize;
        self.state
            .borrow()
            .pages
            .get(&(space, page))
            .map_or_else(|| vec![0xFF; length], |page| page[start..start + length].to_vec())
    }

    /// Pages requested so far, in order.
    pub fn reads(&self) -> Vec<PageKey> {
        self.state.borrow().reads.clone()
    }

    /// Chunks written so far as `(space, page, offset, data)`.
    pub fn writes(&self) -> Vec<(SpaceId, u16, u16, Vec<u8>)> {
        self.state.borrow().writes.clone()
    }

    pub fn activations(&self) -> usize {
        self.state.borrow().activations
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.borrow_mut().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    pub fn fail_activate(&self, fail: bool) {
        self.state.borrow_mut().fail_activate = fail;
    }
}

impl Transport for MockTransport {
    fn read_page(&mut self, space: SpaceId, page: u16) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_reads {
            return Err(TransportError::Timeout);
        }
        state.reads.push((space, page));
        Ok(state
            .pages
            .get(&(space, page))
            .cloned()
            .unwrap_or_else(|| vec![0xFF; self.page_size]))
    }

    fn write_chunk(
        &mut self,
        space: SpaceId,
        page: u16,
        offset: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if self.state.borrow().fail_writes {
            return Err(TransportError::Timeout);
        }
        self.set_bytes(space, page, offset, data);
        self.state
            .borrow_mut()
            .writes
            .push((space, page, offset, data.to_vec()));
        Ok(())
    }

    fn activate(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_activate {
            return Err(TransportError::Communication("activate refused".into()));
        }
        state.activations += 1;
        Ok(())
    }
}

/// Output modules: eight outputs per module, names spread over banks 1..=3.
pub fn output_definition() -> Arc<RecordDefinition> {
    RecordDefinition::builder("Output")
        .id(IdSpec::fixed(24))
        .field(
            "name",
            Field::eeprom(
                AddressSpec::per_id(|id| (1 + id as u16 / 8, 4 + (id as u16 % 8) * 16)),
                Codec::text(16),
            ),
        )
        .field("timer", Field::eeprom(AddressSpec::per_id(|id| (4, id as u16 * 2)), Codec::u16()))
        .field(
            "dali",
            Field::eeprom(AddressSpec::per_id(|id| (5, id as u16)), Codec::u8()).composite(
                Composite::new([SubField::number("group", 0, 4), SubField::bit("enabled", 7)]),
            ),
        )
        .field(
            "module_type",
            Field::eeprom(AddressSpec::per_id(|id| (6, id as u16)), Codec::u8()).read_only(),
        )
        .build()
        .unwrap()
}

/// Record without id.
pub fn global_definition() -> Arc<RecordDefinition> {
    RecordDefinition::builder("Global")
        .field("startup", Field::eeprom(AddressSpec::at(0, 3), Codec::flag()))
        .field("version", Field::eeprom(AddressSpec::at(0, 4), Codec::version()).read_only())
        .build()
        .unwrap()
}

fn sensor_with(output: Arc<RecordDefinition>) -> Arc<RecordDefinition> {
    RecordDefinition::builder("Sensor")
        .id(IdSpec::fixed(24))
        .field(
            "offset",
            Field::eeprom(AddressSpec::per_id(|id| (20, id as u16)), Codec::signed_temperature())
                .checksum(Checksum::inverted(AddressSpec::per_id(|id| (21, id as u16)))),
        )
        .field(
            "threshold",
            Field::eeprom(AddressSpec::per_id(|id| (22, id as u16)), Codec::u8()).checksum(
                Checksum::inverted(AddressSpec::per_id(|id| (23, id as u16))).with_default(0),
            ),
        )
        .relation("output", Relation::by_owner(output, Some))
        .build()
        .unwrap()
}

/// Sensors with checksum guarded fields; `offset` has no default.
pub fn sensor_definition() -> Arc<RecordDefinition> {
    sensor_with(output_definition())
}

pub fn room_definition() -> Arc<RecordDefinition> {
    RecordDefinition::builder("Room")
        .id(IdSpec::fixed(100))
        .field(
            "name",
            Field::eeprom(
                AddressSpec::per_id(|id| (30 + id as u16 / 32, (id as u16 % 32) * 8)),
                Codec::text(8),
            ),
        )
        .build()
        .unwrap()
}

fn room_member_with(room: Arc<RecordDefinition>) -> Arc<RecordDefinition> {
    RecordDefinition::builder("Input")
        .id(IdSpec::fixed(32))
        .field("room", Field::eeprom(AddressSpec::per_id(|id| (40, id as u16)), Codec::u8()))
        .relation(
            "location",
            Relation::by_field(room, "room", |room| (room != 255).then_some(room)),
        )
        .build()
        .unwrap()
}

/// Inputs pointing at a room through their `room` field; 255 means none.
pub fn room_member_definition() -> Arc<RecordDefinition> {
    room_member_with(room_definition())
}

/// Eight ids per provisioned module, the module count lives at bank 0 byte 1.
pub fn module_definition() -> Arc<RecordDefinition> {
    RecordDefinition::builder("Module")
        .id(IdSpec::dynamic(MemoryAddress::new(SpaceId::Eeprom, 0, 1, 1), 8))
        .field(
            "name",
            Field::eeprom(
                AddressSpec::per_id(|id| (50 + id as u16 / 32, (id as u16 % 32) * 8)),
                Codec::text(8),
            ),
        )
        .build()
        .unwrap()
}

pub fn name_definition() -> Arc<RecordDefinition> {
    RecordDefinition::builder("Name")
        .id(IdSpec::fixed(10))
        .field(
            "name",
            Field::eeprom(AddressSpec::per_id(|id| (60, id as u16 * 16)), Codec::text(16)),
        )
        .build()
        .unwrap()
}

/// Every fixture, relation targets shared.
pub fn schemas() -> Vec<Arc<RecordDefinition>> {
    let output = output_definition();
    vec![
        Arc::clone(&output),
        global_definition(),
        sensor_with(output),
        room_member_with(room_definition()),
        module_definition(),
        name_definition(),
    ]
}

/// Store over a classic layout with every fixture registered.
pub fn classic_store() -> (RecordStore<MockTransport>, MockTransport) {
    let mock = MockTransport::new(256);
    let store = RecordStoreBuilder::new()
        .classic()
        .transport(mock.clone())
        .definitions(schemas())
        .build()
        .unwrap();
    (store, mock)
}
