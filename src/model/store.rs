use alloc::{sync::Arc, vec, vec::Vec};
use core::cell::{Cell, RefCell};

use critical_section::Mutex;

use crate::model::{
    CacheStats, IdBound, MemoryAddress, MemoryCache, MemoryLayout, ModelError, Record,
    RecordDefinition, SchemaRegistry, Transport,
    definition::{IdSpec, RelationSource},
};

/// Binds record definitions to a remote memory cache.
///
/// All cache work of one call runs inside a single critical section, so a
/// store can be shared between a background synchronizer and foreground
/// callers. Records are plain values owned by the caller.
///
/// The transport is called from inside that critical section. On bare metal
/// interrupts stay masked for the whole serial exchange of a call, so either
/// keep transport calls short or drive the store from thread context with a
/// `std` critical-section implementation.
pub struct RecordStore<T> {
    cache: Mutex<RefCell<MemoryCache<T>>>,
    registry: SchemaRegistry,
    dirty: Mutex<Cell<bool>>,
}

impl<T: Transport> RecordStore<T> {
    /// Creates a store; it starts dirty so the first synchronization always runs.
    pub(crate) fn new(transport: T, layout: MemoryLayout, registry: SchemaRegistry) -> Self {
        Self {
            cache: Mutex::new(RefCell::new(MemoryCache::new(transport, layout))),
            registry,
            dirty: Mutex::new(Cell::new(true)),
        }
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut MemoryCache<T>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.cache.borrow_ref_mut(cs)))
    }

    fn mark_dirty(&self) {
        critical_section::with(|cs| self.dirty.borrow(cs).set(true));
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn definition(&self, name: &str) -> Result<&Arc<RecordDefinition>, ModelError> {
        self.registry.get(name)
    }

    /// Gives access to the transport, e.g. for diagnostics.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.with_cache(|cache| f(cache.transport_mut()))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.with_cache(|cache| cache.stats())
    }

    fn bound_in(
        cache: &mut MemoryCache<T>,
        definition: &RecordDefinition,
    ) -> Result<Option<IdBound>, ModelError> {
        match definition.id_spec() {
            None => Ok(None),
            Some(spec @ IdSpec::Fixed(_)) => Ok(Some(spec.bound(None))),
            Some(spec @ IdSpec::Dynamic { address, .. }) => {
                let counter = cache
                    .read(core::slice::from_ref(address))?
                    .first()
                    .and_then(|bytes| bytes.first().copied());
                Ok(Some(spec.bound(counter)))
            }
        }
    }

    /// Number of valid ids of a record type; dynamic bounds are read remotely.
    pub fn id_bound(&self, name: &str) -> Result<IdBound, ModelError> {
        let definition = self.definition(name)?;
        self.with_cache(|cache| Self::bound_in(cache, definition))?
            .ok_or_else(|| ModelError::UnexpectedId {
                record: definition.name().into(),
                id: 0,
            })
    }

    /// Reads the selected fields of every record in one cache read.
    fn fill(
        cache: &mut MemoryCache<T>,
        records: &mut [Record],
        fields: Option<&[&str]>,
    ) -> Result<(), ModelError> {
        let mut addresses = Vec::new();
        let mut plan = Vec::new();
        for (position, record) in records.iter().enumerate() {
            let definition = record.definition();
            for index in definition.select(fields)? {
                let (_, field) = definition.field_at(index);
                addresses.push(field.resolve(definition.name(), record.id())?);
                let shadow = field.resolve_shadow(definition.name(), record.id())?;
                if let Some(shadow) = shadow {
                    addresses.push(shadow);
                }
                plan.push((position, index, shadow.is_some()));
            }
        }
        if addresses.is_empty() {
            return Ok(());
        }

        let mut data = cache.read(&addresses)?.into_iter();
        for (position, index, has_shadow) in plan {
            let raw = data.next().unwrap_or_default();
            let shadow = if has_shadow { data.next() } else { None };
            records[position].fill(index, raw, shadow);
        }
        records.iter().try_for_each(Record::verify)
    }

    fn records_in(
        cache: &mut MemoryCache<T>,
        definition: &Arc<RecordDefinition>,
        ids: &[Option<u32>],
        fields: Option<&[&str]>,
    ) -> Result<Vec<Record>, ModelError> {
        let bound = match definition.id_spec() {
            Some(IdSpec::Dynamic { .. }) if !ids.is_empty() => Self::bound_in(cache, definition)?,
            _ => None,
        };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let (Some(bound), Some(id)) = (bound, id) {
                bound.check(definition.name(), *id)?;
            }
            records.push(Record::new(Arc::clone(definition), *id)?);
        }
        Self::fill(cache, &mut records, fields)?;
        Ok(records)
    }

    /// Reads one record; `fields` limits which fields are loaded (`None` loads all).
    ///
    /// # Errors
    /// * [`ModelError::UnknownRecord`] / [`ModelError::UnknownField`]
    /// * [`ModelError::MissingId`] / [`ModelError::UnexpectedId`] / [`ModelError::DoesNotExist`]
    /// * [`ModelError::InvalidChecksum`] - a guarded field without default is corrupt
    /// * [`ModelError::Transport`]
    pub fn read(
        &self,
        name: &str,
        id: Option<u32>,
        fields: Option<&[&str]>,
    ) -> Result<Record, ModelError> {
        let definition = self.definition(name)?;
        let mut records = self.with_cache(|cache| Self::records_in(cache, definition, &[id], fields))?;
        records.pop().ok_or_else(|| ModelError::MissingId {
            record: definition.name().into(),
        })
    }

    /// Reads several records of one type with a single cache read.
    pub fn read_batch(
        &self,
        name: &str,
        ids: &[u32],
        fields: Option<&[&str]>,
    ) -> Result<Vec<Record>, ModelError> {
        let definition = self.definition(name)?;
        let ids: Vec<Option<u32>> = ids.iter().copied().map(Some).collect();
        self.with_cache(|cache| Self::records_in(cache, definition, &ids, fields))
    }

    /// Reads every record of a type.
    ///
    /// The id bound is resolved once, then all records are read as one batch.
    /// Types without id yield their single record.
    pub fn read_all(&self, name: &str, fields: Option<&[&str]>) -> Result<Vec<Record>, ModelError> {
        let definition = self.definition(name)?;
        self.with_cache(|cache| {
            let ids: Vec<Option<u32>> = match Self::bound_in(cache, definition)? {
                None => vec![None],
                Some(bound) => bound.ids().map(Some).collect(),
            };
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                records.push(Record::new(Arc::clone(definition), id)?);
            }
            Self::fill(cache, &mut records, fields)?;
            Ok(records)
        })
    }

    /// Loads (more) fields into an existing record, e.g. a related record.
    pub fn load(&self, record: &mut Record, fields: Option<&[&str]>) -> Result<(), ModelError> {
        self.with_cache(|cache| Self::fill(cache, core::slice::from_mut(record), fields))
    }

    /// Writes the loaded, writable fields of `record`.
    pub fn write(&self, record: &Record) -> Result<bool, ModelError> {
        self.write_batch(core::slice::from_ref(record))
    }

    /// Writes several records with one cache write.
    ///
    /// The controller is activated once, and the store marked dirty, only
    /// when at least one byte changed. Returns whether anything was written.
    ///
    /// A failed activation is reported after the bytes were written; the
    /// cache keeps them.
    pub fn write_batch(&self, records: &[Record]) -> Result<bool, ModelError> {
        let mut writes = Vec::new();
        for record in records {
            writes.extend(record.writes()?);
        }
        if writes.is_empty() {
            return Ok(false);
        }
        let (changed, activated) = self.with_cache(|cache| {
            let changed = cache.write(&writes)?;
            let activated = if changed { cache.activate() } else { Ok(()) };
            Ok::<_, ModelError>((changed, activated))
        })?;
        if changed {
            self.mark_dirty();
        }
        activated?;
        Ok(changed)
    }

    /// Reads raw bytes at `address`.
    pub fn read_address(&self, address: MemoryAddress) -> Result<Vec<u8>, ModelError> {
        self.with_cache(|cache| cache.read(&[address]))?
            .pop()
            .ok_or(ModelError::ZeroLength)
    }

    /// Writes raw bytes at `address` without activating the controller.
    pub fn write_address(&self, address: MemoryAddress, data: &[u8]) -> Result<bool, ModelError> {
        let changed = self.with_cache(|cache| cache.write(&[(address, data.to_vec())]))?;
        if changed {
            self.mark_dirty();
        }
        Ok(changed)
    }

    /// Tells the controller to reload its configuration.
    pub fn activate(&self) -> Result<(), ModelError> {
        self.with_cache(|cache| cache.activate())?;
        self.mark_dirty();
        Ok(())
    }

    /// Related record `name` of `record`, constructed on first access.
    ///
    /// The target is not read; use [`load`](Self::load) on it. Relations
    /// through a field load that field first. Returns `None` when the
    /// relation points nowhere.
    pub fn relation<'r>(
        &self,
        record: &'r mut Record,
        name: &str,
    ) -> Result<Option<&'r mut Record>, ModelError> {
        let definition = Arc::clone(record.definition());
        let (key, relation) = definition
            .relations()
            .find(|(relation, _)| *relation == name)
            .ok_or_else(|| ModelError::UnknownField {
                record: definition.name().into(),
                field: name.into(),
            })?;
        if record.related(key).is_none() {
            if let RelationSource::Field(field, _) = relation.source {
                if !record.is_loaded(field) {
                    self.load(record, Some(&[field]))?;
                }
            }
            let Some(derived) = record.related_id(relation)? else {
                return Ok(None);
            };
            let id = relation.target.has_id().then_some(derived);
            record.cache_relation(key, Record::new(Arc::clone(&relation.target), id)?);
        }
        Ok(record.related_mut(key))
    }

    /// Drops the whole cache, e.g. after a maintenance session changed memory.
    pub fn invalidate_cache(&self) {
        self.with_cache(|cache| cache.invalidate());
        self.mark_dirty();
    }

    /// Returns whether anything changed since the last call, and clears the flag.
    pub fn get_and_clear_dirty(&self) -> bool {
        critical_section::with(|cs| self.dirty.borrow(cs).replace(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ErrorKind, SpaceId, TransportError, Value, test_support::*};
    use alloc::{string::String, vec::Vec};

    #[test]
    fn hello_world_end_to_end() {
        let (store, mock) = classic_store();

        let mut record = Record::new(Arc::clone(store.definition("Name").unwrap()), Some(3)).unwrap();
        record.set("name", "Hello world").unwrap();
        assert!(store.write(&record).unwrap());

        let read = store.read("Name", Some(3), None).unwrap();
        assert_eq!(read.get("name").unwrap(), Value::from("Hello world"));
        let untouched = store.read("Name", Some(0), None).unwrap();
        assert_eq!(untouched.get("name").unwrap(), Value::from(""));

        // The fill bytes were already 0xFF, only the text itself went out
        assert_eq!(mock.writes().len(), 2);
        assert_eq!(mock.bytes(SpaceId::Eeprom, 60, 48, 16)[..11], *b"Hello world");
        assert_eq!(mock.activations(), 1);
        assert!(matches!(
            store.read("Name", Some(10), None),
            Err(ModelError::DoesNotExist { id: 10, .. })
        ));
    }

    #[test]
    fn dirty_flag_is_check_and_clear() {
        let (store, _mock) = classic_store();
        // Starts dirty so the first synchronization runs
        assert!(store.get_and_clear_dirty());
        assert!(!store.get_and_clear_dirty());

        let mut record = store.read("Name", Some(1), None).unwrap();
        record.set("name", "Lamp").unwrap();
        store.write(&record).unwrap();
        assert!(store.get_and_clear_dirty());
        assert!(!store.get_and_clear_dirty());

        // Writing the same content again changes nothing
        assert!(!store.write(&record).unwrap());
        assert!(!store.get_and_clear_dirty());

        store.invalidate_cache();
        assert!(store.get_and_clear_dirty());
    }

    #[test]
    fn write_batch_activates_once() {
        let (store, mock) = classic_store();
        let mut records = store.read_batch("Output", &[0, 1, 9], Some(&["name"])).unwrap();
        for (i, record) in records.iter_mut().enumerate() {
            record.set("name", alloc::format!("Output {i}")).unwrap();
        }
        assert!(store.write_batch(&records).unwrap());
        assert_eq!(mock.activations(), 1);
        assert!(!store.write_batch(&records).unwrap());
        assert_eq!(mock.activations(), 1);
    }

    #[test]
    fn read_batch_reads_each_page_once() {
        let (store, mock) = classic_store();
        // Ids 0..8 share one page per field
        let ids: Vec<u32> = (0..8).collect();
        store.read_batch("Output", &ids, Some(&["name", "timer"])).unwrap();
        assert_eq!(mock.reads(), [(SpaceId::Eeprom, 1), (SpaceId::Eeprom, 4)]);
    }

    #[test]
    fn partial_reads_only_load_requested_fields() {
        let (store, mock) = classic_store();
        let record = store.read("Output", Some(2), Some(&["timer"])).unwrap();
        assert_eq!(record.loaded_fields().collect::<Vec<_>>(), ["timer"]);
        assert_eq!(
            record.get("name"),
            Err(ModelError::FieldNotLoaded {
                field: "name".into()
            })
        );
        assert_eq!(mock.reads(), [(SpaceId::Eeprom, 4)]);
        assert!(matches!(
            store.read("Output", Some(2), Some(&["colour"])),
            Err(ModelError::UnknownField { .. })
        ));
    }

    #[test]
    fn read_all_resolves_the_bound_once() {
        let (store, mock) = classic_store();
        // Two modules provisioned, eight ids per module
        mock.set_bytes(SpaceId::Eeprom, 0, 1, &[2]);
        let records = store.read_all("Module", Some(&["name"])).unwrap();
        assert_eq!(records.len(), 16);
        assert_eq!(mock.reads(), [(SpaceId::Eeprom, 0), (SpaceId::Eeprom, 50)]);
        assert_eq!(store.id_bound("Module").unwrap(), IdBound::new(16));
        assert!(matches!(
            store.read("Module", Some(16), None),
            Err(ModelError::DoesNotExist { .. })
        ));
    }

    #[test]
    fn unprovisioned_counter_yields_no_records() {
        // 0xFF (erased) is read as zero modules rather than 255
        let (store, mock) = classic_store();
        mock.set_bytes(SpaceId::Eeprom, 0, 1, &[255]);
        assert!(store.read_all("Module", None).unwrap().is_empty());
    }

    #[test]
    fn singleton_records() {
        let (store, mock) = classic_store();
        mock.set_bytes(SpaceId::Eeprom, 0, 4, &[3, 143, 102]);
        let global = store.read("Global", None, None).unwrap();
        assert_eq!(global.get("version").unwrap(), Value::from("3.143.102"));
        assert_eq!(store.read_all("Global", None).unwrap().len(), 1);
        assert!(matches!(
            store.read("Global", Some(1), None),
            Err(ModelError::UnexpectedId { .. })
        ));
        assert!(matches!(
            store.read("Output", None, None),
            Err(ModelError::MissingId { .. })
        ));
    }

    #[test]
    fn read_only_fields_are_never_written() {
        let (store, mock) = classic_store();
        let mut global = store.read("Global", None, None).unwrap();
        assert_eq!(
            global.set("version", "1.2.3"),
            Err(ModelError::FieldNotWritable {
                field: "version".into()
            })
        );
        global.set("startup", true).unwrap();
        store.write(&global).unwrap();
        assert_eq!(mock.writes(), [(SpaceId::Eeprom, 0, 3, vec![0x00])]);
    }

    #[test]
    fn failed_write_forces_a_fresh_read() {
        let (store, mock) = classic_store();
        let mut record = store.read("Name", Some(1), None).unwrap();
        record.set("name", "Garage").unwrap();

        mock.fail_writes(true);
        let err = store.write(&record).unwrap_err();
        assert_eq!(err, ModelError::Transport(TransportError::Timeout));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(mock.activations(), 0);

        mock.fail_writes(false);
        store.read("Name", Some(1), None).unwrap();
        assert_eq!(mock.reads().len(), 2);
    }

    #[test]
    fn failed_activation_keeps_the_written_bytes() {
        let (store, mock) = classic_store();
        store.get_and_clear_dirty();
        let mut record = store.read("Name", Some(2), None).unwrap();
        record.set("name", "Cellar").unwrap();

        mock.fail_activate(true);
        assert!(matches!(
            store.write(&record),
            Err(ModelError::Transport(TransportError::Communication(_)))
        ));
        assert!(store.get_and_clear_dirty());
        assert_eq!(mock.bytes(SpaceId::Eeprom, 60, 32, 6), b"Cellar");

        mock.fail_activate(false);
        assert!(!store.write(&record).unwrap());
        assert_eq!(mock.reads().len(), 1);
    }

    #[test]
    fn corrupt_checksum_propagates() {
        let (store, mock) = classic_store();
        // Offset without default, shadow does not match
        mock.set_bytes(SpaceId::Eeprom, 20, 2, &[0x83]);
        mock.set_bytes(SpaceId::Eeprom, 21, 2, &[0x00]);
        let err = store.read("Sensor", Some(2), Some(&["offset"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);

        // Erased memory is trusted
        let sensor = store.read("Sensor", Some(3), Some(&["offset"])).unwrap();
        assert_eq!(sensor.get("offset").unwrap(), Value::Float(0.0));

        // Corrupt with default falls back
        mock.set_bytes(SpaceId::Eeprom, 22, 4, &[0x12]);
        mock.set_bytes(SpaceId::Eeprom, 23, 4, &[0x34]);
        store.invalidate_cache();
        let sensor = store.read("Sensor", Some(4), Some(&["threshold"])).unwrap();
        assert_eq!(sensor.get("threshold").unwrap(), Value::Int(0));
    }

    #[test]
    fn checksums_are_written_with_the_primary() {
        let (store, mock) = classic_store();
        let mut sensor = store.read("Sensor", Some(5), Some(&["offset"])).unwrap();
        sensor.set("offset", -1.5).unwrap();
        store.write(&sensor).unwrap();
        assert_eq!(
            mock.writes(),
            [
                (SpaceId::Eeprom, 20, 5, vec![0x83]),
                (SpaceId::Eeprom, 21, 5, vec![0x7C]),
            ]
        );
        let read = store.read("Sensor", Some(5), Some(&["offset"])).unwrap();
        assert_eq!(read.get("offset").unwrap(), Value::Float(-1.5));
    }

    #[test]
    fn relations_are_constructed_lazily() {
        let (store, mock) = classic_store();
        mock.set_bytes(SpaceId::Eeprom, 40, 3, &[12]);
        mock.set_bytes(SpaceId::Eeprom, 30, 96, b"Living");

        let mut input = Record::new(Arc::clone(store.definition("Input").unwrap()), Some(3)).unwrap();
        let room = store.relation(&mut input, "location").unwrap().unwrap();
        assert_eq!(room.id(), Some(12));
        assert!(room.loaded_fields().next().is_none());
        // Only the intermediate field was read
        assert_eq!(mock.reads(), [(SpaceId::Eeprom, 40)]);

        store.load(room, None).unwrap();
        assert_eq!(room.get("name").unwrap(), Value::from("Living"));

        // Cached on the owner instance
        assert_eq!(input.related("location").map(Record::id), Some(Some(12)));

        // 255 means "no room"
        mock.set_bytes(SpaceId::Eeprom, 40, 4, &[255]);
        let mut unassigned = Record::new(Arc::clone(store.definition("Input").unwrap()), Some(4)).unwrap();
        assert!(store.relation(&mut unassigned, "location").unwrap().is_none());
    }

    #[test]
    fn relations_by_owner_id() {
        let (store, _mock) = classic_store();
        let mut sensor = Record::new(Arc::clone(store.definition("Sensor").unwrap()), Some(7)).unwrap();
        let output = store.relation(&mut sensor, "output").unwrap().unwrap();
        assert_eq!(output.name(), "Output");
        assert_eq!(output.id(), Some(7));
        assert!(matches!(
            store.relation(&mut sensor, "nothing"),
            Err(ModelError::UnknownField { .. })
        ));
    }

    #[test]
    fn raw_address_access() {
        let (store, mock) = classic_store();
        let address = MemoryAddress::new(SpaceId::Eeprom, 200, 10, 3);
        assert!(store.write_address(address, &[1, 2, 3]).unwrap());
        assert_eq!(store.read_address(address).unwrap(), [1, 2, 3]);
        // Raw writes do not activate
        assert_eq!(mock.activations(), 0);
        store.get_and_clear_dirty();
        assert!(!store.write_address(address, &[1, 2, 3]).unwrap());
        assert!(!store.get_and_clear_dirty());

        store.activate().unwrap();
        assert_eq!(mock.activations(), 1);
    }

    #[test]
    fn serialize_and_deserialize() {
        let (store, _mock) = classic_store();
        let mut output = store.read("Output", Some(5), Some(&["name", "dali"])).unwrap();
        output.set("name", "Hall").unwrap();
        output.set_sub("dali", "group", 4).unwrap();
        let map = output.serialize().unwrap();
        assert_eq!(map["id"], Value::Int(5));
        assert_eq!(map["name"], Value::from("Hall"));
        assert!(!map.contains_key("timer"));

        let copy = Record::deserialize(store.definition("Output").unwrap(), &map).unwrap();
        assert_eq!(copy.writes().unwrap(), output.writes().unwrap());

        let mut bad = map.clone();
        bad.insert(String::from("colour"), Value::from("red"));
        assert_eq!(
            Record::deserialize(store.definition("Output").unwrap(), &bad).unwrap_err(),
            ModelError::UnknownField {
                record: "Output".into(),
                field: "colour".into(),
            }
        );
    }

    #[test]
    fn read_only_fields_survive_a_serialize_round_trip() {
        let (store, mock) = classic_store();
        mock.set_bytes(SpaceId::Eeprom, 0, 3, &[0x00, 3, 143, 102]);
        let global = store.read("Global", None, None).unwrap();
        let map = global.serialize().unwrap();

        let copy = Record::deserialize(store.definition("Global").unwrap(), &map).unwrap();
        assert_eq!(copy.get("version").unwrap(), Value::from("3.143.102"));
        assert_eq!(copy.get("startup").unwrap(), Value::Bool(true));
        assert_eq!(copy.serialize().unwrap(), map);
        // Restored, but still never written
        assert_eq!(
            copy.writes().unwrap(),
            [(MemoryAddress::new(SpaceId::Eeprom, 0, 3, 1), vec![0x00])]
        );
        assert!(!store.write(&copy).unwrap());

        let output = store.read("Output", Some(4), None).unwrap();
        let copy = Record::deserialize(output.definition(), &output.serialize().unwrap()).unwrap();
        assert_eq!(copy.get("module_type"), output.get("module_type"));
        assert_eq!(copy.writes().unwrap(), output.writes().unwrap());
    }

    #[test]
    fn cache_stats_are_exposed() {
        let (store, _mock) = classic_store();
        store.read("Name", Some(0), None).unwrap();
        store.read("Name", Some(1), None).unwrap();
        let stats = store.cache_stats();
        assert_eq!((stats.misses, stats.hits, stats.page_reads), (1, 1, 1));
        assert_eq!(store.with_transport(|t| t.reads().len()), 1);
    }
}
