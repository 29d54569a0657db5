use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

use bitmaps::Bitmap;

use crate::model::{
    ChecksumState, Composite, MemoryAddress, ModelError, RecordDefinition, UInt, Value, ValueMap,
    definition::{Field, ID_KEY, IdSpec, MAX_FIELDS, Relation, RelationSource},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Slot {
    raw: Vec<u8>,
    shadow: Option<Vec<u8>>,
}

/// One instance of a [`RecordDefinition`], addressed by an optional id.
///
/// Only loaded fields (read from memory or assigned) are exposed, serialized
/// and written back. Instances are plain values meant for a single logical
/// operation; related records are cached per instance.
#[derive(Debug, Clone)]
pub struct Record {
    definition: Arc<RecordDefinition>,
    id: Option<u32>,
    loaded: Bitmap<MAX_FIELDS>,
    slots: Vec<Slot>,
    relations: BTreeMap<&'static str, Record>,
}

impl Record {
    /// Creates an empty record.
    ///
    /// # Errors
    /// * [`ModelError::MissingId`] / [`ModelError::UnexpectedId`] - id does not
    ///   match the definition
    /// * [`ModelError::DoesNotExist`] - id outside a fixed id range
    pub fn new(definition: Arc<RecordDefinition>, id: Option<u32>) -> Result<Self, ModelError> {
        match (definition.id_spec(), id) {
            (Some(_), None) => {
                return Err(ModelError::MissingId {
                    record: definition.name().into(),
                });
            }
            (None, Some(id)) => {
                return Err(ModelError::UnexpectedId {
                    record: definition.name().into(),
                    id,
                });
            }
            (Some(spec @ IdSpec::Fixed(_)), Some(id)) => spec.bound(None).check(definition.name(), id)?,
            _ => {}
        }
        Ok(Self::unchecked(definition, id))
    }

    pub(crate) fn unchecked(definition: Arc<RecordDefinition>, id: Option<u32>) -> Self {
        let slots = vec![Slot::default(); definition.field_count()];
        Self {
            definition,
            id,
            loaded: Bitmap::new(),
            slots,
            relations: BTreeMap::new(),
        }
    }

    pub fn definition(&self) -> &Arc<RecordDefinition> {
        &self.definition
    }

    pub fn name(&self) -> &'static str {
        self.definition.name()
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn is_loaded(&self, field: &str) -> bool {
        self.definition
            .field_index(field)
            .is_ok_and(|index| self.loaded.get(index))
    }

    pub fn loaded_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.loaded_indices()
            .map(|index| self.definition.field_at(index).0)
    }

    fn loaded_indices(&self) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(self.loaded.first_index(), |index| {
            self.loaded.next_index(*index)
        })
    }

    fn loaded_index(&self, field: &str) -> Result<(usize, &Field), ModelError> {
        let index = self.definition.field_index(field)?;
        if !self.loaded.get(index) {
            return Err(ModelError::FieldNotLoaded {
                field: field.into(),
            });
        }
        Ok((index, self.definition.field_at(index).1))
    }

    /// Decoded value of a loaded field; composites decode to a map of sub-values.
    ///
    /// # Errors
    /// * [`ModelError::UnknownField`] / [`ModelError::FieldNotLoaded`]
    /// * [`ModelError::InvalidChecksum`] - shadow mismatch without default
    pub fn get(&self, field: &str) -> Result<Value, ModelError> {
        let (index, declared) = self.loaded_index(field)?;
        let slot = &self.slots[index];
        if let (Some(checksum), Some(shadow)) = (&declared.checksum, &slot.shadow) {
            if declared.composite.is_none() {
                return checksum.decode(field, &declared.codec, &slot.raw, shadow);
            }
            // Composites only need the verdict, the sub-values are decoded below
            if let Some(default) = checksum_fallback(field, declared, &slot.raw, shadow)? {
                return Ok(default);
            }
        }
        match (&declared.composite, declared.codec.as_uint()) {
            (Some(composite), Some(uint)) => Ok(Value::Map(
                composite.decompose_all(uint.decode_raw(&slot.raw), self.id),
            )),
            _ => Ok(declared.codec.decode(&slot.raw)),
        }
    }

    /// Value of one sub-field of a loaded composite field.
    pub fn get_sub(&self, field: &str, sub: &str) -> Result<Value, ModelError> {
        let (index, declared) = self.loaded_index(field)?;
        let (composite, uint) = composite_of(field, sub, declared)?;
        let raw = uint.decode_raw(&self.slots[index].raw);
        Ok(composite.sub_or_err(field, sub)?.decompose(raw, self.id))
    }

    /// Assigns a whole field and marks it loaded.
    ///
    /// Composite fields take a map of sub-values. Sub-values not named in the
    /// map keep their current bits, so a composite that was never loaded can
    /// only be assigned with a map naming every sub-field.
    ///
    /// # Errors
    /// * [`ModelError::FieldNotWritable`] - the field is read-only
    /// * [`ModelError::FieldNotLoaded`] - partial composite map on an unloaded field
    /// * any encoding error of the field codec
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), ModelError> {
        if self.definition.field(field)?.read_only {
            return Err(ModelError::FieldNotWritable {
                field: field.into(),
            });
        }
        self.assign(field, value.into())
    }

    /// Encodes and stores `value` regardless of writability; read-only fields
    /// still never show up in [`writes`](Self::writes).
    fn assign(&mut self, field: &str, value: Value) -> Result<(), ModelError> {
        let index = self.definition.field_index(field)?;
        let definition = Arc::clone(&self.definition);
        let declared = definition.field_at(index).1;
        let bytes = match (&declared.composite, declared.codec.as_uint()) {
            (Some(composite), Some(uint)) => {
                let values = value.as_map().ok_or_else(|| {
                    ModelError::invalid_value(field, "expected a map of sub-field values")
                })?;
                let base = if self.loaded.get(index) {
                    uint.decode_raw(&self.slots[index].raw)
                } else if composite
                    .subs()
                    .iter()
                    .all(|sub| values.contains_key(sub.name))
                {
                    uint.decode_raw(&vec![0xFF; uint.length as usize])
                } else {
                    return Err(ModelError::FieldNotLoaded {
                        field: field.into(),
                    });
                };
                let width = u32::from(uint.length) * 8;
                uint.encode_raw(composite.compose_all(field, base, values, width, self.id)?)
            }
            _ => declared.codec.encode(field, &value)?,
        };
        self.store(index, declared, bytes);
        Ok(())
    }

    /// Assigns one sub-field of a loaded composite field.
    pub fn set_sub(&mut self, field: &str, sub: &str, value: impl Into<Value>) -> Result<(), ModelError> {
        let value = value.into();
        let definition = Arc::clone(&self.definition);
        let (index, declared) = {
            let index = definition.field_index(field)?;
            (index, definition.field_at(index).1)
        };
        if declared.read_only {
            return Err(ModelError::FieldNotWritable {
                field: field.into(),
            });
        }
        if !self.loaded.get(index) {
            return Err(ModelError::FieldNotLoaded {
                field: field.into(),
            });
        }
        let (composite, uint) = composite_of(field, sub, declared)?;
        let raw = uint.decode_raw(&self.slots[index].raw);
        let width = u32::from(uint.length) * 8;
        let composed = composite
            .sub_or_err(field, sub)?
            .compose(field, raw, &value, width, self.id)?;
        if composed != raw {
            self.store(index, declared, uint.encode_raw(composed));
        }
        Ok(())
    }

    fn store(&mut self, index: usize, declared: &Field, bytes: Vec<u8>) {
        let shadow = declared.checksum.as_ref().map(|checksum| checksum.compute(&bytes));
        self.slots[index] = Slot { raw: bytes, shadow };
        self.loaded.set(index, true);
    }

    /// Stores freshly read bytes for field `index`.
    pub(crate) fn fill(&mut self, index: usize, raw: Vec<u8>, shadow: Option<Vec<u8>>) {
        self.slots[index] = Slot { raw, shadow };
        self.loaded.set(index, true);
    }

    /// Fails on the first loaded field whose checksum does not hold and has no default.
    pub(crate) fn verify(&self) -> Result<(), ModelError> {
        for index in self.loaded_indices() {
            let (name, declared) = self.definition.field_at(index);
            let slot = &self.slots[index];
            if let (Some(checksum), Some(shadow)) = (&declared.checksum, &slot.shadow) {
                checksum.decode(name, &declared.codec, &slot.raw, shadow)?;
            }
        }
        Ok(())
    }

    /// Encoded bytes of every loaded, writable field (primary and shadow).
    pub fn writes(&self) -> Result<Vec<(MemoryAddress, Vec<u8>)>, ModelError> {
        let mut writes = Vec::new();
        let record = self.definition.name();
        for index in self.loaded_indices() {
            let (_, declared) = self.definition.field_at(index);
            if declared.read_only {
                continue;
            }
            let slot = &self.slots[index];
            writes.push((declared.resolve(record, self.id)?, slot.raw.clone()));
            if let (Some(address), Some(shadow)) =
                (declared.resolve_shadow(record, self.id)?, &slot.shadow)
            {
                writes.push((address, shadow.clone()));
            }
        }
        Ok(writes)
    }

    /// Id a relation derives from this record, `None` if it points nowhere.
    ///
    /// Relations through a field need that field to be loaded.
    pub fn related_id(&self, relation: &Relation) -> Result<Option<u32>, ModelError> {
        Ok(match relation.source {
            RelationSource::OwnerId(derive) => self.id.and_then(derive),
            RelationSource::Field(field, derive) => self.get(field)?.as_u32().and_then(derive),
        })
    }

    pub fn related(&self, name: &str) -> Option<&Record> {
        self.relations.get(name)
    }

    pub(crate) fn cache_relation(&mut self, name: &'static str, record: Record) -> &mut Record {
        self.relations.entry(name).or_insert(record)
    }

    pub(crate) fn related_mut(&mut self, name: &str) -> Option<&mut Record> {
        self.relations.get_mut(name)
    }

    /// Serializes the id and every loaded field; cached related records with
    /// loaded fields are nested under the relation name.
    pub fn serialize(&self) -> Result<ValueMap, ModelError> {
        let mut map = ValueMap::new();
        if let Some(id) = self.id {
            map.insert(ID_KEY.to_string(), Value::from(id));
        }
        for name in self.loaded_fields() {
            map.insert(name.to_string(), self.get(name)?);
        }
        for (name, related) in &self.relations {
            if !related.loaded.is_empty() {
                map.insert(name.to_string(), Value::Map(related.serialize()?));
            }
        }
        Ok(map)
    }

    /// Builds a record from a serialized map.
    ///
    /// Relation entries take a nested map; their id defaults to the id the
    /// relation derives from this record.
    ///
    /// Read-only fields are restored as well.
    ///
    /// # Errors
    /// * [`ModelError::UnknownField`] - a key names neither a field nor a relation
    pub fn deserialize(definition: &Arc<RecordDefinition>, map: &ValueMap) -> Result<Self, ModelError> {
        let id = match map.get(ID_KEY) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u32().ok_or_else(|| {
                ModelError::invalid_value(ID_KEY, "expected a non-negative integer")
            })?),
        };
        let mut record = Record::new(Arc::clone(definition), id)?;
        let mut nested = Vec::new();
        for (key, value) in map {
            if key == ID_KEY {
                continue;
            }
            if definition.field_index(key).is_ok() {
                record.assign(key, value.clone())?;
            } else if let Some((name, relation)) =
                definition.relations().find(|(name, _)| *name == key.as_str())
            {
                nested.push((name, relation, value));
            } else {
                return Err(ModelError::UnknownField {
                    record: definition.name().into(),
                    field: key.clone(),
                });
            }
        }
        for (name, relation, value) in nested {
            let mut related = value
                .as_map()
                .ok_or_else(|| ModelError::invalid_value(name, "expected a nested record"))?
                .clone();
            if relation.target.has_id() && !related.contains_key(ID_KEY) {
                if let Some(id) = record.related_id(relation)? {
                    related.insert(String::from(ID_KEY), Value::from(id));
                }
            }
            let target = Record::deserialize(&relation.target, &related)?;
            record.cache_relation(name, target);
        }
        Ok(record)
    }
}

fn composite_of<'a>(
    field: &str,
    sub: &str,
    declared: &'a Field,
) -> Result<(&'a Composite, &'a UInt), ModelError> {
    match (&declared.composite, declared.codec.as_uint()) {
        (Some(composite), Some(uint)) => Ok((composite, uint)),
        _ => Err(ModelError::UnknownSubField {
            field: field.into(),
            sub: sub.into(),
        }),
    }
}

fn checksum_fallback(
    field: &str,
    declared: &Field,
    raw: &[u8],
    shadow: &[u8],
) -> Result<Option<Value>, ModelError> {
    let Some(checksum) = &declared.checksum else {
        return Ok(None);
    };
    match checksum.state(raw, shadow) {
        ChecksumState::Invalid => {
            checksum.decode(field, &declared.codec, raw, shadow).map(Some)
        }
        _ => Ok(None),
    }
}
