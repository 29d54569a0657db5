//! Record schemas: named fields, id range and relations.

use alloc::{format, string::String, sync::Arc, vec::Vec};
use core::{fmt, ops::Range};

use crate::model::{
    AddressSpec, Checksum, Codec, Composite, MemoryAddress, ModelError, SpaceId,
    composite::BitPosition,
};

/// Maximum number of fields of one record definition.
pub const MAX_FIELDS: usize = 64;

/// Name of the id entry in serialized records.
pub const ID_KEY: &str = "id";

/// Sentinel of an unprovisioned dynamic id counter.
const UNPROVISIONED: u8 = 255;

/// One declared field: location, codec and optional composite/checksum layers.
#[derive(Debug, Clone)]
pub struct Field {
    pub space: SpaceId,
    pub address: AddressSpec,
    pub codec: Codec,
    pub read_only: bool,
    pub composite: Option<Composite>,
    pub checksum: Option<Checksum>,
}

impl Field {
    pub fn new(space: SpaceId, address: AddressSpec, codec: Codec) -> Self {
        Self {
            space,
            address,
            codec,
            read_only: false,
            composite: None,
            checksum: None,
        }
    }

    pub fn eeprom(address: AddressSpec, codec: Codec) -> Self {
        Self::new(SpaceId::Eeprom, address, codec)
    }

    pub fn fram(address: AddressSpec, codec: Codec) -> Self {
        Self::new(SpaceId::Fram, address, codec)
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn composite(mut self, composite: Composite) -> Self {
        self.composite = Some(composite);
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn length(&self) -> u16 {
        self.codec.length()
    }

    /// Primary address for `id`.
    pub fn resolve(&self, record: &str, id: Option<u32>) -> Result<MemoryAddress, ModelError> {
        self.address.resolve(record, self.space, self.length(), id)
    }

    /// Shadow checksum address for `id`, if the field is guarded.
    pub fn resolve_shadow(
        &self,
        record: &str,
        id: Option<u32>,
    ) -> Result<Option<MemoryAddress>, ModelError> {
        self.checksum
            .as_ref()
            .map(|checksum| checksum.shadow.resolve(record, self.space, self.length(), id))
            .transpose()
    }
}

/// Valid id range of a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// Ids `0..count`.
    Fixed(u32),
    /// Ids `0..byte * multiplier`, the byte being read from remote memory.
    Dynamic {
        address: MemoryAddress,
        multiplier: u32,
        cap: Option<u32>,
    },
}

impl IdSpec {
    pub const fn fixed(count: u32) -> Self {
        IdSpec::Fixed(count)
    }

    pub const fn dynamic(address: MemoryAddress, multiplier: u32) -> Self {
        IdSpec::Dynamic {
            address,
            multiplier,
            cap: None,
        }
    }

    /// Limits a dynamic bound to at most `max` ids.
    pub const fn capped(self, max: u32) -> Self {
        match self {
            IdSpec::Dynamic {
                address,
                multiplier,
                ..
            } => IdSpec::Dynamic {
                address,
                multiplier,
                cap: Some(max),
            },
            fixed => fixed,
        }
    }

    /// Bound from the counter byte of a dynamic spec; fixed specs ignore it.
    ///
    /// `255` (erased memory) counts as zero provisioned units.
    pub fn bound(&self, counter: Option<u8>) -> IdBound {
        match *self {
            IdSpec::Fixed(count) => IdBound::new(count),
            IdSpec::Dynamic {
                multiplier, cap, ..
            } => {
                let units = match counter {
                    Some(UNPROVISIONED) | None => 0,
                    Some(units) => u32::from(units),
                };
                let count = units.saturating_mul(multiplier);
                IdBound::new(cap.map_or(count, |cap| count.min(cap)))
            }
        }
    }
}

/// Resolved number of valid ids, `0..count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdBound {
    pub count: u32,
}

impl IdBound {
    pub const fn new(count: u32) -> Self {
        Self { count }
    }

    pub const fn contains(&self, id: u32) -> bool {
        id < self.count
    }

    pub fn ids(&self) -> Range<u32> {
        0..self.count
    }

    /// Fails with [`ModelError::DoesNotExist`] when `id` is out of range.
    pub fn check(&self, record: &str, id: u32) -> Result<(), ModelError> {
        if self.contains(id) {
            return Ok(());
        }
        let detail = match self.count {
            0 => String::from("No records available."),
            1 => String::from("Only one record available: 0"),
            count => format!("Available records: 0 <= id <= {}", count - 1),
        };
        Err(ModelError::DoesNotExist {
            record: record.into(),
            id,
            detail,
        })
    }
}

/// Target id derivation of a relation.
pub type RelationFn = fn(u32) -> Option<u32>;

#[derive(Clone, Copy)]
pub enum RelationSource {
    /// Derived from the owner's id.
    OwnerId(RelationFn),
    /// Derived from an integer field of the owner.
    Field(&'static str, RelationFn),
}

impl fmt::Debug for RelationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationSource::OwnerId(_) => f.write_str("OwnerId(..)"),
            RelationSource::Field(field, _) => write!(f, "Field({field:?}, ..)"),
        }
    }
}

/// Link from a record to a record of another type.
#[derive(Debug, Clone)]
pub struct Relation {
    pub target: Arc<RecordDefinition>,
    pub source: RelationSource,
}

impl Relation {
    pub fn by_owner(target: Arc<RecordDefinition>, derive: RelationFn) -> Self {
        Self {
            target,
            source: RelationSource::OwnerId(derive),
        }
    }

    pub fn by_field(target: Arc<RecordDefinition>, field: &'static str, derive: RelationFn) -> Self {
        Self {
            target,
            source: RelationSource::Field(field, derive),
        }
    }
}

/// Immutable schema of one record type.
#[derive(Debug)]
pub struct RecordDefinition {
    name: &'static str,
    id: Option<IdSpec>,
    fields: Vec<(&'static str, Field)>,
    relations: Vec<(&'static str, Relation)>,
}

impl RecordDefinition {
    pub fn builder(name: &'static str) -> RecordDefinitionBuilder {
        RecordDefinitionBuilder {
            name,
            id: None,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id_spec(&self) -> Option<&IdSpec> {
        self.id.as_ref()
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &Field)> + '_ {
        self.fields.iter().map(|(name, field)| (*name, field))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn relations(&self) -> impl Iterator<Item = (&'static str, &Relation)> + '_ {
        self.relations.iter().map(|(name, relation)| (*name, relation))
    }

    pub fn field_index(&self, name: &str) -> Result<usize, ModelError> {
        self.fields
            .iter()
            .position(|(field, _)| *field == name)
            .ok_or_else(|| ModelError::UnknownField {
                record: self.name.into(),
                field: name.into(),
            })
    }

    pub(crate) fn field_at(&self, index: usize) -> (&'static str, &Field) {
        let (name, field) = &self.fields[index];
        (name, field)
    }

    pub fn field(&self, name: &str) -> Result<&Field, ModelError> {
        self.field_index(name).map(|index| &self.fields[index].1)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|(relation, _)| *relation == name)
            .map(|(_, relation)| relation)
    }

    /// Field indices for a selection; `None` selects every field.
    pub fn select(&self, fields: Option<&[&str]>) -> Result<Vec<usize>, ModelError> {
        match fields {
            None => Ok((0..self.fields.len()).collect()),
            Some(names) => names.iter().map(|name| self.field_index(name)).collect(),
        }
    }

    /// Addresses (primary plus checksum shadow) of the selected fields for `id`.
    ///
    /// Only the requested fields are resolved; unknown names are rejected.
    pub fn addresses(
        &self,
        id: Option<u32>,
        fields: Option<&[&str]>,
    ) -> Result<Vec<MemoryAddress>, ModelError> {
        let mut addresses = Vec::new();
        for index in self.select(fields)? {
            let field = &self.fields[index].1;
            addresses.push(field.resolve(self.name, id)?);
            if let Some(shadow) = field.resolve_shadow(self.name, id)? {
                addresses.push(shadow);
            }
        }
        Ok(addresses)
    }
}

/// Builder for [`RecordDefinition`]s; all checks run in [`build`](Self::build).
#[derive(Debug)]
pub struct RecordDefinitionBuilder {
    name: &'static str,
    id: Option<IdSpec>,
    fields: Vec<(&'static str, Field)>,
    relations: Vec<(&'static str, Relation)>,
}

impl RecordDefinitionBuilder {
    pub fn id(mut self, id: IdSpec) -> Self {
        self.id = Some(id);
        self
    }

    pub fn field(mut self, name: &'static str, field: Field) -> Self {
        self.fields.push((name, field));
        self
    }

    pub fn relation(mut self, name: &'static str, relation: Relation) -> Self {
        self.relations.push((name, relation));
        self
    }

    fn invalid(&self, reason: impl Into<String>) -> ModelError {
        ModelError::InvalidSchema {
            record: self.name.into(),
            reason: reason.into(),
        }
    }

    /// Validates the declaration and freezes it.
    ///
    /// # Errors
    /// [`ModelError::InvalidSchema`] for duplicate names, addresses that do not
    /// match the presence of an id, composites on non-integer codecs,
    /// relations through unknown or non-integer fields, or more than
    /// [`MAX_FIELDS`] fields.
    pub fn build(self) -> Result<Arc<RecordDefinition>, ModelError> {
        if self.fields.len() > MAX_FIELDS {
            return Err(self.invalid(format!("more than {MAX_FIELDS} fields")));
        }
        let has_id = self.id.is_some();
        let names = self
            .fields
            .iter()
            .map(|(name, _)| *name)
            .chain(self.relations.iter().map(|(name, _)| *name));
        for (i, name) in names.clone().enumerate() {
            if name == ID_KEY || names.clone().take(i).any(|other| other == name) {
                return Err(self.invalid(format!("duplicate or reserved name `{name}`")));
            }
        }

        for (name, field) in &self.fields {
            field
                .codec
                .validate()
                .map_err(|reason| self.invalid(format!("field `{name}`: {reason}")))?;
            if field.address.needs_id() != has_id {
                return Err(self.invalid(format!(
                    "field `{name}` address must {}depend on the id",
                    if has_id { "" } else { "not " }
                )));
            }
            if let Some(checksum) = &field.checksum {
                if checksum.shadow.needs_id() != has_id {
                    return Err(self.invalid(format!("checksum of `{name}` does not match the id")));
                }
            }
            if let Some(composite) = &field.composite {
                let uint = field.codec.as_uint().ok_or_else(|| {
                    self.invalid(format!("composite `{name}` needs an integer codec"))
                })?;
                composite
                    .validate(u32::from(uint.length) * 8)
                    .map_err(|reason| self.invalid(format!("field `{name}`: {reason}")))?;
                if !has_id
                    && composite
                        .subs()
                        .iter()
                        .any(|sub| matches!(sub.start, BitPosition::PerId(_)))
                {
                    return Err(self.invalid(format!("composite `{name}` uses id bits without id")));
                }
            }
        }

        for (name, relation) in &self.relations {
            match relation.source {
                RelationSource::OwnerId(_) if !has_id => {
                    return Err(self.invalid(format!("relation `{name}` needs an id")));
                }
                RelationSource::Field(field, _) => {
                    let codec = self
                        .fields
                        .iter()
                        .find(|(candidate, _)| *candidate == field)
                        .map(|(_, declared)| &declared.codec);
                    if codec.and_then(Codec::as_uint).is_none() {
                        return Err(self.invalid(format!(
                            "relation `{name}` needs integer field `{field}`"
                        )));
                    }
                }
                RelationSource::OwnerId(_) => {}
            }
        }

        if let Some(IdSpec::Dynamic { multiplier: 0, .. }) = self.id {
            return Err(self.invalid("dynamic id multiplier is zero"));
        }

        Ok(Arc::new(RecordDefinition {
            name: self.name,
            id: self.id,
            fields: self.fields,
            relations: self.relations,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SubField, test_support::*};

    #[test]
    fn addresses_cover_only_the_requested_fields() {
        let definition = output_definition();
        let all = definition.addresses(Some(1), None).unwrap();
        assert_eq!(all.len(), definition.field_count());

        let name_only = definition.addresses(Some(1), Some(&["name"])).unwrap();
        assert_eq!(name_only, [MemoryAddress::new(SpaceId::Eeprom, 1, 20, 16)]);

        assert_eq!(
            definition.addresses(Some(1), Some(&["colour"])),
            Err(ModelError::UnknownField {
                record: "Output".into(),
                field: "colour".into(),
            })
        );
    }

    #[test]
    fn checksum_shadows_are_resolved_with_the_primary() {
        let definition = sensor_definition();
        let addresses = definition.addresses(Some(2), Some(&["offset"])).unwrap();
        assert_eq!(
            addresses,
            [
                MemoryAddress::new(SpaceId::Eeprom, 20, 2, 1),
                MemoryAddress::new(SpaceId::Eeprom, 21, 2, 1),
            ]
        );
    }

    #[test]
    fn id_presence_must_match_the_addresses() {
        let static_with_id = RecordDefinition::builder("Broken")
            .id(IdSpec::fixed(4))
            .field("level", Field::eeprom(AddressSpec::at(0, 0), Codec::u8()))
            .build();
        assert!(matches!(static_with_id, Err(ModelError::InvalidSchema { .. })));

        let generated_without_id = RecordDefinition::builder("Broken")
            .field("level", Field::eeprom(AddressSpec::per_id(|id| (0, id as u16)), Codec::u8()))
            .build();
        assert!(generated_without_id.is_err());
    }

    #[test]
    fn rejects_malformed_declarations() {
        let duplicate = RecordDefinition::builder("Broken")
            .field("a", Field::eeprom(AddressSpec::at(0, 0), Codec::u8()))
            .field("a", Field::eeprom(AddressSpec::at(0, 1), Codec::u8()))
            .build();
        assert!(duplicate.is_err());

        let reserved = RecordDefinition::builder("Broken")
            .field("id", Field::eeprom(AddressSpec::at(0, 0), Codec::u8()))
            .build();
        assert!(reserved.is_err());

        let composite_on_text = RecordDefinition::builder("Broken")
            .field(
                "name",
                Field::eeprom(AddressSpec::at(0, 0), Codec::text(4))
                    .composite(Composite::new([SubField::bit("x", 0)])),
            )
            .build();
        assert!(composite_on_text.is_err());

        let relation_through_text = RecordDefinition::builder("Broken")
            .id(IdSpec::fixed(2))
            .field("name", Field::eeprom(AddressSpec::per_id(|id| (0, id as u16 * 4)), Codec::text(4)))
            .relation("room", Relation::by_field(room_definition(), "name", |v| Some(v)))
            .build();
        assert!(relation_through_text.is_err());
    }

    #[test]
    fn id_bounds() {
        assert_eq!(IdSpec::fixed(10).bound(None), IdBound::new(10));

        let modules = IdSpec::dynamic(MemoryAddress::new(SpaceId::Eeprom, 0, 1, 1), 8);
        assert_eq!(modules.bound(Some(3)).ids(), 0..24);
        assert_eq!(modules.capped(20).bound(Some(3)).count, 20);
        assert_eq!(modules.bound(Some(0)).count, 0);
    }

    #[test]
    fn unprovisioned_counter_reads_as_zero_units() {
        // 255 is erased memory and therefore "no modules", never 255 modules
        let modules = IdSpec::dynamic(MemoryAddress::new(SpaceId::Eeprom, 0, 1, 1), 8);
        assert_eq!(modules.bound(Some(255)).count, 0);
        assert_eq!(modules.bound(Some(254)).count, 254 * 8);
    }

    #[test]
    fn does_not_exist_details() {
        let err = |count, id| match IdBound::new(count).check("Output", id) {
            Err(ModelError::DoesNotExist { detail, .. }) => detail,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(err(0, 0), "No records available.");
        assert_eq!(err(1, 4), "Only one record available: 0");
        assert_eq!(err(24, 30), "Available records: 0 <= id <= 23");
        assert!(IdBound::new(24).check("Output", 23).is_ok());
    }
}
