use alloc::{collections::BTreeMap, format, string::String, sync::Arc};

use crate::model::{ModelError, RecordDefinition};

/// Record definitions known to a store, keyed by record name.
///
/// Filled once while building the store and read-only afterwards. Targets of
/// relations are registered together with the definition that refers to them.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    definitions: BTreeMap<&'static str, Arc<RecordDefinition>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `definition` and every definition reachable through its relations.
    ///
    /// Registering the same definition twice is a no-op; a different
    /// definition under an existing name is rejected.
    pub fn register(&mut self, definition: Arc<RecordDefinition>) -> Result<(), ModelError> {
        if let Some(existing) = self.definitions.get(definition.name()) {
            if Arc::ptr_eq(existing, &definition) {
                return Ok(());
            }
            return Err(ModelError::InvalidSchema {
                record: definition.name().into(),
                reason: format!("name `{}` is already registered", definition.name()),
            });
        }
        self.definitions.insert(definition.name(), Arc::clone(&definition));
        for (_, relation) in definition.relations() {
            self.register(Arc::clone(&relation.target))?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<RecordDefinition>, ModelError> {
        self.definitions
            .get(name)
            .ok_or_else(|| ModelError::UnknownRecord(String::from(name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.definitions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
