use alloc::sync::Arc;

use crate::model::{
    MemoryLayout, ModelError, RecordDefinition, RecordStore, SchemaRegistry, Transport,
};

// Builder states
pub struct NeedLayout;
pub struct NeedTransport {
    layout: MemoryLayout,
}
pub struct Ready<T> {
    layout: MemoryLayout,
    transport: T,
}

/// Step-by-step construction of a [`RecordStore`].
///
/// The layout and the transport are required, in that order; definitions
/// can be added any number of times once the transport is set.
///
/// ```rust,ignore
/// let store = RecordStoreBuilder::new()
///     .layout(MemoryLayout::classic())
///     .transport(serial)
///     .definition(output)
///     .definition(input)
///     .build()?;
/// ```
pub struct RecordStoreBuilder<State> {
    state: State,
    registry: SchemaRegistry,
    error: Option<ModelError>,
}

impl RecordStoreBuilder<NeedLayout> {
    pub fn new() -> Self {
        RecordStoreBuilder {
            state: NeedLayout,
            registry: SchemaRegistry::new(),
            error: None,
        }
    }

    pub fn layout(self, layout: MemoryLayout) -> RecordStoreBuilder<NeedTransport> {
        RecordStoreBuilder {
            state: NeedTransport { layout },
            registry: self.registry,
            error: self.error,
        }
    }

    pub fn classic(self) -> RecordStoreBuilder<NeedTransport> {
        self.layout(MemoryLayout::classic())
    }

    pub fn core(self) -> RecordStoreBuilder<NeedTransport> {
        self.layout(MemoryLayout::core())
    }
}

impl Default for RecordStoreBuilder<NeedLayout> {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStoreBuilder<NeedTransport> {
    pub fn transport<T: Transport>(self, transport: T) -> RecordStoreBuilder<Ready<T>> {
        RecordStoreBuilder {
            state: Ready {
                layout: self.state.layout,
                transport,
            },
            registry: self.registry,
            error: self.error,
        }
    }
}

impl<T: Transport> RecordStoreBuilder<Ready<T>> {
    /// Registers a definition and the targets of its relations.
    ///
    /// Conflicts are reported by [`build`](Self::build).
    pub fn definition(mut self, definition: Arc<RecordDefinition>) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.registry.register(definition) {
                self.error = Some(err);
            }
        }
        self
    }

    pub fn definitions(self, definitions: impl IntoIterator<Item = Arc<RecordDefinition>>) -> Self {
        definitions
            .into_iter()
            .fold(self, |builder, definition| builder.definition(definition))
    }

    /// # Errors
    /// The first [`ModelError::InvalidSchema`] raised while registering.
    pub fn build(self) -> Result<RecordStore<T>, ModelError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let Ready { layout, transport } = self.state;
        log::debug!("MEMORY: store ready with {} record types", self.registry.len());
        Ok(RecordStore::new(transport, layout, self.registry))
    }
}
