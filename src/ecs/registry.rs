//! Component metadata registry
//!
//! Maps component types to the processors that handle them. The registry is
//! built once at startup, then shared read-only between managers.

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::component::{ComponentType, EntityComponent};
use super::processor::{EntityProcessor, ProcessorKey};
use super::transform::TransformComponent;
use super::transform_processor::TransformProcessor;

bitflags! {
    /// Contexts in which a processor runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ExecutionMode: u32 {
        /// The running game
        const RUNTIME = 1;
        /// The editor
        const EDITOR = 1 << 1;
        /// Thumbnail generation
        const THUMBNAIL = 1 << 2;
        /// Asset preview
        const PREVIEW = 1 << 3;
        /// Every context
        const ALL = Self::RUNTIME.bits() | Self::EDITOR.bits() | Self::THUMBNAIL.bits() | Self::PREVIEW.bits();
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::RUNTIME
    }
}

/// Creates a processor instance.
pub type ProcessorFactory = fn() -> Box<dyn EntityProcessor>;

/// A processor declared for a component type.
#[derive(Clone, Copy)]
pub struct ProcessorRegistration {
    key: ProcessorKey,
    mode: ExecutionMode,
    factory: ProcessorFactory,
}

impl ProcessorRegistration {
    /// Registration of `P` for the given modes
    #[must_use]
    pub fn new<P: EntityProcessor + Default>(mode: ExecutionMode) -> Self {
        Self {
            key: ProcessorKey::of::<P>(),
            mode,
            factory: create_processor::<P>,
        }
    }

    /// Processor key
    #[must_use]
    pub fn key(&self) -> ProcessorKey {
        self.key
    }

    /// Modes in which the processor runs
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Whether the processor applies to a manager running in `mode`.
    ///
    /// One shared mode is enough: a processor declared for `RUNTIME | EDITOR`
    /// applies to a `RUNTIME` manager, even though `RUNTIME` does not contain
    /// every declared mode.
    #[must_use]
    pub fn applies_to(&self, mode: ExecutionMode) -> bool {
        self.mode.intersects(mode)
    }

    /// New processor instance
    #[must_use]
    pub fn create(&self) -> Box<dyn EntityProcessor> {
        (self.factory)()
    }
}

fn create_processor<P: EntityProcessor + Default>() -> Box<dyn EntityProcessor> {
    Box::new(P::default())
}

impl std::fmt::Debug for ProcessorRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistration")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Metadata of one component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    component_type: ComponentType,
    processors: Vec<ProcessorRegistration>,
}

impl ComponentInfo {
    /// Component type
    #[must_use]
    pub fn component_type(&self) -> ComponentType {
        self.component_type
    }

    /// Declared processors, in declaration order
    #[must_use]
    pub fn processors(&self) -> &[ProcessorRegistration] {
        &self.processors
    }
}

/// Component type metadata shared by entity managers.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: FxHashMap<ComponentType, ComponentInfo>,
}

impl ComponentRegistry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> ComponentRegistryBuilder {
        ComponentRegistryBuilder::default()
    }

    /// Registry with the built-in component types
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::builder().with_defaults().build()
    }

    /// Metadata of a component type
    #[must_use]
    pub fn info(&self, component_type: ComponentType) -> Option<&ComponentInfo> {
        self.components.get(&component_type)
    }

    /// Whether a component type is known
    #[must_use]
    pub fn contains(&self, component_type: ComponentType) -> bool {
        self.components.contains_key(&component_type)
    }

    /// Processors that handle `component_type` in `mode`
    pub fn processors_for(
        &self,
        component_type: ComponentType,
        mode: ExecutionMode,
    ) -> impl Iterator<Item = &ProcessorRegistration> {
        self.components
            .get(&component_type)
            .into_iter()
            .flat_map(|info| info.processors.iter())
            .filter(move |registration| registration.applies_to(mode))
    }

    /// Number of known component types
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether no component type is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Builder for [`ComponentRegistry`].
#[derive(Debug, Default)]
pub struct ComponentRegistryBuilder {
    components: FxHashMap<ComponentType, ComponentInfo>,
}

impl ComponentRegistryBuilder {
    /// Register the built-in component types
    #[must_use]
    pub fn with_defaults(self) -> Self {
        self.register_processor::<TransformComponent, TransformProcessor>(ExecutionMode::ALL)
    }

    /// Declare a component type without processors
    #[must_use]
    pub fn register<C: EntityComponent>(mut self) -> Self {
        self.entry(ComponentType::of::<C>());
        self
    }

    /// Declare that `P` handles components of type `C` in `mode`
    #[must_use]
    pub fn register_processor<C, P>(mut self, mode: ExecutionMode) -> Self
    where
        C: EntityComponent,
        P: EntityProcessor + Default,
    {
        let registration = ProcessorRegistration::new::<P>(mode);
        let info = self.entry(ComponentType::of::<C>());
        match info
            .processors
            .iter_mut()
            .find(|existing| existing.key == registration.key)
        {
            Some(existing) => existing.mode |= mode,
            None => info.processors.push(registration),
        }
        self
    }

    fn entry(&mut self, component_type: ComponentType) -> &mut ComponentInfo {
        self.components
            .entry(component_type)
            .or_insert_with(|| ComponentInfo {
                component_type,
                processors: Vec::new(),
            })
    }

    /// Freeze the registry
    #[must_use]
    pub fn build(self) -> ComponentRegistry {
        ComponentRegistry {
            components: self.components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::testing::{CountingProcessor, EditorProcessor, Health, Marker};

    #[test]
    fn test_defaults_register_transform_processor() {
        let registry = ComponentRegistry::with_defaults();
        let keys: Vec<_> = registry
            .processors_for(ComponentType::of::<TransformComponent>(), ExecutionMode::RUNTIME)
            .map(ProcessorRegistration::key)
            .collect();
        assert_eq!(keys, vec![ProcessorKey::of::<TransformProcessor>()]);
    }

    #[test]
    fn test_processors_filtered_by_mode() {
        let registry = ComponentRegistry::builder()
            .register_processor::<Health, CountingProcessor>(ExecutionMode::RUNTIME)
            .register_processor::<Health, EditorProcessor>(ExecutionMode::EDITOR)
            .build();
        let health = ComponentType::of::<Health>();

        assert_eq!(registry.processors_for(health, ExecutionMode::RUNTIME).count(), 1);
        assert_eq!(registry.processors_for(health, ExecutionMode::EDITOR).count(), 1);
        assert_eq!(registry.processors_for(health, ExecutionMode::ALL).count(), 2);
        assert_eq!(registry.processors_for(health, ExecutionMode::PREVIEW).count(), 0);
    }

    #[test]
    fn test_repeated_registration_merges_modes() {
        let registry = ComponentRegistry::builder()
            .register_processor::<Health, CountingProcessor>(ExecutionMode::RUNTIME)
            .register_processor::<Health, CountingProcessor>(ExecutionMode::EDITOR)
            .build();
        let info = registry.info(ComponentType::of::<Health>()).unwrap();

        assert_eq!(info.processors().len(), 1);
        assert_eq!(
            info.processors()[0].mode(),
            ExecutionMode::RUNTIME | ExecutionMode::EDITOR
        );
    }

    #[test]
    fn test_one_shared_mode_is_enough() {
        let registration =
            ProcessorRegistration::new::<CountingProcessor>(ExecutionMode::RUNTIME | ExecutionMode::EDITOR);

        assert!(registration.applies_to(ExecutionMode::RUNTIME));
        assert!(registration.applies_to(ExecutionMode::EDITOR | ExecutionMode::PREVIEW));
        assert!(!registration.applies_to(ExecutionMode::THUMBNAIL));
    }

    #[test]
    fn test_unknown_component_has_no_processors() {
        let registry = ComponentRegistry::builder().register::<Marker>().build();
        assert!(registry.contains(ComponentType::of::<Marker>()));
        assert!(!registry.contains(ComponentType::of::<Health>()));
        assert_eq!(
            registry
                .processors_for(ComponentType::of::<Health>(), ExecutionMode::ALL)
                .count(),
            0
        );
    }
}
