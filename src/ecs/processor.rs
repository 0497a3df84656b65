//! Entity processors
//!
//! A processor reacts to components of the types it accepts being attached to
//! or detached from registered entities, and runs once per frame in
//! [`EntityProcessor::order`] order.
//!
//! Processors never mutate the entity graph directly while they are being
//! notified. Registration changes they need are queued on [`EntityCommands`]
//! and applied by the manager once the current notification is done.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashMap;

use super::component::{ComponentId, ComponentType, EntityComponent};
use super::entity::EntityId;
use super::store::EntityStore;
use crate::core::{GameTime, RenderContext};

/// Identifies a processor type inside a manager.
#[derive(Clone, Copy)]
pub struct ProcessorKey {
    id: TypeId,
    name: &'static str,
}

impl ProcessorKey {
    /// Key of the processor type `P`
    #[must_use]
    pub fn of<P: EntityProcessor>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: std::any::type_name::<P>(),
        }
    }

    /// Key of a boxed processor
    #[must_use]
    pub fn of_processor(processor: &dyn EntityProcessor) -> Self {
        Self {
            id: processor.as_any().type_id(),
            name: processor.name(),
        }
    }

    /// Processor type name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ProcessorKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProcessorKey {}

impl std::hash::Hash for ProcessorKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ProcessorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.rsplit("::").next().unwrap_or(self.name))
    }
}

/// Registration change requested by a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityCommand {
    /// Register an entity that is already in the store
    Add(EntityId),
    /// Unregister an entity
    Remove {
        /// Entity to unregister
        entity: EntityId,
        /// Also detach it from its transform parent
        remove_parent: bool,
    },
}

/// FIFO queue of registration changes.
#[derive(Debug, Default)]
pub struct EntityCommands {
    queue: VecDeque<EntityCommand>,
}

impl EntityCommands {
    /// Queue an entity registration
    pub fn add_entity(&mut self, entity: EntityId) {
        self.queue.push_back(EntityCommand::Add(entity));
    }

    /// Queue an entity removal
    pub fn remove_entity(&mut self, entity: EntityId, remove_parent: bool) {
        self.queue.push_back(EntityCommand::Remove {
            entity,
            remove_parent,
        });
    }

    pub(crate) fn pop(&mut self) -> Option<EntityCommand> {
        self.queue.pop_front()
    }

    /// Number of queued commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

/// View handed to processors while they are notified about components.
pub struct ProcessorContext<'a> {
    store: &'a EntityStore,
    commands: &'a mut EntityCommands,
}

impl<'a> ProcessorContext<'a> {
    pub(crate) fn new(store: &'a EntityStore, commands: &'a mut EntityCommands) -> Self {
        Self { store, commands }
    }

    /// Read access to every entity
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        self.store
    }

    /// Queue for registration changes
    pub fn commands(&mut self) -> &mut EntityCommands {
        self.commands
    }

    /// Whether `entity` carries at least one component of each type
    #[must_use]
    pub fn entity_matches(&self, entity: EntityId, required: &[ComponentType]) -> bool {
        self.store.entity(entity).is_some_and(|entity| {
            required
                .iter()
                .all(|ty| entity.components().iter().any(|c| c.component_type() == *ty))
        })
    }
}

/// View handed to processors during update and draw.
pub struct FrameContext<'a> {
    /// Every entity, writable
    pub store: &'a mut EntityStore,
    /// Queue for registration changes
    pub commands: &'a mut EntityCommands,
}

/// A system reacting to components of specific types.
///
/// One processor of each concrete type lives in a manager. The manager
/// creates processors from the [`ComponentRegistry`](super::ComponentRegistry)
/// when it first sees one of their component types, or they can be added
/// explicitly with [`EntityManager::add_processor`](super::EntityManager::add_processor).
pub trait EntityProcessor: Any {
    /// Display name, used for logs and statistics
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Dispatch order, lower runs first. Read once when the processor is added.
    fn order(&self) -> i32 {
        0
    }

    /// Component type this processor primarily acts on
    fn main_component_type(&self) -> ComponentType;

    /// Other component types an entity needs before it is processed
    fn required_types(&self) -> &[ComponentType] {
        &[]
    }

    /// Whether components of `component_type` are handed to this processor
    fn accept(&self, component_type: ComponentType) -> bool {
        component_type == self.main_component_type()
    }

    /// Whether a change to `component_type` can change this processor's view
    /// of an entity it already accepted
    fn is_dependent_on_component_type(&self, component_type: ComponentType) -> bool {
        self.required_types().contains(&component_type)
    }

    /// Called for an accepted component that was attached or detached, or
    /// whose entity changed in a way this processor depends on.
    ///
    /// `force_remove` is set when the component is leaving the processor no
    /// matter what the entity looks like.
    fn process_entity_component(
        &mut self,
        ctx: &mut ProcessorContext<'_>,
        entity: EntityId,
        component: &dyn EntityComponent,
        force_remove: bool,
    );

    /// Forget every tracked component, the processor is being removed
    fn remove_all_entities(&mut self, ctx: &mut ProcessorContext<'_>);

    /// Called once after the processor has been added to a manager
    fn on_system_add(&mut self, _ctx: &mut ProcessorContext<'_>) {}

    /// Called once after the processor has been removed from a manager
    fn on_system_remove(&mut self, _ctx: &mut ProcessorContext<'_>) {}

    /// Per-frame logic
    fn update(&mut self, _ctx: &mut FrameContext<'_>, _time: &GameTime) {}

    /// Per-frame presentation work
    fn draw(&mut self, _ctx: &mut FrameContext<'_>, _render: &RenderContext) {}

    /// Upcast for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Entry of an [`EntityProcessorCollection`].
pub struct ProcessorEntry {
    key: ProcessorKey,
    order: i32,
    /// Disabled processors are skipped by update and draw
    pub enabled: bool,
    processor: Box<dyn EntityProcessor>,
}

impl ProcessorEntry {
    /// Processor key
    #[must_use]
    pub fn key(&self) -> ProcessorKey {
        self.key
    }

    /// Order captured when the processor was added
    #[must_use]
    pub fn order(&self) -> i32 {
        self.order
    }

    /// The processor
    #[must_use]
    pub fn processor(&self) -> &dyn EntityProcessor {
        self.processor.as_ref()
    }

    /// The processor, writable
    pub fn processor_mut(&mut self) -> &mut dyn EntityProcessor {
        self.processor.as_mut()
    }
}

impl fmt::Debug for ProcessorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorEntry")
            .field("key", &self.key)
            .field("order", &self.order)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Processors sorted by order.
///
/// Processors with equal order keep the order in which they were added.
#[derive(Debug, Default)]
pub struct EntityProcessorCollection {
    entries: Vec<ProcessorEntry>,
}

impl EntityProcessorCollection {
    /// Empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a processor at its sorted position.
    ///
    /// Returns the processor back if one of the same type is already present.
    pub fn insert(
        &mut self,
        processor: Box<dyn EntityProcessor>,
    ) -> Result<usize, Box<dyn EntityProcessor>> {
        let key = ProcessorKey::of_processor(processor.as_ref());
        if self.contains(key) {
            return Err(processor);
        }
        let order = processor.order();
        let index = self.entries.partition_point(|entry| entry.order <= order);
        self.entries.insert(
            index,
            ProcessorEntry {
                key,
                order,
                enabled: true,
                processor,
            },
        );
        Ok(index)
    }

    /// Remove a processor by key
    pub fn remove(&mut self, key: ProcessorKey) -> Option<Box<dyn EntityProcessor>> {
        let index = self.index_of(key)?;
        Some(self.entries.remove(index).processor)
    }

    /// Remove every processor, in order
    pub fn drain(&mut self) -> impl Iterator<Item = Box<dyn EntityProcessor>> + '_ {
        self.entries.drain(..).map(|entry| entry.processor)
    }

    /// Position of a processor
    #[must_use]
    pub fn index_of(&self, key: ProcessorKey) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key == key)
    }

    /// Whether a processor of this type is present
    #[must_use]
    pub fn contains(&self, key: ProcessorKey) -> bool {
        self.index_of(key).is_some()
    }

    /// Processor by key
    #[must_use]
    pub fn get_by_key(&self, key: ProcessorKey) -> Option<&dyn EntityProcessor> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(ProcessorEntry::processor)
    }

    /// Writable processor by key
    pub fn get_by_key_mut(&mut self, key: ProcessorKey) -> Option<&mut dyn EntityProcessor> {
        self.entries
            .iter_mut()
            .find(|entry| entry.key == key)
            .map(ProcessorEntry::processor_mut)
    }

    /// Processor of type `P`
    #[must_use]
    pub fn get<P: EntityProcessor>(&self) -> Option<&P> {
        self.get_by_key(ProcessorKey::of::<P>())
            .and_then(|p| p.as_any().downcast_ref::<P>())
    }

    /// Writable processor of type `P`
    pub fn get_mut<P: EntityProcessor>(&mut self) -> Option<&mut P> {
        self.get_by_key_mut(ProcessorKey::of::<P>())
            .and_then(|p| p.as_any_mut().downcast_mut::<P>())
    }

    /// Enable or disable a processor, returns false when it is missing
    pub fn set_enabled(&mut self, key: ProcessorKey, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Entries in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &ProcessorEntry> {
        self.entries.iter()
    }

    /// Writable entries in dispatch order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProcessorEntry> {
        self.entries.iter_mut()
    }

    /// Keys in dispatch order
    pub fn keys(&self) -> impl Iterator<Item = ProcessorKey> + '_ {
        self.entries.iter().map(|entry| entry.key)
    }

    /// Number of processors
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no processors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a typed processor should do with a component it was notified about.
#[derive(Debug, PartialEq)]
pub enum DataTransition<D> {
    /// Not tracked yet and now matching: generate data and start tracking
    Add,
    /// Tracked and no longer matching: the data was dropped from the map
    Remove(D),
    /// Tracked but the data went stale: it was dropped from the map and
    /// should be regenerated
    Refresh(D),
    /// Tracked and still valid
    Keep,
    /// Not tracked and not matching
    Ignore,
}

#[derive(Debug)]
struct ComponentData<D> {
    entity: EntityId,
    data: D,
}

/// Per-component state of a processor, keyed by component identity.
///
/// Implements the add/remove/revalidate bookkeeping shared by processors that
/// associate data with each accepted component.
#[derive(Debug)]
pub struct ComponentDatas<D> {
    datas: FxHashMap<ComponentId, ComponentData<D>>,
}

impl<D> Default for ComponentDatas<D> {
    fn default() -> Self {
        Self {
            datas: FxHashMap::default(),
        }
    }
}

impl<D> ComponentDatas<D> {
    /// Empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what happens to `component` and drop stale data.
    ///
    /// `matches` is whether the entity currently qualifies for processing;
    /// `is_valid` is only asked about data that is tracked and still matching.
    pub fn classify(
        &mut self,
        component: ComponentId,
        matches: bool,
        is_valid: impl FnOnce(&D) -> bool,
    ) -> DataTransition<D> {
        let Some(entry) = self.datas.get(&component) else {
            return if matches {
                DataTransition::Add
            } else {
                DataTransition::Ignore
            };
        };
        if matches && is_valid(&entry.data) {
            return DataTransition::Keep;
        }
        match self.datas.remove(&component) {
            Some(entry) if matches => DataTransition::Refresh(entry.data),
            Some(entry) => DataTransition::Remove(entry.data),
            None => DataTransition::Ignore,
        }
    }

    /// Start tracking a component
    pub fn insert(&mut self, component: ComponentId, entity: EntityId, data: D) {
        self.datas.insert(component, ComponentData { entity, data });
    }

    /// Stop tracking a component
    pub fn remove(&mut self, component: ComponentId) -> Option<(EntityId, D)> {
        self.datas
            .remove(&component)
            .map(|entry| (entry.entity, entry.data))
    }

    /// Data of a tracked component
    #[must_use]
    pub fn get(&self, component: ComponentId) -> Option<&D> {
        self.datas.get(&component).map(|entry| &entry.data)
    }

    /// Writable data of a tracked component
    pub fn get_mut(&mut self, component: ComponentId) -> Option<&mut D> {
        self.datas.get_mut(&component).map(|entry| &mut entry.data)
    }

    /// Whether a component is tracked
    #[must_use]
    pub fn contains(&self, component: ComponentId) -> bool {
        self.datas.contains_key(&component)
    }

    /// Entity owning a tracked component
    #[must_use]
    pub fn entity_of(&self, component: ComponentId) -> Option<EntityId> {
        self.datas.get(&component).map(|entry| entry.entity)
    }

    /// Tracked components with their entity and data, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, EntityId, &D)> {
        self.datas
            .iter()
            .map(|(id, entry)| (*id, entry.entity, &entry.data))
    }

    /// Writable view of every tracked component
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ComponentId, EntityId, &mut D)> {
        self.datas
            .iter_mut()
            .map(|(id, entry)| (*id, entry.entity, &mut entry.data))
    }

    /// Stop tracking everything
    pub fn drain(&mut self) -> impl Iterator<Item = (ComponentId, EntityId, D)> + '_ {
        self.datas
            .drain()
            .map(|(id, entry)| (id, entry.entity, entry.data))
    }

    /// Number of tracked components
    #[must_use]
    pub fn len(&self) -> usize {
        self.datas.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::testing::{CountingProcessor, OrderedProcessor};

    #[test]
    fn test_collection_sorted_by_order() {
        let mut processors = EntityProcessorCollection::new();
        assert!(processors.insert(Box::new(OrderedProcessor::<0>::new(10))).is_ok());
        assert!(processors.insert(Box::new(OrderedProcessor::<1>::new(-5))).is_ok());
        assert!(processors.insert(Box::new(OrderedProcessor::<2>::new(3))).is_ok());

        let orders: Vec<i32> = processors.iter().map(ProcessorEntry::order).collect();
        assert_eq!(orders, vec![-5, 3, 10]);
    }

    #[test]
    fn test_collection_equal_order_keeps_insertion_order() {
        let mut processors = EntityProcessorCollection::new();
        assert!(processors.insert(Box::new(OrderedProcessor::<0>::new(1))).is_ok());
        assert!(processors.insert(Box::new(OrderedProcessor::<1>::new(1))).is_ok());
        assert!(processors.insert(Box::new(OrderedProcessor::<2>::new(0))).is_ok());
        assert!(processors.insert(Box::new(OrderedProcessor::<3>::new(1))).is_ok());

        let keys: Vec<ProcessorKey> = processors.keys().collect();
        assert_eq!(
            keys,
            vec![
                ProcessorKey::of::<OrderedProcessor<2>>(),
                ProcessorKey::of::<OrderedProcessor<0>>(),
                ProcessorKey::of::<OrderedProcessor<1>>(),
                ProcessorKey::of::<OrderedProcessor<3>>(),
            ]
        );
    }

    #[test]
    fn test_collection_rejects_duplicate_type() {
        let mut processors = EntityProcessorCollection::new();
        assert!(processors.insert(Box::new(CountingProcessor::default())).is_ok());
        assert!(processors.insert(Box::new(CountingProcessor::default())).is_err());
        assert_eq!(processors.len(), 1);
        assert!(processors.get::<CountingProcessor>().is_some());
    }

    #[test]
    fn test_collection_enable_and_remove() {
        let mut processors = EntityProcessorCollection::new();
        let key = ProcessorKey::of::<CountingProcessor>();
        assert!(processors.insert(Box::new(CountingProcessor::default())).is_ok());

        assert!(processors.set_enabled(key, false));
        assert!(!processors.iter().next().is_some_and(|entry| entry.enabled));

        assert!(processors.remove(key).is_some());
        assert!(processors.is_empty());
        assert!(!processors.set_enabled(key, true));
    }

    #[test]
    fn test_component_datas_transitions() {
        let mut datas = ComponentDatas::<u32>::new();
        let component = ComponentId::new();
        let entity = EntityId::default();

        assert_eq!(datas.classify(component, false, |_| true), DataTransition::Ignore);
        assert_eq!(datas.classify(component, true, |_| true), DataTransition::Add);

        datas.insert(component, entity, 7);
        assert_eq!(datas.classify(component, true, |d| *d == 7), DataTransition::Keep);
        assert_eq!(
            datas.classify(component, true, |d| *d == 8),
            DataTransition::Refresh(7)
        );
        assert!(!datas.contains(component));

        datas.insert(component, entity, 8);
        assert_eq!(datas.classify(component, false, |_| true), DataTransition::Remove(8));
        assert!(datas.is_empty());
    }

    #[test]
    fn test_commands_fifo() {
        let mut commands = EntityCommands::default();
        let entity = EntityId::default();
        commands.add_entity(entity);
        commands.remove_entity(entity, true);

        assert_eq!(commands.len(), 2);
        assert_eq!(commands.pop(), Some(EntityCommand::Add(entity)));
        assert_eq!(
            commands.pop(),
            Some(EntityCommand::Remove {
                entity,
                remove_parent: true
            })
        );
        assert!(commands.is_empty());
    }
}
