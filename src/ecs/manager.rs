//! Entity manager
//!
//! Owns the entities of a scene graph together with the processors working on
//! them, and routes every structural change to the interested processors.
//!
//! # Flow
//!
//! Registering an entity looks at each of its components: processors already
//! known for the component type are notified, and processors declared for
//! unseen types in the [`ComponentRegistry`] are created. New processors are
//! held back until the outermost registration finishes, then added in order,
//! each one being shown every registered entity.
//!
//! Every component addition, removal or replacement on a registered entity
//! goes through [`EntityManager::notify_component_changed`]. Processors that
//! want to register or unregister other entities while they are notified
//! queue [`EntityCommand`]s, applied once the notification is done.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};

use super::collection::AttachPolicy;
use super::component::{ComponentId, ComponentType, EntityComponent};
use super::entity::{Entity, EntityId};
use super::error::{EcsError, EcsResult};
use super::processor::{
    EntityCommand, EntityCommands, EntityProcessor, EntityProcessorCollection, FrameContext,
    ProcessorContext, ProcessorKey,
};
use super::registry::{ComponentRegistry, ExecutionMode};
use super::store::EntityStore;
use super::transform::TransformComponent;
use super::transform_processor::TransformProcessor;
use crate::core::{EventQueue, GameTime, ProcessorTimings, RenderContext};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an entity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

impl ManagerId {
    fn next() -> Self {
        Self(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Notifications emitted by an [`EntityManager`], in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityManagerEvent {
    /// An entity was registered
    EntityAdded(EntityId),
    /// An entity was unregistered
    EntityRemoved(EntityId),
    /// The transform parent of a registered entity changed
    HierarchyChanged(EntityId),
    /// A component type was seen for the first time
    ComponentTypeAdded(ComponentType),
    /// A component of a registered entity was added, removed or replaced
    ComponentChanged {
        /// Entity owning the component
        entity: EntityId,
        /// Slot that changed
        index: usize,
        /// Component that left the slot
        previous: Option<ComponentId>,
        /// Component now in the slot
        new: Option<ComponentId>,
    },
    /// A processor was added
    ProcessorAdded(ProcessorKey),
    /// A processor was removed
    ProcessorRemoved(ProcessorKey),
}

/// Processors interested in one component type.
#[derive(Debug, Default)]
struct ProcessorsForComponentType {
    /// Accepting processors with their order, sorted by order
    processors: Vec<(i32, ProcessorKey)>,
    /// Processors that depend on the type without accepting it
    dependencies: Vec<ProcessorKey>,
}

impl ProcessorsForComponentType {
    fn insert(&mut self, order: i32, key: ProcessorKey) {
        let index = self.processors.partition_point(|(o, _)| *o <= order);
        self.processors.insert(index, (order, key));
    }

    fn keys(&self) -> Vec<ProcessorKey> {
        self.processors.iter().map(|(_, key)| *key).collect()
    }
}

/// Processor side of the manager, kept apart from the store so both can be
/// borrowed at once.
#[derive(Debug, Default)]
struct Dispatch {
    processors: EntityProcessorCollection,
    map_component_type_to_processors: FxHashMap<ComponentType, ProcessorsForComponentType>,
    commands: EntityCommands,
}

impl Dispatch {
    fn process(
        &mut self,
        store: &EntityStore,
        key: ProcessorKey,
        entity: EntityId,
        component: &dyn EntityComponent,
        force_remove: bool,
    ) {
        if let Some(processor) = self.processors.get_by_key_mut(key) {
            let mut ctx = ProcessorContext::new(store, &mut self.commands);
            processor.process_entity_component(&mut ctx, entity, component, force_remove);
        }
    }

    /// Hand `component` to its processors, except `skip`, and collect the
    /// processors that depend on its type.
    fn check_component(
        &mut self,
        store: &EntityStore,
        entity: EntityId,
        component: &dyn EntityComponent,
        force_remove: bool,
        skip: &[ProcessorKey],
        dependents: Option<&mut Vec<ProcessorKey>>,
    ) {
        let component_type = component.component_type();
        if !self
            .map_component_type_to_processors
            .contains_key(&component_type)
        {
            let mut entry = ProcessorsForComponentType::default();
            for processor in self.processors.iter() {
                if processor.processor().accept(component_type) {
                    entry.processors.push((processor.order(), processor.key()));
                }
                if processor
                    .processor()
                    .is_dependent_on_component_type(component_type)
                {
                    entry.dependencies.push(processor.key());
                }
            }
            self.map_component_type_to_processors
                .insert(component_type, entry);
        }

        let (keys, dependencies) = match self.map_component_type_to_processors.get(&component_type)
        {
            Some(entry) => (entry.keys(), entry.dependencies.clone()),
            None => return,
        };

        for key in keys.into_iter().filter(|key| !skip.contains(key)) {
            self.process(store, key, entity, component, force_remove);
        }

        if let Some(dependents) = dependents {
            for key in dependencies {
                if !dependents.contains(&key) {
                    dependents.push(key);
                }
            }
        }
    }

    /// Revalidate the other components of `entity` with the processors that
    /// depend on a changed component.
    fn update_dependent_processors(
        &mut self,
        store: &EntityStore,
        entity: EntityId,
        skip: &[ComponentId],
        dependents: &[ProcessorKey],
    ) {
        let Some(entity_ref) = store.entity(entity) else {
            return;
        };
        for component in entity_ref.components().iter() {
            if skip.contains(&component.id()) {
                continue;
            }
            let Some(entry) = self
                .map_component_type_to_processors
                .get(&component.component_type())
            else {
                continue;
            };
            for key in entry.keys() {
                if dependents.contains(&key) {
                    self.process(store, key, entity, component, false);
                }
            }
        }
    }

    /// Show a newly added processor the accepted components of an entity.
    fn check_entity_with_new_processor(
        &mut self,
        store: &EntityStore,
        entity: EntityId,
        key: ProcessorKey,
    ) {
        let Some(entity_ref) = store.entity(entity) else {
            return;
        };
        let Some(processor) = self.processors.get_by_key_mut(key) else {
            return;
        };
        for component in entity_ref.components().iter() {
            if processor.accept(component.component_type()) {
                let mut ctx = ProcessorContext::new(store, &mut self.commands);
                processor.process_entity_component(&mut ctx, entity, component, false);
            }
        }
    }
}

/// Owns entities, processors and the component type index.
pub struct EntityManager {
    id: ManagerId,
    registry: Arc<ComponentRegistry>,
    execution_mode: ExecutionMode,
    store: EntityStore,
    entities: FxHashSet<EntityId>,
    dispatch: Dispatch,
    pending_processors: Vec<Box<dyn EntityProcessor>>,
    component_types: FxHashSet<ComponentType>,
    add_entity_level: u32,
    events: EventQueue<EntityManagerEvent>,
    timings: FxHashMap<ProcessorKey, ProcessorTimings>,
}

impl EntityManager {
    /// Manager running in [`ExecutionMode::RUNTIME`]
    ///
    /// Every change pushes an [`EntityManagerEvent`]. [`Engine`](crate::core::Engine)
    /// swaps the queue once per tick; a host driving the manager itself must
    /// call `events_mut().swap()` regularly or the queue keeps growing.
    #[must_use]
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self::with_execution_mode(registry, ExecutionMode::RUNTIME)
    }

    /// Manager running in the given mode
    #[must_use]
    pub fn with_execution_mode(registry: Arc<ComponentRegistry>, mode: ExecutionMode) -> Self {
        Self {
            id: ManagerId::next(),
            registry,
            execution_mode: mode,
            store: EntityStore::new(),
            entities: FxHashSet::default(),
            dispatch: Dispatch::default(),
            pending_processors: Vec::new(),
            component_types: FxHashSet::default(),
            add_entity_level: 0,
            events: EventQueue::new(),
            timings: FxHashMap::default(),
        }
    }

    /// Manager identity
    #[must_use]
    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// Component metadata in use
    #[must_use]
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Mode used to filter registered processors
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// Every stored entity and scene
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Every stored entity and scene, writable
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    /// Stored entity by handle
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.store.entity(id)
    }

    /// Writable stored entity by handle
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.store.entity_mut(id)
    }

    /// Number of registered entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether an entity is registered
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains(&entity)
    }

    /// Registered entities, in no particular order
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().copied()
    }

    /// Component types seen so far, in no particular order
    pub fn component_types(&self) -> impl Iterator<Item = ComponentType> + '_ {
        self.component_types.iter().copied()
    }

    /// Active processors in dispatch order
    #[must_use]
    pub fn processors(&self) -> &EntityProcessorCollection {
        &self.dispatch.processors
    }

    /// Processor of type `P`
    #[must_use]
    pub fn processor<P: EntityProcessor>(&self) -> Option<&P> {
        self.dispatch.processors.get::<P>()
    }

    /// Writable processor of type `P`
    pub fn processor_mut<P: EntityProcessor>(&mut self) -> Option<&mut P> {
        self.dispatch.processors.get_mut::<P>()
    }

    /// Enable or disable a processor for update and draw
    pub fn set_processor_enabled(&mut self, key: ProcessorKey, enabled: bool) -> bool {
        self.dispatch.processors.set_enabled(key, enabled)
    }

    /// Notifications emitted so far
    #[must_use]
    pub fn events(&self) -> &EventQueue<EntityManagerEvent> {
        &self.events
    }

    /// Writable notification queue, swap it once per frame
    pub fn events_mut(&mut self) -> &mut EventQueue<EntityManagerEvent> {
        &mut self.events
    }

    /// Update and draw timings per processor
    #[must_use]
    pub fn processor_timings(&self) -> &FxHashMap<ProcessorKey, ProcessorTimings> {
        &self.timings
    }

    /// Put an entity in the store without registering it
    ///
    /// # Errors
    ///
    /// [`EcsError::ForeignEntity`] when one of its component instances is
    /// already held by another stored entity.
    pub fn insert_entity(&mut self, entity: Entity) -> EcsResult<EntityId> {
        self.store.insert(entity)
    }

    /// Put an entity in the store and register it
    ///
    /// # Errors
    ///
    /// See [`Self::insert_entity`].
    pub fn spawn(&mut self, entity: Entity) -> EcsResult<EntityId> {
        let id = self.store.insert(entity)?;
        self.internal_add_entity(id);
        Ok(id)
    }

    /// Create and register an entity with a default transform
    pub fn create_entity(&mut self, name: impl Into<String>) -> EntityId {
        let id = self.store.insert_unchecked(Entity::new(name));
        self.internal_add_entity(id);
        id
    }

    /// Take an unregistered entity out of the store.
    ///
    /// The entity is detached from its parent, children and scene.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityInUse`] while it is registered.
    pub fn take_entity(&mut self, id: EntityId) -> EcsResult<Entity> {
        if !self.store.contains(id) {
            return Err(EcsError::EntityNotFound(id));
        }
        if self.contains(id) {
            return Err(EcsError::EntityInUse(id));
        }
        if let Some(parent) = self.store.parent(id) {
            self.store.unlink_child(parent, id);
        }
        for child in self.store.children(id).to_vec() {
            self.store.unlink_child(id, child);
        }
        if let Some(scene) = self.store.entity(id).and_then(Entity::scene) {
            if let Some(scene) = self.store.scene_mut(scene) {
                scene.entities.retain(|e| *e != id);
            }
        }
        self.store.remove(id).ok_or(EcsError::EntityNotFound(id))
    }

    /// Register a root entity and everything below it.
    ///
    /// # Errors
    ///
    /// - [`EcsError::ForeignManager`] when the handle comes from another
    ///   manager
    /// - [`EcsError::EntityHasParent`] when the entity has a transform parent;
    ///   register the parent instead
    pub fn add(&mut self, entity: EntityId) -> EcsResult<()> {
        if entity.store() != self.store.id() {
            return Err(EcsError::ForeignManager(entity));
        }
        if !self.store.contains(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        if self.store.parent(entity).is_some() {
            return Err(EcsError::EntityHasParent(entity));
        }
        self.internal_add_entity(entity);
        Ok(())
    }

    /// Unregister an entity and its descendants, detaching it from its
    /// parent. Returns whether it was registered.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        let registered = self.contains(entity);
        self.internal_remove_entity(entity, true);
        registered
    }

    pub(crate) fn internal_add_entity(&mut self, entity: EntityId) {
        if self.entities.contains(&entity) {
            return;
        }
        let Some(entity_ref) = self.store.entity_mut(entity) else {
            log::warn!("cannot register unknown entity {entity:?}");
            return;
        };
        entity_ref.manager = Some(self.id);
        self.entities.insert(entity);

        // Processors can register entities too; pending processors are only
        // flushed by the outermost call
        self.add_entity_level += 1;
        self.check_entity_with_processors(entity, false, true);
        self.flush_commands();
        self.add_entity_level -= 1;

        self.register_pending_processors();

        log::trace!("entity {entity:?} added");
        self.events.push(EntityManagerEvent::EntityAdded(entity));
    }

    pub(crate) fn internal_remove_entity(&mut self, entity: EntityId, remove_parent: bool) {
        if !self.entities.remove(&entity) {
            return;
        }

        if remove_parent {
            if let Some(parent) = self.store.parent(entity) {
                self.store.unlink_child(parent, entity);
                self.events
                    .push(EntityManagerEvent::HierarchyChanged(entity));
            }
        }

        self.check_entity_with_processors(entity, true, false);
        self.flush_commands();

        if let Some(entity_ref) = self.store.entity_mut(entity) {
            entity_ref.manager = None;
        }

        log::trace!("entity {entity:?} removed");
        self.events.push(EntityManagerEvent::EntityRemoved(entity));
    }

    /// Unregister every entity and drop every processor.
    ///
    /// Entities stay in the store. Pending and undelivered events are
    /// dropped.
    pub fn reset(&mut self) {
        for entity in self.sorted_entities() {
            self.internal_remove_entity(entity, true);
        }

        self.entities.clear();
        self.component_types.clear();
        self.dispatch.map_component_type_to_processors.clear();
        self.pending_processors.clear();

        let keys: Vec<ProcessorKey> = self.dispatch.processors.keys().collect();
        for key in keys {
            self.on_processor_removed(key);
        }
        self.dispatch.commands.clear();
        self.timings.clear();
        self.events.clear();
    }

    /// Add a processor explicitly. Returns false when one of the same type
    /// is already present.
    pub fn add_processor(&mut self, processor: impl EntityProcessor) -> bool {
        self.add_processor_boxed(Box::new(processor))
    }

    /// Add a boxed processor explicitly
    pub fn add_processor_boxed(&mut self, processor: Box<dyn EntityProcessor>) -> bool {
        self.on_processor_added(processor)
    }

    /// Remove the processor of type `P`
    pub fn remove_processor<P: EntityProcessor>(&mut self) -> Option<Box<dyn EntityProcessor>> {
        self.on_processor_removed(ProcessorKey::of::<P>())
    }

    /// Remove a processor by key
    pub fn remove_processor_by_key(&mut self, key: ProcessorKey) -> Option<Box<dyn EntityProcessor>> {
        self.on_processor_removed(key)
    }

    /// Run every enabled processor's update, in order.
    pub fn update(&mut self, time: &GameTime) {
        for entry in self.dispatch.processors.iter_mut() {
            if !entry.enabled {
                continue;
            }
            let key = entry.key();
            let start = Instant::now();
            let mut ctx = FrameContext {
                store: &mut self.store,
                commands: &mut self.dispatch.commands,
            };
            entry.processor_mut().update(&mut ctx, time);
            self.timings
                .entry(key)
                .or_default()
                .update
                .record(start.elapsed());
        }
        self.flush_commands();
    }

    /// Run every enabled processor's draw, in order.
    pub fn draw(&mut self, render: &RenderContext) {
        for entry in self.dispatch.processors.iter_mut() {
            if !entry.enabled {
                continue;
            }
            let key = entry.key();
            let start = Instant::now();
            let mut ctx = FrameContext {
                store: &mut self.store,
                commands: &mut self.dispatch.commands,
            };
            entry.processor_mut().draw(&mut ctx, render);
            self.timings
                .entry(key)
                .or_default()
                .draw
                .record(start.elapsed());
        }
        self.flush_commands();
    }

    /// Append a component
    ///
    /// # Errors
    ///
    /// See [`EntityComponentCollection::insert`](super::EntityComponentCollection::insert).
    pub fn add_component(
        &mut self,
        entity: EntityId,
        component: impl EntityComponent,
    ) -> EcsResult<usize> {
        self.add_component_with(entity, Box::new(component), AttachPolicy::Exclusive)
    }

    /// Append a boxed component with an explicit attach policy, returns its
    /// index.
    pub fn add_component_with(
        &mut self,
        entity: EntityId,
        component: Box<dyn EntityComponent>,
        policy: AttachPolicy,
    ) -> EcsResult<usize> {
        let index = self
            .store
            .entity(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components()
            .len();
        self.insert_component(entity, index, component, policy)?;
        Ok(index)
    }

    /// Insert a component at `index`
    pub fn insert_component(
        &mut self,
        entity: EntityId,
        index: usize,
        component: Box<dyn EntityComponent>,
        policy: AttachPolicy,
    ) -> EcsResult<()> {
        let id = component.id();
        let components = self
            .store
            .entity(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components();
        if index > components.len() {
            return Err(EcsError::IndexOutOfRange {
                index,
                len: components.len(),
            });
        }
        components.validate(None, &*component, policy)?;
        self.claim_component(entity, id, policy)?;

        self.store
            .entity_mut(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components_raw_mut()
            .insert(index, component, policy)?;
        self.store.track_component(id, entity);

        if self.contains(entity) {
            self.notify_component_changed(entity, index, None, Some(id));
        }
        Ok(())
    }

    /// Replace the component at `index`, returns the previous one.
    ///
    /// Replacing a transform with another transform moves the hierarchy links
    /// to the new one.
    pub fn replace_component(
        &mut self,
        entity: EntityId,
        index: usize,
        mut component: Box<dyn EntityComponent>,
        policy: AttachPolicy,
    ) -> EcsResult<Option<Box<dyn EntityComponent>>> {
        let id = component.id();
        let components = self
            .store
            .entity(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components();
        let Some(current) = components.at(index) else {
            return Err(EcsError::IndexOutOfRange {
                index,
                len: components.len(),
            });
        };
        if current.id() == id {
            return Ok(None);
        }
        components.validate(Some(index), &*component, policy)?;
        self.claim_component(entity, id, policy)?;

        let components = self
            .store
            .entity_mut(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components_raw_mut();

        let current_transform = components
            .at(index)
            .and_then(|current| current.downcast_ref::<TransformComponent>());
        if let (Some(current), Some(new)) = (
            current_transform,
            component.downcast_mut::<TransformComponent>(),
        ) {
            new.adopt_links(current);
        }

        let Some(mut previous) = components.replace(index, component, policy)? else {
            return Ok(None);
        };
        self.store.untrack_component(previous.id());
        self.store.track_component(id, entity);

        let moved_links = self
            .store
            .transform(entity)
            .is_some_and(|t| t.core().id() == id);
        if let Some(old) = previous.downcast_mut::<TransformComponent>() {
            if moved_links {
                old.clear_links();
            }
        }

        if self.contains(entity) {
            self.notify_component_changed(entity, index, Some(&*previous), Some(id));
        }
        if !moved_links {
            if let Some(old) = previous.downcast_mut::<TransformComponent>() {
                self.detach_removed_transform(entity, old);
            }
        }
        Ok(Some(previous))
    }

    /// Remove the component at `index`
    pub fn remove_component_at(
        &mut self,
        entity: EntityId,
        index: usize,
    ) -> EcsResult<Box<dyn EntityComponent>> {
        let mut removed = self
            .store
            .entity_mut(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components_raw_mut()
            .remove_at(index)?;
        self.store.untrack_component(removed.id());

        if self.contains(entity) {
            self.notify_component_changed(entity, index, Some(&*removed), None);
        }
        if let Some(transform) = removed.downcast_mut::<TransformComponent>() {
            self.detach_removed_transform(entity, transform);
        }
        Ok(removed)
    }

    /// Remove the first component of type `T`
    pub fn remove_component<T: EntityComponent>(
        &mut self,
        entity: EntityId,
    ) -> EcsResult<Option<Box<T>>> {
        let index = self
            .store
            .entity(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components()
            .position::<T>();
        match index {
            Some(index) => Ok(self.remove_component_at(entity, index)?.downcast::<T>().ok()),
            None => Ok(None),
        }
    }

    /// Remove every component, last first. Returns them in their original
    /// order.
    pub fn remove_all_components(
        &mut self,
        entity: EntityId,
    ) -> EcsResult<Vec<Box<dyn EntityComponent>>> {
        let len = self
            .store
            .entity(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components()
            .len();
        let mut removed = Vec::with_capacity(len);
        for index in (0..len).rev() {
            removed.push(self.remove_component_at(entity, index)?);
        }
        removed.reverse();
        Ok(removed)
    }

    /// First component of type `T`, added with its default value if missing
    pub fn get_or_create_component<T: EntityComponent + Default>(
        &mut self,
        entity: EntityId,
    ) -> EcsResult<&mut T> {
        let existing = self
            .store
            .entity(entity)
            .ok_or(EcsError::EntityNotFound(entity))?
            .components()
            .position::<T>();
        let index = match existing {
            Some(index) => index,
            None => self.add_component(entity, T::default())?,
        };
        self.store
            .entity_mut(entity)
            .and_then(|e| e.components_raw_mut().at_mut(index))
            .and_then(|c| c.downcast_mut::<T>())
            .ok_or(EcsError::EntityNotFound(entity))
    }

    /// Make sure no other stored entity holds `component`. With
    /// [`AttachPolicy::ReplaceForeign`] it is taken away from its holder.
    fn claim_component(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        policy: AttachPolicy,
    ) -> EcsResult<()> {
        let Some(owner) = self
            .store
            .component_owner(component)
            .filter(|owner| *owner != entity)
        else {
            return Ok(());
        };
        let Some(owner_ref) = self.store.entity(owner) else {
            self.store.untrack_component(component);
            return Ok(());
        };
        if policy == AttachPolicy::Exclusive {
            return Err(EcsError::ForeignEntity {
                component,
                owner: owner_ref.guid(),
            });
        }
        if let Some(index) = owner_ref.components().position_of(component) {
            self.remove_component_at(owner, index)?;
        }
        Ok(())
    }

    /// Cut the hierarchy links of a transform that left `entity`.
    fn detach_removed_transform(&mut self, entity: EntityId, transform: &mut TransformComponent) {
        if let Some(parent) = transform.parent() {
            if let Some(parent_transform) = self.store.transform_mut(parent) {
                parent_transform.children.retain(|c| *c != entity);
            }
            if self.contains(entity) {
                self.events
                    .push(EntityManagerEvent::HierarchyChanged(entity));
            }
        }
        for child in transform.children() {
            if let Some(child_transform) = self.store.transform_mut(*child) {
                child_transform.parent = None;
            }
        }
        transform.clear_links();
    }

    /// Route a component change of a registered entity to the processors.
    ///
    /// `previous` is the component that left slot `index`, `new` the one now
    /// stored there.
    pub(crate) fn notify_component_changed(
        &mut self,
        entity: EntityId,
        index: usize,
        previous: Option<&dyn EntityComponent>,
        new: Option<ComponentId>,
    ) {
        let previous_id = previous.map(|c| c.id());
        if previous_id.is_some() && previous_id == new {
            return;
        }

        // Processors created for the new component's type already saw it
        // while being added
        let mut introduced = Vec::new();
        if new.is_some() {
            if let Some(component_type) = self.component_type_at(entity, index) {
                let known: Vec<ProcessorKey> = self.dispatch.processors.keys().collect();
                self.collect_new_processors_by_component_type(component_type);
                self.register_pending_processors();
                introduced = self
                    .dispatch
                    .processors
                    .keys()
                    .filter(|key| !known.contains(key))
                    .collect();
            }
        }

        let mut dependents = Vec::new();
        if let Some(previous) = previous {
            self.dispatch.check_component(
                &self.store,
                entity,
                previous,
                true,
                &[],
                Some(&mut dependents),
            );
        }

        if new.is_some() {
            if let Some(component) = self
                .store
                .entity(entity)
                .and_then(|e| e.components().at(index))
            {
                self.dispatch.check_component(
                    &self.store,
                    entity,
                    component,
                    false,
                    &introduced,
                    Some(&mut dependents),
                );
            }
        }

        if !dependents.is_empty() {
            let skip: Vec<ComponentId> = previous_id.into_iter().chain(new).collect();
            self.dispatch
                .update_dependent_processors(&self.store, entity, &skip, &dependents);
        }

        self.flush_commands();

        self.events.push(EntityManagerEvent::ComponentChanged {
            entity,
            index,
            previous: previous_id,
            new,
        });
    }

    fn component_type_at(&self, entity: EntityId, index: usize) -> Option<ComponentType> {
        self.store
            .entity(entity)
            .and_then(|e| e.components().at(index))
            .map(|c| c.component_type())
    }

    fn check_entity_with_processors(
        &mut self,
        entity: EntityId,
        force_remove: bool,
        collect_component_types: bool,
    ) {
        let count = self
            .store
            .entity(entity)
            .map_or(0, |e| e.components().len());
        for index in 0..count {
            let Some(component) = self
                .store
                .entity(entity)
                .and_then(|e| e.components().at(index))
            else {
                break;
            };
            let component_type = component.component_type();
            self.dispatch
                .check_component(&self.store, entity, component, force_remove, &[], None);
            if collect_component_types {
                self.collect_new_processors_by_component_type(component_type);
            }
        }
    }

    fn collect_new_processors_by_component_type(&mut self, component_type: ComponentType) {
        if !self.component_types.insert(component_type) {
            return;
        }
        self.events
            .push(EntityManagerEvent::ComponentTypeAdded(component_type));

        if !self.registry.contains(component_type) {
            log::debug!("no metadata for component type {component_type:?}, no processor added");
            return;
        }

        let registrations: Vec<_> = self
            .registry
            .processors_for(component_type, self.execution_mode)
            .copied()
            .collect();
        for registration in registrations {
            let key = registration.key();
            let known = self.dispatch.processors.contains(key)
                || self
                    .pending_processors
                    .iter()
                    .any(|p| ProcessorKey::of_processor(p.as_ref()) == key);
            if known {
                continue;
            }

            let processor = registration.create();
            log::debug!("processor {key:?} discovered through {component_type:?}");
            let required = processor.required_types().to_vec();
            let order = processor.order();
            let index = self
                .pending_processors
                .partition_point(|p| p.order() <= order);
            self.pending_processors.insert(index, processor);

            for required_type in required {
                self.collect_new_processors_by_component_type(required_type);
            }
        }
    }

    fn register_pending_processors(&mut self) {
        if self.add_entity_level > 0 {
            return;
        }
        while !self.pending_processors.is_empty() {
            let processor = self.pending_processors.remove(0);
            self.on_processor_added(processor);
        }
    }

    fn on_processor_added(&mut self, processor: Box<dyn EntityProcessor>) -> bool {
        let key = ProcessorKey::of_processor(processor.as_ref());
        if self.dispatch.processors.insert(processor).is_err() {
            return false;
        }

        let Dispatch {
            processors,
            map_component_type_to_processors,
            commands,
        } = &mut self.dispatch;
        let Some(entry) = processors.iter_mut().find(|entry| entry.key() == key) else {
            return false;
        };
        let order = entry.order();
        let processor = entry.processor_mut();
        processor.on_system_add(&mut ProcessorContext::new(&self.store, commands));

        for (component_type, list) in map_component_type_to_processors.iter_mut() {
            if processor.accept(*component_type) {
                list.insert(order, key);
            }
            if processor.is_dependent_on_component_type(*component_type) {
                list.dependencies.push(key);
            }
        }

        for entity in self.sorted_entities() {
            self.dispatch
                .check_entity_with_new_processor(&self.store, entity, key);
        }
        self.flush_commands();

        log::debug!("processor {key:?} added");
        self.events.push(EntityManagerEvent::ProcessorAdded(key));
        true
    }

    fn on_processor_removed(&mut self, key: ProcessorKey) -> Option<Box<dyn EntityProcessor>> {
        let mut processor = self.dispatch.processors.remove(key)?;

        for list in self.dispatch.map_component_type_to_processors.values_mut() {
            list.processors.retain(|(_, k)| *k != key);
            list.dependencies.retain(|k| *k != key);
        }

        let mut ctx = ProcessorContext::new(&self.store, &mut self.dispatch.commands);
        processor.remove_all_entities(&mut ctx);
        processor.on_system_remove(&mut ctx);
        self.flush_commands();

        self.timings.remove(&key);
        log::debug!("processor {key:?} removed");
        self.events.push(EntityManagerEvent::ProcessorRemoved(key));
        Some(processor)
    }

    /// Apply the registration changes queued by processors, in order.
    pub(crate) fn flush_commands(&mut self) {
        while let Some(command) = self.dispatch.commands.pop() {
            match command {
                EntityCommand::Add(entity) => {
                    if self.store.contains(entity) {
                        self.internal_add_entity(entity);
                    } else {
                        log::warn!("ignoring registration of unknown entity {entity:?}");
                    }
                }
                EntityCommand::Remove {
                    entity,
                    remove_parent,
                } => self.internal_remove_entity(entity, remove_parent),
            }
        }
    }

    /// Tell the transform processor whether `entity` is a transformation root
    pub(crate) fn set_transform_root(&mut self, entity: EntityId, is_root: bool) {
        if let Some(processor) = self.dispatch.processors.get_mut::<TransformProcessor>() {
            processor.set_root(entity, is_root);
        }
    }

    fn sorted_entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = self.entities.iter().copied().collect();
        entities.sort_unstable();
        entities
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("id", &self.id)
            .field("execution_mode", &self.execution_mode)
            .field("entities", &self.entities.len())
            .field("processors", &self.dispatch.processors)
            .field("component_types", &self.component_types)
            .finish()
    }
}
