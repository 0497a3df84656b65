//! Entities
//!
//! An entity is a named container of components identified by a GUID. Inside
//! an [`EntityStore`](super::EntityStore) it is addressed by an [`EntityId`]
//! handle; structural changes then go through the
//! [`EntityManager`](super::EntityManager) so processors are notified.

use std::fmt;

use glam::Vec3;
use slotmap::{Key, new_key_type};
use uuid::Uuid;

use super::collection::EntityComponentCollection;
use super::component::EntityComponent;
use super::error::{EcsError, EcsResult};
use super::manager::ManagerId;
use super::scene::SceneId;
use super::store::StoreId;
use super::transform::TransformComponent;

new_key_type! {
    /// Slot of an entity inside its store.
    pub(crate) struct EntityKey;
}

/// Handle of an entity inside an entity store.
///
/// A handle only resolves in the store that issued it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub(crate) store: StoreId,
    pub(crate) key: EntityKey,
}

impl EntityId {
    /// Store that issued this handle
    #[must_use]
    pub fn store(&self) -> StoreId {
        self.store
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({:?}@{:?})", self.key.data(), self.store)
    }
}

/// A named, identified container of components.
pub struct Entity {
    guid: Uuid,
    /// Display name
    pub name: String,
    components: EntityComponentCollection,
    pub(crate) id: Option<EntityId>,
    pub(crate) scene: Option<SceneId>,
    pub(crate) manager: Option<ManagerId>,
}

impl Entity {
    /// Entity with a default transform
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_position(Vec3::ZERO, name)
    }

    /// Entity with a transform at `position`
    #[must_use]
    pub fn with_position(position: Vec3, name: impl Into<String>) -> Self {
        let mut entity = Self::empty(name);
        entity.components = EntityComponentCollection::from_transform(
            entity.guid,
            TransformComponent::from_position(position),
        );
        entity
    }

    /// Entity without any component, as produced by a deserializer
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self::with_guid(Uuid::new_v4(), name)
    }

    /// Entity with a known GUID and no component
    #[must_use]
    pub fn with_guid(guid: Uuid, name: impl Into<String>) -> Self {
        Self {
            guid,
            name: name.into(),
            components: EntityComponentCollection::owned_by(guid),
            id: None,
            scene: None,
            manager: None,
        }
    }

    /// Persistent identity
    #[must_use]
    pub fn guid(&self) -> Uuid {
        self.guid
    }

    /// Handle inside the store holding this entity
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    /// Scene this entity is a root of
    #[must_use]
    pub fn scene(&self) -> Option<SceneId> {
        self.scene
    }

    /// Manager this entity is registered with
    #[must_use]
    pub fn entity_manager(&self) -> Option<ManagerId> {
        self.manager
    }

    /// Whether the entity is registered with a manager
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.manager.is_some()
    }

    /// Components in order
    #[must_use]
    pub fn components(&self) -> &EntityComponentCollection {
        &self.components
    }

    /// Structural access to the components.
    ///
    /// # Errors
    ///
    /// [`EcsError::ManagedEntity`] once the entity lives in a store; use the
    /// manager's component operations instead.
    pub fn components_mut(&mut self) -> EcsResult<&mut EntityComponentCollection> {
        if self.id.is_some() {
            return Err(EcsError::ManagedEntity);
        }
        Ok(&mut self.components)
    }

    pub(crate) fn components_raw_mut(&mut self) -> &mut EntityComponentCollection {
        &mut self.components
    }

    /// Append a component
    ///
    /// # Errors
    ///
    /// See [`EntityComponentCollection::push`] and [`Self::components_mut`].
    pub fn add(&mut self, component: impl EntityComponent) -> EcsResult<()> {
        self.components_mut()?.push(component)
    }

    /// Builder form of [`Self::add`]
    pub fn with(mut self, component: impl EntityComponent) -> EcsResult<Self> {
        self.add(component)?;
        Ok(self)
    }

    /// Remove the first component of type `T`
    ///
    /// # Errors
    ///
    /// See [`Self::components_mut`].
    pub fn remove<T: EntityComponent>(&mut self) -> EcsResult<Option<Box<T>>> {
        Ok(self.components_mut()?.remove::<T>())
    }

    /// First component of type `T`, created with its default value if missing
    ///
    /// # Errors
    ///
    /// See [`Self::components_mut`].
    pub fn get_or_create<T: EntityComponent + Default>(&mut self) -> EcsResult<&mut T> {
        self.components_mut()?.get_or_insert_with(T::default)
    }

    /// First component of type `T`
    #[must_use]
    pub fn get<T: EntityComponent>(&self) -> Option<&T> {
        self.components.get::<T>()
    }

    /// First writable component of type `T`
    pub fn get_mut<T: EntityComponent>(&mut self) -> Option<&mut T> {
        self.components.get_mut::<T>()
    }

    /// Every component of type `T`
    pub fn get_all<T: EntityComponent>(&self) -> impl Iterator<Item = &T> {
        self.components.get_all::<T>()
    }

    /// Every writable component of type `T`
    pub fn get_all_mut<T: EntityComponent>(&mut self) -> impl Iterator<Item = &mut T> {
        self.components.get_all_mut::<T>()
    }

    /// The transform, if any
    #[must_use]
    pub fn transform(&self) -> Option<&TransformComponent> {
        self.components.transform()
    }

    /// The writable transform, if any
    pub fn transform_mut(&mut self) -> Option<&mut TransformComponent> {
        self.components.transform_mut()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity {}", self.name)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("guid", &self.guid)
            .field("name", &self.name)
            .field("id", &self.id)
            .field("scene", &self.scene)
            .field("manager", &self.manager)
            .field("components", &self.components)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::testing::{Health, Marker};

    #[test]
    fn test_new_entity_has_transform() {
        let entity = Entity::with_position(Vec3::new(1.0, 2.0, 3.0), "A");
        let transform = entity.transform().unwrap();
        assert_eq!(transform.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(
            entity.get::<TransformComponent>().map(|t| t.core().id()),
            Some(transform.core().id())
        );
        assert!(entity.entity_manager().is_none());
        assert_eq!(entity.to_string(), "Entity A");
    }

    #[test]
    fn test_removing_transform_clears_cache() {
        let mut entity = Entity::new("A");
        let removed = entity.remove::<TransformComponent>().unwrap();
        assert!(removed.is_some());
        assert!(entity.transform().is_none());
        assert!(entity.get::<TransformComponent>().is_none());
    }

    #[test]
    fn test_empty_entity() {
        let entity = Entity::empty("bare");
        assert!(entity.components().is_empty());
        assert!(entity.transform().is_none());
    }

    #[test]
    fn test_builder_and_get_or_create() {
        let mut entity = Entity::new("A")
            .with(Health::new(3.0))
            .and_then(|e| e.with(Marker::default()))
            .unwrap();
        assert_eq!(entity.components().len(), 3);

        entity.get_or_create::<Marker>().unwrap();
        assert_eq!(entity.get_all::<Marker>().count(), 1);

        entity.get_mut::<Health>().unwrap().value = 9.0;
        assert_eq!(entity.get::<Health>().map(|h| h.value), Some(9.0));
    }

    #[test]
    fn test_detached_components_belong_to_entity_guid() {
        let entity = Entity::new("A").with(Health::new(1.0)).unwrap();
        assert!(entity.components().iter().all(|c| c.entity().is_none()));
        assert!(
            entity
                .components()
                .iter()
                .all(|c| c.core().owner() == Some(entity.guid()))
        );
    }

    #[test]
    fn test_component_of_detached_entity_rejected_elsewhere() {
        let first = Entity::new("A").with(Health::new(1.0)).unwrap();
        let shared = first.get::<Health>().unwrap().clone();

        let err = Entity::new("B").with(shared).unwrap_err();

        assert!(matches!(err, EcsError::ForeignEntity { owner, .. } if owner == first.guid()));
    }
}
