//! Ordered component storage of an entity

use std::fmt;

use uuid::Uuid;

use super::component::{ComponentId, ComponentType, EntityComponent};
use super::entity::EntityId;
use super::error::{EcsError, EcsResult};
use super::transform::TransformComponent;

/// How to treat a component that is still attached to another entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachPolicy {
    /// Reject it with [`EcsError::ForeignEntity`]
    #[default]
    Exclusive,
    /// Take it over, used when merging entities
    ReplaceForeign,
}

/// Components of one entity, in insertion order.
///
/// Holds at most one component of each type unless the type allows multiple
/// instances, never holds the same instance twice, and keeps track of the
/// transform slot.
#[derive(Default)]
pub struct EntityComponentCollection {
    guid: Option<Uuid>,
    owner: Option<EntityId>,
    items: Vec<Box<dyn EntityComponent>>,
    transform: Option<usize>,
}

impl EntityComponentCollection {
    /// Empty detached collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty collection of the entity identified by `guid`
    #[must_use]
    pub fn owned_by(guid: Uuid) -> Self {
        Self {
            guid: Some(guid),
            ..Self::default()
        }
    }

    pub(crate) fn from_transform(guid: Uuid, mut transform: TransformComponent) -> Self {
        transform.core_mut().set_owner(Some(guid), None);
        Self {
            guid: Some(guid),
            owner: None,
            items: vec![Box::new(transform)],
            transform: Some(0),
        }
    }

    /// Number of components
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no components
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Components in order
    pub fn iter(&self) -> impl Iterator<Item = &dyn EntityComponent> {
        self.items.iter().map(|c| &**c)
    }

    /// Writable components in order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut dyn EntityComponent> {
        self.items.iter_mut().map(|c| &mut **c)
    }

    /// Component at `index`
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&dyn EntityComponent> {
        self.items.get(index).map(|c| &**c)
    }

    /// Writable component at `index`
    pub fn at_mut(&mut self, index: usize) -> Option<&mut dyn EntityComponent> {
        self.items.get_mut(index).map(|c| &mut **c)
    }

    /// First component of type `T`
    #[must_use]
    pub fn get<T: EntityComponent>(&self) -> Option<&T> {
        self.items.iter().find_map(|c| c.downcast_ref::<T>())
    }

    /// First writable component of type `T`
    pub fn get_mut<T: EntityComponent>(&mut self) -> Option<&mut T> {
        self.items.iter_mut().find_map(|c| c.downcast_mut::<T>())
    }

    /// The `n`th component of type `T`, counted from the end when negative
    /// (`-1` is the last one).
    #[must_use]
    pub fn get_nth<T: EntityComponent>(&self, n: isize) -> Option<&T> {
        if n >= 0 {
            self.get_all::<T>().nth(n.unsigned_abs())
        } else {
            self.items
                .iter()
                .rev()
                .filter_map(|c| c.downcast_ref::<T>())
                .nth(n.unsigned_abs() - 1)
        }
    }

    /// Every component of type `T`
    pub fn get_all<T: EntityComponent>(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter_map(|c| c.downcast_ref::<T>())
    }

    /// Every writable component of type `T`
    pub fn get_all_mut<T: EntityComponent>(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut().filter_map(|c| c.downcast_mut::<T>())
    }

    /// Index of the first component of type `T`
    #[must_use]
    pub fn position<T: EntityComponent>(&self) -> Option<usize> {
        self.position_of_type(ComponentType::of::<T>())
    }

    /// Index of the first component of a type
    #[must_use]
    pub fn position_of_type(&self, component_type: ComponentType) -> Option<usize> {
        self.items
            .iter()
            .position(|c| c.component_type() == component_type)
    }

    /// Index of a component instance
    #[must_use]
    pub fn position_of(&self, id: ComponentId) -> Option<usize> {
        self.items.iter().position(|c| c.id() == id)
    }

    /// Whether a component of type `T` is present
    #[must_use]
    pub fn contains<T: EntityComponent>(&self) -> bool {
        self.position::<T>().is_some()
    }

    /// Whether a component instance is present
    #[must_use]
    pub fn contains_instance(&self, id: ComponentId) -> bool {
        self.position_of(id).is_some()
    }

    /// Distinct component types in order of first appearance
    #[must_use]
    pub fn component_types(&self) -> Vec<ComponentType> {
        let mut types: Vec<ComponentType> = Vec::with_capacity(self.items.len());
        for component in &self.items {
            let ty = component.component_type();
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
        types
    }

    /// The transform, if any
    #[must_use]
    pub fn transform(&self) -> Option<&TransformComponent> {
        self.transform
            .and_then(|index| self.items[index].downcast_ref::<TransformComponent>())
    }

    /// The writable transform, if any
    pub fn transform_mut(&mut self) -> Option<&mut TransformComponent> {
        let index = self.transform?;
        self.items[index].downcast_mut::<TransformComponent>()
    }

    /// Index of the transform
    #[must_use]
    pub fn transform_index(&self) -> Option<usize> {
        self.transform
    }

    /// Check that `item` may be stored at `index` (a new slot when `None`).
    pub fn validate(
        &self,
        index: Option<usize>,
        item: &dyn EntityComponent,
        policy: AttachPolicy,
    ) -> EcsResult<()> {
        let others = || {
            self.items
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != index)
        };

        if let Some((existing, _)) = others().find(|(_, c)| c.id() == item.id()) {
            return Err(EcsError::DuplicateComponent { index: existing });
        }

        if !item.allow_multiple() {
            let ty = item.component_type();
            if others().any(|(_, c)| c.component_type() == ty) {
                return Err(EcsError::DuplicateComponentType {
                    type_name: ty.name(),
                });
            }
        }

        if let Some(owner) = item.core().owner() {
            if Some(owner) != self.guid && policy == AttachPolicy::Exclusive {
                return Err(EcsError::ForeignEntity {
                    component: item.id(),
                    owner,
                });
            }
        }

        Ok(())
    }

    /// Append a component
    pub fn push(&mut self, component: impl EntityComponent) -> EcsResult<()> {
        self.push_boxed(Box::new(component), AttachPolicy::Exclusive)
    }

    /// Append a boxed component
    pub fn push_boxed(
        &mut self,
        component: Box<dyn EntityComponent>,
        policy: AttachPolicy,
    ) -> EcsResult<()> {
        self.insert(self.items.len(), component, policy)
    }

    /// Insert a component at `index`
    pub fn insert(
        &mut self,
        index: usize,
        mut component: Box<dyn EntityComponent>,
        policy: AttachPolicy,
    ) -> EcsResult<()> {
        if index > self.items.len() {
            return Err(EcsError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        self.validate(None, &*component, policy)?;
        component.core_mut().set_owner(self.guid, self.owner);
        self.items.insert(index, component);
        self.refresh_transform();
        Ok(())
    }

    /// Replace the component at `index` and return the previous one.
    ///
    /// Replacing a component with itself is allowed and returns `Ok(None)`.
    pub fn replace(
        &mut self,
        index: usize,
        mut component: Box<dyn EntityComponent>,
        policy: AttachPolicy,
    ) -> EcsResult<Option<Box<dyn EntityComponent>>> {
        let len = self.items.len();
        let Some(current) = self.items.get(index) else {
            return Err(EcsError::IndexOutOfRange { index, len });
        };
        if current.id() == component.id() {
            return Ok(None);
        }
        self.validate(Some(index), &*component, policy)?;
        component.core_mut().set_owner(self.guid, self.owner);
        let mut previous = std::mem::replace(&mut self.items[index], component);
        previous.core_mut().set_owner(None, None);
        self.refresh_transform();
        Ok(Some(previous))
    }

    /// First component of type `T`, appending `create()` when there is none
    pub fn get_or_insert_with<T: EntityComponent>(
        &mut self,
        create: impl FnOnce() -> T,
    ) -> EcsResult<&mut T> {
        let index = match self.position::<T>() {
            Some(index) => index,
            None => {
                self.push(create())?;
                self.items.len() - 1
            }
        };
        match self.items[index].downcast_mut::<T>() {
            Some(component) => Ok(component),
            None => unreachable!("slot {index} holds a different type"),
        }
    }

    /// Remove the component at `index`
    pub fn remove_at(&mut self, index: usize) -> EcsResult<Box<dyn EntityComponent>> {
        if index >= self.items.len() {
            return Err(EcsError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        let mut component = self.items.remove(index);
        component.core_mut().set_owner(None, None);
        self.refresh_transform();
        Ok(component)
    }

    /// Remove the first component of type `T`
    pub fn remove<T: EntityComponent>(&mut self) -> Option<Box<T>> {
        let index = self.position::<T>()?;
        self.remove_at(index)
            .ok()
            .and_then(|component| component.downcast::<T>().ok())
    }

    /// Remove every component of type `T`
    pub fn remove_all<T: EntityComponent>(&mut self) -> Vec<Box<T>> {
        let mut removed = Vec::new();
        while let Some(component) = self.remove::<T>() {
            removed.push(component);
        }
        removed
    }

    /// Remove every component, in order
    pub fn clear(&mut self) -> Vec<Box<dyn EntityComponent>> {
        self.transform = None;
        let mut removed: Vec<_> = self.items.drain(..).collect();
        for component in &mut removed {
            component.core_mut().set_owner(None, None);
        }
        removed
    }

    /// Attach every component to the stored entity `owner`
    pub(crate) fn set_owner(&mut self, owner: Option<EntityId>) {
        self.owner = owner;
        for component in &mut self.items {
            component.core_mut().set_owner(self.guid, owner);
        }
    }

    fn refresh_transform(&mut self) {
        self.transform = self.position::<TransformComponent>();
    }
}

impl fmt::Debug for EntityComponentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::testing::{Health, Marker};

    #[test]
    fn test_single_instance_type_rejected() {
        let mut components = EntityComponentCollection::new();
        assert!(components.push(Health::new(1.0)).is_ok());

        let err = components.push(Health::new(2.0)).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponentType { .. }));
        assert_eq!(components.len(), 1);
    }

    #[test]
    fn test_multiple_instances_allowed() {
        let mut components = EntityComponentCollection::new();
        assert!(components.push(Marker::default()).is_ok());
        assert!(components.push(Marker::default()).is_ok());
        assert!(components.push(Health::new(1.0)).is_ok());
        assert!(components.push(Marker::default()).is_ok());

        assert_eq!(components.get_all::<Marker>().count(), 3);
        assert_eq!(components.component_types().len(), 2);
    }

    #[test]
    fn test_same_instance_rejected() {
        let mut components = EntityComponentCollection::new();
        let health = Health::new(1.0);
        assert!(components.push(health.clone()).is_ok());

        let err = components.push(health).unwrap_err();
        assert_eq!(err, EcsError::DuplicateComponent { index: 0 });
    }

    #[test]
    fn test_foreign_component_rejected_unless_replacing() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut first = EntityComponentCollection::owned_by(a);
        assert!(first.push(Health::new(1.0)).is_ok());
        let attached = first.get::<Health>().unwrap().clone();
        assert_eq!(attached.core().owner(), Some(a));
        assert!(attached.core().entity().is_none());

        let mut second = EntityComponentCollection::owned_by(b);
        let err = second
            .push_boxed(Box::new(attached.clone()), AttachPolicy::Exclusive)
            .unwrap_err();
        assert!(matches!(err, EcsError::ForeignEntity { owner, .. } if owner == a));

        assert!(second
            .push_boxed(Box::new(attached), AttachPolicy::ReplaceForeign)
            .is_ok());
        assert_eq!(second.get::<Health>().unwrap().core().owner(), Some(b));
    }

    #[test]
    fn test_get_nth_from_both_ends() {
        let mut components = EntityComponentCollection::new();
        let markers: Vec<Marker> = (0..3).map(|_| Marker::default()).collect();
        let ids: Vec<ComponentId> = markers.iter().map(|m| m.core().id()).collect();
        for marker in markers {
            assert!(components.push(marker).is_ok());
        }

        let id = |m: Option<&Marker>| m.map(|m| m.core().id());
        assert_eq!(id(components.get_nth::<Marker>(0)), Some(ids[0]));
        assert_eq!(id(components.get_nth::<Marker>(2)), Some(ids[2]));
        assert_eq!(id(components.get_nth::<Marker>(-1)), Some(ids[2]));
        assert_eq!(id(components.get_nth::<Marker>(-3)), Some(ids[0]));
        assert!(components.get_nth::<Marker>(3).is_none());
        assert!(components.get_nth::<Marker>(-4).is_none());
    }

    #[test]
    fn test_transform_slot_tracked() {
        let mut components = EntityComponentCollection::new();
        assert!(components.push(Health::new(1.0)).is_ok());
        assert!(components.transform().is_none());

        let transform = TransformComponent::new();
        let transform_id = transform.core().id();
        assert!(components.push(transform).is_ok());
        assert_eq!(components.transform_index(), Some(1));
        assert_eq!(
            components.get::<TransformComponent>().map(|t| t.core().id()),
            components.transform().map(|t| t.core().id())
        );

        assert!(components.remove_at(0).is_ok());
        assert_eq!(components.transform_index(), Some(0));
        assert_eq!(components.transform().map(|t| t.core().id()), Some(transform_id));

        assert!(components.remove::<TransformComponent>().is_some());
        assert!(components.transform().is_none());
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut components = EntityComponentCollection::new();
        let original = Health::new(1.0);
        assert!(components.push(original.clone()).is_ok());

        assert!(matches!(
            components.replace(0, Box::new(original), AttachPolicy::Exclusive),
            Ok(None)
        ));

        let previous = components
            .replace(0, Box::new(Health::new(2.0)), AttachPolicy::Exclusive)
            .unwrap()
            .unwrap();
        assert_eq!(previous.downcast_ref::<Health>().map(|h| h.value), Some(1.0));
        assert!(previous.entity().is_none());
        assert_eq!(components.get::<Health>().map(|h| h.value), Some(2.0));
    }

    #[test]
    fn test_replace_rejects_duplicate_type() {
        let mut components = EntityComponentCollection::new();
        assert!(components.push(Health::new(1.0)).is_ok());
        assert!(components.push(Marker::default()).is_ok());

        let err = components
            .replace(1, Box::new(Health::new(2.0)), AttachPolicy::Exclusive)
            .unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponentType { .. }));
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut components = EntityComponentCollection::new();
        let err = components
            .insert(1, Box::new(Health::new(1.0)), AttachPolicy::Exclusive)
            .unwrap_err();
        assert_eq!(err, EcsError::IndexOutOfRange { index: 1, len: 0 });
    }

    #[test]
    fn test_remove_detaches_owner() {
        let mut components = EntityComponentCollection::owned_by(Uuid::new_v4());
        assert!(components.push(Marker::default()).is_ok());
        assert!(components.push(Marker::default()).is_ok());

        let removed = components.remove_all::<Marker>();
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|m| m.core().owner().is_none()));
        assert!(components.is_empty());
    }
}
