//! Transform hierarchy edits
//!
//! Parent/child links live on [`TransformComponent`](super::TransformComponent)s
//! and are only changed here, so registration follows the tree: a child of a
//! registered entity is registered, a child detached from it is not.

use super::entity::EntityId;
use super::error::{EcsError, EcsResult};
use super::manager::{EntityManager, EntityManagerEvent};

impl EntityManager {
    /// Transform parent of an entity
    #[must_use]
    pub fn parent(&self, entity: EntityId) -> Option<EntityId> {
        self.store().parent(entity)
    }

    /// Transform children of an entity, in order
    #[must_use]
    pub fn children(&self, entity: EntityId) -> &[EntityId] {
        self.store().children(entity)
    }

    /// Append `child` to the children of `parent`.
    ///
    /// # Errors
    ///
    /// See [`Self::insert_child`].
    pub fn add_child(&mut self, parent: EntityId, child: EntityId) -> EcsResult<()> {
        let index = self.store().children(parent).len();
        self.insert_child(parent, index, child)
    }

    /// Insert `child` in the children of `parent` at `index`.
    ///
    /// A root entity leaves its scene when it gets a parent.
    ///
    /// # Errors
    ///
    /// - [`EcsError::MissingTransform`] when either entity has no transform
    /// - [`EcsError::ParentAlreadySet`] when `child` already has a parent
    /// - [`EcsError::HierarchyCycle`] when `child` is `parent` or one of its
    ///   ancestors
    pub fn insert_child(&mut self, parent: EntityId, index: usize, child: EntityId) -> EcsResult<()> {
        self.validate_link(parent, child)?;
        if self.store().parent(child).is_some() {
            return Err(EcsError::ParentAlreadySet(child));
        }

        self.detach_from_scene(child);
        self.store_mut().link_child(parent, child, index);

        if self.contains(parent) {
            self.events_mut()
                .push(EntityManagerEvent::HierarchyChanged(child));
            if self.contains(child) {
                self.set_transform_root(child, false);
            } else {
                self.internal_add_entity(child);
            }
        } else if self.contains(child) {
            self.internal_remove_entity(child, false);
        }
        Ok(())
    }

    /// Detach `child` from `parent`. A child of a registered parent is
    /// unregistered.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotAChild`] when `child` is not a child of `parent`.
    pub fn remove_child(&mut self, parent: EntityId, child: EntityId) -> EcsResult<()> {
        for id in [parent, child] {
            if !self.store().contains(id) {
                return Err(EcsError::EntityNotFound(id));
            }
        }
        if self.store().parent(child) != Some(parent) {
            return Err(EcsError::NotAChild { parent, child });
        }

        self.store_mut().unlink_child(parent, child);

        if self.contains(parent) {
            self.events_mut()
                .push(EntityManagerEvent::HierarchyChanged(child));
            self.internal_remove_entity(child, false);
        }
        Ok(())
    }

    /// Reparent `child`, or detach it with `None`.
    ///
    /// Moving a child between two registered parents keeps it registered.
    ///
    /// # Errors
    ///
    /// See [`Self::insert_child`].
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> EcsResult<()> {
        if !self.store().contains(child) {
            return Err(EcsError::EntityNotFound(child));
        }
        let current = self.store().parent(child);
        if current == parent {
            return Ok(());
        }

        let Some(parent) = parent else {
            return match current {
                Some(current) => self.remove_child(current, child),
                None => Ok(()),
            };
        };
        self.validate_link(parent, child)?;

        let Some(current) = current else {
            return self.add_child(parent, child);
        };

        if self.contains(current) && self.contains(parent) && self.contains(child) {
            self.store_mut().unlink_child(current, child);
            self.store_mut().link_child(parent, child, usize::MAX);
            self.events_mut()
                .push(EntityManagerEvent::HierarchyChanged(child));
            return Ok(());
        }

        self.remove_child(current, child)?;
        self.add_child(parent, child)
    }

    fn validate_link(&self, parent: EntityId, child: EntityId) -> EcsResult<()> {
        for id in [parent, child] {
            let entity = self.entity(id).ok_or(EcsError::EntityNotFound(id))?;
            if entity.transform().is_none() {
                return Err(EcsError::MissingTransform(id));
            }
        }
        if self.store().is_ancestor_or_self(child, parent) {
            return Err(EcsError::HierarchyCycle { parent, child });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::testing::{test_manager, CountingProcessor, Health};
    use crate::ecs::{Entity, TransformComponent, TransformProcessor};

    #[test]
    fn test_insert_child_keeps_index_order() {
        let mut manager = test_manager();
        let parent = manager.insert_entity(Entity::new("P")).unwrap();
        let a = manager.insert_entity(Entity::new("A")).unwrap();
        let b = manager.insert_entity(Entity::new("B")).unwrap();
        let c = manager.insert_entity(Entity::new("C")).unwrap();

        manager.add_child(parent, a).unwrap();
        manager.add_child(parent, c).unwrap();
        manager.insert_child(parent, 1, b).unwrap();

        assert_eq!(manager.store().children(parent), &[a, b, c]);
        assert_eq!(manager.store().parent(b), Some(parent));
    }

    #[test]
    fn test_invalid_links_rejected() {
        let mut manager = test_manager();
        let a = manager.insert_entity(Entity::new("A")).unwrap();
        let b = manager.insert_entity(Entity::new("B")).unwrap();
        let c = manager.insert_entity(Entity::new("C")).unwrap();
        let bare = manager.insert_entity(Entity::empty("bare")).unwrap();
        manager.add_child(a, b).unwrap();

        assert_eq!(manager.add_child(c, b), Err(EcsError::ParentAlreadySet(b)));
        assert_eq!(
            manager.add_child(b, a),
            Err(EcsError::HierarchyCycle { parent: b, child: a })
        );
        assert_eq!(
            manager.add_child(a, a),
            Err(EcsError::HierarchyCycle { parent: a, child: a })
        );
        assert_eq!(manager.add_child(a, bare), Err(EcsError::MissingTransform(bare)));
        assert_eq!(
            manager.remove_child(c, b),
            Err(EcsError::NotAChild { parent: c, child: b })
        );
    }

    #[test]
    fn test_child_registration_follows_parent() {
        let mut manager = test_manager();
        let parent = manager.create_entity("P");
        let child = manager.insert_entity(Entity::new("C")).unwrap();

        manager.add_child(parent, child).unwrap();
        assert!(manager.contains(child));
        assert!(!manager.processor::<TransformProcessor>().unwrap().is_root(child));

        manager.remove_child(parent, child).unwrap();
        assert!(!manager.contains(child));
        assert!(manager.store().parent(child).is_none());
        assert!(manager.store().children(parent).is_empty());
    }

    #[test]
    fn test_registered_root_becomes_child() {
        let mut manager = test_manager();
        let parent = manager.create_entity("P");
        let child = manager.create_entity("C");
        assert!(manager.processor::<TransformProcessor>().unwrap().is_root(child));

        manager.add_child(parent, child).unwrap();

        assert!(manager.contains(child));
        assert!(!manager.processor::<TransformProcessor>().unwrap().is_root(child));
    }

    #[test]
    fn test_child_of_unregistered_parent_is_unregistered() {
        let mut manager = test_manager();
        let parent = manager.insert_entity(Entity::new("P")).unwrap();
        let child = manager.create_entity("C");

        manager.add_child(parent, child).unwrap();

        assert!(!manager.contains(child));
    }

    #[test]
    fn test_move_between_registered_parents() {
        let mut manager = test_manager();
        let first = manager.create_entity("first");
        let second = manager.create_entity("second");
        let child = manager.insert_entity(Entity::new("C").with(Health::new(1.0)).unwrap()).unwrap();
        manager.add_child(first, child).unwrap();

        manager.set_parent(child, Some(second)).unwrap();

        assert!(manager.contains(child));
        assert_eq!(manager.store().parent(child), Some(second));
        assert!(manager.store().children(first).is_empty());
        let counting = manager.processor::<CountingProcessor>().unwrap();
        assert_eq!(counting.added, vec![child]);
        assert!(counting.removed.is_empty());

        manager.set_parent(child, None).unwrap();
        assert!(!manager.contains(child));
        assert_eq!(
            manager.processor::<CountingProcessor>().unwrap().removed,
            vec![child]
        );
    }

    #[test]
    fn test_removing_transform_orphans_children() {
        let mut manager = test_manager();
        let parent = manager.create_entity("P");
        let child = manager.insert_entity(Entity::new("C")).unwrap();
        manager.add_child(parent, child).unwrap();

        let removed = manager.remove_component::<TransformComponent>(parent).unwrap();

        assert!(removed.unwrap().children().is_empty());
        assert!(manager.store().parent(child).is_none());
        assert!(!manager.contains(child));
        assert!(manager.contains(parent));
    }
}
