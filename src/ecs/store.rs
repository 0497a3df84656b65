//! Entity and scene storage
//!
//! The store owns every entity and scene of a manager and implements the
//! transform math. It is what processors see: read-only while they are being
//! notified about components, writable during update and draw.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::component::ComponentId;
use super::entity::{Entity, EntityId, EntityKey};
use super::error::{EcsError, EcsResult};
use super::scene::{Scene, SceneId};
use super::transform::TransformComponent;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an entity store, carried by every [`EntityId`] it issues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

/// Arena of entities and scenes.
#[derive(Debug)]
pub struct EntityStore {
    id: StoreId,
    entities: SlotMap<EntityKey, Entity>,
    component_owners: FxHashMap<ComponentId, EntityId>,
    scenes: SlotMap<SceneId, Scene>,
    root_scene: Option<SceneId>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)),
            entities: SlotMap::with_key(),
            component_owners: FxHashMap::default(),
            scenes: SlotMap::with_key(),
            root_scene: None,
        }
    }

    /// Store identity
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.id
    }

    fn key(&self, id: EntityId) -> Option<EntityKey> {
        (id.store == self.id).then_some(id.key)
    }

    fn handle(&self, key: EntityKey) -> EntityId {
        EntityId { store: self.id, key }
    }

    /// Number of entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether there are no entities
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether `id` refers to a live entity
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.key(id).is_some_and(|key| self.entities.contains_key(key))
    }

    /// Entity by handle
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(self.key(id)?)
    }

    /// Writable entity by handle
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let key = self.key(id)?;
        self.entities.get_mut(key)
    }

    /// Every entity
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        let store = self.id;
        self.entities
            .iter()
            .map(move |(key, entity)| (EntityId { store, key }, entity))
    }

    /// Every writable entity
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut Entity)> {
        let store = self.id;
        self.entities
            .iter_mut()
            .map(move |(key, entity)| (EntityId { store, key }, entity))
    }

    /// Stored entity holding the component instance `id`
    #[must_use]
    pub fn component_owner(&self, id: ComponentId) -> Option<EntityId> {
        self.component_owners.get(&id).copied()
    }

    /// Transform of an entity
    #[must_use]
    pub fn transform(&self, id: EntityId) -> Option<&TransformComponent> {
        self.entity(id).and_then(Entity::transform)
    }

    /// Writable transform of an entity
    pub fn transform_mut(&mut self, id: EntityId) -> Option<&mut TransformComponent> {
        self.entity_mut(id).and_then(Entity::transform_mut)
    }

    /// Transform parent of an entity
    #[must_use]
    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.transform(id).and_then(TransformComponent::parent)
    }

    /// Transform children of an entity
    #[must_use]
    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.transform(id)
            .map(TransformComponent::children)
            .unwrap_or(&[])
    }

    /// Top-most ancestor of an entity, the entity itself when it has no parent
    #[must_use]
    pub fn find_root(&self, id: EntityId) -> EntityId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// Whether `ancestor` is `id` or one of its transform ancestors
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = Some(id);
        while let Some(entity) = current {
            if entity == ancestor {
                return true;
            }
            current = self.parent(entity);
        }
        false
    }

    /// `id` followed by all its descendants, depth first
    #[must_use]
    pub fn subtree(&self, id: EntityId) -> Vec<EntityId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            result.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        result
    }

    /// Scene an entity belongs to through its hierarchy root
    #[must_use]
    pub fn entity_scene(&self, id: EntityId) -> Option<SceneId> {
        self.entity(self.find_root(id)).and_then(Entity::scene)
    }

    /// Scene by handle
    #[must_use]
    pub fn scene(&self, id: SceneId) -> Option<&Scene> {
        self.scenes.get(id)
    }

    /// Writable scene by handle
    pub fn scene_mut(&mut self, id: SceneId) -> Option<&mut Scene> {
        self.scenes.get_mut(id)
    }

    /// Every scene
    pub fn scenes(&self) -> impl Iterator<Item = (SceneId, &Scene)> {
        self.scenes.iter()
    }

    /// Scene driving automatic registration, if any
    #[must_use]
    pub fn root_scene(&self) -> Option<SceneId> {
        self.root_scene
    }

    /// Whether `ancestor` is `id` or one of its parent scenes
    #[must_use]
    pub fn is_scene_ancestor_or_self(&self, ancestor: SceneId, id: SceneId) -> bool {
        let mut current = Some(id);
        while let Some(scene) = current {
            if scene == ancestor {
                return true;
            }
            current = self.scenes.get(scene).and_then(Scene::parent);
        }
        false
    }

    /// Recompute the local matrix of an entity from its position, rotation
    /// and scale.
    pub fn update_local_matrix(&mut self, id: EntityId) {
        if let Some(transform) = self.transform_mut(id) {
            transform.update_local_matrix();
        }
    }

    /// Recompute the local and world matrices of an entity, bringing its
    /// ancestors, link source and scene up to date first.
    pub fn update_world_matrix(&mut self, id: EntityId) {
        self.update_local_matrix(id);
        self.update_world_matrix_internal(id, true);
    }

    /// Recompute the world matrix of an entity from its current local matrix,
    /// then run its post operations.
    ///
    /// With `recursive` off the parent, link source and scene matrices are
    /// used as they are.
    pub fn update_world_matrix_internal(&mut self, id: EntityId, recursive: bool) {
        let Some(entity) = self.entity_mut(id) else {
            return;
        };
        let scene = entity.scene;
        let Some(transform) = entity.transform_mut() else {
            return;
        };
        let parent = transform.parent;

        let base = if let Some(mut link) = transform.take_link() {
            let matrix = link.compute_matrix(self, recursive);
            if let Some(transform) = self.transform_mut(id) {
                transform.restore_link(link);
            }
            matrix
        } else if let Some(parent) = parent {
            if recursive {
                self.update_world_matrix(parent);
            }
            self.transform(parent)
                .map_or(Mat4::IDENTITY, |parent| parent.world_matrix)
        } else if let Some(scene) = scene {
            if recursive {
                self.update_scene_world_matrix(scene);
            }
            self.scenes
                .get(scene)
                .map_or(Mat4::IDENTITY, Scene::world_matrix)
        } else {
            Mat4::IDENTITY
        };

        if let Some(transform) = self.transform_mut(id) {
            transform.world_matrix = base * transform.local_matrix;
            transform.run_post_operations(id);
        }
    }

    /// Derive the local matrix of an entity from its world matrix.
    pub fn update_local_from_world(&mut self, id: EntityId) {
        let Some(entity) = self.entity(id) else {
            return;
        };
        let scene = entity.scene;
        let Some(transform) = entity.transform() else {
            return;
        };
        let base = match (transform.parent, scene) {
            (Some(parent), _) => self.transform(parent).map(|p| p.world_matrix),
            (None, Some(scene)) => self.scenes.get(scene).map(Scene::world_matrix),
            (None, None) => None,
        };
        let world = transform.world_matrix;

        if let Some(transform) = self.transform_mut(id) {
            transform.local_matrix = match base {
                Some(base) => base.inverse() * world,
                None => world,
            };
        }
    }

    /// Recompute the world matrix of a scene and its parent scenes.
    pub fn update_scene_world_matrix(&mut self, id: SceneId) {
        self.update_scene_world_matrix_internal(id, true);
    }

    fn update_scene_world_matrix_internal(&mut self, id: SceneId, recursive: bool) {
        let Some(parent) = self.scenes.get(id).map(Scene::parent) else {
            return;
        };
        let base = match parent {
            Some(parent) => {
                if recursive {
                    self.update_scene_world_matrix_internal(parent, true);
                }
                self.scenes
                    .get(parent)
                    .map_or(Mat4::IDENTITY, Scene::world_matrix)
            }
            None => Mat4::IDENTITY,
        };
        if let Some(scene) = self.scenes.get_mut(id) {
            scene.world_matrix = base;
            scene.world_matrix.w_axis += scene.offset.extend(0.0);
        }
    }

    /// Recompute the world matrices of a scene and its child scenes, top-down.
    pub fn update_scene_hierarchy(&mut self, id: SceneId) {
        self.update_scene_world_matrix_internal(id, false);
        let children = self
            .scenes
            .get(id)
            .map(|scene| scene.children().to_vec())
            .unwrap_or_default();
        for child in children {
            self.update_scene_hierarchy(child);
        }
    }

    /// Recompute the matrices of an entity and all its descendants, top-down.
    pub fn update_transformation_and_children(&mut self, id: EntityId) {
        self.update_local_matrix(id);
        self.update_world_matrix_internal(id, false);
        let children = self
            .transform(id)
            .map(|transform| transform.children.clone())
            .unwrap_or_default();
        for child in children {
            self.update_transformation_and_children(child);
        }
    }

    /// Add an entity to the store.
    ///
    /// # Errors
    ///
    /// [`EcsError::ForeignEntity`] when one of its component instances is
    /// already held by a stored entity.
    pub(crate) fn insert(&mut self, entity: Entity) -> EcsResult<EntityId> {
        for component in entity.components().iter() {
            if let Some(owner) = self.component_owner(component.id()) {
                return Err(EcsError::ForeignEntity {
                    component: component.id(),
                    owner: self.entity(owner).map_or_else(Default::default, Entity::guid),
                });
            }
        }
        Ok(self.insert_unchecked(entity))
    }

    /// Add an entity whose components no stored entity holds
    pub(crate) fn insert_unchecked(&mut self, mut entity: Entity) -> EntityId {
        let store = self.id;
        let key = self.entities.insert_with_key(|key| {
            let id = EntityId { store, key };
            entity.id = Some(id);
            entity.components_raw_mut().set_owner(Some(id));
            entity
        });
        let id = self.handle(key);
        let components: Vec<ComponentId> = self.entities[key]
            .components()
            .iter()
            .map(|c| c.id())
            .collect();
        for component in components {
            self.component_owners.insert(component, id);
        }
        id
    }

    /// Record that the stored entity `entity` now holds `component`
    pub(crate) fn track_component(&mut self, component: ComponentId, entity: EntityId) {
        self.component_owners.insert(component, entity);
    }

    /// Forget the holder of `component`
    pub(crate) fn untrack_component(&mut self, component: ComponentId) {
        self.component_owners.remove(&component);
    }

    /// Take an entity out of the store. Links must already be cut.
    pub(crate) fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let key = self.key(id)?;
        let mut entity = self.entities.remove(key)?;
        for component in entity.components().iter() {
            self.component_owners.remove(&component.id());
        }
        entity.id = None;
        entity.scene = None;
        entity.manager = None;
        entity.components_raw_mut().set_owner(None);
        if let Some(transform) = entity.transform_mut() {
            transform.clear_links();
        }
        Some(entity)
    }

    /// Make `child` a transform child of `parent` at `index` (appended when
    /// out of range). Both must have a transform.
    pub(crate) fn link_child(&mut self, parent: EntityId, child: EntityId, index: usize) {
        if let Some(transform) = self.transform_mut(parent) {
            let index = index.min(transform.children.len());
            transform.children.insert(index, child);
        }
        if let Some(transform) = self.transform_mut(child) {
            transform.parent = Some(parent);
        }
    }

    /// Cut the link between `parent` and `child`, returns whether it existed.
    pub(crate) fn unlink_child(&mut self, parent: EntityId, child: EntityId) -> bool {
        let removed = match self.transform_mut(parent) {
            Some(transform) => match transform.children.iter().position(|c| *c == child) {
                Some(index) => {
                    transform.children.remove(index);
                    true
                }
                None => false,
            },
            None => false,
        };
        if let Some(transform) = self.transform_mut(child) {
            if transform.parent == Some(parent) {
                transform.parent = None;
            }
        }
        removed
    }

    pub(crate) fn insert_scene(&mut self, scene: Scene) -> SceneId {
        self.scenes.insert(scene)
    }

    pub(crate) fn set_root_scene(&mut self, scene: Option<SceneId>) {
        self.root_scene = scene;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::EntityComponent;
    use crate::ecs::testing::Health;
    use crate::ecs::transform::EntityTransformLink;
    use glam::{Quat, Vec3};

    fn store_with_pair() -> (EntityStore, EntityId, EntityId) {
        let mut store = EntityStore::new();
        let a = store.insert(Entity::new("A")).unwrap();
        let b = store.insert(Entity::with_position(Vec3::new(0.0, 2.0, 0.0), "B")).unwrap();
        store.link_child(a, b, usize::MAX);
        (store, a, b)
    }

    #[test]
    fn test_child_follows_parent_translation() {
        let (mut store, a, b) = store_with_pair();
        store.transform_mut(a).unwrap().position = Vec3::new(1.0, 0.0, 0.0);

        store.update_world_matrix(a);
        store.update_world_matrix(b);

        let world = store.transform(b).unwrap().world_position();
        assert!(world.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-6));
    }

    #[test]
    fn test_world_is_parent_world_times_local() {
        let (mut store, a, b) = store_with_pair();
        {
            let parent = store.transform_mut(a).unwrap();
            parent.position = Vec3::new(3.0, -1.0, 2.0);
            parent.rotation = Quat::from_rotation_z(0.7);
            parent.scale = Vec3::splat(1.5);
        }
        store.transform_mut(b).unwrap().rotation = Quat::from_rotation_x(0.3);

        store.update_world_matrix(b);

        let parent = store.transform(a).unwrap();
        let child = store.transform(b).unwrap();
        let expected = parent.world_matrix * child.local_matrix;
        assert!(child.world_matrix.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_recursive_update_reaches_grandparent() {
        let (mut store, a, b) = store_with_pair();
        let c = store.insert(Entity::with_position(Vec3::Z, "C")).unwrap();
        store.link_child(b, c, 0);
        store.transform_mut(a).unwrap().position = Vec3::X;

        store.update_world_matrix(c);

        let world = store.transform(c).unwrap().world_position();
        assert!(world.abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), 1e-6));
        assert_eq!(store.find_root(c), a);
        assert!(store.is_ancestor_or_self(a, c));
        assert!(!store.is_ancestor_or_self(c, a));
        assert_eq!(store.subtree(a), vec![a, b, c]);
    }

    #[test]
    fn test_scene_offset_applies_to_roots() {
        let mut store = EntityStore::new();
        let parent_scene = store.insert_scene(Scene::new("parent"));
        let child_scene = store.insert_scene(Scene::new("child"));
        store.scene_mut(parent_scene).unwrap().offset = Vec3::new(10.0, 0.0, 0.0);
        store.scene_mut(child_scene).unwrap().offset = Vec3::new(0.0, 5.0, 0.0);
        store.scene_mut(child_scene).unwrap().parent = Some(parent_scene);
        store.scene_mut(parent_scene).unwrap().children.push(child_scene);

        let a = store.insert(Entity::with_position(Vec3::Z, "A")).unwrap();
        store.entity_mut(a).unwrap().scene = Some(child_scene);

        store.update_world_matrix(a);

        let world = store.transform(a).unwrap().world_position();
        assert!(world.abs_diff_eq(Vec3::new(10.0, 5.0, 1.0), 1e-6));
        assert_eq!(store.entity_scene(a), Some(child_scene));
    }

    #[test]
    fn test_link_overrides_parent() {
        let (mut store, a, b) = store_with_pair();
        let target = store.insert(Entity::with_position(Vec3::new(0.0, 0.0, 7.0), "T")).unwrap();
        store.transform_mut(a).unwrap().position = Vec3::new(100.0, 0.0, 0.0);
        store
            .transform_mut(b)
            .unwrap()
            .set_link(Some(Box::new(EntityTransformLink::with_offset(
                target,
                Mat4::from_translation(Vec3::X),
            ))));

        store.update_world_matrix(b);

        let world = store.transform(b).unwrap().world_position();
        assert!(world.abs_diff_eq(Vec3::new(1.0, 2.0, 7.0), 1e-6));
        assert!(store.transform(b).unwrap().has_link());
    }

    #[test]
    fn test_post_operation_sees_world_matrix() {
        let (mut store, a, b) = store_with_pair();
        store.transform_mut(a).unwrap().position = Vec3::X;
        store
            .transform_mut(b)
            .unwrap()
            .push_post_operation(|_: EntityId, t: &mut TransformComponent| {
                t.world_matrix = t.world_matrix * Mat4::from_translation(Vec3::Z);
            });

        store.update_world_matrix(b);

        let world = store.transform(b).unwrap().world_position();
        assert!(world.abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), 1e-6));
    }

    #[test]
    fn test_local_from_world_inverts_parent() {
        let (mut store, a, b) = store_with_pair();
        store.transform_mut(a).unwrap().position = Vec3::new(4.0, 0.0, 0.0);
        store.update_world_matrix(a);
        store.transform_mut(b).unwrap().world_matrix = Mat4::from_translation(Vec3::new(5.0, 1.0, 0.0));

        store.update_local_from_world(b);

        let local = store.transform(b).unwrap().local_matrix;
        assert!(local.w_axis.truncate().abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-6));
    }

    #[test]
    fn test_subtree_update_is_top_down() {
        let (mut store, a, b) = store_with_pair();
        store.transform_mut(a).unwrap().position = Vec3::new(0.0, 0.0, 3.0);

        store.update_transformation_and_children(a);

        let world = store.transform(b).unwrap().world_position();
        assert!(world.abs_diff_eq(Vec3::new(0.0, 2.0, 3.0), 1e-6));
    }

    #[test]
    fn test_unlink_child() {
        let (mut store, a, b) = store_with_pair();
        assert!(store.unlink_child(a, b));
        assert!(store.parent(b).is_none());
        assert!(store.children(a).is_empty());
        assert!(!store.unlink_child(a, b));
    }

    #[test]
    fn test_remove_detaches_components() {
        let mut store = EntityStore::new();
        let a = store.insert(Entity::new("A")).unwrap();
        assert_eq!(
            store.transform(a).and_then(|t| t.core().entity()),
            Some(a)
        );

        let entity = store.remove(a).unwrap();
        assert!(entity.id().is_none());
        assert!(entity.transform().unwrap().core().entity().is_none());
        assert!(!store.contains(a));
    }

    #[test]
    fn test_insert_rejects_component_held_by_stored_entity() {
        let mut store = EntityStore::new();
        let first = Entity::new("A").with(Health::new(1.0)).unwrap();
        let mut health = first.get::<Health>().unwrap().clone();
        let health_id = health.core().id();
        let a = store.insert(first).unwrap();

        // Copy stripped of its owner, only the store can tell
        health.core_mut().set_owner(None, None);
        let second = Entity::new("B").with(health).unwrap();

        assert!(matches!(
            store.insert(second),
            Err(EcsError::ForeignEntity { component, .. }) if component == health_id
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.component_owner(health_id), Some(a));

        store.remove(a);
        assert!(store.component_owner(health_id).is_none());
    }

    #[test]
    fn test_handles_resolve_only_in_their_store() {
        let mut first = EntityStore::new();
        let mut second = EntityStore::new();
        let a = first.insert(Entity::new("A")).unwrap();
        let b = second.insert(Entity::new("B")).unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(a.store(), first.id());
        assert!(!second.contains(a));
        assert!(second.entity(a).is_none());
        assert_eq!(second.entity(b).map(|e| e.name.as_str()), Some("B"));
    }
}
