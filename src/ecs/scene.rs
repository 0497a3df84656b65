//! Scenes
//!
//! A scene groups root entities and nests into a scene tree. Child entities
//! belong to the scene of their hierarchy root. The manager's root scene
//! drives automatic registration: every entity reachable from it is
//! registered, and follows later edits of the tree.

use std::fmt;

use glam::{Mat4, Vec3};
use slotmap::new_key_type;
use uuid::Uuid;

use super::entity::EntityId;
use super::error::{EcsError, EcsResult};
use super::manager::{EntityManager, EntityManagerEvent};

new_key_type! {
    /// Handle of a scene inside an entity store.
    pub struct SceneId;
}

/// A container of root entities positioned in world space.
#[derive(Debug)]
pub struct Scene {
    guid: Uuid,
    /// Display name
    pub name: String,
    /// Translation applied on top of the parent scene
    pub offset: Vec3,
    pub(crate) world_matrix: Mat4,
    pub(crate) parent: Option<SceneId>,
    pub(crate) children: Vec<SceneId>,
    pub(crate) entities: Vec<EntityId>,
}

impl Scene {
    /// Empty scene at the origin
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            name: name.into(),
            offset: Vec3::ZERO,
            world_matrix: Mat4::IDENTITY,
            parent: None,
            children: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Persistent identity
    #[must_use]
    pub fn guid(&self) -> Uuid {
        self.guid
    }

    /// Parent scene
    #[must_use]
    pub fn parent(&self) -> Option<SceneId> {
        self.parent
    }

    /// Child scenes, in insertion order
    #[must_use]
    pub fn children(&self) -> &[SceneId] {
        &self.children
    }

    /// Root entities, in insertion order
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// World matrix computed by the last scene update
    #[must_use]
    pub fn world_matrix(&self) -> Mat4 {
        self.world_matrix
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scene {}", self.name)
    }
}

impl EntityManager {
    /// Create an empty, detached scene
    pub fn create_scene(&mut self, name: impl Into<String>) -> SceneId {
        self.store_mut().insert_scene(Scene::new(name))
    }

    /// Scene by handle
    #[must_use]
    pub fn scene(&self, scene: SceneId) -> Option<&Scene> {
        self.store().scene(scene)
    }

    /// Writable scene by handle
    pub fn scene_mut(&mut self, scene: SceneId) -> Option<&mut Scene> {
        self.store_mut().scene_mut(scene)
    }

    /// Scene an entity belongs to through its hierarchy root
    #[must_use]
    pub fn entity_scene(&self, entity: EntityId) -> Option<SceneId> {
        self.store().entity_scene(entity)
    }

    /// Scene driving automatic registration
    #[must_use]
    pub fn root_scene(&self) -> Option<SceneId> {
        self.store().root_scene()
    }

    /// Replace the root scene.
    ///
    /// Entities of the previous scene tree are unregistered, those of the new
    /// one registered.
    ///
    /// # Errors
    ///
    /// [`EcsError::SceneNotFound`] for an unknown scene.
    pub fn set_root_scene(&mut self, scene: Option<SceneId>) -> EcsResult<()> {
        if let Some(scene) = scene {
            self.require_scene(scene)?;
        }
        let previous = self.root_scene();
        if previous == scene {
            return Ok(());
        }

        if let Some(previous) = previous {
            for entity in self.scene_tree_entities(previous) {
                self.internal_remove_entity(entity, true);
            }
        }
        self.store_mut().set_root_scene(scene);
        if let Some(scene) = scene {
            log::debug!("root scene set to {scene:?}");
            for entity in self.scene_tree_entities(scene) {
                self.internal_add_entity(entity);
            }
        }
        Ok(())
    }

    /// Add a root entity to a scene.
    ///
    /// # Errors
    ///
    /// - [`EcsError::EntityAlreadyInScene`] when the entity, or its root,
    ///   already has a scene
    /// - [`EcsError::ChildEntityScene`] when the entity has a parent
    pub fn add_entity_to_scene(&mut self, scene: SceneId, entity: EntityId) -> EcsResult<()> {
        self.require_scene(scene)?;
        if !self.store().contains(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        if self.entity_scene(entity).is_some() {
            return Err(EcsError::EntityAlreadyInScene(entity));
        }
        if self.store().parent(entity).is_some() {
            return Err(EcsError::ChildEntityScene(entity));
        }

        if let Some(entity_ref) = self.entity_mut(entity) {
            entity_ref.scene = Some(scene);
        }
        if let Some(scene_ref) = self.scene_mut(scene) {
            scene_ref.entities.push(entity);
        }

        if self.is_scene_live(scene) {
            self.internal_add_entity(entity);
        }
        Ok(())
    }

    /// Remove a root entity from a scene.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotInScene`] when the entity is not a root of `scene`.
    pub fn remove_entity_from_scene(&mut self, scene: SceneId, entity: EntityId) -> EcsResult<()> {
        self.require_scene(scene)?;
        if self.entity(entity).and_then(|e| e.scene()) != Some(scene) {
            return Err(EcsError::EntityNotInScene { scene, entity });
        }

        let live = self.is_scene_live(scene);
        self.detach_from_scene(entity);
        if live {
            self.internal_remove_entity(entity, true);
        }
        Ok(())
    }

    /// Move an entity to another scene, or out of any scene.
    ///
    /// Clearing the scene of a child entity detaches it from its parent.
    ///
    /// # Errors
    ///
    /// [`EcsError::ChildEntityScene`] when giving a child entity a scene.
    pub fn set_entity_scene(&mut self, entity: EntityId, scene: Option<SceneId>) -> EcsResult<()> {
        if !self.store().contains(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        if let Some(parent) = self.store().parent(entity) {
            return match scene {
                Some(_) => Err(EcsError::ChildEntityScene(entity)),
                None => self.remove_child(parent, entity),
            };
        }

        let current = self.entity(entity).and_then(|e| e.scene());
        if current == scene {
            return Ok(());
        }
        if let Some(scene) = scene {
            self.require_scene(scene)?;
        }
        if let Some(current) = current {
            self.remove_entity_from_scene(current, entity)?;
        }
        match scene {
            Some(scene) => self.add_entity_to_scene(scene, entity),
            None => Ok(()),
        }
    }

    /// Nest `child` under `parent`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::SceneAlreadyHasParent`] when `child` is already nested
    /// - [`EcsError::SceneCycle`] when `child` is `parent` or one of its
    ///   ancestors
    pub fn add_child_scene(&mut self, parent: SceneId, child: SceneId) -> EcsResult<()> {
        self.require_scene(parent)?;
        self.require_scene(child)?;
        if self.scene(child).and_then(Scene::parent).is_some() {
            return Err(EcsError::SceneAlreadyHasParent(child));
        }
        if self.store().is_scene_ancestor_or_self(child, parent) {
            return Err(EcsError::SceneCycle { parent, child });
        }

        if let Some(scene) = self.scene_mut(parent) {
            scene.children.push(child);
        }
        if let Some(scene) = self.scene_mut(child) {
            scene.parent = Some(parent);
        }

        if self.is_scene_live(parent) {
            for entity in self.scene_tree_entities(child) {
                self.internal_add_entity(entity);
            }
        }
        Ok(())
    }

    /// Un-nest `child` from `parent`.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotAChildScene`] when `child` is not nested under `parent`.
    pub fn remove_child_scene(&mut self, parent: SceneId, child: SceneId) -> EcsResult<()> {
        self.require_scene(parent)?;
        if self.scene(child).and_then(Scene::parent) != Some(parent) {
            return Err(EcsError::NotAChildScene { parent, child });
        }

        let live = self.is_scene_live(parent);
        if let Some(scene) = self.scene_mut(parent) {
            scene.children.retain(|c| *c != child);
        }
        if let Some(scene) = self.scene_mut(child) {
            scene.parent = None;
        }

        if live {
            for entity in self.scene_tree_entities(child) {
                self.internal_remove_entity(entity, true);
            }
        }
        Ok(())
    }

    /// Move `child` under another parent scene, or detach it.
    ///
    /// # Errors
    ///
    /// See [`Self::add_child_scene`].
    pub fn set_scene_parent(&mut self, child: SceneId, parent: Option<SceneId>) -> EcsResult<()> {
        self.require_scene(child)?;
        let current = self.scene(child).and_then(Scene::parent);
        if current == parent {
            return Ok(());
        }
        if let Some(parent) = parent {
            self.require_scene(parent)?;
            if self.store().is_scene_ancestor_or_self(child, parent) {
                return Err(EcsError::SceneCycle { parent, child });
            }
        }
        if let Some(current) = current {
            self.remove_child_scene(current, child)?;
        }
        match parent {
            Some(parent) => self.add_child_scene(parent, child),
            None => Ok(()),
        }
    }

    /// Drop the scene membership of a root entity without touching its
    /// registration.
    pub(crate) fn detach_from_scene(&mut self, entity: EntityId) {
        let Some(scene) = self.entity_mut(entity).and_then(|e| e.scene.take()) else {
            return;
        };
        if let Some(scene) = self.scene_mut(scene) {
            scene.entities.retain(|e| *e != entity);
        }
        if self.contains(entity) {
            self.events_mut()
                .push(EntityManagerEvent::HierarchyChanged(entity));
        }
    }

    /// Whether the scene is the root scene or nested under it
    fn is_scene_live(&self, scene: SceneId) -> bool {
        self.root_scene()
            .is_some_and(|root| self.store().is_scene_ancestor_or_self(root, scene))
    }

    /// Root entities of a scene and its nested scenes, scene by scene
    fn scene_tree_entities(&self, scene: SceneId) -> Vec<EntityId> {
        let mut result = Vec::new();
        let mut stack = vec![scene];
        while let Some(current) = stack.pop() {
            if let Some(scene) = self.scene(current) {
                result.extend_from_slice(scene.entities());
                stack.extend(scene.children().iter().rev());
            }
        }
        result
    }

    fn require_scene(&self, scene: SceneId) -> EcsResult<()> {
        if self.scene(scene).is_some() {
            Ok(())
        } else {
            Err(EcsError::SceneNotFound(scene))
        }
    }
}
