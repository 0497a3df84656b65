//! Errors raised by the entity/component object model
//!
//! Every variant is a programming error in the calling code: the operation is
//! rejected before any state is touched.

use thiserror::Error;
use uuid::Uuid;

use super::component::ComponentId;
use super::entity::EntityId;
use super::scene::SceneId;

/// Invariant violations detected while mutating entities, transforms or scenes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// The same component instance is already stored in the collection.
    #[error("cannot add the same component multiple times, already set at index [{index}]")]
    DuplicateComponent {
        /// Index of the existing instance
        index: usize,
    },

    /// A second instance of a single-instance component type was added.
    #[error("cannot add a component of type [{type_name}] multiple times")]
    DuplicateComponentType {
        /// Name of the offending component type
        type_name: &'static str,
    },

    /// The component is still attached to another entity.
    #[error("component {component} is already attached to entity {owner}")]
    ForeignEntity {
        /// Identity of the component
        component: ComponentId,
        /// GUID of the entity currently owning it
        owner: Uuid,
    },

    /// Structural changes to a registered entity must go through its manager.
    #[error("entity is registered with an entity manager, mutate it through the manager")]
    ManagedEntity,

    /// A component index was out of range.
    #[error("component index {index} is out of range (len {len})")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Collection length
        len: usize,
    },

    /// The entity handle was issued by another manager's store.
    #[error("entity {0:?} belongs to another entity manager")]
    ForeignManager(EntityId),

    /// The entity handle does not belong to this store.
    #[error("entity {0:?} does not exist")]
    EntityNotFound(EntityId),

    /// The scene handle does not belong to this store.
    #[error("scene {0:?} does not exist")]
    SceneNotFound(SceneId),

    /// Only root entities can be added directly to a manager.
    #[error("entity {0:?} has a transform parent, add it through its parent's children")]
    EntityHasParent(EntityId),

    /// The entity is still registered with a manager.
    #[error("entity {0:?} is still registered with its entity manager")]
    EntityInUse(EntityId),

    /// The entity has no transform component.
    #[error("entity {0:?} has no transform component")]
    MissingTransform(EntityId),

    /// The transform already has a parent.
    #[error("transform of entity {0:?} already has a parent, detach it first")]
    ParentAlreadySet(EntityId),

    /// The transform is not a child of the given parent.
    #[error("entity {child:?} is not a child of {parent:?}")]
    NotAChild {
        /// Expected parent
        parent: EntityId,
        /// Child that was looked up
        child: EntityId,
    },

    /// The requested link would make an entity its own ancestor.
    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    HierarchyCycle {
        /// Requested parent
        parent: EntityId,
        /// Requested child
        child: EntityId,
    },

    /// The entity already belongs to a scene.
    #[error("entity {0:?} already has a scene, detach it first")]
    EntityAlreadyInScene(EntityId),

    /// The entity is not a root entity of the given scene.
    #[error("entity {entity:?} is not part of scene {scene:?}")]
    EntityNotInScene {
        /// Scene that was searched
        scene: SceneId,
        /// Entity that was looked up
        entity: EntityId,
    },

    /// Child entities inherit the scene of their root and cannot be moved.
    #[error("entity {0:?} is another entity's child, detach it before changing its scene")]
    ChildEntityScene(EntityId),

    /// The scene already has a parent.
    #[error("scene {0:?} already has a parent, detach it first")]
    SceneAlreadyHasParent(SceneId),

    /// The scene is not a child of the given parent.
    #[error("scene {child:?} is not a child of {parent:?}")]
    NotAChildScene {
        /// Expected parent
        parent: SceneId,
        /// Child that was looked up
        child: SceneId,
    },

    /// The requested scene link would create a cycle.
    #[error("attaching scene {child:?} under {parent:?} would create a cycle")]
    SceneCycle {
        /// Requested parent
        parent: SceneId,
        /// Requested child
        child: SceneId,
    },
}

/// Result alias for object model operations.
pub type EcsResult<T> = Result<T, EcsError>;
