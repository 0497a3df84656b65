//! Entity/component object model
//!
//! Entities own ordered lists of polymorphic components. An [`EntityManager`]
//! registers entities, creates the processors their component types declare,
//! and keeps those processors informed of every structural change.

mod collection;
mod component;
mod entity;
mod error;
mod hierarchy;
mod manager;
mod processor;
mod registry;
mod scene;
mod store;
mod transform;
mod transform_processor;

#[cfg(test)]
pub(crate) mod testing;

pub use collection::{AttachPolicy, EntityComponentCollection};
pub use component::{ComponentCore, ComponentId, ComponentType, EntityComponent};
pub use entity::{Entity, EntityId};
pub use error::{EcsError, EcsResult};
pub use manager::{EntityManager, EntityManagerEvent, ManagerId};
pub use processor::{
    ComponentDatas, DataTransition, EntityCommand, EntityCommands, EntityProcessor,
    EntityProcessorCollection, FrameContext, ProcessorContext, ProcessorEntry, ProcessorKey,
};
pub use registry::{
    ComponentInfo, ComponentRegistry, ComponentRegistryBuilder, ExecutionMode, ProcessorFactory,
    ProcessorRegistration,
};
pub use scene::{Scene, SceneId};
pub use store::{EntityStore, StoreId};
pub use transform::{
    EntityTransformLink, TransformChildren, TransformComponent, TransformLink, TransformOperation,
};
pub use transform_processor::TransformProcessor;
