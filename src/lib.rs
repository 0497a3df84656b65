//! A scene-graph object model for games
//!
//! This crate provides:
//! - Entities holding ordered, polymorphic components
//! - A transform hierarchy with scene offsets and transform links
//! - Processors created on demand from component metadata and kept in sync
//!   with every structural change
//! - A headless game loop driving processor update and draw

pub mod core;
pub mod ecs;

// Re-exports for convenience
pub use glam;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::core::{
        Engine, EngineConfig, EngineContext, EngineError, FrameStats, Game, GameTime,
        RenderContext,
    };
    pub use crate::ecs::{
        AttachPolicy, ComponentCore, ComponentDatas, ComponentRegistry, ComponentType,
        DataTransition, EcsError, EcsResult, Entity, EntityComponent, EntityId, EntityManager,
        EntityProcessor, ExecutionMode, FrameContext, ProcessorContext, Scene, SceneId,
        TransformComponent, TransformProcessor,
    };
    pub use glam::{Mat4, Quat, Vec3};
}
