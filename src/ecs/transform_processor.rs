//! Transform processor
//!
//! Tracks the hierarchy roots among registered transforms, registers children
//! along with their parent, and recomputes every world matrix at draw time.

use std::any::Any;

use rustc_hash::FxHashSet;

use super::component::{ComponentType, EntityComponent};
use super::entity::EntityId;
use super::processor::{
    ComponentDatas, DataTransition, EntityProcessor, FrameContext, ProcessorContext,
};
use super::transform::TransformComponent;
use crate::core::RenderContext;

/// Keeps world matrices of registered entities up to date.
#[derive(Debug, Default)]
pub struct TransformProcessor {
    roots: FxHashSet<EntityId>,
    transforms: ComponentDatas<()>,
}

impl TransformProcessor {
    /// Dispatch order, ahead of processors reading world matrices
    pub const ORDER: i32 = -200;

    /// Whether the entity is a tracked hierarchy root
    #[must_use]
    pub fn is_root(&self, entity: EntityId) -> bool {
        self.roots.contains(&entity)
    }

    /// Tracked hierarchy roots, in no particular order
    pub fn roots(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.roots.iter().copied()
    }

    /// Number of tracked transforms
    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether no transform is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub(crate) fn set_root(&mut self, entity: EntityId, is_root: bool) {
        if is_root {
            self.roots.insert(entity);
        } else {
            self.roots.remove(&entity);
        }
    }

    fn on_entity_component_adding(
        &mut self,
        ctx: &mut ProcessorContext<'_>,
        entity: EntityId,
        transform: &TransformComponent,
    ) {
        if transform.parent().is_none() {
            self.roots.insert(entity);
        }
        for child in transform.children() {
            ctx.commands().add_entity(*child);
        }
    }

    fn on_entity_component_removed(
        &mut self,
        ctx: &mut ProcessorContext<'_>,
        entity: EntityId,
        transform: &TransformComponent,
    ) {
        for child in transform.children() {
            ctx.commands().remove_entity(*child, false);
        }
        if transform.parent().is_none() {
            self.roots.remove(&entity);
        }
    }
}

impl EntityProcessor for TransformProcessor {
    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn main_component_type(&self) -> ComponentType {
        ComponentType::of::<TransformComponent>()
    }

    fn process_entity_component(
        &mut self,
        ctx: &mut ProcessorContext<'_>,
        entity: EntityId,
        component: &dyn EntityComponent,
        force_remove: bool,
    ) {
        let Some(transform) = component.downcast_ref::<TransformComponent>() else {
            return;
        };
        match self
            .transforms
            .classify(component.id(), !force_remove, |_| true)
        {
            DataTransition::Add => {
                self.on_entity_component_adding(ctx, entity, transform);
                self.transforms.insert(component.id(), entity, ());
            }
            DataTransition::Remove(()) => {
                self.on_entity_component_removed(ctx, entity, transform);
            }
            DataTransition::Refresh(()) => {
                self.transforms.insert(component.id(), entity, ());
            }
            DataTransition::Keep | DataTransition::Ignore => {}
        }
    }

    fn remove_all_entities(&mut self, _ctx: &mut ProcessorContext<'_>) {
        self.transforms = ComponentDatas::default();
        self.roots.clear();
    }

    fn draw(&mut self, ctx: &mut FrameContext<'_>, _render: &RenderContext) {
        if let Some(scene) = ctx.store.root_scene() {
            ctx.store.update_scene_hierarchy(scene);
        }

        let mut roots: Vec<EntityId> = self.roots.iter().copied().collect();
        roots.sort_unstable();
        for root in roots {
            ctx.store.update_transformation_and_children(root);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
