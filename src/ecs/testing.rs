//! Components and processors shared by the unit tests

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::component::{ComponentCore, ComponentType, EntityComponent};
use super::entity::EntityId;
use super::manager::EntityManager;
use super::processor::{ComponentDatas, DataTransition, EntityProcessor, FrameContext, ProcessorContext};
use super::registry::{ComponentRegistry, ExecutionMode};
use crate::core::GameTime;

#[derive(Debug, Clone)]
pub struct Health {
    core: ComponentCore,
    pub value: f32,
}

impl Health {
    pub fn new(value: f32) -> Self {
        Self {
            core: ComponentCore::new(),
            value,
        }
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new(100.0)
    }
}

crate::impl_entity_component!(Health);

#[derive(Debug, Clone, Default)]
pub struct Marker {
    core: ComponentCore,
}

crate::impl_entity_component!(Marker, allow_multiple);

/// Records every Health component it starts and stops tracking.
#[derive(Debug, Default)]
pub struct CountingProcessor {
    pub added: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    pub datas: ComponentDatas<f32>,
}

impl EntityProcessor for CountingProcessor {
    fn main_component_type(&self) -> ComponentType {
        ComponentType::of::<Health>()
    }

    fn process_entity_component(
        &mut self,
        _ctx: &mut ProcessorContext<'_>,
        entity: EntityId,
        component: &dyn EntityComponent,
        force_remove: bool,
    ) {
        let Some(health) = component.downcast_ref::<Health>() else {
            return;
        };
        match self.datas.classify(component.id(), !force_remove, |_| true) {
            DataTransition::Add => {
                self.added.push(entity);
                self.datas.insert(component.id(), entity, health.value);
            }
            DataTransition::Remove(_) => self.removed.push(entity),
            DataTransition::Refresh(_) | DataTransition::Keep | DataTransition::Ignore => {}
        }
    }

    fn remove_all_entities(&mut self, _ctx: &mut ProcessorContext<'_>) {
        self.datas = ComponentDatas::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Health processor only declared for the editor.
#[derive(Debug, Default)]
pub struct EditorProcessor;

impl EntityProcessor for EditorProcessor {
    fn main_component_type(&self) -> ComponentType {
        ComponentType::of::<Health>()
    }

    fn process_entity_component(
        &mut self,
        _ctx: &mut ProcessorContext<'_>,
        _entity: EntityId,
        _component: &dyn EntityComponent,
        _force_remove: bool,
    ) {
    }

    fn remove_all_entities(&mut self, _ctx: &mut ProcessorContext<'_>) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Tracks Health components of entities that also carry a Marker.
#[derive(Debug)]
pub struct DependentProcessor {
    required: [ComponentType; 1],
    pub datas: ComponentDatas<()>,
}

impl Default for DependentProcessor {
    fn default() -> Self {
        Self {
            required: [ComponentType::of::<Marker>()],
            datas: ComponentDatas::default(),
        }
    }
}

impl EntityProcessor for DependentProcessor {
    fn order(&self) -> i32 {
        10
    }

    fn main_component_type(&self) -> ComponentType {
        ComponentType::of::<Health>()
    }

    fn required_types(&self) -> &[ComponentType] {
        &self.required
    }

    fn process_entity_component(
        &mut self,
        ctx: &mut ProcessorContext<'_>,
        entity: EntityId,
        component: &dyn EntityComponent,
        force_remove: bool,
    ) {
        let matches = !force_remove && ctx.entity_matches(entity, &self.required);
        match self.datas.classify(component.id(), matches, |_| true) {
            DataTransition::Add => self.datas.insert(component.id(), entity, ()),
            DataTransition::Refresh(()) => self.datas.insert(component.id(), entity, ()),
            DataTransition::Remove(()) | DataTransition::Keep | DataTransition::Ignore => {}
        }
    }

    fn remove_all_entities(&mut self, _ctx: &mut ProcessorContext<'_>) {
        self.datas = ComponentDatas::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Marker processor pulled in through [`DependentProcessor`]'s requirements.
#[derive(Debug, Default)]
pub struct MarkerProcessor {
    pub count: usize,
}

impl EntityProcessor for MarkerProcessor {
    fn main_component_type(&self) -> ComponentType {
        ComponentType::of::<Marker>()
    }

    fn process_entity_component(
        &mut self,
        _ctx: &mut ProcessorContext<'_>,
        _entity: EntityId,
        _component: &dyn EntityComponent,
        force_remove: bool,
    ) {
        if force_remove {
            self.count = self.count.saturating_sub(1);
        } else {
            self.count += 1;
        }
    }

    fn remove_all_entities(&mut self, _ctx: &mut ProcessorContext<'_>) {
        self.count = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub type UpdateLog = Rc<RefCell<Vec<usize>>>;

/// Distinct processor type per `N`, logging `N` on every update.
#[derive(Debug, Default)]
pub struct OrderedProcessor<const N: usize> {
    order: i32,
    log: UpdateLog,
}

impl<const N: usize> OrderedProcessor<N> {
    pub fn new(order: i32) -> Self {
        Self::with_log(order, UpdateLog::default())
    }

    pub fn with_log(order: i32, log: UpdateLog) -> Self {
        Self { order, log }
    }
}

impl<const N: usize> EntityProcessor for OrderedProcessor<N> {
    fn order(&self) -> i32 {
        self.order
    }

    fn main_component_type(&self) -> ComponentType {
        ComponentType::of::<Marker>()
    }

    fn process_entity_component(
        &mut self,
        _ctx: &mut ProcessorContext<'_>,
        _entity: EntityId,
        _component: &dyn EntityComponent,
        _force_remove: bool,
    ) {
    }

    fn remove_all_entities(&mut self, _ctx: &mut ProcessorContext<'_>) {}

    fn update(&mut self, _ctx: &mut FrameContext<'_>, _time: &GameTime) {
        self.log.borrow_mut().push(N);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn test_registry() -> Arc<ComponentRegistry> {
    Arc::new(
        ComponentRegistry::builder()
            .with_defaults()
            .register_processor::<Health, CountingProcessor>(ExecutionMode::RUNTIME)
            .register_processor::<Health, EditorProcessor>(ExecutionMode::EDITOR)
            .register_processor::<Health, DependentProcessor>(ExecutionMode::RUNTIME)
            .register_processor::<Marker, MarkerProcessor>(ExecutionMode::RUNTIME)
            .build(),
    )
}

pub fn test_manager() -> EntityManager {
    EntityManager::new(test_registry())
}
