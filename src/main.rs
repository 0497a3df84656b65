//! Headless demo: a small solar system spinning for a few seconds

use std::any::Any;
use std::sync::Arc;

use stride::prelude::*;

/// Rotates its entity around the local Y axis
#[derive(Debug, Clone)]
struct Spin {
    core: ComponentCore,
    /// Radians per second
    speed: f32,
}

impl Spin {
    fn new(speed: f32) -> Self {
        Self {
            core: ComponentCore::new(),
            speed,
        }
    }
}

stride::impl_entity_component!(Spin);

/// Applies every tracked [`Spin`] during update
#[derive(Debug, Default)]
struct SpinProcessor {
    spins: ComponentDatas<f32>,
}

impl EntityProcessor for SpinProcessor {
    fn main_component_type(&self) -> ComponentType {
        ComponentType::of::<Spin>()
    }

    fn process_entity_component(
        &mut self,
        _ctx: &mut ProcessorContext<'_>,
        entity: EntityId,
        component: &dyn EntityComponent,
        force_remove: bool,
    ) {
        let Some(spin) = component.downcast_ref::<Spin>() else {
            return;
        };
        match self.spins.classify(component.id(), !force_remove, |_| true) {
            DataTransition::Add | DataTransition::Refresh(_) => {
                self.spins.insert(component.id(), entity, spin.speed);
            }
            DataTransition::Remove(_) | DataTransition::Keep | DataTransition::Ignore => {}
        }
    }

    fn remove_all_entities(&mut self, _ctx: &mut ProcessorContext<'_>) {
        self.spins = ComponentDatas::default();
    }

    fn update(&mut self, ctx: &mut FrameContext<'_>, time: &GameTime) {
        let dt = time.warp_elapsed().as_secs_f32();
        for (_, entity, speed) in self.spins.iter() {
            if let Some(transform) = ctx.store.transform_mut(entity) {
                transform.rotate(Quat::from_rotation_y(*speed * dt));
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Sun, earth and moon as one spinning hierarchy in the root scene.
/// Returns the moon.
fn build_system(manager: &mut EntityManager) -> EcsResult<EntityId> {
    let scene = manager.create_scene("system");

    let sun = manager.insert_entity(Entity::new("sun").with(Spin::new(0.5))?)?;
    let earth = manager.insert_entity(
        Entity::with_position(Vec3::new(10.0, 0.0, 0.0), "earth").with(Spin::new(2.0))?,
    )?;
    let moon = manager.insert_entity(Entity::with_position(Vec3::new(2.0, 0.0, 0.0), "moon"))?;

    manager.add_child(sun, earth)?;
    manager.add_child(earth, moon)?;
    manager.add_entity_to_scene(scene, sun)?;
    manager.set_root_scene(Some(scene))?;
    Ok(moon)
}

#[derive(Default)]
struct SolarSystem {
    moon: Option<EntityId>,
}

impl Game for SolarSystem {
    fn init(&mut self, ctx: &mut EngineContext) {
        log::info!("Building solar system");

        match build_system(&mut ctx.manager) {
            Ok(moon) => self.moon = Some(moon),
            Err(err) => {
                log::warn!("failed to build the scene: {err}");
                ctx.quit();
            }
        }
    }

    fn update(&mut self, ctx: &mut EngineContext) {
        if ctx.time.fps_updated() {
            log::info!("{}", ctx.stats.format_stats());
        }
    }

    fn draw(&mut self, ctx: &mut EngineContext) {
        if ctx.frame() % 60 != 0 {
            return;
        }
        if let Some(moon) = self.moon.and_then(|moon| ctx.manager.store().transform(moon)) {
            log::info!("frame {}: moon at {}", ctx.frame(), moon.world_position());
        }
    }
}

fn main() {
    let registry = ComponentRegistry::builder()
        .with_defaults()
        .register_processor::<Spin, SpinProcessor>(ExecutionMode::ALL)
        .build();
    let config = EngineConfig::default()
        .with_title("Solar system")
        .with_fixed_time_step(1.0 / 60.0)
        .with_max_frames(300);

    let game = Engine::with_registry(config, Arc::new(registry), SolarSystem::default()).run();
    if game.moon.is_none() {
        std::process::exit(1);
    }
}
