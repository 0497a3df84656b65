//! Core Engine struct and main game loop
//!
//! The loop is headless: each tick advances [`GameTime`], runs the game's
//! update then the entity processors' update, then the game's draw then the
//! processors' draw.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::debug::FrameStats;
use crate::core::{GameTime, RenderContext};
use crate::ecs::{ComponentRegistry, EntityManager, ExecutionMode};

/// Engine setup and configuration failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The RON configuration is malformed
    #[error("invalid RON configuration: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// The JSON configuration is malformed
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application title, used in logs
    pub title: String,
    /// Target frames per second (0 for unlimited)
    pub target_fps: u32,
    /// Stop after this many frames
    pub max_frames: Option<u64>,
    /// Fixed simulation step in seconds, wall-clock time when unset
    pub fixed_time_step: Option<f32>,
    /// Processors registered for other modes are not created
    pub execution_mode: ExecutionMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: String::from("Stride"),
            target_fps: 60,
            max_frames: None,
            fixed_time_step: None,
            execution_mode: ExecutionMode::RUNTIME,
        }
    }
}

impl EngineConfig {
    /// Create a new config with a title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set target FPS
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps;
        self
    }

    /// Stop after `frames` frames
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Advance time by a fixed step instead of wall-clock time
    pub fn with_fixed_time_step(mut self, seconds: f32) -> Self {
        self.fixed_time_step = Some(seconds);
        self
    }

    /// Set the execution mode
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Parse a RON configuration
    pub fn from_ron(source: &str) -> Result<Self, EngineError> {
        Ok(ron::from_str(source)?)
    }

    /// Parse a JSON configuration
    pub fn from_json(source: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load a RON configuration file
    pub fn load_ron(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::from_ron(&std::fs::read_to_string(path)?)
    }

    /// Load a JSON configuration file
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    fn fixed_step(&self) -> Option<Duration> {
        self.fixed_time_step
            .filter(|step| step.is_finite() && *step > 0.0)
            .map(Duration::from_secs_f32)
    }

    fn frame_budget(&self) -> Option<Duration> {
        (self.target_fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(self.target_fps)))
    }
}

/// Game trait that users implement
pub trait Game: 'static {
    /// Called once before the first frame
    fn init(&mut self, engine: &mut EngineContext);

    /// Called every frame before the processors' update
    fn update(&mut self, engine: &mut EngineContext);

    /// Called every frame before the processors' draw
    fn draw(&mut self, _engine: &mut EngineContext) {}

    /// Called when the game is shutting down
    fn shutdown(&mut self, _engine: &mut EngineContext) {}
}

/// Context passed to game callbacks
pub struct EngineContext {
    /// Time tracking
    pub time: GameTime,
    /// Entities, scenes and processors
    pub manager: EntityManager,
    /// Frame statistics
    pub stats: FrameStats,
    /// Index of the current frame
    frame: u64,
    /// Should the engine quit
    should_quit: bool,
}

impl EngineContext {
    fn new(manager: EntityManager) -> Self {
        Self {
            time: GameTime::default(),
            manager,
            stats: FrameStats::new(),
            frame: 0,
            should_quit: false,
        }
    }

    /// Index of the current frame
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Request engine shutdown
    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    /// Check if engine should quit
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }
}

/// Main engine struct
pub struct Engine<G: Game> {
    config: EngineConfig,
    game: G,
    context: EngineContext,
    initialized: bool,
    total: Duration,
    last_tick: Option<Instant>,
}

impl<G: Game> Engine<G> {
    /// Create a new engine with the built-in component registry
    pub fn new(config: EngineConfig, game: G) -> Self {
        Self::with_registry(config, Arc::new(ComponentRegistry::with_defaults()), game)
    }

    /// Create a new engine with a custom component registry
    pub fn with_registry(config: EngineConfig, registry: Arc<ComponentRegistry>, game: G) -> Self {
        let manager = EntityManager::with_execution_mode(registry, config.execution_mode);
        Self {
            config,
            game,
            context: EngineContext::new(manager),
            initialized: false,
            total: Duration::ZERO,
            last_tick: None,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Game callbacks' context
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Mutable game callbacks' context
    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.context
    }

    /// The game
    pub fn game(&self) -> &G {
        &self.game
    }

    /// Call `Game::init` once
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.game.init(&mut self.context);
        self.initialized = true;
        log::info!("Engine initialized: {}", self.config.title);
    }

    /// Run one frame
    pub fn tick(&mut self) {
        let elapsed = match self.config.fixed_step() {
            Some(step) => step,
            None => {
                let now = Instant::now();
                let elapsed = self
                    .last_tick
                    .map_or(Duration::ZERO, |last| now.duration_since(last));
                self.last_tick = Some(now);
                elapsed
            }
        };
        self.total += elapsed;

        let ctx = &mut self.context;
        ctx.manager.events_mut().swap();
        ctx.time.update(self.total, elapsed, true);
        ctx.stats.record_frame(elapsed);

        self.game.update(ctx);
        ctx.manager.update(&ctx.time);

        let render = RenderContext {
            frame: ctx.frame,
            time: ctx.time.clone(),
        };
        self.game.draw(ctx);
        ctx.manager.draw(&render);

        if ctx.time.fps_updated() {
            log::trace!("{}", ctx.stats.format_stats());
        }
        ctx.frame += 1;
    }

    /// Run until the game quits or the frame limit is reached, then hand the
    /// game back
    pub fn run(mut self) -> G {
        if env_logger::try_init().is_err() {
            log::debug!("logger already installed");
        }
        log::info!("Starting engine: {}", self.config.title);

        self.init();

        let pace = self.config.fixed_step().is_none();
        let budget = self.config.frame_budget();
        loop {
            if self.context.should_quit() {
                log::info!("Quit requested, shutting down");
                break;
            }
            if self
                .config
                .max_frames
                .is_some_and(|max| self.context.frame >= max)
            {
                log::info!("Frame limit reached, shutting down");
                break;
            }

            let start = Instant::now();
            self.tick();

            if let (true, Some(budget)) = (pace, budget) {
                let spent = start.elapsed();
                if spent < budget {
                    std::thread::sleep(budget - spent);
                }
            }
        }

        self.game.shutdown(&mut self.context);
        self.game
    }
}
