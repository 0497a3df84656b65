//! Core engine module
//!
//! Contains the headless game loop, frame timing, the event queue and
//! timing statistics

pub mod debug;
mod engine;
mod events;
mod time;

pub use debug::{FrameStats, ProcessorTimings, TimingStats};
pub use engine::{Engine, EngineConfig, EngineContext, EngineError, Game};
pub use events::EventQueue;
pub use time::{GameTime, RenderContext};
