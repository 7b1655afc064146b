//! CaptionForge Core Engine
//!
//! Core caption pipeline module.
//! Handles transcription, caption layout, rendering, job persistence and the
//! background work queue.

pub mod captions;
pub mod ffmpeg;
pub mod fs;
pub mod jobs;
pub mod pipeline;
pub mod process;
pub mod render;
pub mod settings;
pub mod store;
pub mod transcription;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
