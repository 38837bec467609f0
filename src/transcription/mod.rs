/// Model download and management
pub mod download;
/// Whisper model loading and chunk inference
pub mod model;
/// Message vocabulary between host and engine
pub mod protocol;
/// Streaming transcript assembly and partial previews
pub mod tracker;
/// Background engine task and chunk scheduling
pub mod worker;

pub use download::ensure_model_downloaded;
pub use model::{ModelError, ModelManager};
pub use protocol::{EngineEvent, InferenceRequest, TaskParams};
pub use worker::spawn_engine;
