//! Freescribe - streaming speech transcription
//!
//! This library exports core modules for testing and potential future reuse.

/// WAV ingestion and normalization
pub mod audio;
/// Configuration management
pub mod config;
/// Transcript export to plain text files
pub mod export;
/// Host-side session state and event application
pub mod host;
/// Telemetry and crash logging
pub mod telemetry;
/// Whisper transcription engine
pub mod transcription;
