//! Message vocabulary exchanged between the host and the engine task.
//!
//! This is the wire contract: any engine that wants to be interchangeable
//! with the transcription engine (e.g. a translation engine) must emit the
//! same [`EngineEvent`] shapes in the same order — zero or more
//! `Loading`/`Downloading`, then interleaved `Result`/`Partial`, then exactly
//! one terminal `Done`.

use serde::{Deserialize, Serialize};

/// Sentinel used by language pickers when nothing has been chosen yet.
pub const NO_LANGUAGE_SELECTED: &str = "Select language";

/// Inference task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    /// Transcribe audio in its source language.
    Transcribe,
    /// Transcribe and translate into a target language.
    Translate,
}

/// Task-specific request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    /// What to do with the audio.
    pub task: Task,
    /// Source language hint (None = auto-detect).
    pub source_language: Option<String>,
    /// Target language for translation tasks.
    pub target_language: Option<String>,
}

impl TaskParams {
    /// Parameters for a plain transcription request.
    #[must_use]
    pub const fn transcribe(source_language: Option<String>) -> Self {
        Self {
            task: Task::Transcribe,
            source_language,
            target_language: None,
        }
    }

    /// Parameters for a translation request.
    #[must_use]
    pub const fn translate(source_language: Option<String>, target_language: String) -> Self {
        Self {
            task: Task::Translate,
            source_language,
            target_language: Some(target_language),
        }
    }

    /// Whether the target language requirement (if any) is satisfied.
    ///
    /// A translation request with no target, or with the picker sentinel
    /// still in place, is not submittable.
    #[must_use]
    pub fn has_required_target(&self) -> bool {
        match self.task {
            Task::Transcribe => true,
            Task::Translate => self
                .target_language
                .as_deref()
                .is_some_and(|lang| !lang.is_empty() && lang != NO_LANGUAGE_SELECTED),
        }
    }
}

/// One inference request, Host → Engine.
///
/// The audio buffer is immutable once submitted; ownership moves to the
/// engine for the duration of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// 16 kHz mono f32 samples.
    pub audio: Vec<f32>,
    /// Task parameters.
    pub params: TaskParams,
}

/// Model load phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    /// Load has begun (or a cached instance is being fetched).
    Started,
    /// Model is live and inference is about to start.
    Ready,
    /// Load failed; a terminal `Done` follows and the request is abandoned.
    Failed,
}

/// Byte-level weight download progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// File being downloaded.
    pub file: String,
    /// Fractional progress in 0.0..=1.0 (0.0 when total is unknown).
    pub progress: f32,
    /// Bytes downloaded so far.
    pub loaded: u64,
    /// Total bytes, 0 when the server did not report a length.
    pub total: u64,
}

/// Externally visible transcript unit, timestamped in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedSegment {
    /// Ordinal position within the transcript.
    pub index: usize,
    /// Segment text, trimmed.
    pub text: String,
    /// Start, rounded to whole seconds.
    pub start: u32,
    /// End, rounded to whole seconds (heuristic when unresolved).
    pub end: u32,
}

/// Low-fidelity, high-frequency preview of the current best decoding guess.
///
/// Never persisted; only emitted. `start` is the end of the last reconciled
/// segment (0 before the first chunk completes); `end` is never known at
/// preview time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialResult {
    /// Best beam's decoded text so far.
    pub text: String,
    /// Timestamp the preview continues from.
    pub start: u32,
    /// Unknown during active decoding.
    pub end: Option<u32>,
}

/// One candidate decoding hypothesis, ordered best-first by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
    /// Decoded text for this hypothesis (special tokens skipped).
    pub text: String,
    /// Model score; higher is better.
    pub score: f32,
}

/// Events flowing Engine → Host, in order, for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Model load phase changed.
    Loading(LoadStatus),
    /// Weight download progressed.
    Downloading(DownloadProgress),
    /// Full recomputed transcript after a completed chunk.
    Result {
        /// The entire transcript so far, recomputed from scratch.
        segments: Vec<DecodedSegment>,
        /// Always false for chunk results; reserved by the wire contract.
        is_done: bool,
        /// Timestamp up to which the transcript is settled.
        completed_until: u32,
    },
    /// Throttled preview during active decoding.
    Partial(PartialResult),
    /// Terminal: the request is fully complete.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcribe_params_never_require_target() {
        let params = TaskParams::transcribe(None);
        assert!(params.has_required_target());
    }

    #[test]
    fn test_translate_params_require_target() {
        let params = TaskParams {
            task: Task::Translate,
            source_language: None,
            target_language: None,
        };
        assert!(!params.has_required_target());
    }

    #[test]
    fn test_translate_sentinel_is_no_selection() {
        let params = TaskParams::translate(None, NO_LANGUAGE_SELECTED.to_owned());
        assert!(!params.has_required_target());

        let params = TaskParams::translate(None, String::new());
        assert!(!params.has_required_target());

        let params = TaskParams::translate(Some("es".to_owned()), "en".to_owned());
        assert!(params.has_required_target());
    }

    #[test]
    fn test_engine_event_round_trips_through_serde() {
        let event = EngineEvent::Result {
            segments: vec![DecodedSegment {
                index: 0,
                text: "hello".to_owned(),
                start: 0,
                end: 4,
            }],
            is_done: false,
            completed_until: 4,
        };

        let encoded = toml::to_string(&event).unwrap();
        let decoded: EngineEvent = toml::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }
}
