//! Chunk reconciliation: turns a growing list of raw per-chunk model output
//! into one coherent, timestamped transcript, and throttles noisy
//! intermediate output.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::protocol::{Beam, DecodedSegment, EngineEvent, PartialResult};

/// How many decoding-step callbacks are dropped for every preview emitted.
const PARTIAL_EMIT_INTERVAL: u64 = 10;

/// Fraction of the stride used to estimate the end of a segment whose true
/// end the decoder has not resolved yet.
const UNRESOLVED_END_STRIDE_FACTOR: f32 = 0.9;

/// One unit of model output for a fixed-length audio chunk.
///
/// Token ids include Whisper timestamp tokens; positions are scaled into
/// seconds by the tracker's time precision at decode time. Accumulated for
/// the lifetime of one request, discarded when it completes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    /// Absolute start of this audio chunk within the source, in seconds.
    pub offset_secs: f32,
    /// Token ids produced for the chunk, in generation order.
    pub tokens: Vec<i32>,
}

/// A decoded segment before rounding and end-fallback post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    /// Segment text (may carry surrounding whitespace).
    pub text: String,
    /// Start in seconds.
    pub start: f32,
    /// End in seconds, None when the decoder could not resolve it.
    pub end: Option<f32>,
}

/// Decodes accumulated raw chunks into timestamped segments.
///
/// The production implementation is backed by the Whisper tokenizer; tests
/// use `MockTranscriptDecoder` (via `mockall`).
#[cfg_attr(test, mockall::automock)]
pub trait TranscriptDecoder: Send + Sync {
    /// Re-decode the entire chunk list into raw segments, scaling token
    /// positions into seconds with `time_precision`.
    fn decode_transcript(&self, chunks: &[RawChunk], time_precision: f32) -> Vec<RawSegment>;
}

/// Tracks one request's generation progress.
///
/// Owns the append-only [`RawChunk`] list and re-decodes it in full every
/// time a chunk completes; the decoded segment list is derived state, never
/// merged incrementally.
pub struct GenerationTracker {
    decoder: Arc<dyn TranscriptDecoder>,
    events: mpsc::UnboundedSender<EngineEvent>,
    stride_length_secs: f32,
    time_precision: f32,
    chunks: Vec<RawChunk>,
    processed: Vec<DecodedSegment>,
    step_counter: u64,
}

impl GenerationTracker {
    /// Creates a tracker for one inference request.
    pub fn new(
        decoder: Arc<dyn TranscriptDecoder>,
        events: mpsc::UnboundedSender<EngineEvent>,
        stride_length_secs: f32,
        time_precision: f32,
    ) -> Self {
        Self {
            decoder,
            events,
            stride_length_secs,
            time_precision,
            chunks: Vec::new(),
            processed: Vec::new(),
            step_counter: 0,
        }
    }

    /// Handles one decoding-step callback across all active beams.
    ///
    /// Only every 10th invocation emits a [`PartialResult`]; the rest are
    /// dropped to bound message volume during chatty incremental decoding.
    pub fn on_partial_guess(&mut self, beams: &[Beam]) {
        self.step_counter += 1;
        if self.step_counter % PARTIAL_EMIT_INTERVAL != 0 {
            return;
        }

        // Beams arrive ordered best-first; only the top hypothesis is shown.
        let Some(best) = beams.first() else {
            debug!("decoding step carried no beams, skipping preview");
            return;
        };

        self.emit(EngineEvent::Partial(PartialResult {
            text: best.text.clone(),
            start: self.last_timestamp(),
            end: None,
        }));
    }

    /// Handles one completed audio chunk.
    ///
    /// Appends the chunk, re-decodes the entire accumulated list from
    /// scratch, post-processes timestamps, and emits the full recomputed
    /// transcript as a non-terminal result.
    pub fn on_chunk_complete(&mut self, chunk: RawChunk) {
        self.chunks.push(chunk);

        let raw = self
            .decoder
            .decode_transcript(&self.chunks, self.time_precision);

        self.processed = raw
            .into_iter()
            .enumerate()
            .map(|(index, segment)| self.process_segment(index, segment))
            .collect();

        debug!(
            chunks = self.chunks.len(),
            segments = self.processed.len(),
            "chunk reconciled"
        );

        self.emit(EngineEvent::Result {
            segments: self.processed.clone(),
            is_done: false,
            completed_until: self.last_timestamp(),
        });
    }

    /// Emits the terminal completion signal.
    pub fn finish(&self) {
        self.emit(EngineEvent::Done);
    }

    /// Timestamp the transcript is settled up to: the rounded end of the
    /// last decoded segment, or 0 before the first chunk completes.
    fn last_timestamp(&self) -> u32 {
        self.processed.last().map_or(0, |segment| segment.end)
    }

    fn process_segment(&self, index: usize, raw: RawSegment) -> DecodedSegment {
        let end = raw.end.map_or_else(
            || {
                // The decoder never saw a closing timestamp for this segment
                // (typically the tail of the newest chunk); estimate from the
                // stride overlap.
                round_secs(raw.start + UNRESOLVED_END_STRIDE_FACTOR * self.stride_length_secs)
            },
            round_secs,
        );

        DecodedSegment {
            index,
            text: raw.text.trim().to_owned(),
            start: round_secs(raw.start),
            end,
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            // Receiver side went away; nothing useful to do with the event.
            warn!("event channel closed, dropping engine event");
        }
    }
}

/// Rounds a timestamp to whole seconds, clamping negatives to 0.
// Timestamps fit comfortably in u32 (136 years of audio).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_secs(secs: f32) -> u32 {
    secs.round().max(0.0) as u32
}
