//! The background engine task: consumes inference requests from the host,
//! drives chunked inference, and streams events back. One request is
//! processed at a time; the host enforces single-flight submission.

use std::ops::Range;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::model::{ModelError, ModelManager, WhisperModel};
use super::protocol::{EngineEvent, InferenceRequest, LoadStatus};
use super::tracker::{GenerationTracker, TranscriptDecoder};
use crate::config::{Config, EngineConfig};

/// Sample rate the engine expects for submitted audio.
pub const SAMPLE_RATE: u32 = 16_000;

/// Depth of the request channel; the host never has more than one request
/// in flight.
const REQUEST_CHANNEL_DEPTH: usize = 1;

/// Spawns the engine task and returns its channel pair.
///
/// The task lives for the whole session: it loops over requests until the
/// request sender is dropped. Events are delivered in order per request:
/// `Loading`/`Downloading` first, then interleaved `Result`/`Partial`, then
/// exactly one terminal `Done` — even when loading or inference fails.
///
/// # Errors
/// Returns error if the configured model path cannot be resolved
pub fn spawn_engine(
    config: &Config,
) -> anyhow::Result<(
    mpsc::Sender<InferenceRequest>,
    mpsc::UnboundedReceiver<EngineEvent>,
)> {
    let manager = ModelManager::new(&config.model)?;
    let engine = config.engine.clone();

    let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_DEPTH);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(run(manager, engine, request_rx, event_tx));

    Ok((request_tx, event_rx))
}

async fn run(
    manager: ModelManager,
    engine: EngineConfig,
    mut requests: mpsc::Receiver<InferenceRequest>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    info!("transcription engine task started");

    while let Some(request) = requests.recv().await {
        handle_request(&manager, &engine, request, &events).await;
    }

    info!("request channel closed, engine task exiting");
}

async fn handle_request(
    manager: &ModelManager,
    engine: &EngineConfig,
    request: InferenceRequest,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    info!(
        samples = request.audio.len(),
        task = ?request.params.task,
        "inference request received"
    );

    send(events, EngineEvent::Loading(LoadStatus::Started));

    let progress_events = events.clone();
    let model = match manager
        .get_or_load(move |progress| {
            let _ = progress_events.send(EngineEvent::Downloading(progress));
        })
        .await
    {
        Ok(model) => model,
        Err(e) => {
            // The request must still reach a terminal state; running
            // inference against a missing instance is not an option
            error!(error = %e, "model load failed, abandoning request");
            send(events, EngineEvent::Loading(LoadStatus::Failed));
            send(events, EngineEvent::Done);
            return;
        }
    };
    send(events, EngineEvent::Loading(LoadStatus::Ready));

    let time_precision = match model.time_precision(engine.chunk_length_secs) {
        Ok(precision) => precision,
        Err(e) => {
            error!(error = %e, "failed to derive time precision");
            send(events, EngineEvent::Done);
            return;
        }
    };

    let tracker = Arc::new(Mutex::new(GenerationTracker::new(
        Arc::clone(&model) as Arc<dyn TranscriptDecoder>,
        events.clone(),
        engine.stride_length_secs,
        time_precision,
    )));

    let result = run_inference(
        Arc::clone(&model),
        Arc::clone(&tracker),
        request,
        engine.chunk_length_secs,
        engine.stride_length_secs,
    )
    .await;

    match result {
        Ok(()) => {
            match tracker.lock() {
                Ok(tracker) => tracker.finish(),
                // Poisoned tracker can no longer emit; close out directly
                Err(_) => send(events, EngineEvent::Done),
            }
            info!("inference request complete");
        }
        Err(e) => {
            error!(error = %e, "inference failed mid-request");
            send(events, EngineEvent::Done);
        }
    }
}

/// Runs the blocking chunk loop on the blocking pool.
async fn run_inference(
    model: Arc<WhisperModel>,
    tracker: Arc<Mutex<GenerationTracker>>,
    request: InferenceRequest,
    chunk_length_secs: f32,
    stride_length_secs: f32,
) -> Result<(), ModelError> {
    let InferenceRequest { audio, params } = request;

    tokio::task::spawn_blocking(move || {
        let windows = chunk_windows(audio.len(), chunk_length_secs, stride_length_secs, SAMPLE_RATE);
        info!(windows = windows.len(), "audio split into chunk windows");

        for window in windows {
            let step_tracker = Arc::clone(&tracker);
            let chunk = model.transcribe_chunk(
                &audio[window.range.clone()],
                window.offset_secs(),
                &params,
                move |beams| {
                    if let Ok(mut tracker) = step_tracker.lock() {
                        tracker.on_partial_guess(beams);
                    }
                },
            )?;

            tracker
                .lock()
                .map_err(|e| ModelError::Inference(anyhow!("tracker mutex poisoned: {e}")))?
                .on_chunk_complete(chunk);
        }

        Ok(())
    })
    .await?
}

fn send(events: &mpsc::UnboundedSender<EngineEvent>, event: EngineEvent) {
    if events.send(event).is_err() {
        warn!("event channel closed, dropping engine event");
    }
}

/// One fixed-length audio window, overlapping its neighbors by the stride.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkWindow {
    /// Sample range within the source buffer.
    range: Range<usize>,
    /// Window start in samples; seconds are derived on demand.
    offset_samples: usize,
}

impl ChunkWindow {
    #[allow(clippy::cast_precision_loss)]
    fn offset_secs(&self) -> f32 {
        self.offset_samples as f32 / SAMPLE_RATE as f32
    }
}

/// Splits audio into overlapping windows: `chunk_length` seconds each,
/// advancing by `chunk_length - stride` so consecutive windows overlap by
/// the stride. A trailing window that would add nothing beyond the overlap
/// is skipped.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn chunk_windows(
    total_samples: usize,
    chunk_length_secs: f32,
    stride_length_secs: f32,
    sample_rate: u32,
) -> Vec<ChunkWindow> {
    let chunk = (chunk_length_secs * sample_rate as f32) as usize;
    let stride = (stride_length_secs * sample_rate as f32) as usize;
    let hop = chunk.saturating_sub(stride).max(1);

    let mut windows = Vec::new();
    let mut start = 0_usize;
    while start < total_samples {
        if start > 0 && start + stride >= total_samples {
            // Remaining audio is entirely inside the previous window
            break;
        }
        let end = (start + chunk).min(total_samples);
        windows.push(ChunkWindow {
            range: start..end,
            offset_samples: start,
        });
        if end == total_samples {
            break;
        }
        start += hop;
    }
    windows
}
