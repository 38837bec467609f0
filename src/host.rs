//! Host-side orchestration: owns the engine task's lifetime and the
//! single-outstanding-request state machine the rest of the application sees.
//!
//! The host never blocks: submission is fire-and-forget and results arrive
//! as asynchronous messages. No memory is shared with the engine; everything
//! crosses the two channels as copies.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transcription::protocol::{
    DecodedSegment, DownloadProgress, EngineEvent, InferenceRequest, LoadStatus, PartialResult,
    TaskParams,
};
use crate::transcription::worker;

/// Request state machine
///
/// idle → (submit) → busy → (terminal message) → done → (reset) → idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// No request outstanding; submission allowed.
    Idle,
    /// One request in flight; submission is a no-op.
    Busy,
    /// Last request completed; `reset` returns to Idle.
    Done,
}

/// Result of a submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Request was handed to the engine.
    Accepted,
    /// A request is already in flight; nothing was sent.
    Busy,
    /// Previous request finished but was not reset; nothing was sent.
    AwaitingReset,
    /// Required target language is unset; nothing was sent.
    MissingTargetLanguage,
}

/// Orchestrates one engine task and exposes its latest output
///
/// Created once per session; the engine task persists across UI state
/// changes. The host owns the single event receiver, so exactly one listener
/// is registered at a time and dropping the host deregisters it.
pub struct TranscriptionHost {
    requests: mpsc::Sender<InferenceRequest>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    state: RequestState,
    segments: Vec<DecodedSegment>,
    partial: Option<PartialResult>,
    download: Option<DownloadProgress>,
    load_failed: bool,
}

impl TranscriptionHost {
    /// Spawns the engine task and wires it to a new host
    ///
    /// # Errors
    /// Returns error if the configured model path cannot be resolved
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let (requests, events) = worker::spawn_engine(config)?;
        Ok(Self::from_channels(requests, events))
    }

    /// Builds a host over an existing channel pair
    ///
    /// Any engine that satisfies the event vocabulary can sit on the other
    /// end; a translation engine is driven exactly like the transcription
    /// engine.
    #[must_use]
    pub fn from_channels(
        requests: mpsc::Sender<InferenceRequest>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        Self {
            requests,
            events,
            state: RequestState::Idle,
            segments: Vec::new(),
            partial: None,
            download: None,
            load_failed: false,
        }
    }

    /// Current request state
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Latest full transcript segments
    #[must_use]
    pub fn segments(&self) -> &[DecodedSegment] {
        &self.segments
    }

    /// Latest throttled preview, cleared whenever a full result lands
    #[must_use]
    pub const fn partial(&self) -> Option<&PartialResult> {
        self.partial.as_ref()
    }

    /// Latest weight download progress, if any was reported
    #[must_use]
    pub const fn download_progress(&self) -> Option<&DownloadProgress> {
        self.download.as_ref()
    }

    /// Whether the last request died on a model load failure
    #[must_use]
    pub const fn load_failed(&self) -> bool {
        self.load_failed
    }

    /// Submits an inference request
    ///
    /// A no-op (no message reaches the engine, state is unchanged) while a
    /// request is in flight, while a finished request awaits [`Self::reset`],
    /// or when a translation task has no usable target language.
    pub fn submit(&mut self, audio: Vec<f32>, params: TaskParams) -> SubmitOutcome {
        match self.state {
            RequestState::Busy => {
                debug!("submit ignored: request already in flight");
                return SubmitOutcome::Busy;
            }
            RequestState::Done => {
                debug!("submit ignored: previous request awaits reset");
                return SubmitOutcome::AwaitingReset;
            }
            RequestState::Idle => {}
        }

        if !params.has_required_target() {
            debug!("submit ignored: no target language selected");
            return SubmitOutcome::MissingTargetLanguage;
        }

        info!(samples = audio.len(), task = ?params.task, "submitting inference request");

        if let Err(e) = self.requests.try_send(InferenceRequest { audio, params }) {
            // Channel full or engine gone; either way nothing was submitted
            warn!(error = %e, "failed to hand request to engine");
            return SubmitOutcome::Busy;
        }

        self.segments.clear();
        self.partial = None;
        self.download = None;
        self.load_failed = false;
        self.state = RequestState::Busy;
        SubmitOutcome::Accepted
    }

    /// Receives the next engine event, applies it, and returns it
    ///
    /// Returns None once the engine task is gone and the channel is drained.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        let event = self.events.recv().await?;
        self.apply(&event);
        Some(event)
    }

    /// Non-blocking variant of [`Self::next_event`] for polling callers
    pub fn try_next_event(&mut self) -> Option<EngineEvent> {
        let event = self.events.try_recv().ok()?;
        self.apply(&event);
        Some(event)
    }

    /// Explicit done → idle transition, clearing the finished request's state
    ///
    /// A no-op while a request is in flight.
    pub fn reset(&mut self) {
        match self.state {
            RequestState::Done => {
                debug!("resetting: Done → Idle");
                self.state = RequestState::Idle;
                self.segments.clear();
                self.partial = None;
                self.download = None;
                self.load_failed = false;
            }
            RequestState::Busy => {
                debug!("reset ignored while busy");
            }
            RequestState::Idle => {}
        }
    }

    /// Renders the current transcript as plain text, one segment per line
    #[must_use]
    pub fn transcript_text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn apply(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Loading(status) => {
                debug!(status = ?status, "model load phase changed");
                if *status == LoadStatus::Failed {
                    self.load_failed = true;
                }
            }
            EngineEvent::Downloading(progress) => {
                self.download = Some(progress.clone());
            }
            EngineEvent::Result { segments, .. } => {
                // Wholesale replacement: the engine recomputes from scratch
                self.segments = segments.clone();
                self.partial = None;
            }
            EngineEvent::Partial(partial) => {
                self.partial = Some(partial.clone());
            }
            EngineEvent::Done => {
                info!(segments = self.segments.len(), "request complete");
                self.state = RequestState::Done;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::protocol::NO_LANGUAGE_SELECTED;

    fn scripted_host() -> (
        TranscriptionHost,
        mpsc::Receiver<InferenceRequest>,
        mpsc::UnboundedSender<EngineEvent>,
    ) {
        // Depth 2 so a resubmit after reset is not rejected just because the
        // scripted receiver never drains the first request.
        let (request_tx, request_rx) = mpsc::channel(2);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            TranscriptionHost::from_channels(request_tx, event_rx),
            request_rx,
            event_tx,
        )
    }

    fn segment(index: usize, text: &str, start: u32, end: u32) -> DecodedSegment {
        DecodedSegment {
            index,
            text: text.to_owned(),
            start,
            end,
        }
    }

    #[tokio::test]
    async fn test_submit_sends_exactly_one_request() {
        let (mut host, mut requests, _events) = scripted_host();

        let outcome = host.submit(vec![0.0; 100], TaskParams::transcribe(None));
        assert_eq!(outcome, SubmitOutcome::Accepted);
        assert_eq!(host.state(), RequestState::Busy);

        assert!(requests.try_recv().is_ok());
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_submit_while_busy_is_noop() {
        let (mut host, mut requests, _events) = scripted_host();

        assert_eq!(
            host.submit(vec![0.0; 100], TaskParams::transcribe(None)),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            host.submit(vec![1.0; 100], TaskParams::transcribe(None)),
            SubmitOutcome::Busy
        );

        // Exactly one message crossed the channel, carrying the first audio
        let request = requests.try_recv().unwrap();
        assert!((request.audio[0] - 0.0).abs() < f32::EPSILON);
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_target_language_guard() {
        let (mut host, mut requests, _events) = scripted_host();

        let params = TaskParams::translate(None, NO_LANGUAGE_SELECTED.to_owned());
        assert_eq!(
            host.submit(vec![0.0; 100], params),
            SubmitOutcome::MissingTargetLanguage
        );

        // Never left idle, never sent a message
        assert_eq!(host.state(), RequestState::Idle);
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_translate_with_target_is_accepted() {
        let (mut host, _requests, _events) = scripted_host();

        let params = TaskParams::translate(Some("es".to_owned()), "en".to_owned());
        assert_eq!(host.submit(vec![0.0; 100], params), SubmitOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_events_update_exposed_state() {
        let (mut host, _requests, events) = scripted_host();
        host.submit(vec![0.0; 100], TaskParams::transcribe(None));

        events
            .send(EngineEvent::Loading(LoadStatus::Started))
            .unwrap();
        events
            .send(EngineEvent::Partial(PartialResult {
                text: "hel".to_owned(),
                start: 0,
                end: None,
            }))
            .unwrap();
        events
            .send(EngineEvent::Result {
                segments: vec![segment(0, "hello world", 0, 5)],
                is_done: false,
                completed_until: 5,
            })
            .unwrap();
        events.send(EngineEvent::Done).unwrap();

        while let Some(event) = host.next_event().await {
            if event == EngineEvent::Done {
                break;
            }
        }

        assert_eq!(host.state(), RequestState::Done);
        assert_eq!(host.segments().len(), 1);
        assert_eq!(host.transcript_text(), "hello world");
        // Full result supersedes the preview
        assert!(host.partial().is_none());
    }

    #[tokio::test]
    async fn test_partial_is_exposed_until_next_result() {
        let (mut host, _requests, events) = scripted_host();
        host.submit(vec![0.0; 100], TaskParams::transcribe(None));

        events
            .send(EngineEvent::Partial(PartialResult {
                text: "in progress".to_owned(),
                start: 0,
                end: None,
            }))
            .unwrap();

        host.next_event().await.unwrap();
        assert_eq!(host.partial().unwrap().text, "in progress");
    }

    #[tokio::test]
    async fn test_done_requires_reset_before_resubmit() {
        let (mut host, _requests, events) = scripted_host();
        host.submit(vec![0.0; 100], TaskParams::transcribe(None));

        events.send(EngineEvent::Done).unwrap();
        host.next_event().await.unwrap();
        assert_eq!(host.state(), RequestState::Done);

        assert_eq!(
            host.submit(vec![0.0; 100], TaskParams::transcribe(None)),
            SubmitOutcome::AwaitingReset
        );

        host.reset();
        assert_eq!(host.state(), RequestState::Idle);
        assert!(host.segments().is_empty());

        assert_eq!(
            host.submit(vec![0.0; 100], TaskParams::transcribe(None)),
            SubmitOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn test_reset_while_busy_is_noop() {
        let (mut host, _requests, _events) = scripted_host();
        host.submit(vec![0.0; 100], TaskParams::transcribe(None));

        host.reset();
        assert_eq!(host.state(), RequestState::Busy);
    }

    #[tokio::test]
    async fn test_load_failure_surfaces_and_terminates() {
        let (mut host, _requests, events) = scripted_host();
        host.submit(vec![0.0; 100], TaskParams::transcribe(None));

        events
            .send(EngineEvent::Loading(LoadStatus::Failed))
            .unwrap();
        events.send(EngineEvent::Done).unwrap();

        host.next_event().await.unwrap();
        host.next_event().await.unwrap();

        // Degraded but terminal: not stuck busy, and the failure is visible
        assert_eq!(host.state(), RequestState::Done);
        assert!(host.load_failed());
    }

    #[tokio::test]
    async fn test_try_next_event_on_empty_channel() {
        let (mut host, _requests, _events) = scripted_host();
        assert!(host.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_download_progress_is_exposed() {
        let (mut host, _requests, events) = scripted_host();
        host.submit(vec![0.0; 100], TaskParams::transcribe(None));

        events
            .send(EngineEvent::Downloading(DownloadProgress {
                file: "ggml-tiny.bin".to_owned(),
                progress: 0.5,
                loaded: 50,
                total: 100,
            }))
            .unwrap();

        host.next_event().await.unwrap();
        let progress = host.download_progress().unwrap();
        assert_eq!(progress.file, "ggml-tiny.bin");
        assert_eq!(progress.loaded, 50);
    }
}
