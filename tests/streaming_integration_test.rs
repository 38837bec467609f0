//! Integration tests for the streaming transcription session:
//! - Host state machine driven by a scripted engine over real channels
//! - Event ordering across a full request lifecycle
//! - End-to-end inference against a real Whisper model
//!
//! Model-dependent tests are marked with #[ignore] as they require a
//! Whisper model file at ~/.freescribe/models/ggml-tiny.bin.
//!
//! Run with: cargo test --test streaming_integration_test -- --ignored

use std::path::PathBuf;

use tokio::sync::mpsc;

use freescribe::host::{RequestState, SubmitOutcome, TranscriptionHost};
use freescribe::transcription::protocol::{
    DecodedSegment, EngineEvent, InferenceRequest, LoadStatus, PartialResult, TaskParams,
};

fn get_test_model_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let path = PathBuf::from(home)
        .join(".freescribe")
        .join("models")
        .join("ggml-tiny.bin");

    if path.exists() {
        Some(path)
    } else {
        None
    }
}

/// Spawns a task that answers every request with a fixed event script.
fn spawn_scripted_engine(script: Vec<EngineEvent>) -> TranscriptionHost {
    let (request_tx, mut request_rx) = mpsc::channel::<InferenceRequest>(1);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while request_rx.recv().await.is_some() {
            for event in script.clone() {
                if event_tx.send(event).is_err() {
                    return;
                }
            }
        }
    });

    TranscriptionHost::from_channels(request_tx, event_rx)
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
async fn test_session_event_ordering_and_final_transcript() {
    let script = vec![
        EngineEvent::Loading(LoadStatus::Started),
        EngineEvent::Loading(LoadStatus::Ready),
        EngineEvent::Partial(PartialResult {
            text: "hel".to_owned(),
            start: 0,
            end: None,
        }),
        EngineEvent::Result {
            segments: vec![segment(0, "hello", 0, 4)],
            is_done: false,
            completed_until: 4,
        },
        EngineEvent::Result {
            segments: vec![segment(0, "hello", 0, 4), segment(1, "world", 4, 8)],
            is_done: false,
            completed_until: 8,
        },
        EngineEvent::Done,
    ];
    let mut host = spawn_scripted_engine(script.clone());

    assert_eq!(
        host.submit(vec![0.0; 16_000], TaskParams::transcribe(None)),
        SubmitOutcome::Accepted
    );

    let mut received = Vec::new();
    while host.state() != RequestState::Done {
        let event = host.next_event().await.expect("engine task died");
        received.push(event);
    }

    // Events arrive in exactly the order the engine emitted them
    assert_eq!(received, script);

    assert_eq!(host.segments().len(), 2);
    assert_eq!(host.transcript_text(), "hello\nworld");
    // The full result supersedes any preview
    assert!(host.partial().is_none());
}

#[tokio::test]
async fn test_single_flight_then_reset_allows_second_request() {
    let mut host = spawn_scripted_engine(vec![
        EngineEvent::Result {
            segments: vec![segment(0, "first", 0, 3)],
            is_done: false,
            completed_until: 3,
        },
        EngineEvent::Done,
    ]);

    assert_eq!(
        host.submit(vec![0.0; 16_000], TaskParams::transcribe(None)),
        SubmitOutcome::Accepted
    );
    // Second submission while busy never reaches the engine
    assert_eq!(
        host.submit(vec![1.0; 16_000], TaskParams::transcribe(None)),
        SubmitOutcome::Busy
    );

    while host.state() != RequestState::Done {
        host.next_event().await.expect("engine task died");
    }
    assert_eq!(host.transcript_text(), "first");

    // Finished requests hold their transcript until explicitly reset
    assert_eq!(
        host.submit(vec![0.0; 16_000], TaskParams::transcribe(None)),
        SubmitOutcome::AwaitingReset
    );
    host.reset();
    assert_eq!(host.state(), RequestState::Idle);
    assert!(host.segments().is_empty());

    assert_eq!(
        host.submit(vec![0.0; 16_000], TaskParams::transcribe(None)),
        SubmitOutcome::Accepted
    );
    while host.state() != RequestState::Done {
        host.next_event().await.expect("engine task died");
    }
    assert_eq!(host.transcript_text(), "first");
}

#[tokio::test]
async fn test_load_failure_is_terminal_but_not_fatal() {
    let mut host = spawn_scripted_engine(vec![
        EngineEvent::Loading(LoadStatus::Started),
        EngineEvent::Loading(LoadStatus::Failed),
        EngineEvent::Done,
    ]);

    host.submit(vec![0.0; 16_000], TaskParams::transcribe(None));
    while host.state() != RequestState::Done {
        host.next_event().await.expect("engine task died");
    }

    assert!(host.load_failed());
    assert!(host.segments().is_empty());

    // The session survives: reset and resubmit work as usual
    host.reset();
    assert!(!host.load_failed());
    assert_eq!(
        host.submit(vec![0.0; 16_000], TaskParams::transcribe(None)),
        SubmitOutcome::Accepted
    );
}

#[tokio::test]
#[ignore] // Requires model file at ~/.freescribe/models/ggml-tiny.bin
async fn test_real_model_end_to_end_silence() {
    use freescribe::config::{Config, EngineConfig, ExportConfig, ModelConfig, TelemetryConfig};

    let Some(model_path) = get_test_model_path() else {
        eprintln!("Skipping: no model at ~/.freescribe/models/ggml-tiny.bin");
        return;
    };

    let config = Config {
        model: ModelConfig {
            name: "tiny".to_owned(),
            path: model_path.to_string_lossy().into_owned(),
            threads: 4,
            beam_size: 1,
            auto_download: false,
        },
        engine: EngineConfig {
            chunk_length_secs: 30.0,
            stride_length_secs: 5.0,
        },
        export: ExportConfig {
            dir: "/tmp".to_owned(),
        },
        telemetry: TelemetryConfig {
            enabled: false,
            log_path: String::new(),
        },
    };

    let mut host = TranscriptionHost::new(&config).expect("failed to spawn engine");

    // 65 seconds of silence → three chunk windows
    assert_eq!(
        host.submit(vec![0.0; 65 * 16_000], TaskParams::transcribe(Some("en".to_owned()))),
        SubmitOutcome::Accepted
    );

    let mut results = 0;
    while host.state() != RequestState::Done {
        match host.next_event().await.expect("engine task died") {
            EngineEvent::Result { is_done, .. } => {
                assert!(!is_done);
                results += 1;
            }
            EngineEvent::Loading(LoadStatus::Failed) => panic!("model load failed"),
            _ => {}
        }
    }

    assert_eq!(results, 3, "one result per completed chunk window");
    assert!(!host.load_failed());

    // Silence should produce empty or minimal text
    assert!(
        host.transcript_text().len() < 100,
        "expected minimal output for silence"
    );
}

#[test]
fn test_streaming_module_exports() {
    // Verify the session-facing modules are accessible
    use freescribe::audio;
    use freescribe::transcription::ModelManager;

    // Type checks (compile-time verification)
    let _: fn(&std::path::Path) -> anyhow::Result<Vec<f32>> = audio::load_wav;

    fn _assert_send_sync<T: Send + Sync>() {}
    _assert_send_sync::<ModelManager>();
    _assert_send_sync::<EngineEvent>();
}
