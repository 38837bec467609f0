use anyhow::{Context, Result};
use std::path::PathBuf;

use freescribe::config::Config;
use freescribe::host::{RequestState, SubmitOutcome, TranscriptionHost};
use freescribe::transcription::protocol::{EngineEvent, LoadStatus, TaskParams};
use freescribe::{audio, export, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;
    println!("✓ Config loaded from ~/.freescribe.toml");

    // Initialize telemetry
    telemetry::init(config.telemetry.enabled, &config.telemetry.log_path)?;
    tracing::info!("freescribe starting");
    println!("✓ Telemetry initialized");

    let wav_path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: freescribe <audio.wav>")?;

    let samples = audio::load_wav(&wav_path)?;
    println!("✓ Audio loaded: {}", wav_path.display());

    let mut host = TranscriptionHost::new(&config)?;

    let outcome = host.submit(samples, TaskParams::transcribe(None));
    if outcome != SubmitOutcome::Accepted {
        anyhow::bail!("submission rejected: {outcome:?}");
    }
    println!("✓ Transcription started\n");

    // Drain engine events until the request finishes
    while host.state() != RequestState::Done {
        let Some(event) = host.next_event().await else {
            anyhow::bail!("engine task exited unexpectedly");
        };

        match event {
            EngineEvent::Loading(LoadStatus::Started) => println!("Loading model..."),
            EngineEvent::Loading(LoadStatus::Ready) => println!("Model ready."),
            EngineEvent::Loading(LoadStatus::Failed) => eprintln!("Model load failed."),
            EngineEvent::Downloading(progress) => {
                println!(
                    "Downloading {}: {:.1}% ({}/{} bytes)",
                    progress.file,
                    f64::from(progress.progress) * 100.0,
                    progress.loaded,
                    progress.total
                );
            }
            EngineEvent::Partial(partial) => {
                println!("  [preview @{}s] {}", partial.start, partial.text);
            }
            EngineEvent::Result {
                completed_until, ..
            } => {
                println!("  [transcribed through {completed_until}s]");
            }
            EngineEvent::Done => {}
        }
    }

    if host.load_failed() {
        anyhow::bail!("transcription failed: model could not be loaded");
    }

    let transcript = host.transcript_text();
    println!("\n--- Transcript ---\n{transcript}\n------------------");

    let export_dir = Config::expand_path(&config.export.dir)?;
    let exported = export::export_transcript(&transcript, &export_dir)?;
    println!("✓ Transcript saved to {}", exported.display());

    Ok(())
}
