//! Model lifecycle: lazy, single-flight loading of the Whisper model and the
//! inference calls driven against it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use whisper_rs::{
    FullParams, SamplingStrategy, SegmentCallbackData, WhisperContext, WhisperContextParameters,
};

use super::download;
use super::protocol::{Beam, DownloadProgress, Task, TaskParams};
use super::tracker::{RawChunk, RawSegment, TranscriptDecoder};
use crate::config::ModelConfig;

/// Errors that can occur while loading or running the model
#[derive(Debug, Error)]
pub enum ModelError {
    /// Model file is missing and auto-download is disabled
    #[error("model file not found at {path} (auto_download disabled)")]
    NotFound {
        /// Expected path to the model file
        path: String,
    },

    /// Failed to fetch model weights
    #[error("failed to download model weights")]
    Download(#[source] anyhow::Error),

    /// Failed to load Whisper model
    #[error("failed to load whisper model from {path}: {source}")]
    ModelLoad {
        /// Path to model file
        path: String,
        /// Underlying error
        source: anyhow::Error,
    },

    /// Failed to create Whisper inference state
    #[error("failed to create whisper state")]
    StateCreation,

    /// Inference failed mid-request
    #[error("whisper inference failed")]
    Inference(#[source] anyhow::Error),

    /// Background load task was cancelled or panicked
    #[error("model load task failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Loaded Whisper model plus its inference parameters
///
/// One live instance exists per engine at most; it is confined to the engine
/// task and accessed sequentially, one request at a time.
pub struct WhisperModel {
    /// Whisper context (access serialized through the mutex)
    ctx: Mutex<WhisperContext>,
    /// Number of CPU threads for inference
    threads: i32,
    /// Beam search width
    beam_size: i32,
}

impl WhisperModel {
    /// Determines sampling strategy based on beam size (pure, testable)
    const fn get_sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }

    /// Loads the model from the given path
    ///
    /// # Errors
    /// Returns error if the model file doesn't exist, is invalid, or if
    /// `threads`/`beam_size` are 0 or exceed `i32::MAX`
    pub fn load(model_path: &Path, threads: usize, beam_size: usize) -> Result<Self, ModelError> {
        if threads == 0 {
            return Err(ModelError::ModelLoad {
                path: model_path.display().to_string(),
                source: anyhow!("threads must be > 0"),
            });
        }
        if beam_size == 0 {
            return Err(ModelError::ModelLoad {
                path: model_path.display().to_string(),
                source: anyhow!("beam_size must be > 0"),
            });
        }

        let threads_i32 = i32::try_from(threads).map_err(|_| ModelError::ModelLoad {
            path: model_path.display().to_string(),
            source: anyhow!("threads value too large (max: {})", i32::MAX),
        })?;
        let beam_size_i32 = i32::try_from(beam_size).map_err(|_| ModelError::ModelLoad {
            path: model_path.display().to_string(),
            source: anyhow!("beam_size value too large (max: {})", i32::MAX),
        })?;

        info!(
            path = %model_path.display(),
            threads = threads,
            beam_size = beam_size,
            "loading whisper model"
        );

        let path_str = model_path.to_str().ok_or_else(|| ModelError::ModelLoad {
            path: model_path.display().to_string(),
            source: anyhow!("model path contains invalid UTF-8"),
        })?;

        let params = WhisperContextParameters::default();
        let ctx =
            WhisperContext::new_with_params(path_str, params).map_err(|e| ModelError::ModelLoad {
                path: model_path.display().to_string(),
                source: anyhow!("{e:?}"),
            })?;

        info!("whisper model loaded successfully");

        Ok(Self {
            ctx: Mutex::new(ctx),
            threads: threads_i32,
            beam_size: beam_size_i32,
        })
    }

    /// Seconds per raw token-position unit: the feature extractor's chunk
    /// length divided by the model's maximum source position count.
    ///
    /// # Errors
    /// Returns error if the context mutex is poisoned
    pub fn time_precision(&self, chunk_length_secs: f32) -> Result<f32, ModelError> {
        let ctx = self
            .ctx
            .lock()
            .map_err(|e| ModelError::Inference(anyhow!("mutex poisoned: {e}")))?;
        // n_audio_ctx is 1500 for 30s windows, giving the usual 0.02s units
        #[allow(clippy::cast_precision_loss)]
        Ok(chunk_length_secs / ctx.model_n_audio_ctx() as f32)
    }

    /// Runs one inference pass over a single audio chunk (16 kHz mono f32)
    ///
    /// `on_step` fires once per decoding step with the active hypotheses,
    /// ordered best-first. Returns the chunk's raw token output for later
    /// reconciliation. Blocking; run under `spawn_blocking`.
    ///
    /// # Errors
    /// Returns error if Whisper inference fails or the mutex is poisoned
    pub fn transcribe_chunk(
        &self,
        samples: &[f32],
        offset_secs: f32,
        task_params: &TaskParams,
        mut on_step: impl FnMut(&[Beam]) + Send + 'static,
    ) -> Result<RawChunk, ModelError> {
        let _span = tracing::debug_span!(
            "transcribe_chunk",
            samples = samples.len(),
            offset_secs = f64::from(offset_secs)
        )
        .entered();
        debug!("starting chunk inference");

        let mut state = self
            .ctx
            .lock()
            .map_err(|e| ModelError::Inference(anyhow!("mutex poisoned: {e}")))?
            .create_state()
            .map_err(|_| ModelError::StateCreation)?;

        let strategy = Self::get_sampling_strategy(self.beam_size);
        let mut params = FullParams::new(strategy);
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(task_params.source_language.as_deref());
        params.set_translate(task_params.task == Task::Translate);
        params.set_token_timestamps(true);

        // The runtime surfaces one finished hypothesis per decoding step
        params.set_segment_callback_safe(move |data: SegmentCallbackData| {
            let beams = [Beam {
                text: data.text,
                score: 0.0,
            }];
            on_step(&beams);
        });

        let start = std::time::Instant::now();
        state
            .full(params, samples)
            .map_err(|e| ModelError::Inference(anyhow!("{e:?}")))?;
        let inference_duration = start.elapsed();

        // Collect raw token ids (timestamp tokens included) for reconciliation
        let mut tokens = Vec::new();
        let num_segments = state.full_n_segments();
        for i in 0..num_segments {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            for t in 0..segment.n_tokens() {
                if let Some(token) = segment.get_token(t) {
                    tokens.push(token.token_data().id);
                }
            }
        }

        info!(
            segments = num_segments,
            tokens = tokens.len(),
            inference_ms = inference_duration.as_millis(),
            "chunk inference completed"
        );

        Ok(RawChunk {
            offset_secs,
            tokens,
        })
    }
}

impl TranscriptDecoder for WhisperModel {
    fn decode_transcript(&self, chunks: &[RawChunk], time_precision: f32) -> Vec<RawSegment> {
        let Ok(ctx) = self.ctx.lock() else {
            tracing::warn!("context mutex poisoned, returning empty transcript");
            return Vec::new();
        };

        let token_beg = ctx.token_beg();
        let token_eot = ctx.token_eot();

        let mut segments = Vec::new();
        let mut last_end = f32::NEG_INFINITY;

        for chunk in chunks {
            // (start seconds, accumulated text) of the segment being built
            let mut current: Option<(f32, String)> = None;

            for &id in &chunk.tokens {
                if id >= token_beg {
                    // Timestamp token: position scaled into seconds
                    #[allow(clippy::cast_precision_loss)]
                    let time = chunk.offset_secs + (id - token_beg) as f32 * time_precision;
                    match current.take() {
                        None => current = Some((time, String::new())),
                        Some((start, text)) => {
                            push_deduped(
                                &mut segments,
                                &mut last_end,
                                RawSegment {
                                    text,
                                    start,
                                    end: Some(time),
                                },
                            );
                        }
                    }
                } else if id < token_eot {
                    // Plain text token; ids between eot and beg are special
                    // (sot, language, task markers) and carry no text
                    if let Ok(piece) = ctx.token_to_str(id) {
                        let (_, text) =
                            current.get_or_insert_with(|| (chunk.offset_secs, String::new()));
                        text.push_str(piece);
                    }
                }
            }

            // A chunk can end before the decoder closes the final segment;
            // its end stays unresolved for the caller's fallback heuristic
            if let Some((start, text)) = current.take() {
                push_deduped(
                    &mut segments,
                    &mut last_end,
                    RawSegment {
                        text,
                        start,
                        end: None,
                    },
                );
            }
        }

        segments
    }
}

/// Appends a decoded segment unless it is empty or falls inside the overlap
/// already covered by the previous chunk (stride disambiguation).
fn push_deduped(segments: &mut Vec<RawSegment>, last_end: &mut f32, segment: RawSegment) {
    if segment.text.trim().is_empty() {
        return;
    }
    if segment.start < *last_end {
        debug!(
            start = f64::from(segment.start),
            last_end = f64::from(*last_end),
            "dropping overlap segment"
        );
        return;
    }
    *last_end = segment.end.unwrap_or(segment.start);
    segments.push(segment);
}

// SAFETY: WhisperModel is thread-safe because:
// 1. WhisperContext is wrapped in a Mutex, ensuring exclusive access
// 2. All methods acquire the mutex before touching the context
// 3. No shared mutable state exists outside the mutex
#[allow(unsafe_code)]
unsafe impl Send for WhisperModel {}
#[allow(unsafe_code)]
unsafe impl Sync for WhisperModel {}

/// Provides exactly one live [`WhisperModel`], loaded lazily
///
/// Concurrent callers collapse onto the single in-flight load; a successful
/// load is cached for the engine's whole lifetime, a failed load caches
/// nothing so a later request may retry.
pub struct ModelManager {
    name: String,
    path: PathBuf,
    threads: usize,
    beam_size: usize,
    auto_download: bool,
    instance: OnceCell<Arc<WhisperModel>>,
}

impl ModelManager {
    /// Creates a manager from the model configuration (no load yet)
    ///
    /// # Errors
    /// Returns error if the configured model path cannot be expanded
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let path = crate::config::Config::expand_path(&config.path)?;
        Ok(Self {
            name: config.name.clone(),
            path,
            threads: config.threads,
            beam_size: config.beam_size,
            auto_download: config.auto_download,
            instance: OnceCell::new(),
        })
    }

    /// Returns the live model, loading it on first use
    ///
    /// Download progress is forwarded to `on_progress` while weights are
    /// being fetched.
    ///
    /// # Errors
    /// Returns error if the weights cannot be fetched or the model fails to
    /// initialize; no instance is cached in that case
    pub async fn get_or_load(
        &self,
        on_progress: impl Fn(DownloadProgress) + Send + Sync + 'static,
    ) -> Result<Arc<WhisperModel>, ModelError> {
        if self.instance.get().is_some() {
            debug!("model already loaded, reusing instance");
        }

        self.instance
            .get_or_try_init(|| async {
                let name = self.name.clone();
                let path = self.path.clone();
                let threads = self.threads;
                let beam_size = self.beam_size;
                let auto_download = self.auto_download;

                let model = tokio::task::spawn_blocking(move || {
                    if auto_download {
                        download::ensure_model_downloaded(&name, &path, &|p| on_progress(p))
                            .map_err(ModelError::Download)?;
                    } else if !path.exists() {
                        return Err(ModelError::NotFound {
                            path: path.display().to_string(),
                        });
                    }

                    WhisperModel::load(&path, threads, beam_size)
                })
                .await??;

                Ok(Arc::new(model))
            })
            .await
            .cloned()
    }

    /// Whether the model is currently live
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.instance.get().is_some()
    }
}
