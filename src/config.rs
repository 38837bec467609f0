use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Whisper model selection and loading
    pub model: ModelConfig,
    /// Chunking parameters for streaming inference
    #[serde(default)]
    pub engine: EngineConfig,
    /// Transcript export destination
    #[serde(default)]
    pub export: ExportConfig,
    /// Logging setup
    pub telemetry: TelemetryConfig,
}

/// Whisper model configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Model name (e.g. "tiny", "base", "small")
    pub name: String,
    /// Path to the ggml weights file
    pub path: String,
    /// CPU threads for inference
    pub threads: usize,
    /// Beam search width (1 = greedy)
    pub beam_size: usize,
    /// Fetch missing weights from HuggingFace on first use
    #[serde(default = "default_auto_download")]
    pub auto_download: bool,
}

/// Streaming chunk parameters
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Length of one inference window in seconds
    #[serde(default = "default_chunk_length")]
    pub chunk_length_secs: f32,
    /// Overlap between consecutive windows in seconds
    #[serde(default = "default_stride_length")]
    pub stride_length_secs: f32,
}

/// Transcript export configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    /// Directory transcripts are written into
    #[serde(default = "default_export_dir")]
    pub dir: String,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file location
    pub log_path: String,
}

const fn default_auto_download() -> bool {
    true
}

const fn default_chunk_length() -> f32 {
    30.0
}

const fn default_stride_length() -> f32 {
    5.0
}

fn default_export_dir() -> String {
    "~/Downloads".to_owned()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_length_secs: default_chunk_length(),
            stride_length_secs: default_stride_length(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

impl Config {
    /// Load config from ~/.freescribe.toml, creating a default on first run
    ///
    /// # Errors
    /// Returns error if the file cannot be read, created, or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;

        let config: Self = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".freescribe.toml"))
    }

    fn create_default(path: &PathBuf) -> Result<()> {
        let default_config = r#"[model]
name = "tiny"
path = "~/.freescribe/models/ggml-tiny.bin"
threads = 4
beam_size = 5
auto_download = true

[engine]
chunk_length_secs = 30.0
stride_length_secs = 5.0

[export]
dir = "~/Downloads"

[telemetry]
enabled = true
log_path = "~/.freescribe/freescribe.log"
"#;
        fs::write(path, default_config).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if HOME is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        path.strip_prefix("~/").map_or_else(
            || Ok(PathBuf::from(path)),
            |stripped| {
                let home = std::env::var("HOME").context("HOME environment variable not set")?;
                Ok(PathBuf::from(home).join(stripped))
            },
        )
    }

    /// Minimal config for unit tests (no filesystem access)
    #[cfg(test)]
    pub(crate) fn default_for_tests() -> Self {
        Self {
            model: ModelConfig {
                name: "tiny".to_owned(),
                path: "/tmp/freescribe_test_model.bin".to_owned(),
                threads: 1,
                beam_size: 1,
                auto_download: false,
            },
            engine: EngineConfig::default(),
            export: ExportConfig::default(),
            telemetry: TelemetryConfig {
                enabled: false,
                log_path: String::new(),
            },
        }
    }
}
