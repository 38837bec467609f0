//! Plain-text export of the currently displayed transcript.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Writes `text` to `Freescribe_<timestamp>.txt` inside `dir`
///
/// Returns the path of the written file. The directory is created if needed.
///
/// # Errors
/// Returns error if the directory or file cannot be created
pub fn export_transcript(text: &str, dir: &Path) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_millis();

    let path = dir.join(export_filename(timestamp));

    fs::create_dir_all(dir).context("failed to create export directory")?;
    fs::write(&path, text)
        .with_context(|| format!("failed to write transcript to {}", path.display()))?;

    info!(path = %path.display(), bytes = text.len(), "transcript exported");
    Ok(path)
}

fn export_filename(timestamp_millis: u128) -> String {
    format!("Freescribe_{timestamp_millis}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_filename_pattern() {
        assert_eq!(export_filename(1700000000000), "Freescribe_1700000000000.txt");
    }

    #[test]
    fn test_export_writes_file() {
        let dir = std::env::temp_dir().join("freescribe_export_test");
        let _ = fs::remove_dir_all(&dir);

        let path = export_transcript("hello world\nsecond line", &dir).unwrap();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("Freescribe_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello world\nsecond line");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_export_creates_missing_directory() {
        let dir = std::env::temp_dir()
            .join("freescribe_export_test_nested")
            .join("deep");
        let _ = fs::remove_dir_all(dir.parent().unwrap());

        let path = export_transcript("", &dir).unwrap();
        assert!(path.exists());

        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }
}
