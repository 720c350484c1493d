//! Append-only JSONL log of judge logical failures

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Maximum graphemes of prompt text kept per record
const PROMPT_EXCERPT_GRAPHEMES: usize = 400;

/// One diagnostic line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub timestamp: String,
    pub model: String,
    pub reason: String,
    pub prompt_excerpt: String,
    pub raw_response: String,
}

impl DiagnosticRecord {
    pub fn new(model: &str, reason: &str, prompt: &str, raw_response: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            model: model.to_string(),
            reason: reason.to_string(),
            prompt_excerpt: excerpt(prompt, PROMPT_EXCERPT_GRAPHEMES),
            raw_response: raw_response.to_string(),
        }
    }
}

/// Truncate on a grapheme boundary
pub fn excerpt(text: &str, max_graphemes: usize) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(max_graphemes).collect();
    if graphemes.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

/// JSONL sink; write failures are logged and swallowed
#[derive(Debug)]
pub struct DiagnosticLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &DiagnosticRecord) {
        let _guard = self.lock.lock();
        if let Err(e) = self.write_line(record) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write judge diagnostic record"
            );
        }
    }

    fn write_line(&self, record: &DiagnosticRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let log = DiagnosticLog::new(dir.path().join("logs/judge.jsonl"));

        log.append(&DiagnosticRecord::new("m1", "no usable item scores", "prompt", "{}"));
        log.append(&DiagnosticRecord::new("m2", "timeout", "prompt", ""));

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: DiagnosticRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.model, "m1");
        assert_eq!(first.raw_response, "{}");
    }

    #[test]
    fn test_excerpt_truncates_on_graphemes() {
        assert_eq!(excerpt("äöå", 5), "äöå");
        assert_eq!(excerpt("äöåäöå", 3), "äöå…");
    }
}
