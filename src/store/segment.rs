// src/store/segment.rs
// Audio segment input files

use std::path::PathBuf;

/// One audio input file awaiting transcription.
///
/// Content is not held in memory; it is read on demand for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    pub path: PathBuf,
}

impl Segment {
    /// Build a segment from a file path, using the file stem as identifier
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let id = path.file_stem()?.to_str()?.to_string();

        if id.is_empty() {
            return None;
        }

        Some(Self { id, path })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.id)
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }

    pub async fn read_content(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}
