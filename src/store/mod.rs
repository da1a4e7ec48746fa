// src/store/mod.rs
// Segment discovery, staged results and the composite output file

pub mod segment;
pub mod staged;

pub use segment::Segment;
pub use staged::{StagedResult, StagedScan, StoreError};

use crate::stt::{JobId, TranscriptionResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const STAGED_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Owns every file the pipeline reads or writes: input segments, per-job
/// staged results and the final composite.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    input_dir: PathBuf,
    staging_dir: PathBuf,
    output_path: PathBuf,
    extension: String,
}

impl SegmentStore {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        extension: &str,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            staging_dir: staging_dir.into(),
            output_path: output_path.into(),
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Audio files in the input directory, sorted by segment id
    pub async fn list_pending_segments(&self) -> Result<Vec<Segment>, StoreError> {
        let mut entries = fs::read_dir(&self.input_dir)
            .await
            .map_err(StoreError::io("read input directory", &self.input_dir))?;

        let mut segments = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StoreError::io("read input directory", &self.input_dir))?
        {
            let path = entry.path();

            if !has_extension(&path, &self.extension) {
                continue;
            }

            let file_type = entry
                .file_type()
                .await
                .map_err(StoreError::io("inspect", &path))?;
            if !file_type.is_file() {
                continue;
            }

            match Segment::from_path(path) {
                Some(segment) => segments.push(segment),
                None => tracing::warn!("Skipping input file without usable name: {:?}", entry.file_name()),
            }
        }

        segments.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));

        tracing::info!(
            "Found {} pending segment(s) in {}",
            segments.len(),
            self.input_dir.display()
        );

        Ok(segments)
    }

    /// Write a staged record for `job_id`. The final file name only ever
    /// holds a complete record.
    pub async fn persist_result(
        &self,
        job_id: &JobId,
        segment_id: &str,
        result: &TranscriptionResult,
    ) -> Result<PathBuf, StoreError> {
        let path = self.staged_path(job_id)?;

        let record = StagedResult {
            job_id: job_id.clone(),
            segment_id: segment_id.to_string(),
            persisted_at: Utc::now(),
            result: result.clone(),
        };

        let bytes = serde_json::to_vec_pretty(&record).map_err(|source| StoreError::Encode {
            job_id: job_id.clone(),
            source,
        })?;

        fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(StoreError::io("create staging directory", &self.staging_dir))?;

        write_atomic(&path, &bytes).await?;

        tracing::debug!("Staged job {} for segment {} at {}", job_id, segment_id, path.display());
        Ok(path)
    }

    pub async fn remove_segment_source(&self, segment: &Segment) -> Result<(), StoreError> {
        fs::remove_file(&segment.path)
            .await
            .map_err(StoreError::io("delete segment", &segment.path))?;

        tracing::info!("Deleted segment source: {}", segment.path.display());
        Ok(())
    }

    /// Read back the record persisted at `path`
    pub async fn read_staged(&self, path: &Path) -> Result<StagedResult, StoreError> {
        let raw = fs::read(path)
            .await
            .map_err(StoreError::io("read staged result", path))?;
        serde_json::from_slice(&raw).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every staged record, ordered by segment id and then job id. Files in
    /// the staging area that are not staged records are skipped.
    pub async fn list_staged_results(&self) -> Result<Vec<StagedResult>, StoreError> {
        Ok(self.scan_staged().await?.records)
    }

    /// Like [`list_staged_results`](Self::list_staged_results), but also
    /// reports the files that could not be read as a staged record.
    pub async fn scan_staged(&self) -> Result<StagedScan, StoreError> {
        let (found, skipped) = self.read_staged_dir().await?;
        for e in &skipped {
            tracing::warn!("Ignoring staging file: {}", e);
        }

        let mut records: Vec<StagedResult> = found.into_iter().map(|(_, r)| r).collect();

        records.sort_by(|a, b| {
            a.segment_id
                .cmp(&b.segment_id)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        Ok(StagedScan { records, skipped })
    }

    /// Remove all staged records and leftover temp files. Anything else in
    /// the staging directory is left alone.
    pub async fn clear_staged(&self) -> Result<usize, StoreError> {
        let (found, _) = self.read_staged_dir().await?;
        let mut files: Vec<PathBuf> = found.into_iter().map(|(path, _)| path).collect();
        files.extend(
            self.staged_files(TEMP_EXTENSION)
                .await?
                .into_iter()
                .filter(|path| is_temp_file(path)),
        );

        for path in &files {
            fs::remove_file(path)
                .await
                .map_err(StoreError::io("delete staged result", path))?;
        }

        tracing::info!("Cleared {} staged file(s)", files.len());
        Ok(files.len())
    }

    /// Replace the composite output with `text`
    pub async fn write_composite(&self, text: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(StoreError::io("create output directory", parent))?;
        }

        write_atomic(&self.output_path, text.as_bytes()).await?;

        tracing::info!("Composite summary written to {}", self.output_path.display());
        Ok(())
    }

    fn staged_path(&self, job_id: &JobId) -> Result<PathBuf, StoreError> {
        if !is_safe_file_stem(job_id.as_str()) {
            return Err(StoreError::InvalidJobId {
                job_id: job_id.clone(),
            });
        }
        Ok(self
            .staging_dir
            .join(format!("{}.{}", job_id.as_str(), STAGED_EXTENSION)))
    }

    async fn read_staged_dir(
        &self,
    ) -> Result<(Vec<(PathBuf, StagedResult)>, Vec<StoreError>), StoreError> {
        let mut found = Vec::new();
        let mut skipped = Vec::new();

        for path in self.staged_files(STAGED_EXTENSION).await? {
            match self.read_staged(&path).await {
                Ok(record) => found.push((path, record)),
                Err(e) => skipped.push(e),
            }
        }

        Ok((found, skipped))
    }

    async fn staged_files(&self, extension: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = match fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("read staging directory", &self.staging_dir)(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StoreError::io("read staging directory", &self.staging_dir))?
        {
            let path = entry.path();
            if !has_extension(&path, extension) {
                continue;
            }

            let file_type = entry
                .file_type()
                .await
                .map_err(StoreError::io("inspect", &path))?;
            if file_type.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Job ids come from the remote service and become file names
fn is_safe_file_stem(stem: &str) -> bool {
    !stem.is_empty()
        && !stem.starts_with('.')
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Write to a uniquely named sibling, flush to disk, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}",
        file_name,
        Uuid::new_v4().simple(),
        TEMP_EXTENSION
    ));

    let write = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, path).await
    };

    if let Err(e) = write.await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::Io {
            op: "write",
            path: path.to_path_buf(),
            source: e,
        });
    }

    Ok(())
}
