use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::record::VideoJob;

/// One row of a batch manifest
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub public_url: String,
}

impl ManifestEntry {
    pub fn to_job(&self) -> VideoJob {
        let job = VideoJob::new(self.public_url.trim());
        if self.file_name.trim().is_empty() {
            job
        } else {
            job.with_name(self.file_name.trim())
        }
    }
}

/// Parse manifest rows from any reader with a header line
pub fn parse_manifest<R: std::io::Read>(reader: R) -> PipelineResult<Vec<VideoJob>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| PipelineError::Config(format!("invalid manifest header: {}", e)))?;
    if !headers.iter().any(|h| h == "public_url") {
        return Err(PipelineError::Config("manifest has no public_url column".to_string()));
    }

    let mut jobs = Vec::new();
    for (index, row) in csv_reader.deserialize::<ManifestEntry>().enumerate() {
        // header is line 1
        let line = index + 2;
        match row {
            Ok(entry) if entry.public_url.trim().is_empty() => {
                warn!("⚠️  Manifest line {} has no public_url, skipping", line);
            }
            Ok(entry) => jobs.push(entry.to_job()),
            Err(e) => warn!("⚠️  Manifest line {} is malformed, skipping: {}", line, e),
        }
    }

    Ok(jobs)
}

/// Read a CSV manifest with `file_name, file_size, last_modified, public_url` columns
pub fn load_manifest(path: &Path) -> PipelineResult<Vec<VideoJob>> {
    let file = std::fs::File::open(path)
        .map_err(|e| PipelineError::Config(format!("cannot open manifest {}: {}", path.display(), e)))?;

    let jobs = parse_manifest(file)?;
    info!("📄 Manifest {} lists {} video(s)", path.display(), jobs.len());
    Ok(jobs)
}
