use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::Stage;

/// Classification assigned when no rule matches
pub const UNCLASSIFIED: &str = "Unclassified";

/// Structural metadata reported by the prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration: f64,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<u32>,
    pub audio_sample_rate: Option<u32>,
    pub has_subtitle: bool,
    pub size_bytes: u64,
    pub format_name: Option<String>,
}

impl VideoMetadata {
    /// Derived "WxH" resolution string
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Human-readable resolution class derived from the frame size
    pub fn resolution_label(&self) -> &'static str {
        let (long, short) = if self.width >= self.height {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        };

        if long >= 7680 || short >= 4320 {
            "8K"
        } else if long >= 3840 || short >= 2160 {
            "4K"
        } else if long >= 2560 || short >= 1440 {
            "1440p"
        } else if long >= 1920 || short >= 1080 {
            "1080p"
        } else if long >= 1280 || short >= 720 {
            "720p"
        } else {
            "SD"
        }
    }
}

/// Lifecycle of a single video through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VideoState {
    Pending,
    Resolving,
    Acquiring,
    Probing,
    Enriching,
    Classifying,
    Persisted,
    Failed { stage: Stage, reason: String },
}

impl VideoState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoState::Persisted | VideoState::Failed { .. })
    }

    /// Stage the video is currently in, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            VideoState::Resolving => Some(Stage::Resolve),
            VideoState::Acquiring => Some(Stage::Acquire),
            VideoState::Probing => Some(Stage::Probe),
            VideoState::Classifying => Some(Stage::Classify),
            VideoState::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// A unit of batch input: a source URL plus an optional name from the manifest
#[derive(Debug, Clone, PartialEq)]
pub struct VideoJob {
    pub source_url: String,
    pub name_hint: Option<String>,
}

impl VideoJob {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            name_hint: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name_hint = Some(name.into());
        self
    }

    /// Stable identifier used as the sink key
    pub fn video_id(&self) -> String {
        video_id(&self.source_url, self.name_hint.as_deref())
    }
}

/// The unit of work and the unit of output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub source_url: String,
    pub resolved_locator: String,
    pub local_path: Option<PathBuf>,
    pub metadata: Option<VideoMetadata>,
    pub resolution: Option<String>,
    pub resolution_label: Option<String>,
    pub scenes: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_intervals: Option<Vec<(f64, f64)>>,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_answers: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    pub classification: String,
    pub stage_errors: BTreeMap<String, String>,
    pub state: VideoState,
    pub processed_at: Option<DateTime<Utc>>,
}

impl VideoRecord {
    pub fn new(job: &VideoJob) -> Self {
        Self {
            video_id: job.video_id(),
            source_url: job.source_url.clone(),
            resolved_locator: String::new(),
            local_path: None,
            metadata: None,
            resolution: None,
            resolution_label: None,
            scenes: Vec::new(),
            scene_intervals: None,
            description: None,
            template_answers: BTreeMap::new(),
            tags: BTreeSet::new(),
            classification: UNCLASSIFIED.to_string(),
            stage_errors: BTreeMap::new(),
            state: VideoState::Pending,
            processed_at: None,
        }
    }

    /// Metadata is write-once; later calls are ignored.
    pub fn set_metadata(&mut self, metadata: VideoMetadata) -> bool {
        if self.metadata.is_some() {
            return false;
        }
        self.resolution = Some(metadata.resolution());
        self.resolution_label = Some(metadata.resolution_label().to_string());
        self.metadata = Some(metadata);
        true
    }

    pub fn record_error(&mut self, key: impl Into<String>, error: impl ToString) {
        self.stage_errors.insert(key.into(), error.to_string());
    }
}

/// Build a stable identifier from the source URL and an optional name hint.
///
/// The stem comes from the hint or from the last URL path segment; a short md5
/// digest of the URL keeps identically-named videos from different sources apart.
pub fn video_id(source_url: &str, name_hint: Option<&str>) -> String {
    let stem = match name_hint {
        Some(name) if !name.trim().is_empty() => strip_extension(name.trim()).to_string(),
        _ => url_stem(source_url),
    };
    let digest = format!("{:x}", md5::compute(source_url.as_bytes()));
    format!("{}-{}", sanitize_identifier(&stem), &digest[..8])
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else collapses to `_`
pub fn sanitize_identifier(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

fn url_stem(source_url: &str) -> String {
    let path = match url::Url::parse(source_url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => source_url.to_string(),
    };
    let segment = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("");
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    strip_extension(&decoded).to_string()
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(width: u32, height: u32) -> VideoMetadata {
        VideoMetadata {
            duration: 10.0,
            codec: "h264".to_string(),
            width,
            height,
            frame_rate: 25.0,
            audio_codec: None,
            audio_channels: None,
            audio_sample_rate: None,
            has_subtitle: false,
            size_bytes: 0,
            format_name: None,
        }
    }

    #[test]
    fn test_video_id_is_stable_and_sanitized() {
        let a = video_id("https://cdn.example.com/clips/My%20Clip.mp4", None);
        let b = video_id("https://cdn.example.com/clips/My%20Clip.mp4", None);
        assert_eq!(a, b);
        assert!(a.starts_with("My_Clip-"));
        assert_eq!(a.len(), "My_Clip-".len() + 8);
    }

    #[test]
    fn test_video_id_prefers_name_hint() {
        let id = video_id("https://example.com/watch?v=1", Some("holiday trip.mov"));
        assert!(id.starts_with("holiday_trip-"));
    }

    #[test]
    fn test_video_id_differs_per_source() {
        let a = video_id("https://a.example.com/clip.mp4", None);
        let b = video_id("https://b.example.com/clip.mp4", None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_identifier_fallback() {
        assert_eq!(sanitize_identifier("../../"), "video");
        assert_eq!(sanitize_identifier("a b//c"), "a_b_c");
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(metadata(3840, 2160).resolution_label(), "4K");
        assert_eq!(metadata(1920, 1080).resolution_label(), "1080p");
        assert_eq!(metadata(1080, 1920).resolution_label(), "1080p");
        assert_eq!(metadata(640, 360).resolution_label(), "SD");
        assert_eq!(metadata(1920, 1080).resolution(), "1920x1080");
    }

    #[test]
    fn test_metadata_is_write_once() {
        let mut record = VideoRecord::new(&VideoJob::new("https://example.com/a.mp4"));
        assert!(record.set_metadata(metadata(1920, 1080)));
        assert!(!record.set_metadata(metadata(640, 360)));
        assert_eq!(record.metadata.as_ref().unwrap().width, 1920);
        assert_eq!(record.resolution.as_deref(), Some("1920x1080"));
    }
}
