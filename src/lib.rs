/// Video Annotator - Rust Implementation
///
/// Resolves video URLs, downloads and probes the media, detects scenes, asks a
/// vision-language backend for a description, and derives tags and a category
/// from the combined evidence before persisting one record per video.

pub mod annotation;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod processing;
pub mod record;
pub mod resolver;
pub mod retry;
pub mod rules;
pub mod sink;
pub mod video;

// Re-export main types for easy access
pub use crate::annotation::{Annotator, HttpAnnotator, StaticAnnotator};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::download::{Fetcher, HttpFetcher};
pub use crate::error::{ErrorKind, PipelineError, PipelineResult, Stage};
pub use crate::manifest::load_manifest;
pub use crate::processing::{BatchSummary, Collaborators, Pipeline, VideoFailure, VideoOutcome};
pub use crate::record::{VideoJob, VideoMetadata, VideoRecord, VideoState};
pub use crate::resolver::{HttpResolver, Resolver};
pub use crate::rules::{CustomRuleSet, Evaluation, RuleEngine};
pub use crate::sink::{CompositeSink, JsonFileSink, Sink, SqliteSink};
pub use crate::video::{FfmpegSceneDetector, FfprobeProber, Prober, SceneDetector};
