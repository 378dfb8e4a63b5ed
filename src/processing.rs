use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::annotation::{create_annotator, load_templates, Annotator};
use crate::config::{Config, SceneMode};
use crate::download::{Fetcher, HttpFetcher};
use crate::error::{ErrorKind, PipelineError, PipelineResult, Stage};
use crate::record::{VideoJob, VideoRecord, VideoState};
use crate::resolver::{HttpResolver, Resolver};
use crate::retry::with_retry;
use crate::rules::{CustomRuleSet, RuleEngine};
use crate::sink::{create_sink, Sink};
use crate::video::{normalize_scenes, scene_intervals, FfmpegSceneDetector, FfprobeProber, Prober, SceneDetector};

/// The external capabilities a pipeline drives
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn Resolver>,
    pub fetcher: Arc<dyn Fetcher>,
    pub prober: Arc<dyn Prober>,
    pub scene_detector: Arc<dyn SceneDetector>,
    /// `None` when annotation is disabled
    pub annotator: Option<Arc<dyn Annotator>>,
    pub sink: Arc<dyn Sink>,
}

impl Collaborators {
    /// Production collaborators: HTTP resolver/downloader, ffprobe, ffmpeg and the configured sinks
    pub async fn from_config(config: &Config) -> PipelineResult<Self> {
        Ok(Self {
            resolver: Arc::new(HttpResolver::new(config.timeouts.resolve())?),
            fetcher: Arc::new(HttpFetcher::new(
                config.timeouts.download(),
                config.performance.progress_interval_bytes,
            )?),
            prober: Arc::new(FfprobeProber::new()),
            scene_detector: Arc::new(FfmpegSceneDetector::new()),
            annotator: create_annotator(&config.annotation, config.timeouts.annotate())?,
            sink: create_sink(config).await?,
        })
    }
}

/// A video that did not reach the sink
#[derive(Debug, Error)]
#[error("{video_id} failed during {stage}: {error}")]
pub struct VideoFailure {
    pub video_id: String,
    pub stage: Stage,
    pub error: PipelineError,
}

impl VideoFailure {
    fn new(video_id: &str, stage: Stage, error: PipelineError) -> Self {
        Self {
            video_id: video_id.to_string(),
            stage,
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Persisted,
    Failed,
    Cancelled,
}

/// Per-video line of the batch summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoOutcome {
    pub video_id: String,
    pub source_url: String,
    pub status: OutcomeStatus,
    pub stage: Option<Stage>,
    pub error_kind: Option<ErrorKind>,
    pub reason: Option<String>,
    pub classification: Option<String>,
    pub tags: BTreeSet<String>,
    pub stage_errors: BTreeMap<String, String>,
    pub processing_time_secs: f64,
}

impl VideoOutcome {
    fn from_result(job: &VideoJob, result: &Result<VideoRecord, VideoFailure>, elapsed: Duration) -> Self {
        match result {
            Ok(record) => Self {
                video_id: record.video_id.clone(),
                source_url: record.source_url.clone(),
                status: OutcomeStatus::Persisted,
                stage: None,
                error_kind: None,
                reason: None,
                classification: Some(record.classification.clone()),
                tags: record.tags.clone(),
                stage_errors: record.stage_errors.clone(),
                processing_time_secs: elapsed.as_secs_f64(),
            },
            Err(failure) => Self {
                video_id: failure.video_id.clone(),
                source_url: job.source_url.clone(),
                status: if failure.kind() == ErrorKind::Cancelled {
                    OutcomeStatus::Cancelled
                } else {
                    OutcomeStatus::Failed
                },
                stage: Some(failure.stage),
                error_kind: Some(failure.kind()),
                reason: Some(failure.error.to_string()),
                classification: None,
                tags: BTreeSet::new(),
                stage_errors: BTreeMap::new(),
                processing_time_secs: elapsed.as_secs_f64(),
            },
        }
    }
}

/// Overall batch results, written to `processing_results.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub persisted: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_time_secs: f64,
    pub results: Vec<VideoOutcome>,
}

impl BatchSummary {
    fn from_outcomes(results: Vec<VideoOutcome>, total_time: Duration) -> Self {
        let count = |status: OutcomeStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            persisted: count(OutcomeStatus::Persisted),
            failed: count(OutcomeStatus::Failed),
            cancelled: count(OutcomeStatus::Cancelled),
            total_time_secs: total_time.as_secs_f64(),
            results,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total > 0 {
            self.persisted as f64 / self.total as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub max_workers: usize,
    pub available_permits: usize,
}

struct AnnotationOutcome {
    description: PipelineResult<String>,
    templates: Vec<(String, PipelineResult<String>)>,
}

/// Drives videos through resolve, acquire, probe, enrich, classify and persist
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    collaborators: Collaborators,
    rules: Arc<RuleEngine>,
    templates: Arc<Vec<String>>,
    instruction: Arc<str>,
    cancel: CancellationToken,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Pipeline {
    pub fn new(config: Config, collaborators: Collaborators, rules: RuleEngine) -> Self {
        let max_concurrent = config.performance.max_concurrent_videos.max(1);
        info!("🔧 Initializing pipeline with {} workers", max_concurrent);

        Self {
            instruction: config.annotation.build_instruction().into(),
            config: Arc::new(config),
            collaborators,
            rules: Arc::new(rules),
            templates: Arc::new(Vec::new()),
            cancel: CancellationToken::new(),
            worker_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Build the production pipeline: collaborators, custom rules and templates from configuration
    pub async fn from_config(config: Config) -> PipelineResult<Self> {
        let collaborators = Collaborators::from_config(&config).await?;

        let custom = CustomRuleSet::load_or_empty(config.rules.file.as_deref(), config.rules.case_sensitive).await;
        let rules = RuleEngine::new(custom);
        info!("📚 Rule engine ready: {} custom rule(s)", rules.custom_rule_count());

        let templates = match (&config.annotation.templates_file, config.annotation.enabled) {
            (Some(path), true) => load_templates(path).await.unwrap_or_else(|e| {
                warn!("Ignoring annotation templates: {}", e);
                Vec::new()
            }),
            _ => Vec::new(),
        };

        Ok(Self::new(config, collaborators, rules).with_templates(templates))
    }

    /// Extra instructions sent to the annotator after the main one
    pub fn with_templates(mut self, templates: Vec<String>) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    /// Token that stops the pipeline when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            max_workers: self.max_concurrent,
            available_permits: self.worker_semaphore.available_permits(),
        }
    }

    /// Run one video to completion
    ///
    /// `Ok` means the record was handed to the sink. Failures in resolve,
    /// acquire or probe, and sink errors, come back as `Err`.
    pub async fn process_video(&self, job: &VideoJob) -> Result<VideoRecord, VideoFailure> {
        let video_id = job.video_id();
        self.run(job).instrument(info_span!("video", id = %video_id)).await
    }

    async fn run(&self, job: &VideoJob) -> Result<VideoRecord, VideoFailure> {
        let config = &*self.config;
        let mut record = VideoRecord::new(job);
        let id = record.video_id.clone();
        let fail = |stage: Stage, error: PipelineError| {
            error!("❌ {} failed at {}: {}", id, stage, error);
            VideoFailure::new(&id, stage, error)
        };

        if self.cancel.is_cancelled() {
            return Err(fail(Stage::Resolve, PipelineError::Cancelled));
        }

        // Resolving
        record.state = VideoState::Resolving;
        info!("🔍 Resolving {}", job.source_url);
        let resolver = &self.collaborators.resolver;
        let resolve_timeout = config.timeouts.resolve();
        let locator = with_retry(&config.retry, &self.cancel, "resolve", || {
            timed(Stage::Resolve, resolve_timeout, resolver.resolve(&job.source_url))
        })
        .await
        .map_err(|e| fail(Stage::Resolve, e))?;
        record.resolved_locator = locator.clone();

        // Acquiring
        record.state = VideoState::Acquiring;
        let fetcher = &self.collaborators.fetcher;
        let download_dir = config.paths.download_dir.as_path();
        let download_timeout = config.timeouts.download();
        let local_path = with_retry(&config.retry, &self.cancel, "acquire", || {
            timed(Stage::Acquire, download_timeout, fetcher.fetch(&locator, download_dir, &self.cancel))
        })
        .await
        .map_err(|e| fail(Stage::Acquire, e))?;
        record.local_path = Some(local_path.clone());

        // Probing
        record.state = VideoState::Probing;
        let probed = timed(
            Stage::Probe,
            config.timeouts.probe(),
            self.collaborators.prober.probe(&local_path),
        )
        .await;
        let metadata = match probed {
            Ok(metadata) => metadata,
            Err(e) => {
                self.cleanup_download(&local_path).await;
                return Err(fail(Stage::Probe, e));
            }
        };
        debug!(
            "📊 {}x{} @ {:.2} fps, {:.1}s, {}",
            metadata.width, metadata.height, metadata.frame_rate, metadata.duration, metadata.codec
        );
        record.set_metadata(metadata.clone());

        // Enriching: scene detection and annotation are independent
        record.state = VideoState::Enriching;
        let (scenes, annotation) = tokio::join!(
            self.detect_scenes(&local_path),
            self.annotate(&locator)
        );

        match scenes {
            Some(Ok(points)) => {
                record.scenes = normalize_scenes(points);
                if config.scene.mode == SceneMode::Intervals {
                    record.scene_intervals = Some(scene_intervals(&record.scenes, metadata.duration));
                }
                info!("🎬 {} scene boundaries", record.scenes.len());
            }
            Some(Err(e)) => {
                warn!("⚠️  Scene detection failed for {}: {}", id, e);
                record.record_error(Stage::Scene.as_str(), e);
            }
            None => debug!("Scene detection disabled"),
        }

        if let Some(outcome) = annotation {
            match outcome.description {
                Ok(description) => record.description = Some(description),
                Err(e) => {
                    warn!("⚠️  Annotation failed for {}: {}", id, e);
                    record.record_error(Stage::Annotation.as_str(), e);
                }
            }

            let mut template_errors = Vec::new();
            for (instruction, answer) in outcome.templates {
                match answer {
                    Ok(text) => {
                        record.template_answers.insert(instruction, text);
                    }
                    Err(e) => template_errors.push(format!("{}: {}", instruction, e)),
                }
            }
            if !template_errors.is_empty() {
                record.record_error("annotation_template", template_errors.join("; "));
            }
        }

        // Classifying
        record.state = VideoState::Classifying;
        let evaluation = self
            .rules
            .evaluate(&metadata, &record.scenes, record.description.as_deref());
        record.tags = evaluation.tags;
        record.classification = evaluation.classification;
        record.processed_at = Some(chrono::Utc::now());
        info!("🏷️  {} → {} ({} tags)", id, record.classification, record.tags.len());

        // Persisted
        record.state = VideoState::Persisted;
        self.collaborators
            .sink
            .persist(&record)
            .await
            .map_err(|e| fail(Stage::Persist, e))?;

        self.cleanup_download(&local_path).await;
        info!("✅ {} persisted", id);
        Ok(record)
    }

    async fn detect_scenes(&self, local_path: &Path) -> Option<PipelineResult<Vec<f64>>> {
        if !self.config.scene.enabled {
            return None;
        }

        Some(
            timed(
                Stage::Scene,
                self.config.timeouts.scene(),
                self.collaborators
                    .scene_detector
                    .detect_scenes(local_path, self.config.scene.threshold),
            )
            .await,
        )
    }

    async fn annotate(&self, locator: &str) -> Option<AnnotationOutcome> {
        let annotator = self.collaborators.annotator.as_ref()?;
        let limit = self.config.timeouts.annotate();

        let description = timed(Stage::Annotation, limit, annotator.describe(locator, &self.instruction)).await;

        let mut templates = Vec::with_capacity(self.templates.len());
        for instruction in self.templates.iter() {
            let answer = timed(Stage::Annotation, limit, annotator.describe(locator, instruction)).await;
            templates.push((instruction.clone(), answer));
        }

        Some(AnnotationOutcome { description, templates })
    }

    /// Remove a downloaded file once it is no longer needed; local sources are never touched
    async fn cleanup_download(&self, path: &Path) {
        if !self.config.output.cleanup_downloads || !path.starts_with(&self.config.paths.download_dir) {
            return;
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("🧹 Removed {}", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    /// Process a batch with bounded concurrency; one video's failure never stops the others
    pub async fn process_batch(&self, jobs: Vec<VideoJob>) -> BatchSummary {
        let start_time = Instant::now();
        let total_videos = jobs.len();

        info!("🚀 Starting batch of {} video(s)", total_videos);
        if jobs.is_empty() {
            warn!("No videos to process");
        }

        let (tx, mut rx) = mpsc::channel(self.max_concurrent.max(1));

        for (index, job) in jobs.into_iter().enumerate() {
            let pipeline = self.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);

            tokio::spawn(async move {
                let started = Instant::now();
                let permit = tokio::select! {
                    biased;
                    _ = pipeline.cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(_permit) => {
                        info!("📹 Processing video {}/{}: {}", index + 1, total_videos, job.source_url);
                        pipeline.process_video(&job).await
                    }
                    None => Err(VideoFailure::new(&job.video_id(), Stage::Resolve, PipelineError::Cancelled)),
                };

                let outcome = VideoOutcome::from_result(&job, &result, started.elapsed());
                if let Err(e) = tx.send((index, outcome)).await {
                    error!("Failed to send result: {}", e);
                }
            });
        }

        // Drop the original sender so the channel closes when every task is done
        drop(tx);

        let mut indexed = Vec::with_capacity(total_videos);
        while let Some((index, outcome)) = rx.recv().await {
            match outcome.status {
                OutcomeStatus::Persisted => info!(
                    "✅ Completed: {} in {:.2}s",
                    outcome.video_id, outcome.processing_time_secs
                ),
                OutcomeStatus::Failed => warn!(
                    "❌ Failed: {} - {}",
                    outcome.video_id,
                    outcome.reason.as_deref().unwrap_or("Unknown error")
                ),
                OutcomeStatus::Cancelled => info!("⏹️  Cancelled: {}", outcome.video_id),
            }
            indexed.push((index, outcome));
        }

        if indexed.len() != total_videos {
            error!("{} video task(s) ended without reporting", total_videos - indexed.len());
        }

        indexed.sort_by_key(|(index, _)| *index);
        let summary = BatchSummary::from_outcomes(
            indexed.into_iter().map(|(_, outcome)| outcome).collect(),
            start_time.elapsed(),
        );

        if self.config.output.write_summary {
            match write_summary(&self.config.paths.output_dir, &summary).await {
                Ok(path) => info!("💾 Results saved to: {}", path.display()),
                Err(e) => warn!("Failed to write batch summary: {}", e),
            }
        }

        summary
    }
}

/// Bound a collaborator call; a timeout takes the stage's error policy
async fn timed<T>(
    stage: Stage,
    limit: Duration,
    fut: impl Future<Output = PipelineResult<T>>,
) -> PipelineResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            stage,
            seconds: limit.as_secs(),
        }),
    }
}

async fn write_summary(output_dir: &Path, summary: &BatchSummary) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    let results_path = output_dir.join("processing_results.json");
    let json_data = serde_json::to_string_pretty(summary)?;
    tokio::fs::write(&results_path, json_data).await?;
    Ok(results_path)
}
