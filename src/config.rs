use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the video annotation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Download and output locations
    pub paths: PathsConfig,

    /// Scene detection settings
    pub scene: SceneConfig,

    /// Annotation backend settings
    pub annotation: AnnotationConfig,

    /// Custom tagging rules source
    pub rules: RulesConfig,

    /// Retry policy for resolve/acquire
    pub retry: RetryConfig,

    /// Concurrency settings
    pub performance: PerformanceConfig,

    /// Per-collaborator call timeouts
    pub timeouts: TimeoutConfig,

    /// Sink and summary settings
    pub output: OutputConfig,

    /// Log verbosity and log file
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Where acquired videos are written
    pub download_dir: PathBuf,

    /// Where records and the batch summary are written
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub enabled: bool,

    /// Scene-change score threshold in [0, 1]
    pub threshold: f64,

    /// Whether records carry start/end intervals besides boundary points
    pub mode: SceneMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneMode {
    Points,
    Intervals,
}

/// Which annotation endpoint to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Public,
    Vpc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub enabled: bool,

    /// Endpoint selector
    pub endpoint: EndpointKind,

    /// Public endpoint URL
    pub public_url: Option<String>,

    /// VPC endpoint URL
    pub vpc_url: Option<String>,

    /// Access credential sent as a bearer token
    pub api_key: Option<String>,

    /// Base instruction sent with every request
    pub instruction: String,

    /// Keywords appended as a "focus on these aspects" clause
    pub priority_keywords: Vec<String>,

    /// Optional file of additional instructions, one per line
    pub templates_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RulesConfig {
    /// JSON document with custom tagging rules; absent means no custom rules
    pub file: Option<PathBuf>,

    /// Match description keywords case-sensitively
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    pub backoff_base_ms: u64,

    /// Backoff cap (milliseconds)
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Maximum number of videos processed at once
    pub max_concurrent_videos: usize,

    /// Download progress is logged every this many bytes
    pub progress_interval_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub resolve_secs: u64,
    pub download_secs: u64,
    pub probe_secs: u64,
    pub scene_secs: u64,
    pub annotate_secs: u64,
}

impl TimeoutConfig {
    pub fn resolve(&self) -> Duration {
        Duration::from_secs(self.resolve_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn scene(&self) -> Duration {
        Duration::from_secs(self.scene_secs)
    }

    pub fn annotate(&self) -> Duration {
        Duration::from_secs(self.annotate_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Sinks every finished record is handed to
    pub sinks: Vec<SinkKind>,

    /// SQLite database for the document-store sink
    pub database_path: PathBuf,

    /// Write processing_results.json after a batch
    pub write_summary: bool,

    /// Delete acquired files after the record is persisted
    pub cleanup_downloads: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive
    pub level: String,

    /// Directory for the rolling log file; no file logging when unset
    pub log_dir: Option<PathBuf>,

    /// Rolling log file name
    pub file_name: String,
}

impl Config {
    /// Load configuration from an explicit file, or from the default locations.
    ///
    /// An explicit path that cannot be read or parsed is an error; when no path
    /// is given and no default file exists, defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&config_str)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            tracing::info!("📄 Loaded configuration from: {}", path.display());
            return Ok(config);
        }

        let config_paths = ["video-annotator.toml", "config/video-annotator.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Override settings from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(workers) = std::env::var("VIDEO_ANNOTATOR_WORKERS") {
            match workers.parse() {
                Ok(n) => self.performance.max_concurrent_videos = n,
                Err(_) => tracing::warn!("Ignoring invalid VIDEO_ANNOTATOR_WORKERS: {}", workers),
            }
        }

        if let Ok(output_dir) = std::env::var("VIDEO_ANNOTATOR_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(output_dir);
        }

        if let Ok(download_dir) = std::env::var("VIDEO_ANNOTATOR_DOWNLOAD_DIR") {
            self.paths.download_dir = PathBuf::from(download_dir);
        }

        if let Ok(api_key) = std::env::var("VIDEO_ANNOTATOR_API_KEY") {
            self.annotation.api_key = Some(api_key);
        }

        if let Ok(log_level) = std::env::var("VIDEO_ANNOTATOR_LOG_LEVEL") {
            self.logging.level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.performance.max_concurrent_videos == 0 {
            return Err(anyhow!("max_concurrent_videos must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.scene.threshold) {
            return Err(anyhow!(
                "scene threshold must be within [0, 1], got {}",
                self.scene.threshold
            ));
        }

        if self.annotation.enabled && self.annotation.endpoint_url().is_none() {
            return Err(anyhow!(
                "annotation is enabled but no {:?} endpoint is configured",
                self.annotation.endpoint
            ));
        }

        if self.output.sinks.is_empty() {
            return Err(anyhow!("at least one output sink must be configured"));
        }

        let timeouts = [
            ("resolve_secs", self.timeouts.resolve_secs),
            ("download_secs", self.timeouts.download_secs),
            ("probe_secs", self.timeouts.probe_secs),
            ("scene_secs", self.timeouts.scene_secs),
            ("annotate_secs", self.timeouts.annotate_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(anyhow!("timeouts.{} must be greater than 0", name));
        }

        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Video Annotator Configuration:\n\
            - Workers: {}\n\
            - Scene threshold: {} ({})\n\
            - Annotation: {}\n\
            - Retries: {} (base {}ms)\n\
            - Download directory: {}\n\
            - Output directory: {}\n\
            - Sinks: {:?}",
            self.performance.max_concurrent_videos,
            self.scene.threshold,
            if self.scene.enabled { "enabled" } else { "disabled" },
            if self.annotation.enabled {
                format!("{:?}", self.annotation.endpoint)
            } else {
                "disabled".to_string()
            },
            self.retry.max_retries,
            self.retry.backoff_base_ms,
            self.paths.download_dir.display(),
            self.paths.output_dir.display(),
            self.output.sinks,
        )
    }
}

impl AnnotationConfig {
    /// URL for the selected endpoint kind
    pub fn endpoint_url(&self) -> Option<&str> {
        match self.endpoint {
            EndpointKind::Public => self.public_url.as_deref(),
            EndpointKind::Vpc => self.vpc_url.as_deref(),
        }
    }

    /// Build the instruction sent to the backend.
    ///
    /// Priority keywords are appended as a single space-joined clause.
    pub fn build_instruction(&self) -> String {
        let base = self.instruction.trim();
        let keywords: Vec<&str> = self
            .priority_keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();

        if keywords.is_empty() {
            base.to_string()
        } else {
            format!("{} Focus on these aspects: {}", base, keywords.join(" "))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            scene: SceneConfig::default(),
            annotation: AnnotationConfig::default(),
            rules: RulesConfig::default(),
            retry: RetryConfig::default(),
            performance: PerformanceConfig::default(),
            timeouts: TimeoutConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloaded_videos"),
            output_dir: PathBuf::from("processed_videos"),
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.3,
            mode: SceneMode::Points,
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: EndpointKind::Public,
            public_url: None,
            vpc_url: None,
            api_key: None,
            instruction: "Describe this video.".to_string(),
            priority_keywords: Vec::new(),
            templates_file: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            // Bounded to keep outbound bandwidth and backend load small
            max_concurrent_videos: num_cpus::get().clamp(1, 2),
            progress_interval_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            resolve_secs: 30,
            download_secs: 3600,
            probe_secs: 60,
            scene_secs: 900,
            annotate_secs: 300,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sinks: vec![SinkKind::Json],
            database_path: PathBuf::from("processed_videos/records.db"),
            write_summary: true,
            cleanup_downloads: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_name: "video_processing.log".to_string(),
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.performance.max_concurrent_videos = workers;
        self
    }

    pub fn with_download_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.download_dir = dir;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.output_dir = dir;
        self
    }

    pub fn with_scene_threshold(mut self, threshold: f64) -> Self {
        self.config.scene.threshold = threshold;
        self
    }

    pub fn with_scene_mode(mut self, mode: SceneMode) -> Self {
        self.config.scene.mode = mode;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.annotation.instruction = instruction.into();
        self
    }

    pub fn with_priority_keywords(mut self, keywords: Vec<String>) -> Self {
        self.config.annotation.priority_keywords = keywords;
        self
    }

    pub fn with_annotation_endpoint(mut self, kind: EndpointKind, url: impl Into<String>) -> Self {
        self.config.annotation.enabled = true;
        self.config.annotation.endpoint = kind;
        match kind {
            EndpointKind::Public => self.config.annotation.public_url = Some(url.into()),
            EndpointKind::Vpc => self.config.annotation.vpc_url = Some(url.into()),
        }
        self
    }

    pub fn with_rules_file(mut self, path: PathBuf) -> Self {
        self.config.rules.file = Some(path);
        self
    }

    pub fn with_retry(mut self, max_retries: u32, backoff_base_ms: u64) -> Self {
        self.config.retry.max_retries = max_retries;
        self.config.retry.backoff_base_ms = backoff_base_ms;
        self
    }

    pub fn with_sinks(mut self, sinks: Vec<SinkKind>) -> Self {
        self.config.output.sinks = sinks;
        self
    }

    pub fn write_summary(mut self, enable: bool) -> Self {
        self.config.output.write_summary = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
