use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Pipeline stages, in the order a video moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Acquire,
    Probe,
    Scene,
    Annotation,
    Classify,
    Persist,
}

impl Stage {
    /// Stable name used as the `stage_errors` key and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Acquire => "acquire",
            Stage::Probe => "probe",
            Stage::Scene => "scene",
            Stage::Annotation => "annotation",
            Stage::Classify => "classify",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kind tag the orchestrator dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Resolution,
    TransientFetch,
    Download,
    Probe,
    Scene,
    Annotation,
    RuleLoad,
    Sink,
    Cancelled,
    Config,
}

/// Errors that can occur while processing a video
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no video locator found for {0}")]
    NotAVideo(String),

    #[error("invalid locator {url}: {message}")]
    InvalidLocator { url: String, message: String },

    #[error("transient fetch failure for {url}: {message}")]
    TransientFetch { url: String, message: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("scene detection failed: {0}")]
    Scene(String),

    #[error("annotation failed: {0}")]
    Annotation(String),

    #[error("annotation backend returned {status}: {body}")]
    AnnotationStatus { status: u16, body: String },

    #[error("failed to load tagging rules: {0}")]
    RuleLoad(String),

    #[error("sink {sink} failed: {message}")]
    Sink { sink: String, message: String },

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: Stage, seconds: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn transient(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::TransientFetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn sink(sink: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.to_string(),
        }
    }

    /// Classify this error into the taxonomy the orchestrator acts on.
    ///
    /// Timeouts take the policy of the stage they happened in: retryable for
    /// resolve/acquire, fatal for probe, degradable for scene/annotation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotAVideo(_) | PipelineError::InvalidLocator { .. } => ErrorKind::Resolution,
            PipelineError::TransientFetch { .. } => ErrorKind::TransientFetch,
            PipelineError::Download(_) => ErrorKind::Download,
            PipelineError::Probe(_) => ErrorKind::Probe,
            PipelineError::Scene(_) => ErrorKind::Scene,
            PipelineError::Annotation(_) | PipelineError::AnnotationStatus { .. } => ErrorKind::Annotation,
            PipelineError::RuleLoad(_) => ErrorKind::RuleLoad,
            PipelineError::Sink { .. } => ErrorKind::Sink,
            PipelineError::Timeout { stage, .. } => match stage {
                Stage::Resolve | Stage::Acquire => ErrorKind::TransientFetch,
                Stage::Probe => ErrorKind::Probe,
                Stage::Scene => ErrorKind::Scene,
                Stage::Annotation => ErrorKind::Annotation,
                Stage::Classify | Stage::Persist => ErrorKind::Sink,
            },
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    /// Only network-level resolve/download failures are retried
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientFetch
    }

    /// Whether this error aborts the video's pipeline
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Scene | ErrorKind::Annotation | ErrorKind::RuleLoad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_kind_follows_stage() {
        let resolve = PipelineError::Timeout { stage: Stage::Resolve, seconds: 5 };
        assert_eq!(resolve.kind(), ErrorKind::TransientFetch);
        assert!(resolve.is_retryable());

        let probe = PipelineError::Timeout { stage: Stage::Probe, seconds: 5 };
        assert_eq!(probe.kind(), ErrorKind::Probe);
        assert!(probe.is_fatal());

        let scene = PipelineError::Timeout { stage: Stage::Scene, seconds: 5 };
        assert_eq!(scene.kind(), ErrorKind::Scene);
        assert!(!scene.is_fatal());
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(PipelineError::transient("http://x", "reset").is_retryable());
        assert!(!PipelineError::Download("404".into()).is_retryable());
        assert!(!PipelineError::NotAVideo("http://x".into()).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
    }

    #[test]
    fn test_annotation_errors_degrade() {
        let err = PipelineError::AnnotationStatus { status: 503, body: "busy".into() };
        assert_eq!(err.kind(), ErrorKind::Annotation);
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "annotation backend returned 503: busy");
    }
}
