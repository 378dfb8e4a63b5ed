//! Vision-language annotation backend.
//!
//! The pipeline only depends on the [`Annotator`] capability; the HTTP backend
//! and the static variant are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AnnotationConfig;
use crate::error::{PipelineError, PipelineResult};

/// Produces a natural-language description of a video
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn describe(&self, locator: &str, instruction: &str) -> PipelineResult<String>;
}

#[derive(Debug, Serialize)]
struct DescribeRequest<'a> {
    video_url: &'a str,
    instruction: &'a str,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    description: String,
}

/// Annotation backend reached over HTTPS with a JSON request/response
pub struct HttpAnnotator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAnnotator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Annotator for HttpAnnotator {
    async fn describe(&self, locator: &str, instruction: &str) -> PipelineResult<String> {
        let request = DescribeRequest {
            video_url: locator,
            instruction,
        };

        debug!("Sending annotation request to {}", self.endpoint);

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::Annotation(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::AnnotationStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: DescribeResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Annotation(format!("invalid response body: {}", e)))?;

        Ok(parsed.description)
    }
}

/// Fixed-answer annotator for tests and offline runs
#[derive(Debug, Clone)]
pub enum StaticAnnotator {
    Describe(String),
    Fail(String),
}

#[async_trait]
impl Annotator for StaticAnnotator {
    async fn describe(&self, _locator: &str, _instruction: &str) -> PipelineResult<String> {
        match self {
            StaticAnnotator::Describe(text) => Ok(text.clone()),
            StaticAnnotator::Fail(reason) => Err(PipelineError::Annotation(reason.clone())),
        }
    }
}

/// Create the annotator selected by configuration; `None` when annotation is disabled
pub fn create_annotator(config: &AnnotationConfig, timeout: Duration) -> PipelineResult<Option<Arc<dyn Annotator>>> {
    if !config.enabled {
        return Ok(None);
    }

    let endpoint = config.endpoint_url().ok_or_else(|| {
        PipelineError::Config(format!("no {:?} annotation endpoint configured", config.endpoint))
    })?;

    info!("🤖 Annotation backend: {:?} endpoint {}", config.endpoint, endpoint);
    let annotator = HttpAnnotator::new(endpoint, config.api_key.clone(), timeout)?;
    Ok(Some(Arc::new(annotator)))
}

/// Load extra instructions, one per non-empty line
pub async fn load_templates(path: &Path) -> PipelineResult<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        PipelineError::Config(format!("cannot read templates file {}: {}", path.display(), e))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
