//! Persistence of finished records.
//!
//! Every sink upserts by `video_id`: persisting the same record twice leaves
//! the same stored state as persisting it once.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, SinkKind};
use crate::error::{PipelineError, PipelineResult};
use crate::record::{sanitize_identifier, VideoRecord};

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;
    async fn persist(&self, record: &VideoRecord) -> PipelineResult<()>;
}

/// One pretty-printed JSON file per record
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_identifier(video_id)))
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn persist(&self, record: &VideoRecord) -> PipelineResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::sink(self.name(), format!("cannot create {}: {}", self.dir.display(), e)))?;

        let mut json = serde_json::to_string_pretty(record)
            .map_err(|e| PipelineError::sink(self.name(), e))?;
        json.push('\n');

        let target = self.path_for(&record.video_id);
        let temp = target.with_extension("json.tmp");

        tokio::fs::write(&temp, json.as_bytes())
            .await
            .map_err(|e| PipelineError::sink(self.name(), format!("write {} failed: {}", temp.display(), e)))?;

        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PipelineError::sink(
                self.name(),
                format!("cannot move record into place at {}: {}", target.display(), e),
            ));
        }

        debug!("💾 Record written to {}", target.display());
        Ok(())
    }
}

/// Document-store style upsert into a SQLite table
#[derive(Debug, Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub async fn connect(db_path: &Path) -> PipelineResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PipelineError::sink("sqlite", format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| PipelineError::sink("sqlite", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| PipelineError::sink("sqlite", e))?;

        let sink = Self::from_pool(pool).await?;
        info!("🗄️  SQLite sink ready at {}", db_path.display());
        Ok(sink)
    }

    /// Wrap an existing pool, creating the table if needed
    pub async fn from_pool(pool: SqlitePool) -> PipelineResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS video_records (
                video_id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                classification TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                record_json TEXT NOT NULL,
                processed_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| PipelineError::sink("sqlite", e))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read a stored record back
    pub async fn fetch(&self, video_id: &str) -> PipelineResult<Option<VideoRecord>> {
        let row: Option<String> = sqlx::query_scalar("SELECT record_json FROM video_records WHERE video_id = ?")
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PipelineError::sink("sqlite", e))?;

        row.map(|json| serde_json::from_str(&json).map_err(|e| PipelineError::sink("sqlite", e)))
            .transpose()
    }

    pub async fn count(&self) -> PipelineResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM video_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::sink("sqlite", e))
    }
}

#[async_trait]
impl Sink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn persist(&self, record: &VideoRecord) -> PipelineResult<()> {
        let record_json = serde_json::to_string(record).map_err(|e| PipelineError::sink(self.name(), e))?;
        let tags_json = serde_json::to_string(&record.tags).map_err(|e| PipelineError::sink(self.name(), e))?;
        let processed_at = record.processed_at.map(|t| t.to_rfc3339());

        sqlx::query(
            r#"
            INSERT INTO video_records (video_id, source_url, classification, tags_json, record_json, processed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(video_id) DO UPDATE SET
                source_url = excluded.source_url,
                classification = excluded.classification,
                tags_json = excluded.tags_json,
                record_json = excluded.record_json,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(&record.video_id)
        .bind(&record.source_url)
        .bind(&record.classification)
        .bind(&tags_json)
        .bind(&record_json)
        .bind(&processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::sink(self.name(), e))?;

        debug!("🗄️  Upserted {}", record.video_id);
        Ok(())
    }
}

/// Fan a record out to several sinks; every sink is attempted
pub struct CompositeSink {
    sinks: Vec<Arc<dyn Sink>>,
    name: String,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        let name = sinks.iter().map(|s| s.name()).collect::<Vec<_>>().join("+");
        Self { sinks, name }
    }
}

#[async_trait]
impl Sink for CompositeSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self, record: &VideoRecord) -> PipelineResult<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.persist(record).await {
                warn!("Sink {} failed for {}: {}", sink.name(), record.video_id, e);
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::sink(self.name.clone(), failures.join("; ")))
        }
    }
}

/// Build the sink(s) named in `output.sinks`
pub async fn create_sink(config: &Config) -> PipelineResult<Arc<dyn Sink>> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    for kind in &config.output.sinks {
        match kind {
            SinkKind::Json => sinks.push(Arc::new(JsonFileSink::new(&config.paths.output_dir))),
            SinkKind::Sqlite => sinks.push(Arc::new(SqliteSink::connect(&config.output.database_path).await?)),
        }
    }

    match sinks.len() {
        0 => Err(PipelineError::Config("no output sinks configured".to_string())),
        1 => Ok(sinks.remove(0)),
        _ => Ok(Arc::new(CompositeSink::new(sinks))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VideoJob;
    use tempfile::TempDir;

    fn record(url: &str) -> VideoRecord {
        let mut record = VideoRecord::new(&VideoJob::new(url));
        record.tags.insert("HD".to_string());
        record.classification = "Cinematic".to_string();
        record
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn persist(&self, _record: &VideoRecord) -> PipelineResult<()> {
            Err(PipelineError::sink("broken", "disk full"))
        }
    }

    #[tokio::test]
    async fn test_json_sink_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(temp_dir.path());
        let rec = record("https://cdn.example.com/clip one.mp4");

        sink.persist(&rec).await.unwrap();
        let first = std::fs::read(sink.path_for(&rec.video_id)).unwrap();
        sink.persist(&rec).await.unwrap();
        let second = std::fs::read(sink.path_for(&rec.video_id)).unwrap();

        assert_eq!(first, second);
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let parsed: VideoRecord = serde_json::from_slice(&first).unwrap();
        assert_eq!(parsed, rec);
    }

    #[tokio::test]
    async fn test_json_sink_overwrites_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(temp_dir.path());
        let mut rec = record("https://cdn.example.com/a.mp4");

        sink.persist(&rec).await.unwrap();
        rec.classification = "Action".to_string();
        sink.persist(&rec).await.unwrap();

        let stored: VideoRecord =
            serde_json::from_slice(&std::fs::read(sink.path_for(&rec.video_id)).unwrap()).unwrap();
        assert_eq!(stored.classification, "Action");
    }

    #[tokio::test]
    async fn test_sqlite_sink_upserts_by_video_id() {
        let temp_dir = TempDir::new().unwrap();
        let sink = SqliteSink::connect(&temp_dir.path().join("db/records.db")).await.unwrap();
        let mut rec = record("https://cdn.example.com/a.mp4");

        sink.persist(&rec).await.unwrap();
        sink.persist(&rec).await.unwrap();
        assert_eq!(sink.count().await.unwrap(), 1);
        assert_eq!(sink.fetch(&rec.video_id).await.unwrap(), Some(rec.clone()));

        rec.tags.insert("Aerial Shot".to_string());
        sink.persist(&rec).await.unwrap();
        assert_eq!(sink.count().await.unwrap(), 1);
        assert_eq!(sink.fetch(&rec.video_id).await.unwrap().unwrap().tags.len(), 2);

        assert!(sink.fetch("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_composite_sink_reports_failures_after_trying_all() {
        let temp_dir = TempDir::new().unwrap();
        let json: Arc<dyn Sink> = Arc::new(JsonFileSink::new(temp_dir.path()));
        let composite = CompositeSink::new(vec![Arc::new(FailingSink), json]);
        let rec = record("https://cdn.example.com/a.mp4");

        let err = composite.persist(&rec).await.unwrap_err();
        assert!(matches!(err, PipelineError::Sink { .. }));
        assert_eq!(composite.name(), "broken+json");
        assert!(temp_dir.path().join(format!("{}.json", rec.video_id)).exists());
    }

    #[tokio::test]
    async fn test_create_sink_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = temp_dir.path().to_path_buf();
        config.output.database_path = temp_dir.path().join("records.db");
        config.output.sinks = vec![SinkKind::Json, SinkKind::Sqlite];

        let sink = create_sink(&config).await.unwrap();
        assert_eq!(sink.name(), "json+sqlite");

        config.output.sinks.clear();
        assert!(create_sink(&config).await.is_err());
    }
}
