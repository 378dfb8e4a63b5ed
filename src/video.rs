use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::record::VideoMetadata;

/// Structural metadata extraction
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, local_path: &Path) -> PipelineResult<VideoMetadata>;
}

/// Scene-change detection; returns strictly increasing timestamps in seconds
#[async_trait]
pub trait SceneDetector: Send + Sync {
    async fn detect_scenes(&self, local_path: &Path, threshold: f64) -> PipelineResult<Vec<f64>>;
}

/// Prober backed by the `ffprobe` command line tool
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: String,
}

impl FfprobeProber {
    pub fn new() -> Self {
        Self {
            binary: "ffprobe".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, local_path: &Path) -> PipelineResult<VideoMetadata> {
        let output = Command::new(&self.binary)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(local_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Probe(format!("cannot run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(PipelineError::Probe(format!(
                "{} failed for {}",
                self.binary,
                local_path.display()
            )));
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        let file_size = tokio::fs::metadata(local_path).await.map(|m| m.len()).ok();
        let metadata = parse_ffprobe_output(&json_str, file_size)?;

        info!(
            "📹 Analyzed video: {} ({}x{}, {:.1}fps, {:.1}s, {})",
            local_path.display(),
            metadata.width,
            metadata.height,
            metadata.frame_rate,
            metadata.duration,
            metadata.codec
        );

        Ok(metadata)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    format_name: Option<String>,
}

/// Parse `ffprobe -show_format -show_streams` JSON into metadata.
///
/// A missing video stream, or a non-positive frame size or frame rate, is a
/// probe failure.
pub fn parse_ffprobe_output(json: &str, file_size: Option<u64>) -> PipelineResult<VideoMetadata> {
    let data: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| PipelineError::Probe(format!("unreadable ffprobe output: {}", e)))?;

    let video = data
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PipelineError::Probe("no video stream found".to_string()))?;
    let audio = data.streams.iter().find(|s| s.codec_type.as_deref() == Some("audio"));
    let has_subtitle = data
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("subtitle"));

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(PipelineError::Probe(format!("invalid frame size {}x{}", width, height)));
    }

    let frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| PipelineError::Probe("missing or zero frame rate".to_string()))?;

    let format = data.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let size_bytes = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<u64>().ok())
        .or(file_size)
        .unwrap_or(0);

    Ok(VideoMetadata {
        duration,
        codec: video.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        width,
        height,
        frame_rate,
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        audio_channels: audio.and_then(|a| a.channels),
        audio_sample_rate: audio
            .and_then(|a| a.sample_rate.as_deref())
            .and_then(|s| s.parse().ok()),
        has_subtitle,
        size_bytes,
        format_name: format.and_then(|f| f.format_name.clone()),
    })
}

/// Parse "num/den" or plain decimal frame rates; zero rates are rejected
fn parse_frame_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Scene detector backed by ffmpeg's scene score and `showinfo` filter
#[derive(Debug, Clone)]
pub struct FfmpegSceneDetector {
    binary: String,
}

impl FfmpegSceneDetector {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

impl Default for FfmpegSceneDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SceneDetector for FfmpegSceneDetector {
    async fn detect_scenes(&self, local_path: &Path, threshold: f64) -> PipelineResult<Vec<f64>> {
        let filter = format!("select='gt(scene,{})',showinfo", threshold);

        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-nostats", "-i"])
            .arg(local_path)
            .args(["-filter:v", filter.as_str(), "-an", "-f", "null", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Scene(format!("cannot run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(PipelineError::Scene(format!(
                "{} exited with {} for {}",
                self.binary,
                output.status,
                local_path.display()
            )));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let scenes = parse_showinfo_timestamps(&stderr);

        info!("🎬 Detected {} scene changes in {}", scenes.len(), local_path.display());
        Ok(scenes)
    }
}

/// Extract `pts_time:` values from showinfo output as strictly increasing seconds
pub fn parse_showinfo_timestamps(output: &str) -> Vec<f64> {
    let timestamps = output
        .lines()
        .filter_map(|line| line.split("pts_time:").nth(1))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|value| value.parse::<f64>().ok());

    let scenes = normalize_scenes(timestamps);
    debug!("Parsed {} scene timestamps", scenes.len());
    scenes
}

/// Sort, drop invalid values and duplicates so the result is strictly increasing
pub fn normalize_scenes(timestamps: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut scenes: Vec<f64> = timestamps
        .into_iter()
        .filter(|t| t.is_finite() && *t >= 0.0)
        .collect();
    scenes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    scenes.dedup();
    scenes
}

/// Turn boundary points into start/end intervals covering the whole video
pub fn scene_intervals(scenes: &[f64], duration: f64) -> Vec<(f64, f64)> {
    let mut bounds = vec![0.0];
    bounds.extend(scenes.iter().copied().filter(|t| *t > 0.0 && *t < duration));
    bounds.push(duration);

    bounds
        .windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| (w[0], w[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFPROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "avg_frame_rate": "60000/1001", "r_frame_rate": "60/1"},
            {"codec_type": "audio", "codec_name": "aac", "channels": 2, "sample_rate": "48000"},
            {"codec_type": "subtitle", "codec_name": "mov_text"}
        ],
        "format": {"duration": "734.5", "size": "1048576", "format_name": "mov,mp4,m4a"}
    }"#;

    #[test]
    fn test_parse_ffprobe_output() {
        let metadata = parse_ffprobe_output(FFPROBE_JSON, None).unwrap();
        assert_eq!(metadata.codec, "h264");
        assert_eq!((metadata.width, metadata.height), (1920, 1080));
        assert!((metadata.frame_rate - 59.94).abs() < 0.01);
        assert_eq!(metadata.duration, 734.5);
        assert_eq!(metadata.audio_codec.as_deref(), Some("aac"));
        assert_eq!(metadata.audio_channels, Some(2));
        assert_eq!(metadata.audio_sample_rate, Some(48000));
        assert!(metadata.has_subtitle);
        assert_eq!(metadata.size_bytes, 1_048_576);
    }

    #[test]
    fn test_parse_ffprobe_without_video_stream_fails() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}], "format": {}}"#;
        assert!(matches!(parse_ffprobe_output(json, None), Err(PipelineError::Probe(_))));
    }

    #[test]
    fn test_parse_ffprobe_falls_back_to_file_size() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "vp9", "width": 640,
            "height": 360, "avg_frame_rate": "0/0", "r_frame_rate": "30/1"}]}"#;
        let metadata = parse_ffprobe_output(json, Some(42)).unwrap();
        assert_eq!(metadata.frame_rate, 30.0);
        assert_eq!(metadata.size_bytes, 42);
        assert_eq!(metadata.duration, 0.0);
        assert!(!metadata.has_subtitle);
    }

    #[test]
    fn test_parse_showinfo_timestamps() {
        let stderr = "\
[Parsed_showinfo_1 @ 0x1] n:   0 pts:  12012 pts_time:12.012  duration: 1001
[Parsed_showinfo_1 @ 0x1] n:   1 pts:   3003 pts_time:3.003 duration: 1001
frame=  2 fps=0.0 q=-0.0 Lsize=N/A
[Parsed_showinfo_1 @ 0x1] n:   2 pts:   3003 pts_time:3.003 duration: 1001";
        assert_eq!(parse_showinfo_timestamps(stderr), vec![3.003, 12.012]);
    }

    #[tokio::test]
    async fn test_missing_prober_binary_is_probe_error() {
        let prober = FfprobeProber::with_binary("definitely-not-ffprobe-binary");
        let err = prober.probe(Path::new("clip.mp4")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Probe(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_scene_intervals() {
        assert_eq!(
            scene_intervals(&[10.0, 25.0], 40.0),
            vec![(0.0, 10.0), (10.0, 25.0), (25.0, 40.0)]
        );
        assert_eq!(scene_intervals(&[], 12.0), vec![(0.0, 12.0)]);
    }
}
