use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{error, info, warn};

use video_annotator_rust::config::{EndpointKind, SinkKind};
use video_annotator_rust::logging::init_logging;
use video_annotator_rust::{load_manifest, Config, Pipeline, VideoJob};

fn cli() -> Command {
    Command::new("Video Annotator (Rust)")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Resolve, probe, annotate and tag videos")
        .arg(
            Arg::new("urls")
                .short('u')
                .long("urls")
                .value_name("URL")
                .help("Video or web page URLs to process")
                .num_args(1..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("manifest")
                .short('m')
                .long("manifest")
                .value_name("CSV")
                .help("CSV manifest with file_name, file_size, last_modified, public_url columns"),
        )
        .group(ArgGroup::new("input").args(["urls", "manifest"]).required(true))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for records and the batch summary"),
        )
        .arg(
            Arg::new("download-dir")
                .long("download-dir")
                .value_name("DIR")
                .help("Directory for downloaded videos"),
        )
        .arg(
            Arg::new("scene-threshold")
                .short('t')
                .long("scene-threshold")
                .value_name("FLOAT")
                .help("Scene change threshold between 0 and 1")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("instruction")
                .short('i')
                .long("instruction")
                .value_name("TEXT")
                .help("Instruction sent to the annotation backend"),
        )
        .arg(
            Arg::new("priority-keywords")
                .long("priority-keywords")
                .value_name("WORDS")
                .help("Comma-separated aspects the annotation should focus on")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("annotation-url")
                .long("annotation-url")
                .value_name("URL")
                .help("Annotation endpoint; enables annotation"),
        )
        .arg(
            Arg::new("use-vpc")
                .long("use-vpc")
                .help("Use the VPC annotation endpoint instead of the public one")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("tag-rules")
                .long("tag-rules")
                .value_name("JSON")
                .help("Custom tagging rules file"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Number of videos processed concurrently")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log verbosity (error, warn, info, debug, trace)"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .help("Also write daily rolling log files to this directory"),
        )
        .arg(
            Arg::new("sink")
                .long("sink")
                .value_name("SINK")
                .help("Output sink; repeat for several")
                .value_parser(["json", "sqlite"])
                .action(ArgAction::Append),
        )
}

/// Command line flags take precedence over file and environment settings
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(dir) = matches.get_one::<String>("output") {
        config.paths.output_dir = PathBuf::from(dir);
    }
    if let Some(dir) = matches.get_one::<String>("download-dir") {
        config.paths.download_dir = PathBuf::from(dir);
    }
    if let Some(threshold) = matches.get_one::<f64>("scene-threshold") {
        config.scene.threshold = *threshold;
    }
    if let Some(instruction) = matches.get_one::<String>("instruction") {
        config.annotation.instruction = instruction.clone();
    }
    if let Some(keywords) = matches.get_many::<String>("priority-keywords") {
        config.annotation.priority_keywords = keywords
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
    }
    if matches.get_flag("use-vpc") {
        config.annotation.endpoint = EndpointKind::Vpc;
    }
    if let Some(url) = matches.get_one::<String>("annotation-url") {
        match config.annotation.endpoint {
            EndpointKind::Public => config.annotation.public_url = Some(url.clone()),
            EndpointKind::Vpc => config.annotation.vpc_url = Some(url.clone()),
        }
        config.annotation.enabled = true;
    }
    if let Some(rules) = matches.get_one::<String>("tag-rules") {
        config.rules.file = Some(PathBuf::from(rules));
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.performance.max_concurrent_videos = *workers;
    }
    if let Some(dir) = matches.get_one::<String>("log-dir") {
        config.logging.log_dir = Some(PathBuf::from(dir));
    }
    if let Some(sinks) = matches.get_many::<String>("sink") {
        config.output.sinks = sinks
            .map(|s| match s.as_str() {
                "sqlite" => SinkKind::Sqlite,
                _ => SinkKind::Json,
            })
            .collect();
    }
}

fn collect_jobs(matches: &ArgMatches) -> Result<Vec<VideoJob>> {
    if let Some(path) = matches.get_one::<String>("manifest") {
        return load_manifest(&PathBuf::from(path)).context("Failed to load manifest");
    }

    Ok(matches
        .get_many::<String>("urls")
        .map(|urls| urls.map(VideoJob::new).collect())
        .unwrap_or_default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;
    config.apply_env_overrides();
    apply_cli_overrides(&mut config, &matches);

    let _log_guard = init_logging(&config.logging, matches.get_one::<String>("log-level").map(String::as_str))?;

    config.validate().context("Invalid configuration")?;
    let jobs = collect_jobs(&matches)?;

    info!("🚀 Video Annotator (Rust) starting...");
    info!("{}", config.summary());

    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to initialise pipeline")?;

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️  Interrupt received, cancelling in-flight work");
            cancel.cancel();
        }
    });

    let start_time = std::time::Instant::now();
    let summary = pipeline.process_batch(jobs).await;
    let duration = start_time.elapsed();

    info!("🎉 Processing completed in {:.2}s", duration.as_secs_f64());
    info!("✅ Persisted: {}", summary.persisted);
    info!("❌ Failed: {}", summary.failed);
    if summary.cancelled > 0 {
        info!("⏹️  Cancelled: {}", summary.cancelled);
    }
    info!("📊 Success rate: {:.1}%", summary.success_rate());

    for outcome in summary.results.iter().filter(|r| r.reason.is_some()) {
        error!(
            "{} [{}]: {}",
            outcome.video_id,
            outcome.stage.map(|s| s.as_str()).unwrap_or("-"),
            outcome.reason.as_deref().unwrap_or_default()
        );
    }

    Ok(())
}
