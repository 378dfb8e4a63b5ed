use criterion::{black_box, criterion_group, criterion_main, Criterion};
use video_annotator_rust::rules::custom::tokenize;
use video_annotator_rust::{CustomRuleSet, RuleEngine, VideoMetadata};

fn metadata() -> VideoMetadata {
    VideoMetadata {
        duration: 4200.0,
        codec: "h264".to_string(),
        width: 3840,
        height: 2160,
        frame_rate: 59.94,
        audio_codec: Some("aac".to_string()),
        audio_channels: Some(2),
        audio_sample_rate: Some(48000),
        has_subtitle: true,
        size_bytes: 4_000_000_000,
        format_name: Some("mov,mp4,m4a,3gp,3g2,mj2".to_string()),
    }
}

fn custom_rules(count: usize) -> CustomRuleSet {
    let rules: Vec<String> = (0..count)
        .map(|i| {
            format!(
                r#"{{"description_keywords": ["keyword{i}", "drone"], "metadata_conditions": {{"duration_gt": {i}}}, "tags": ["Tag {i}"]}}"#
            )
        })
        .collect();
    CustomRuleSet::from_json_str(&format!(r#"{{"rules": [{}]}}"#, rules.join(",")), false).unwrap()
}

const DESCRIPTION: &str = "Aerial drone footage of surfers riding waves at sunset, \
    a fast action sequence over the water followed by a night shot of the harbour.";

/// Benchmark built-in rules only
fn bench_builtin_rules(c: &mut Criterion) {
    let engine = RuleEngine::default();
    let meta = metadata();
    let scenes: Vec<f64> = (0..200).map(|i| i as f64 * 2.5).collect();

    c.bench_function("builtin_rules", |b| {
        b.iter(|| engine.evaluate(black_box(&meta), black_box(&scenes), black_box(Some(DESCRIPTION))))
    });
}

/// Benchmark evaluation with a large custom rule set
fn bench_custom_rules(c: &mut Criterion) {
    let meta = metadata();
    let scenes: Vec<f64> = (0..200).map(|i| i as f64 * 2.5).collect();

    for count in [10, 100, 1000] {
        let engine = RuleEngine::new(custom_rules(count));
        c.bench_function(&format!("custom_rules_{}", count), |b| {
            b.iter(|| engine.evaluate(black_box(&meta), black_box(&scenes), black_box(Some(DESCRIPTION))))
        });
    }
}

/// Benchmark description tokenization
fn bench_tokenize(c: &mut Criterion) {
    let long_description = DESCRIPTION.repeat(50);

    c.bench_function("tokenize_description", |b| {
        b.iter(|| tokenize(black_box(&long_description), false))
    });
}

criterion_group!(benches, bench_builtin_rules, bench_custom_rules, bench_tokenize);
criterion_main!(benches);
