use std::collections::BTreeSet;

use super::{RuleContext, TagRule};

/// Fixed tagging rules evaluated before any custom rule
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinRule {
    /// frame rate above the threshold
    HighFrameRate { min_exclusive: f64, tag: &'static str },
    /// frame width at or above the threshold
    HighDefinition { min_width: u32, tag: &'static str },
    /// resolution label mentions the given class
    ResolutionClass { label: &'static str, tag: &'static str },
    Subtitled { tag: &'static str },
    /// duration above the threshold, in seconds
    LongDuration { min_exclusive: f64, tag: &'static str },
    Codec { codec: &'static str, tag: &'static str },
    /// case-insensitive substring of the description
    DescriptionKeyword { needle: &'static str, tag: &'static str },
}

/// The built-in rule list, in evaluation order
pub fn builtin_rules() -> Vec<BuiltinRule> {
    vec![
        BuiltinRule::HighFrameRate { min_exclusive: 30.0, tag: "High-FPS" },
        BuiltinRule::HighDefinition { min_width: 1920, tag: "HD" },
        BuiltinRule::ResolutionClass { label: "4K", tag: "High Resolution" },
        BuiltinRule::Subtitled { tag: "Subtitled" },
        BuiltinRule::LongDuration { min_exclusive: 600.0, tag: "Extended Play" },
        BuiltinRule::Codec { codec: "h264", tag: "H.264 Codec" },
        BuiltinRule::DescriptionKeyword { needle: "action", tag: "Action" },
        BuiltinRule::DescriptionKeyword { needle: "water", tag: "Water-related content" },
        BuiltinRule::DescriptionKeyword { needle: "night shot", tag: "Night-time Filming" },
    ]
}

impl BuiltinRule {
    fn tag(&self) -> &'static str {
        match self {
            BuiltinRule::HighFrameRate { tag, .. }
            | BuiltinRule::HighDefinition { tag, .. }
            | BuiltinRule::ResolutionClass { tag, .. }
            | BuiltinRule::Subtitled { tag }
            | BuiltinRule::LongDuration { tag, .. }
            | BuiltinRule::Codec { tag, .. }
            | BuiltinRule::DescriptionKeyword { tag, .. } => tag,
        }
    }

    pub fn matches(&self, ctx: &RuleContext<'_>) -> bool {
        let meta = ctx.metadata;
        match self {
            BuiltinRule::HighFrameRate { min_exclusive, .. } => meta.frame_rate > *min_exclusive,
            BuiltinRule::HighDefinition { min_width, .. } => meta.width >= *min_width,
            BuiltinRule::ResolutionClass { label, .. } => ctx.resolution_label.contains(label),
            BuiltinRule::Subtitled { .. } => meta.has_subtitle,
            BuiltinRule::LongDuration { min_exclusive, .. } => meta.duration > *min_exclusive,
            BuiltinRule::Codec { codec, .. } => meta.codec == *codec,
            BuiltinRule::DescriptionKeyword { needle, .. } => ctx.description_contains(needle),
        }
    }
}

impl TagRule for BuiltinRule {
    fn name(&self) -> String {
        format!("builtin:{}", self.tag())
    }

    fn apply(&self, ctx: &RuleContext<'_>, tags: &mut BTreeSet<String>) {
        if self.matches(ctx) {
            tags.insert(self.tag().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VideoMetadata;

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            duration: 30.0,
            codec: "hevc".to_string(),
            width: 1280,
            height: 720,
            frame_rate: 30.0,
            audio_codec: None,
            audio_channels: None,
            audio_sample_rate: None,
            has_subtitle: false,
            size_bytes: 0,
            format_name: None,
        }
    }

    fn apply_all(meta: &VideoMetadata, description: Option<&str>) -> BTreeSet<String> {
        let ctx = RuleContext::new(meta, &[], description);
        let mut tags = BTreeSet::new();
        for rule in builtin_rules() {
            rule.apply(&ctx, &mut tags);
        }
        tags
    }

    #[test]
    fn test_thresholds_are_strict_where_specified() {
        // 30 fps and 600 s sit exactly on the boundary and do not match
        let mut meta = metadata();
        meta.duration = 600.0;
        assert!(apply_all(&meta, None).is_empty());

        meta.frame_rate = 30.01;
        meta.duration = 600.5;
        let tags = apply_all(&meta, None);
        assert!(tags.contains("High-FPS"));
        assert!(tags.contains("Extended Play"));
    }

    #[test]
    fn test_4k_is_hd_and_high_resolution() {
        let mut meta = metadata();
        meta.width = 3840;
        meta.height = 2160;
        let tags = apply_all(&meta, None);
        assert!(tags.contains("HD"));
        assert!(tags.contains("High Resolution"));
    }

    #[test]
    fn test_description_keywords_are_case_insensitive() {
        let tags = apply_all(&metadata(), Some("ACTION by the Water, a Night Shot"));
        assert!(tags.contains("Action"));
        assert!(tags.contains("Water-related content"));
        assert!(tags.contains("Night-time Filming"));
    }

    #[test]
    fn test_codec_match_is_exact() {
        let mut meta = metadata();
        meta.codec = "h264".to_string();
        assert!(apply_all(&meta, None).contains("H.264 Codec"));

        meta.codec = "H264".to_string();
        assert!(!apply_all(&meta, None).contains("H.264 Codec"));
    }
}
