use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{error, info, warn};

use super::{RuleContext, TagRule};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(default)]
    description_keywords: Option<Vec<String>>,
    #[serde(default)]
    metadata_conditions: Option<RawCondition>,
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCondition {
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    duration_gt: Option<f64>,
}

/// Metadata clauses of a custom rule; all present clauses must hold
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataCondition {
    /// exact "WxH" match
    pub resolution: Option<String>,
    /// strict lower bound on duration in seconds
    pub duration_gt: Option<f64>,
}

impl MetadataCondition {
    pub fn matches(&self, ctx: &RuleContext<'_>) -> bool {
        if let Some(resolution) = &self.resolution {
            if ctx.resolution != *resolution {
                return false;
            }
        }
        if let Some(min) = self.duration_gt {
            if ctx.metadata.duration <= min {
                return false;
            }
        }
        true
    }
}

/// A user-defined tagging rule
///
/// The keyword test and the metadata condition are independent: either one
/// matching adds the rule's tags.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomRule {
    pub index: usize,
    /// Normalized keywords; multi-word keywords match as a phrase
    pub keywords: Vec<String>,
    pub condition: Option<MetadataCondition>,
    pub tags: Vec<String>,
    pub case_sensitive: bool,
}

impl CustomRule {
    fn keyword_matches(&self, ctx: &RuleContext<'_>) -> bool {
        self.keywords
            .iter()
            .any(|keyword| ctx.has_keyword(keyword, self.case_sensitive))
    }

    pub fn is_match(&self, ctx: &RuleContext<'_>) -> bool {
        self.keyword_matches(ctx) || self.condition.as_ref().is_some_and(|c| c.matches(ctx))
    }
}

impl TagRule for CustomRule {
    fn name(&self) -> String {
        format!("custom#{}", self.index)
    }

    fn apply(&self, ctx: &RuleContext<'_>, tags: &mut BTreeSet<String>) {
        if self.is_match(ctx) {
            tags.extend(self.tags.iter().cloned());
        }
    }
}

/// Split text into whitespace tokens with surrounding punctuation removed
pub fn tokenize(text: &str, case_sensitive: bool) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .map(|token| normalize(token, case_sensitive))
        .collect()
}

/// Tokens joined by single spaces with a space on each side, for phrase lookups
pub fn token_phrase(text: &str, case_sensitive: bool) -> String {
    let tokens = tokenize(text, case_sensitive);
    if tokens.is_empty() {
        String::new()
    } else {
        format!(" {} ", tokens.join(" "))
    }
}

fn normalize(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

/// Ordered, read-only list of custom rules
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomRuleSet {
    rules: Vec<CustomRule>,
}

impl CustomRuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[CustomRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Parse a `{"rules": [...]}` document
    ///
    /// A document that is not valid JSON or lacks the `rules` array is an
    /// error. Individual malformed rules are skipped with a warning.
    pub fn from_json_str(content: &str, case_sensitive: bool) -> PipelineResult<Self> {
        let document: Value = serde_json::from_str(content)
            .map_err(|e| PipelineError::RuleLoad(format!("invalid JSON: {}", e)))?;

        let entries = document
            .get("rules")
            .and_then(Value::as_array)
            .ok_or_else(|| PipelineError::RuleLoad("expected an object with a \"rules\" array".to_string()))?;

        let mut rules = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match parse_rule(index, entry, case_sensitive) {
                Ok(rule) => rules.push(rule),
                Err(reason) => warn!("⚠️  Skipping custom rule #{}: {}", index, reason),
            }
        }

        Ok(Self { rules })
    }

    /// Load rules from a file; a missing file yields an empty set
    pub async fn load(path: &Path, case_sensitive: bool) -> PipelineResult<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No custom rules at {}, using built-in rules only", path.display());
                return Ok(Self::empty());
            }
            Err(e) => {
                return Err(PipelineError::RuleLoad(format!("cannot read {}: {}", path.display(), e)));
            }
        };

        let set = Self::from_json_str(&content, case_sensitive)?;
        info!("📋 Loaded {} custom rule(s) from {}", set.len(), path.display());
        Ok(set)
    }

    /// Like [`CustomRuleSet::load`], but a load failure is logged and treated as no rules
    pub async fn load_or_empty(path: Option<&Path>, case_sensitive: bool) -> Self {
        let Some(path) = path else {
            return Self::empty();
        };

        match Self::load(path, case_sensitive).await {
            Ok(set) => set,
            Err(e) => {
                error!("❌ Failed to load custom rules: {}", e);
                Self::empty()
            }
        }
    }
}

fn parse_rule(index: usize, entry: &Value, case_sensitive: bool) -> Result<CustomRule, String> {
    let raw: RawRule = serde_json::from_value(entry.clone()).map_err(|e| e.to_string())?;

    let tags: Vec<String> = raw
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if tags.is_empty() {
        return Err("rule has no tags".to_string());
    }

    let keywords: Vec<String> = raw
        .description_keywords
        .unwrap_or_default()
        .iter()
        .map(|k| tokenize(k, case_sensitive).join(" "))
        .filter(|k| !k.is_empty())
        .collect();

    let condition = match raw.metadata_conditions {
        Some(RawCondition { resolution: None, duration_gt: None }) => {
            return Err("metadata_conditions has no clauses".to_string());
        }
        Some(RawCondition { resolution, duration_gt }) => Some(MetadataCondition {
            resolution: resolution.map(|r| r.trim().to_string()),
            duration_gt,
        }),
        None => None,
    };

    if keywords.is_empty() && condition.is_none() {
        return Err("rule needs description_keywords or metadata_conditions".to_string());
    }

    Ok(CustomRule {
        index,
        keywords,
        condition,
        tags,
        case_sensitive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VideoMetadata;

    fn metadata(width: u32, height: u32, duration: f64) -> VideoMetadata {
        VideoMetadata {
            duration,
            codec: "vp9".to_string(),
            width,
            height,
            frame_rate: 24.0,
            audio_codec: None,
            audio_channels: None,
            audio_sample_rate: None,
            has_subtitle: false,
            size_bytes: 0,
            format_name: None,
        }
    }

    fn apply(set: &CustomRuleSet, meta: &VideoMetadata, description: Option<&str>) -> BTreeSet<String> {
        let ctx = RuleContext::new(meta, &[], description);
        let mut tags = BTreeSet::new();
        for rule in set.rules() {
            rule.apply(&ctx, &mut tags);
        }
        tags
    }

    #[test]
    fn test_tokenize_trims_punctuation() {
        assert_eq!(tokenize("Drone, over the SEA!", false), vec!["drone", "over", "the", "sea"]);
        assert_eq!(tokenize("Drone", true), vec!["Drone"]);
        assert!(tokenize("  ... ", false).is_empty());
        assert_eq!(token_phrase("Night  shot.", false), " night shot ");
        assert_eq!(token_phrase("", false), "");
    }

    #[test]
    fn test_keyword_matches_whole_tokens_only() {
        let set = CustomRuleSet::from_json_str(
            r#"{"rules": [{"description_keywords": ["sea"], "tags": ["Ocean"]}]}"#,
            false,
        )
        .unwrap();
        let meta = metadata(640, 480, 10.0);

        assert!(apply(&set, &meta, Some("Waves on the Sea.")).contains("Ocean"));
        assert!(apply(&set, &meta, Some("A seaside town")).is_empty());
        assert!(apply(&set, &meta, None).is_empty());
    }

    #[test]
    fn test_multi_word_keyword_matches_phrase() {
        let set = CustomRuleSet::from_json_str(
            r#"{"rules": [{"description_keywords": ["time lapse"], "tags": ["Timelapse"]}]}"#,
            false,
        )
        .unwrap();
        let meta = metadata(640, 480, 10.0);

        assert!(apply(&set, &meta, Some("A city Time-lapse? no, a time lapse.")).contains("Timelapse"));
        assert!(apply(&set, &meta, Some("time passes, lapse of focus")).is_empty());
    }

    #[test]
    fn test_case_sensitive_matching() {
        let set = CustomRuleSet::from_json_str(
            r#"{"rules": [{"description_keywords": ["NASA"], "tags": ["Space"]}]}"#,
            true,
        )
        .unwrap();
        let meta = metadata(640, 480, 10.0);

        assert!(apply(&set, &meta, Some("footage from NASA")).contains("Space"));
        assert!(apply(&set, &meta, Some("footage from nasa")).is_empty());
    }

    #[test]
    fn test_metadata_condition_clauses() {
        let set = CustomRuleSet::from_json_str(
            r#"{"rules": [
                {"metadata_conditions": {"resolution": "1920x1080"}, "tags": ["Full HD"]},
                {"metadata_conditions": {"duration_gt": 60}, "tags": ["Long"]},
                {"metadata_conditions": {"resolution": "1920x1080", "duration_gt": 60}, "tags": ["Long Full HD"]}
            ]}"#,
            false,
        )
        .unwrap();

        let short_hd = apply(&set, &metadata(1920, 1080, 60.0), None);
        assert_eq!(short_hd, BTreeSet::from(["Full HD".to_string()]));

        let long_hd = apply(&set, &metadata(1920, 1080, 61.0), None);
        assert_eq!(long_hd.len(), 3);
    }

    #[test]
    fn test_keyword_or_condition() {
        let set = CustomRuleSet::from_json_str(
            r#"{"rules": [{
                "description_keywords": ["drone"],
                "metadata_conditions": {"duration_gt": 1000},
                "tags": ["Aerial Shot"]
            }]}"#,
            false,
        )
        .unwrap();

        assert!(apply(&set, &metadata(640, 480, 10.0), Some("drone shot")).contains("Aerial Shot"));
        assert!(apply(&set, &metadata(640, 480, 2000.0), Some("ground shot")).contains("Aerial Shot"));
        assert!(apply(&set, &metadata(640, 480, 10.0), Some("ground shot")).is_empty());
    }

    #[test]
    fn test_malformed_rules_are_skipped() {
        let set = CustomRuleSet::from_json_str(
            r#"{"rules": [
                {"description_keywords": ["drone"], "tags": ["Aerial Shot"]},
                {"keyword": "drone", "tag": "Aerial Shot"},
                {"description_keywords": ["x"], "tags": []},
                {"tags": ["Orphan"]},
                {"metadata_conditions": {}, "tags": ["Empty"]},
                {"metadata_conditions": {"duration_gte": 5}, "tags": ["Typo"]},
                "not an object",
                {"description_keywords": ["night"], "tags": ["Night"]}
            ]}"#,
            false,
        )
        .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.rules()[0].index, 0);
        assert_eq!(set.rules()[1].index, 7);
    }

    #[test]
    fn test_invalid_document_is_rule_load_error() {
        assert!(matches!(
            CustomRuleSet::from_json_str("{not json", false),
            Err(PipelineError::RuleLoad(_))
        ));
        assert!(matches!(
            CustomRuleSet::from_json_str(r#"[{"tags": ["a"]}]"#, false),
            Err(PipelineError::RuleLoad(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_set() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let missing = temp_dir.path().join("rules.json");

        let set = CustomRuleSet::load(&missing, false).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_broken_file_degrades_to_empty() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("rules.json");
        tokio::fs::write(&file, "rules: nope").await.unwrap();

        assert!(CustomRuleSet::load(&file, false).await.is_err());
        assert!(CustomRuleSet::load_or_empty(Some(&file), false).await.is_empty());
        assert!(CustomRuleSet::load_or_empty(None, false).await.is_empty());
    }
}
