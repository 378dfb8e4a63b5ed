use std::collections::BTreeSet;

use super::RuleContext;
use crate::record::UNCLASSIFIED;

/// Condition of a classification rule
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// at least one of the tags is present
    AnyTag(Vec<String>),
    /// case-insensitive substring of the description
    DescriptionContains(String),
    DurationGreaterThan(f64),
    AnyOf(Vec<Predicate>),
}

impl Predicate {
    pub fn any_tag(tags: &[&str]) -> Self {
        Predicate::AnyTag(tags.iter().map(|t| t.to_string()).collect())
    }

    pub fn holds(&self, ctx: &RuleContext<'_>, tags: &BTreeSet<String>) -> bool {
        match self {
            Predicate::AnyTag(wanted) => wanted.iter().any(|t| tags.contains(t)),
            Predicate::DescriptionContains(needle) => ctx.description_contains(needle),
            Predicate::DurationGreaterThan(min) => ctx.metadata.duration > *min,
            Predicate::AnyOf(inner) => inner.iter().any(|p| p.holds(ctx, tags)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRule {
    pub label: String,
    pub predicate: Predicate,
}

impl ClassificationRule {
    pub fn new(label: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            label: label.into(),
            predicate,
        }
    }
}

/// Ordered decision list; the first matching rule names the class
#[derive(Debug, Clone, PartialEq)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn classify(&self, ctx: &RuleContext<'_>, tags: &BTreeSet<String>) -> String {
        self.rules
            .iter()
            .find(|rule| rule.predicate.holds(ctx, tags))
            .map(|rule| rule.label.clone())
            .unwrap_or_else(|| UNCLASSIFIED.to_string())
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(vec![
            ClassificationRule::new("Action", Predicate::any_tag(&["Action", "High Intensity"])),
            ClassificationRule::new("Sports", Predicate::DescriptionContains("sports".to_string())),
            ClassificationRule::new("Feature-length", Predicate::DurationGreaterThan(3600.0)),
            ClassificationRule::new(
                "Documentary",
                Predicate::AnyOf(vec![
                    Predicate::DescriptionContains("documentary".to_string()),
                    Predicate::any_tag(&["Documentary Footage", "Narrative"]),
                ]),
            ),
            ClassificationRule::new("Cinematic", Predicate::any_tag(&["Aerial Shot", "Drone Footage"])),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VideoMetadata;

    fn metadata(duration: f64) -> VideoMetadata {
        VideoMetadata {
            duration,
            codec: "h264".to_string(),
            width: 1280,
            height: 720,
            frame_rate: 24.0,
            audio_codec: None,
            audio_channels: None,
            audio_sample_rate: None,
            has_subtitle: false,
            size_bytes: 0,
            format_name: None,
        }
    }

    fn classify(duration: f64, description: Option<&str>, tags: &[&str]) -> String {
        let meta = metadata(duration);
        let ctx = RuleContext::new(&meta, &[], description);
        let tags = tags.iter().map(|t| t.to_string()).collect();
        Classifier::default().classify(&ctx, &tags)
    }

    #[test]
    fn test_priority_order() {
        // Action outranks every later class
        assert_eq!(classify(5000.0, Some("a sports documentary"), &["Action", "Aerial Shot"]), "Action");
        assert_eq!(classify(5000.0, Some("Sports documentary"), &["Aerial Shot"]), "Sports");
        assert_eq!(classify(5000.0, Some("a documentary"), &["Aerial Shot"]), "Feature-length");
        assert_eq!(classify(100.0, Some("A Documentary"), &["Aerial Shot"]), "Documentary");
        assert_eq!(classify(100.0, None, &["Narrative"]), "Documentary");
        assert_eq!(classify(100.0, None, &["Drone Footage"]), "Cinematic");
        assert_eq!(classify(100.0, None, &["HD"]), UNCLASSIFIED);
    }

    #[test]
    fn test_feature_length_is_strict() {
        assert_eq!(classify(3600.0, None, &[]), UNCLASSIFIED);
        assert_eq!(classify(3600.5, None, &[]), "Feature-length");
    }

    #[test]
    fn test_custom_decision_list() {
        let classifier = Classifier::new(vec![ClassificationRule::new(
            "Short",
            Predicate::AnyOf(vec![Predicate::any_tag(&["Clip"])]),
        )]);
        let meta = metadata(10.0);
        let ctx = RuleContext::new(&meta, &[], None);
        let tags = BTreeSet::from(["Clip".to_string()]);

        assert_eq!(classifier.classify(&ctx, &tags), "Short");
        assert_eq!(classifier.classify(&ctx, &BTreeSet::new()), UNCLASSIFIED);
    }
}
