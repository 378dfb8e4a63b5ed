//! Rule-based tagging and classification
//!
//! Tags and classification are pure functions of the probed metadata, the
//! scene list, the description and the rule set. Rule sets are read-only after
//! loading and shared across concurrent pipelines.

pub mod builtin;
pub mod classify;
pub mod custom;

pub use builtin::{builtin_rules, BuiltinRule};
pub use classify::{ClassificationRule, Classifier, Predicate};
pub use custom::{CustomRule, CustomRuleSet, MetadataCondition};

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

use crate::record::VideoMetadata;

/// Everything a rule may look at, with derived values computed once
#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    pub metadata: &'a VideoMetadata,
    pub scenes: &'a [f64],
    pub description: Option<&'a str>,
    /// Lower-cased description, empty when absent
    pub description_lower: String,
    /// Derived "WxH" resolution
    pub resolution: String,
    /// Derived resolution class such as "4K" or "1080p"
    pub resolution_label: &'static str,
    /// Description tokens joined and padded with single spaces, as written
    phrase: String,
    /// Same as `phrase`, lower-cased
    phrase_lower: String,
}

impl<'a> RuleContext<'a> {
    pub fn new(metadata: &'a VideoMetadata, scenes: &'a [f64], description: Option<&'a str>) -> Self {
        Self {
            metadata,
            scenes,
            description,
            description_lower: description.map(str::to_lowercase).unwrap_or_default(),
            resolution: metadata.resolution(),
            resolution_label: metadata.resolution_label(),
            phrase: description.map(|d| custom::token_phrase(d, true)).unwrap_or_default(),
            phrase_lower: description.map(|d| custom::token_phrase(d, false)).unwrap_or_default(),
        }
    }

    /// Whole-token (or whole-phrase) match of an already normalized keyword
    pub fn has_keyword(&self, keyword: &str, case_sensitive: bool) -> bool {
        let phrase = if case_sensitive { &self.phrase } else { &self.phrase_lower };
        !keyword.is_empty() && phrase.contains(&format!(" {} ", keyword))
    }

    /// Case-insensitive substring test on the description
    pub fn description_contains(&self, needle: &str) -> bool {
        !self.description_lower.is_empty() && self.description_lower.contains(&needle.to_lowercase())
    }
}

/// A tagging rule; applying it may only add tags
pub trait TagRule: Send + Sync + Debug {
    fn name(&self) -> String;
    fn apply(&self, ctx: &RuleContext<'_>, tags: &mut BTreeSet<String>);
}

/// Result of evaluating a rule set against one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub tags: BTreeSet<String>,
    pub classification: String,
}

/// Apply tag rules in order, then classify on the final tag set
pub fn evaluate<'r>(
    ctx: &RuleContext<'_>,
    rules: impl IntoIterator<Item = &'r dyn TagRule>,
    classifier: &Classifier,
) -> Evaluation {
    let mut tags = BTreeSet::new();
    for rule in rules {
        let before = tags.len();
        rule.apply(ctx, &mut tags);
        if tags.len() != before {
            debug!("Rule {} added {} tag(s)", rule.name(), tags.len() - before);
        }
    }

    let classification = classifier.classify(ctx, &tags);
    Evaluation { tags, classification }
}

/// Built-in rules, custom rules and any extra rules, evaluated in that order
#[derive(Debug, Clone)]
pub struct RuleEngine {
    builtin: Vec<BuiltinRule>,
    custom: CustomRuleSet,
    extra: Vec<Arc<dyn TagRule>>,
    classifier: Classifier,
}

impl RuleEngine {
    pub fn new(custom: CustomRuleSet) -> Self {
        Self {
            builtin: builtin_rules(),
            custom,
            extra: Vec::new(),
            classifier: Classifier::default(),
        }
    }

    /// Append a rule evaluated after the custom rules
    pub fn with_rule(mut self, rule: Arc<dyn TagRule>) -> Self {
        self.extra.push(rule);
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn custom_rule_count(&self) -> usize {
        self.custom.len()
    }

    pub fn evaluate(&self, metadata: &VideoMetadata, scenes: &[f64], description: Option<&str>) -> Evaluation {
        let ctx = RuleContext::new(metadata, scenes, description);

        let rules = self
            .builtin
            .iter()
            .map(|r| r as &dyn TagRule)
            .chain(self.custom.rules().iter().map(|r| r as &dyn TagRule))
            .chain(self.extra.iter().map(|r| r.as_ref()));

        evaluate(&ctx, rules, &self.classifier)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(CustomRuleSet::empty())
    }
}
