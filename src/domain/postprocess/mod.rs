//! Post-processing pipeline: ordered, deterministic text transforms

mod markup;
mod rules;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use markup::{html_to_text, markdown_to_text};
pub use rules::{
    BannedPhrases, CollapseWhitespace, NormalizeQuotes, RemoveBlankLines, StripCodeFences,
    StripHtml, StripMarkdown, Trim, Truncate,
};

/// Settings for rules that need configured data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingConfig {
    pub banned_phrases: Vec<String>,
    /// Grapheme limit for a bare `truncate` rule
    pub default_truncate_length: usize,
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            banned_phrases: Vec::new(),
            default_truncate_length: 4000,
        }
    }
}

/// A pure, total string transform
///
/// Rules are referenced as `name` or `name:argument`.
pub trait PostProcessor: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Check a rule argument; rules take none unless they say otherwise
    fn check_argument(&self, argument: Option<&str>) -> Result<(), String> {
        match argument {
            None => Ok(()),
            Some(arg) => Err(format!("rule '{}' takes no argument, got '{}'", self.name(), arg)),
        }
    }

    /// Transform the text; only called with an argument that passed `check_argument`
    fn apply(&self, text: &str, argument: Option<&str>) -> String;
}

/// Output of a pipeline run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostProcessOutcome {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Split a rule identifier into name and optional argument
pub fn split_rule(rule: &str) -> (&str, Option<&str>) {
    match rule.split_once(':') {
        Some((name, arg)) => (name.trim(), Some(arg.trim())),
        None => (rule.trim(), None),
    }
}

/// Registry of post-processing rules keyed by name
#[derive(Debug, Clone, Default)]
pub struct PostProcessorRegistry {
    processors: HashMap<&'static str, Arc<dyn PostProcessor>>,
}

impl PostProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in rule
    pub fn with_defaults(config: &PostProcessingConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Trim));
        registry.register(Arc::new(CollapseWhitespace));
        registry.register(Arc::new(RemoveBlankLines));
        registry.register(Arc::new(StripMarkdown));
        registry.register(Arc::new(StripHtml));
        registry.register(Arc::new(StripCodeFences));
        registry.register(Arc::new(NormalizeQuotes));
        registry.register(Arc::new(BannedPhrases::new(&config.banned_phrases)));
        registry.register(Arc::new(Truncate::new(config.default_truncate_length)));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn PostProcessor>) {
        self.processors.insert(processor.name(), processor);
    }

    /// Whether a rule identifier names a registered rule with a valid argument
    pub fn is_known(&self, rule: &str) -> bool {
        self.lookup(rule).is_ok()
    }

    fn lookup<'r>(
        &self,
        rule: &'r str,
    ) -> Result<(&Arc<dyn PostProcessor>, Option<&'r str>), String> {
        let (name, argument) = split_rule(rule);
        let processor = self
            .processors
            .get(name)
            .ok_or_else(|| format!("unknown post-processing rule '{}'", rule))?;
        processor.check_argument(argument)?;
        Ok((processor, argument))
    }

    /// Run the rules in order; unknown or malformed rules are skipped with a warning
    pub fn apply(&self, text: &str, rules: &[String]) -> PostProcessOutcome {
        let mut outcome = PostProcessOutcome {
            text: text.to_string(),
            warnings: Vec::new(),
        };

        for rule in rules {
            match self.lookup(rule) {
                Ok((processor, argument)) => {
                    outcome.text = processor.apply(&outcome.text, argument);
                }
                Err(message) => {
                    warn!(rule = %rule, "Skipping post-processing rule: {}", message);
                    outcome.warnings.push(message);
                }
            }
        }

        outcome
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.processors.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
