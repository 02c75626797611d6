//! Built-in post-processing rules

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use unicode_segmentation::UnicodeSegmentation;

use super::markup::{html_to_text, markdown_to_text};
use super::PostProcessor;

static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("Invalid regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct Trim;

impl PostProcessor for Trim {
    fn name(&self) -> &'static str {
        "trim"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        text.trim().to_string()
    }
}

/// Collapses runs of spaces and tabs, and runs of blank lines
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapseWhitespace;

impl PostProcessor for CollapseWhitespace {
    fn name(&self) -> &'static str {
        "collapse_whitespace"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut previous_blank = false;

        for line in text.lines() {
            let collapsed = SPACE_RUN.replace_all(line, " ");
            let collapsed = collapsed.trim_end();
            let blank = collapsed.is_empty();
            if blank && previous_blank {
                continue;
            }
            previous_blank = blank;
            lines.push(collapsed.to_string());
        }

        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveBlankLines;

impl PostProcessor for RemoveBlankLines {
    fn name(&self) -> &'static str {
        "remove_blank_lines"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StripMarkdown;

impl PostProcessor for StripMarkdown {
    fn name(&self) -> &'static str {
        "strip_markdown"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        markdown_to_text(text)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StripHtml;

impl PostProcessor for StripHtml {
    fn name(&self) -> &'static str {
        "strip_html"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        html_to_text(text)
    }
}

/// Drops fence lines (``` or ~~~) and keeps the fenced content
#[derive(Debug, Clone, Copy, Default)]
pub struct StripCodeFences;

impl PostProcessor for StripCodeFences {
    fn name(&self) -> &'static str {
        "strip_code_fences"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        text.lines()
            .filter(|line| {
                let line = line.trim_start();
                !(line.starts_with("```") || line.starts_with("~~~"))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Replaces typographic quotes with ASCII quotes
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeQuotes;

impl PostProcessor for NormalizeQuotes {
    fn name(&self) -> &'static str {
        "normalize_quotes"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        text.chars()
            .map(|c| match c {
                '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
                '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
                other => other,
            })
            .collect()
    }
}

/// Removes configured phrases, case-insensitively
#[derive(Debug, Clone)]
pub struct BannedPhrases {
    pattern: Option<Regex>,
}

impl BannedPhrases {
    pub fn new(phrases: &[String]) -> Self {
        let alternatives: Vec<String> = phrases
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();

        let pattern = if alternatives.is_empty() {
            None
        } else {
            RegexBuilder::new(&alternatives.join("|"))
                .case_insensitive(true)
                .build()
                .ok()
        };

        Self { pattern }
    }
}

impl PostProcessor for BannedPhrases {
    fn name(&self) -> &'static str {
        "remove_banned_phrases"
    }

    fn apply(&self, text: &str, _argument: Option<&str>) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        // Removal can join fragments into a new match, so repeat until stable
        let mut current = text.to_string();
        loop {
            let next = pattern.replace_all(&current, "").into_owned();
            if next == current {
                return current;
            }
            current = next;
        }
    }
}

/// Keeps at most N grapheme clusters
#[derive(Debug, Clone, Copy)]
pub struct Truncate {
    default_length: usize,
}

impl Truncate {
    pub fn new(default_length: usize) -> Self {
        Self { default_length }
    }

    fn length(&self, argument: Option<&str>) -> Option<usize> {
        match argument {
            None => Some(self.default_length),
            Some(arg) => arg.parse().ok(),
        }
    }
}

impl PostProcessor for Truncate {
    fn name(&self) -> &'static str {
        "truncate"
    }

    fn check_argument(&self, argument: Option<&str>) -> Result<(), String> {
        self.length(argument).map(|_| ()).ok_or_else(|| {
            format!(
                "truncate length '{}' is not a non-negative integer",
                argument.unwrap_or_default()
            )
        })
    }

    fn apply(&self, text: &str, argument: Option<&str>) -> String {
        let limit = self.length(argument).unwrap_or(self.default_length);
        match text.grapheme_indices(true).nth(limit) {
            Some((cut, _)) => text[..cut].to_string(),
            None => text.to_string(),
        }
    }
}
