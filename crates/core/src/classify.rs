//! System-message classification.
//!
//! The turn builder needs to tell a system-generated handoff apart from text a
//! person typed. The rule is a plain predicate so hosts can swap in their own.

use regex::Regex;
use std::sync::LazyLock;

/// Decides whether a user-channel message was generated by the system.
pub trait MessageClassifier: Send + Sync {
    fn is_system_message(&self, content: &str) -> bool;
}

impl<F> MessageClassifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_system_message(&self, content: &str) -> bool {
        self(content)
    }
}

/// Patterns recognised when no configuration overrides them.
pub const DEFAULT_SYSTEM_PATTERNS: &[&str] = &[
    r"^\[AUTO-HANDOFF\]",
    r"^\[SYSTEM\]",
    r"^This session is being continued from a previous conversation",
    r"^Here(?: is|'s) the conversation so far",
    r"^Caveat: The messages below were generated by the user while running local commands",
];

static DEFAULT_SYSTEM_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DEFAULT_SYSTEM_PATTERNS
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect()
});

static SYSTEM_REMINDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<system-reminder>.*?</system-reminder>").unwrap());

/// Strip `<system-reminder>` blocks from text
pub fn strip_system_reminders(text: &str) -> String {
    SYSTEM_REMINDER_RE.replace_all(text, "").trim().to_string()
}

/// Regex-list classifier.
///
/// Reminder blocks are stripped first; a message that is nothing but
/// reminders counts as a system message, otherwise any pattern matching the
/// remaining text does.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: Vec<Regex>,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_SYSTEM_RE.clone(),
        }
    }
}

impl PatternClassifier {
    /// Compile user-supplied patterns. Invalid patterns are an error so a
    /// typo in configuration does not silently disable merging.
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl MessageClassifier for PatternClassifier {
    fn is_system_message(&self, content: &str) -> bool {
        if content.trim().is_empty() {
            return false;
        }
        let cleaned = strip_system_reminders(content);
        if cleaned.is_empty() {
            return true;
        }
        self.patterns.iter().any(|re| re.is_match(&cleaned))
    }
}
