//! Expertise extraction for partner lookups.
//!
//! The dispatcher only asks "is there an expertise phrase in this text?". The regex
//! implementation below is deliberately simple; anything implementing
//! [`ExpertiseExtractor`] can replace it.

use regex::Regex;

pub trait ExpertiseExtractor: Send + Sync {
    /// The expertise phrase named in `text`, if any. Returned as written (not
    /// normalized).
    fn extract(&self, text: &str) -> Option<String>;
}

/// Matches "partner with expertise in <phrase>" anywhere in the text, ignoring case.
pub struct RegexExpertiseExtractor {
    pattern: Regex,
}

impl RegexExpertiseExtractor {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"(?is)partner with expertise in (.+)")
                .expect("expertise pattern is a valid regex"),
        }
    }
}

impl Default for RegexExpertiseExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpertiseExtractor for RegexExpertiseExtractor {
    fn extract(&self, text: &str) -> Option<String> {
        if !text.to_lowercase().contains("partner") {
            return None;
        }

        let phrase = self.pattern.captures(text)?.get(1)?.as_str().trim();
        if phrase.is_empty() {
            None
        } else {
            Some(phrase.to_string())
        }
    }
}
