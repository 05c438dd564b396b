//! Passcode extraction from unstructured email text.
//!
//! A [`Matcher`] pulls one value out of a text. [`PasscodeExtractor`] is an
//! ordered list of matchers tried in sequence; the first hit wins.
//!
//! # Example
//!
//! ```
//! use passcode_bridge::matcher::{Matcher, PasscodeExtractor};
//!
//! let extractor = PasscodeExtractor::new("パスコード").unwrap();
//! assert_eq!(
//!     extractor.find_match("【パスコード】345678 please use this code").as_deref(),
//!     Some("345678")
//! );
//! ```

use regex::Regex;
use std::borrow::Cow;
use tracing::trace;

/// Characters allowed between the label and the code in the loosest labelled pattern.
pub const DEFAULT_LABEL_WINDOW: usize = 80;

/// Trait for matching and extracting content from email text.
pub trait Matcher: Send + Sync {
    /// Attempts to find and extract matching content from the text.
    ///
    /// Uses `Cow<str>` to avoid allocations when the match can be borrowed
    /// directly from the input text.
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>>;

    /// Returns a human-readable description of what this matcher looks for.
    fn description(&self) -> &str;
}

/// Regex-based matcher that extracts the first capture group.
///
/// # Example
///
/// ```
/// use passcode_bridge::matcher::{RegexMatcher, Matcher};
///
/// let matcher = RegexMatcher::new(r"code:\s*(\d+)").unwrap();
/// assert_eq!(matcher.find_match("Your code: 42"), Some("42".into()));
/// ```
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a new regex matcher. The first capture group is the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Self::with_description(pattern, format!("regex pattern: {pattern}"))
    }

    /// Creates a new regex matcher with a custom description.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn with_description(
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            description: description.into(),
            regex,
        })
    }
}

impl Matcher for RegexMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| Cow::Borrowed(m.as_str()))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

// Six ASCII digits not followed by another digit. Rust's `\d` is Unicode-aware
// and would accept fullwidth digits.
const CODE: &str = r"([0-9]{6})(?:[^0-9]|$)";

/// Ordered, first-match-wins passcode extraction.
///
/// Tiers, strictest first:
///
/// 1. `【label】` immediately followed by six digits
/// 2. `label` then `:` or `：` then six digits
/// 3. `label` then up to a window of arbitrary characters then six digits
/// 4. any bare run of exactly six digits
#[derive(Debug, Clone)]
pub struct PasscodeExtractor {
    tiers: Vec<RegexMatcher>,
}

impl PasscodeExtractor {
    /// Builds the default tier list for `label` with [`DEFAULT_LABEL_WINDOW`].
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting patterns fail to compile.
    pub fn new(label: &str) -> Result<Self, regex::Error> {
        Self::with_window(label, DEFAULT_LABEL_WINDOW)
    }

    /// Builds the default tier list with a custom label window.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting patterns fail to compile.
    pub fn with_window(label: &str, window: usize) -> Result<Self, regex::Error> {
        let label = regex::escape(label);
        let tiers = vec![
            RegexMatcher::with_description(&format!("【{label}】{CODE}"), "bracketed label")?,
            RegexMatcher::with_description(
                &format!(r"{label}\s*[:：]\s*{CODE}"),
                "label with colon",
            )?,
            RegexMatcher::with_description(
                &format!(r"(?s){label}(?:.{{0,{window}}}?[^0-9])?{CODE}"),
                "label within window",
            )?,
            RegexMatcher::with_description(&format!("(?:^|[^0-9]){CODE}"), "bare six digits")?,
        ];
        Ok(Self { tiers })
    }

    /// Builds an extractor from an explicit priority list.
    #[must_use]
    pub fn from_tiers(tiers: Vec<RegexMatcher>) -> Self {
        Self { tiers }
    }

    /// Returns the code and the description of the tier that produced it.
    #[must_use]
    pub fn extract<'a>(&self, text: &'a str) -> Option<(Cow<'a, str>, &str)> {
        self.tiers.iter().find_map(|tier| {
            let hit = tier.find_match(text)?;
            trace!(tier = tier.description(), "Passcode pattern matched");
            Some((hit, tier.description()))
        })
    }
}

impl Matcher for PasscodeExtractor {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.extract(text).map(|(code, _)| code)
    }

    fn description(&self) -> &str {
        "6-digit passcode"
    }
}
