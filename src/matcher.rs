//! Verification code extraction from decoded email bodies.
//!
//! The [`Matcher`] trait is the seam; [`MarkupCodeMatcher`] is the built-in extractor
//! and [`RegexMatcher`] lets a deployment substitute its own pattern.
//!
//! # Example
//!
//! ```
//! use inbox_relay::matcher::{MarkupCodeMatcher, Matcher};
//!
//! let matcher = MarkupCodeMatcher::new();
//! let html = r#"<table><tr><td class="code-text">A1B2C3</td></tr></table>"#;
//! assert_eq!(matcher.find_match(html).as_deref(), Some("A1B2C3"));
//!
//! // Six characters outside the marker element are ignored
//! assert_eq!(matcher.find_match("<p>Order ABC123 shipped</p>"), None);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Trait for extracting a value from an email body.
pub trait Matcher: Send + Sync {
    /// Attempts to find and extract matching content from the text.
    ///
    /// Returns `Some(matched_value)` if found, `None` otherwise.
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>>;

    /// Returns a human-readable description of what this matcher looks for.
    ///
    /// Used in logging.
    fn description(&self) -> &str;
}

/// Regex-based matcher that extracts the first capture group, whitespace-trimmed.
///
/// ```
/// use inbox_relay::matcher::{RegexMatcher, Matcher};
///
/// let matcher = RegexMatcher::new(r"code:\s*(\w+)").unwrap();
/// assert_eq!(matcher.find_match("Your code: 42"), Some("42".into()));
/// ```
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a new regex matcher.
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
        Ok(Self::from_regex(Regex::new(pattern)?, description))
    }

    fn from_regex(regex: Regex, description: impl Into<String>) -> Self {
        Self {
            regex,
            description: description.into(),
        }
    }
}

impl Matcher for RegexMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|m| !m.is_empty())
            .map(Cow::Borrowed)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Marker element followed by the code.
///
/// The markup half is case-insensitive: a `<td>` or `<span>` whose `class` contains
/// `code-text`, or whose `style` sets `color: #FB6100`, in any quoting and with any
/// attributes around it. Attribute and property names must stand alone, so
/// `data-class` or `background-color` never count as a marker. The code half is
/// case-sensitive: exactly six `[A-Z0-9]` not followed by another letter or digit.
const MARKUP_CODE_PATTERN: &str = concat!(
    r#"(?i:<(?:td|span)\b[^>]*?\s(?:"#,
    r#"class\s*=\s*["']?[^"'>]*?\bcode-text\b[^"'>]*["']?"#,
    r#"|style\s*=\s*["']?(?:[^"'>]*?[;\s])?color\s*:\s*#fb6100\b[^"'>]*["']?"#,
    r#")[^>]*>)"#,
    r#"\s*([A-Z0-9]{6})(?:[^A-Za-z0-9]|$)"#,
);

static MARKUP_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(MARKUP_CODE_PATTERN).expect("valid markup code pattern"));

/// The built-in extractor: a six-character code wrapped in a recognised marker element.
#[derive(Debug, Clone)]
pub struct MarkupCodeMatcher {
    inner: RegexMatcher,
}

impl MarkupCodeMatcher {
    /// Creates the extractor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RegexMatcher::from_regex(
                MARKUP_CODE.clone(),
                "6-character code in code-text marker",
            ),
        }
    }
}

impl Default for MarkupCodeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for MarkupCodeMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.inner.find_match(text)
    }

    fn description(&self) -> &str {
        self.inner.description()
    }
}
