//! Message text validation and sanitization.
//!
//! [`Validator::validate`] is pure: it either returns escaped text that is
//! safe to render and within the length limit, or a single
//! [`RejectReason`]. Nothing is persisted before validation passes.

use regex::Regex;

use parley_shared::constants::{
    DEFAULT_FORBIDDEN_TAGS, MAX_MESSAGE_LENGTH, ONE_TIME_CODE_LEN, SPAM_CHAR_RUN, SPAM_WORD_RUN,
    USERNAME_MAX_LEN, USERNAME_MIN_LEN,
};
use parley_shared::RejectReason;

/// What [`Validator::inspect_markup`] found in an injected fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupThreat {
    ForbiddenTag(String),
    ScriptUrl,
}

#[derive(Debug, Clone)]
pub struct Validator {
    max_len: usize,
    forbidden_tags: Vec<String>,
    email_regex: Regex,
    username_regex: Regex,
}

impl Validator {
    pub fn new(max_len: usize, forbidden_tags: Vec<String>) -> Self {
        Self {
            max_len,
            forbidden_tags: forbidden_tags.into_iter().map(|t| t.to_lowercase()).collect(),
            email_regex: Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"),
            username_regex: Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex"),
        }
    }

    /// Check message text and return its sanitized form.
    ///
    /// Checks run in order: empty, length, forbidden markup, spam, and the
    /// length again on the escaped output.
    pub fn validate(&self, text: &str) -> Result<String, RejectReason> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RejectReason::Empty);
        }

        let len = trimmed.chars().count();
        if len > self.max_len {
            return Err(RejectReason::TooLong {
                len,
                max: self.max_len,
            });
        }

        if let Some(tag) = self.find_forbidden_tag(trimmed) {
            return Err(RejectReason::ForbiddenMarkup {
                tag: tag.to_string(),
            });
        }

        if is_spam(trimmed) {
            return Err(RejectReason::SpamPattern);
        }

        let sanitized = sanitize(trimmed);
        let escaped_len = sanitized.chars().count();
        if escaped_len > self.max_len {
            return Err(RejectReason::TooLong {
                len: escaped_len,
                max: self.max_len,
            });
        }

        Ok(sanitized)
    }

    /// First denylisted tag that appears as an opening tag, compared
    /// case-insensitively.
    pub fn find_forbidden_tag(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.forbidden_tags
            .iter()
            .find(|tag| has_opening_tag(&lower, tag))
            .map(String::as_str)
    }

    /// Inspect a markup fragment injected into the rendered view.
    pub fn inspect_markup(&self, fragment: &str) -> Option<MarkupThreat> {
        if let Some(tag) = self.find_forbidden_tag(fragment) {
            return Some(MarkupThreat::ForbiddenTag(tag.to_string()));
        }
        if fragment.to_lowercase().contains("javascript:") {
            return Some(MarkupThreat::ScriptUrl);
        }
        None
    }

    pub fn validate_email(&self, email: &str) -> Result<(), RejectReason> {
        if self.email_regex.is_match(email.trim()) {
            Ok(())
        } else {
            Err(RejectReason::InvalidEmail)
        }
    }

    pub fn validate_username(&self, username: &str) -> Result<(), RejectReason> {
        let len = username.chars().count();
        if len < USERNAME_MIN_LEN {
            return Err(RejectReason::InvalidUsername(format!(
                "at least {USERNAME_MIN_LEN} characters"
            )));
        }
        if len > USERNAME_MAX_LEN {
            return Err(RejectReason::InvalidUsername(format!(
                "at most {USERNAME_MAX_LEN} characters"
            )));
        }
        if !self.username_regex.is_match(username) {
            return Err(RejectReason::InvalidUsername(
                "only letters, digits and _".to_string(),
            ));
        }
        Ok(())
    }

    /// A one-time code is exactly six ASCII digits.
    pub fn validate_one_time_code(&self, code: &str) -> Result<(), RejectReason> {
        let code = code.trim();
        if code.len() == ONE_TIME_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
            Ok(())
        } else {
            Err(RejectReason::MalformedCode)
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(
            MAX_MESSAGE_LENGTH,
            DEFAULT_FORBIDDEN_TAGS.iter().map(|t| t.to_string()).collect(),
        )
    }
}

/// Escape every markup-significant character.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// A character repeated [`SPAM_CHAR_RUN`] times in a row, or a word repeated
/// [`SPAM_WORD_RUN`] times separated only by whitespace.
pub fn is_spam(text: &str) -> bool {
    has_char_run(text, SPAM_CHAR_RUN) || has_word_run(text, SPAM_WORD_RUN)
}

fn has_char_run(text: &str, run: usize) -> bool {
    let mut prev = None;
    let mut count = 0;
    for c in text.chars() {
        if Some(c) == prev {
            count += 1;
        } else {
            prev = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }
    false
}

fn has_word_run(text: &str, run: usize) -> bool {
    let mut prev: Option<String> = None;
    let mut count = 0;
    for token in text.split_whitespace() {
        // Punctuation before or after a word ends the run at that side only.
        let lead = token.split(|c| !is_word_char(c)).next().unwrap_or("").to_lowercase();
        if lead.is_empty() {
            count = 0;
        } else if prev.as_deref() == Some(lead.as_str()) {
            count += 1;
        } else {
            count = 1;
        }
        if count >= run {
            return true;
        }

        if lead.len() == token.len() {
            prev = Some(lead);
            continue;
        }
        let trail = token.rsplit(|c| !is_word_char(c)).next().unwrap_or("").to_lowercase();
        if trail.is_empty() {
            prev = None;
            count = 0;
        } else {
            prev = Some(trail);
            count = 1;
        }
    }
    false
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `<tag` followed by whitespace, `>`, `/` or the end of input.
fn has_opening_tag(lower: &str, tag: &str) -> bool {
    let needle = format!("<{tag}");
    lower.match_indices(&needle).any(|(idx, _)| {
        match lower[idx + needle.len()..].chars().next() {
            None => true,
            Some(c) => c.is_whitespace() || c == '>' || c == '/',
        }
    })
}
