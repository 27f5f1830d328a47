//! Content and display-name sanitization.
//!
//! Every message body and every display name that reaches the chat log passes
//! through here, whether it was typed locally or received from a peer. Remote
//! input is never trusted, whatever the sender claims to have done.
//!
//! # Content pipeline
//!
//! 1. Trim surrounding whitespace; empty (or non-UTF-8) input is blocked.
//! 2. Decode the five entities this module produces (`&amp;` `&lt;` `&gt;`
//!    `&quot;` `&#39;`), so already-sanitized text is measured and filtered by
//!    what it displays as.
//! 3. Truncate to the character bound, ending in a `...` marker.
//! 4. Block script-injection patterns.
//! 5. Collapse character spam.
//! 6. HTML-escape.
//!
//! # Invariants
//!
//! - Idempotence: `sanitize(sanitize(x)) == sanitize(x)` for every accepted `x`
//! - Output never contains `<`, `>`, `"` or `'`, and every `&` starts one of
//!   the five entities above
//! - Blocked content is never partially returned

use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use thiserror::Error;

/// Default maximum message length, in displayed characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Default maximum display name length, in characters.
pub const MAX_NAME_CHARS: usize = 50;

/// Placeholder for names that sanitize to nothing.
pub const ANONYMOUS: &str = "Anonymous";

const TRUNCATION_MARKER: &str = "...";

/// A run this long anywhere in the message turns spam cleanup on.
const SPAM_TRIGGER_RUN: usize = 16;

/// Runs at least this long are collapsed once cleanup is on.
const SPAM_COLLAPSE_RUN: usize = 7;

/// Collapsed runs keep this many characters.
const SPAM_KEEP: usize = 3;

const ENTITIES: [(&str, char); 5] =
    [("&amp;", '&'), ("&lt;", '<'), ("&gt;", '>'), ("&quot;", '"'), ("&#39;", '\'')];

#[allow(clippy::expect_used)]
static PROHIBITED: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        r"(?i)<iframe",
        r"(?i)<object",
        r"(?i)<embed",
    ])
    .expect("prohibited patterns are valid literals")
});

#[allow(clippy::expect_used)]
static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is a valid literal"));

/// Why content was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockReason {
    /// Nothing left after trimming, or not text at all.
    #[error("Blocked: empty")]
    Empty,

    /// Matched a script-injection pattern.
    #[error("Blocked: prohibited-content")]
    ProhibitedContent,
}

/// Accepted content plus the notices raised while cleaning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    /// Escaped content, safe to store and display.
    pub content: String,
    /// Content exceeded the bound and was cut.
    pub truncated: bool,
    /// Character spam was collapsed.
    pub spam_cleaned: bool,
}

/// Sanitize message content with the default length bound.
pub fn sanitize_content(raw: &str) -> Result<Sanitized, BlockReason> {
    sanitize_content_with(raw, MAX_CONTENT_CHARS)
}

/// Sanitize an inbound payload. Bytes that are not UTF-8 count as empty.
pub fn sanitize_payload(raw: &[u8], max_chars: usize) -> Result<Sanitized, BlockReason> {
    let text = std::str::from_utf8(raw).map_err(|_| BlockReason::Empty)?;
    sanitize_content_with(text, max_chars)
}

/// Sanitize message content, truncating to `max_chars` displayed characters.
pub fn sanitize_content_with(raw: &str, max_chars: usize) -> Result<Sanitized, BlockReason> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BlockReason::Empty);
    }

    let mut chars = decode_entities(trimmed);

    let truncated = chars.len() > max_chars;
    if truncated {
        chars.truncate(max_chars.saturating_sub(TRUNCATION_MARKER.len()));
        chars.extend(TRUNCATION_MARKER.chars());
    }

    let plain: String = chars.iter().collect();
    if PROHIBITED.is_match(&plain) {
        return Err(BlockReason::ProhibitedContent);
    }

    let (chars, spam_cleaned) = match collapse_spam(&chars) {
        Some(collapsed) => (collapsed, true),
        None => (chars, false),
    };

    Ok(Sanitized { content: escape_html(&chars), truncated, spam_cleaned })
}

/// Sanitize a display name with the default length bound.
pub fn sanitize_name(raw: &str) -> String {
    sanitize_name_with(raw, MAX_NAME_CHARS)
}

/// Sanitize a display name.
///
/// Markup tags and the characters `< > & " '` are removed rather than
/// escaped, so a name is always safe to interpolate. Names that end up empty
/// become [`ANONYMOUS`].
pub fn sanitize_name_with(raw: &str, max_chars: usize) -> String {
    let stripped = MARKUP_TAG.replace_all(raw, "");
    let cleaned: String =
        stripped.chars().filter(|c| !matches!(c, '<' | '>' | '&' | '"' | '\'')).collect();
    let cut: String = cleaned.trim().chars().take(max_chars).collect();
    let name = cut.trim_end();

    if name.is_empty() { ANONYMOUS.to_string() } else { name.to_string() }
}

/// Decode the entities this module emits, leaving everything else alone.
fn decode_entities(text: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(text.len());
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if c == '&'
            && let Some((entity, decoded)) = ENTITIES.iter().find(|(e, _)| rest.starts_with(e))
        {
            out.push(*decoded);
            rest = &rest[entity.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

/// Collapse long character runs, or `None` if no run reaches the trigger.
fn collapse_spam(chars: &[char]) -> Option<Vec<char>> {
    let runs: Vec<&[char]> = chars.chunk_by(|a, b| a == b).collect();
    if !runs.iter().any(|run| run.len() >= SPAM_TRIGGER_RUN) {
        return None;
    }

    let mut out = Vec::with_capacity(chars.len());
    for run in runs {
        let keep = if run.len() >= SPAM_COLLAPSE_RUN { SPAM_KEEP } else { run.len() };
        out.extend_from_slice(&run[..keep]);
    }
    Some(out)
}

fn escape_html(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len());
    for &c in chars {
        match ENTITIES.iter().find(|(_, decoded)| *decoded == c) {
            Some((entity, _)) => out.push_str(entity),
            None => out.push(c),
        }
    }
    out
}
