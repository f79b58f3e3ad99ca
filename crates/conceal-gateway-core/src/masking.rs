//! Placeholder contexts for reversible masking
//!
//! A [`PlaceholderContext`] mints placeholder tokens for sensitive values and
//! maps them back. One context handles PII, a second one (with a distinct
//! label) handles redacted secrets, so each stream step only ever resolves
//! the tokens it minted itself.
//!
//! The streaming helpers at the bottom of this module implement the carry-over
//! contract used by the response rewriter: whatever suffix could still grow
//! into a known placeholder is withheld until the next chunk arrives.

use crate::entity::TypedSpan;
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Token grammar: `prefix label TYPE_N suffix`, where the body is `[A-Z0-9_]+`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderFormat {
    pub prefix: String,
    pub suffix: String,
    #[serde(default)]
    pub label: String,
}

impl PlaceholderFormat {
    /// `[[PERSON_1]]`
    pub fn pii() -> Self {
        Self {
            prefix: "[[".to_string(),
            suffix: "]]".to_string(),
            label: String::new(),
        }
    }

    /// `[[SECRET_REDACTED_API_KEY_OPENAI_1]]`
    pub fn secrets() -> Self {
        Self {
            prefix: "[[".to_string(),
            suffix: "]]".to_string(),
            label: "SECRET_REDACTED_".to_string(),
        }
    }

    pub fn format_token(&self, entity_type: &str, sequence: usize) -> String {
        format!(
            "{}{}{}_{}{}",
            self.prefix,
            self.label,
            normalize_type(entity_type),
            sequence,
            self.suffix
        )
    }

    fn token_pattern(&self) -> Result<Regex> {
        let pattern = format!(
            "{}{}[A-Z0-9_]+{}",
            regex::escape(&self.prefix),
            regex::escape(&self.label),
            regex::escape(&self.suffix)
        );
        Ok(Regex::new(&pattern)?)
    }

    /// Cheap grammar test: could `partial` be the beginning of some token?
    fn is_token_prefix(&self, partial: &str) -> bool {
        if partial.len() <= self.prefix.len() {
            return self.prefix.starts_with(partial);
        }
        let Some(rest) = partial.strip_prefix(self.prefix.as_str()) else {
            return false;
        };

        let body_len = rest.find(|c: char| !is_body_char(c)).unwrap_or(rest.len());
        let (body, tail) = rest.split_at(body_len);

        if body.len() <= self.label.len() {
            return tail.is_empty() && self.label.starts_with(body);
        }
        if !body.starts_with(self.label.as_str()) {
            return false;
        }
        tail.is_empty() || (tail.len() < self.suffix.len() && self.suffix.starts_with(tail))
    }
}

fn is_body_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'
}

fn normalize_type(entity_type: &str) -> String {
    entity_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Two-way mapping between placeholder tokens and the values they replace.
#[derive(Debug, Clone)]
pub struct PlaceholderContext {
    format: PlaceholderFormat,
    token_pattern: Regex,
    originals: HashMap<String, String>,
    tokens: HashMap<(String, String), String>,
    counters: HashMap<String, usize>,
    longest_token: usize,
}

impl PlaceholderContext {
    pub fn new(format: PlaceholderFormat) -> Result<Self> {
        if format.prefix.is_empty() || format.suffix.is_empty() {
            return Err(anyhow::anyhow!(
                "Placeholder prefix and suffix must not be empty"
            ));
        }
        let token_pattern = format.token_pattern()?;
        Ok(Self {
            format,
            token_pattern,
            originals: HashMap::new(),
            tokens: HashMap::new(),
            counters: HashMap::new(),
            longest_token: 0,
        })
    }

    pub fn format(&self) -> &PlaceholderFormat {
        &self.format
    }

    /// Return the token for `value`, minting a new one on first sight.
    /// The same value under the same type always maps to the same token.
    pub fn mask(&mut self, value: &str, entity_type: &str) -> String {
        let key = (entity_type.to_string(), value.to_string());
        if let Some(existing) = self.tokens.get(&key) {
            return existing.clone();
        }

        let counter = self.counters.entry(normalize_type(entity_type)).or_insert(0);
        *counter += 1;
        let token = self.format.format_token(entity_type, *counter);

        debug!("Minted placeholder {} for entity type '{}'", token, entity_type);
        self.longest_token = self.longest_token.max(token.len());
        self.originals.insert(token.clone(), value.to_string());
        self.tokens.insert(key, token.clone());
        token
    }

    pub fn unmask(&self, token: &str) -> Option<&str> {
        self.originals.get(token).map(String::as_str)
    }

    /// True when `partial` is a proper prefix of a token this context minted.
    pub fn could_complete(&self, partial: &str) -> bool {
        if partial.is_empty() || !self.format.is_token_prefix(partial) {
            return false;
        }
        self.originals
            .keys()
            .any(|token| token.len() > partial.len() && token.starts_with(partial))
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    /// Upper bound on how much text a stream step may withhold.
    pub fn longest_token(&self) -> usize {
        self.longest_token
    }

    /// Byte offset in `tail` from which everything must be withheld.
    fn holdback_start(&self, tail: &str) -> usize {
        let Some(first) = self.format.prefix.chars().next() else {
            return tail.len();
        };
        let window_start = tail.len().saturating_sub(self.longest_token.saturating_sub(1));

        tail.char_indices()
            .filter(|&(index, c)| index >= window_start && c == first)
            .map(|(index, _)| index)
            .find(|&index| self.could_complete(&tail[index..]))
            .unwrap_or(tail.len())
    }
}

/// Replace resolved spans in `text` with placeholders minted by `context`.
///
/// Spans are applied in start order. A span overlapping one already applied,
/// or one that does not fall on character boundaries, is skipped.
pub fn mask_text<T: TypedSpan>(text: &str, spans: &[T], context: &mut PlaceholderContext) -> String {
    let mut ordered: Vec<&T> = spans.iter().collect();
    ordered.sort_by_key(|span| (span.start(), span.end()));

    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;

    for span in ordered {
        if span.start() < last_end {
            debug!(
                "Skipping {} span {}..{} overlapping a masked span",
                span.span_type(),
                span.start(),
                span.end()
            );
            continue;
        }
        let Some(value) = text.get(span.start()..span.end()) else {
            warn!(
                "Span {}..{} for '{}' is outside the text or splits a character",
                span.start(),
                span.end(),
                span.span_type()
            );
            continue;
        };

        result.push_str(&text[last_end..span.start()]);
        result.push_str(&context.mask(value, span.span_type()));
        last_end = span.end();
    }

    result.push_str(&text[last_end..]);
    result
}

/// Replace every complete token `context` knows; unknown tokens are left as-is.
pub fn unmask_text(text: &str, context: &PlaceholderContext) -> String {
    context
        .token_pattern
        .replace_all(text, |caps: &regex::Captures| {
            let token = &caps[0];
            context.unmask(token).unwrap_or(token).to_string()
        })
        .into_owned()
}

/// Result of one streaming unmask step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunkOutput {
    /// Text that is safe to emit now.
    pub output: String,
    /// Raw text withheld because it may be the start of a placeholder.
    pub remaining_buffer: String,
}

/// Unmask `buffer + new_text`, withholding any suffix that could still become
/// a known placeholder. `remaining_buffer` is raw input, so feeding it back with
/// the next chunk reproduces the original sequence.
pub fn unmask_stream_chunk(
    buffer: &str,
    new_text: &str,
    context: &PlaceholderContext,
) -> StreamChunkOutput {
    let mut combined = String::with_capacity(buffer.len() + new_text.len());
    combined.push_str(buffer);
    combined.push_str(new_text);

    let mut output = String::with_capacity(combined.len());
    let mut last_end = 0;
    for token in context.token_pattern.find_iter(&combined) {
        output.push_str(&combined[last_end..token.start()]);
        output.push_str(context.unmask(token.as_str()).unwrap_or(token.as_str()));
        last_end = token.end();
    }

    let tail = &combined[last_end..];
    let hold = context.holdback_start(tail);
    output.push_str(&tail[..hold]);

    StreamChunkOutput {
        output,
        remaining_buffer: tail[hold..].to_string(),
    }
}

/// Release whatever is left in a carry-over buffer at end of stream.
pub fn flush_stream_buffer(buffer: &str, context: &PlaceholderContext) -> String {
    unmask_text(buffer, context)
}

/// Secrets counterpart of [`unmask_stream_chunk`].
pub fn unredact_stream_chunk(
    buffer: &str,
    new_text: &str,
    context: &PlaceholderContext,
) -> StreamChunkOutput {
    unmask_stream_chunk(buffer, new_text, context)
}

/// Secrets counterpart of [`flush_stream_buffer`].
pub fn flush_redaction_buffer(buffer: &str, context: &PlaceholderContext) -> String {
    flush_stream_buffer(buffer, context)
}
