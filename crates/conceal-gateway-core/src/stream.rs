//! Response stream rewriting
//!
//! Takes the upstream SSE byte stream of a chat completion and restores every
//! placeholder found in `choices[0].delta.content`. Placeholders may arrive
//! split across arbitrary chunk boundaries, so each context keeps a carry-over
//! buffer holding text that could still turn into a token.
//!
//! Processing is strictly sequential: one task reads a chunk, rewrites it
//! completely, sends the result and only then reads the next chunk. The
//! output channel is bounded so a slow client throttles the upstream read,
//! and the upstream is dropped as soon as the client goes away.

use crate::error::RewriteError;
use crate::masking::{
    flush_redaction_buffer, flush_stream_buffer, unmask_stream_chunk, unredact_stream_chunk,
    PlaceholderContext,
};
use crate::sse::{data_payload, format_event, split_terminator, ChatCompletionChunk, DATA_PREFIX, DONE_SENTINEL};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const OUTPUT_CHANNEL_CAPACITY: usize = 16;

/// Restores placeholders in a streamed chat completion.
#[derive(Debug, Clone, Default)]
pub struct StreamRewriter {
    pii: Option<Arc<PlaceholderContext>>,
    secrets: Option<Arc<PlaceholderContext>>,
}

impl StreamRewriter {
    pub fn new(
        pii: Option<Arc<PlaceholderContext>>,
        secrets: Option<Arc<PlaceholderContext>>,
    ) -> Self {
        Self { pii, secrets }
    }

    /// True when there is nothing to restore and the stream can be forwarded as-is.
    pub fn is_passthrough(&self) -> bool {
        self.pii.as_ref().map_or(true, |c| c.is_empty())
            && self.secrets.as_ref().map_or(true, |c| c.is_empty())
    }

    /// Restore placeholders in non-streamed text, PII first, then secrets.
    pub fn restore_text(&self, text: &str) -> String {
        let text = match self.pii {
            Some(ref context) => flush_stream_buffer(text, context),
            None => text.to_string(),
        };
        match self.secrets {
            Some(ref context) => flush_redaction_buffer(&text, context),
            None => text,
        }
    }

    /// Rewrite `input`, an upstream SSE body, into a client-facing stream.
    ///
    /// An upstream error is forwarded as the final item; whatever was still
    /// buffered at that point is dropped.
    pub fn rewrite<S, E>(&self, input: S) -> ReceiverStream<Result<Bytes, RewriteError>>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let mut state = RewriteState::new(self.pii.clone(), self.secrets.clone());

        tokio::spawn(async move {
            let mut input = Box::pin(input);

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Client stopped reading, releasing upstream stream");
                        return;
                    }
                    next = input.next() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        let output = state.process_chunk(&chunk);
                        if !output.is_empty() && tx.send(Ok(Bytes::from(output))).await.is_err() {
                            debug!("Client disconnected during stream rewrite");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let error = RewriteError::Upstream(e.into());
                        warn!("{}", error);
                        let _ = tx.send(Err(error)).await;
                        return;
                    }
                    None => break,
                }
            }

            let output = state.finish();
            if !output.is_empty() {
                let _ = tx.send(Ok(Bytes::from(output))).await;
            }
        });

        ReceiverStream::new(rx)
    }
}

/// Per-stream state. Everything here is synchronous; the async shell above
/// only moves chunks in and out.
pub(crate) struct RewriteState {
    decoder: Utf8Decoder,
    line_buffer: String,
    pii: Option<Arc<PlaceholderContext>>,
    pii_buffer: String,
    secrets: Option<Arc<PlaceholderContext>>,
    secrets_buffer: String,
}

impl RewriteState {
    pub(crate) fn new(
        pii: Option<Arc<PlaceholderContext>>,
        secrets: Option<Arc<PlaceholderContext>>,
    ) -> Self {
        Self {
            decoder: Utf8Decoder::default(),
            line_buffer: String::new(),
            pii,
            pii_buffer: String::new(),
            secrets,
            secrets_buffer: String::new(),
        }
    }

    /// Rewrite every complete line `chunk` finishes. A trailing partial line
    /// waits for the rest of it.
    pub(crate) fn process_chunk(&mut self, chunk: &[u8]) -> String {
        let text = self.decoder.decode(chunk);
        self.line_buffer.push_str(&text);

        let mut output = String::new();
        while let Some(newline) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=newline).collect();
            self.process_line(&line, &mut output);
        }
        output
    }

    /// Handle end of stream: the last unterminated line, then the buffers.
    pub(crate) fn finish(&mut self) -> String {
        let mut output = String::new();

        let rest = self.decoder.finish();
        self.line_buffer.push_str(&rest);
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            self.process_line(&line, &mut output);
        }

        self.flush_into(&mut output);
        output
    }

    fn process_line(&mut self, line: &str, output: &mut String) {
        let (body, terminator) = split_terminator(line);
        let Some(payload) = data_payload(body) else {
            output.push_str(line);
            return;
        };

        if payload.trim() == DONE_SENTINEL {
            self.flush_into(output);
            output.push_str(line);
            return;
        }

        let mut chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Forwarding unparsable SSE data line unchanged: {}", e);
                output.push_str(line);
                return;
            }
        };

        let Some(content) = chunk.content().map(str::to_owned) else {
            output.push_str(line);
            return;
        };

        let restored = self.restore(content);
        if restored.is_empty() {
            return;
        }

        chunk.set_content(restored);
        match serde_json::to_string(&chunk) {
            Ok(json) => {
                output.push_str(DATA_PREFIX);
                output.push(' ');
                output.push_str(&json);
                output.push_str(terminator);
            }
            Err(e) => warn!("Failed to serialize rewritten chunk, dropping it: {}", e),
        }
    }

    /// PII unmasking first, then secrets unredaction on its output.
    fn restore(&mut self, content: String) -> String {
        let mut text = content;

        if let Some(ref context) = self.pii {
            let step = unmask_stream_chunk(&self.pii_buffer, &text, context);
            self.pii_buffer = step.remaining_buffer;
            text = step.output;
        }

        if let Some(ref context) = self.secrets {
            let step = unredact_stream_chunk(&self.secrets_buffer, &text, context);
            self.secrets_buffer = step.remaining_buffer;
            text = step.output;
        }

        text
    }

    /// Release both carry-over buffers as one synthetic event.
    ///
    /// The PII buffer is flushed first and its output is appended to the
    /// secrets buffer before that one is flushed, which keeps stream order:
    /// the secrets buffer always holds text that came out of the PII step earlier.
    fn flush_into(&mut self, output: &mut String) {
        let pii_rest = std::mem::take(&mut self.pii_buffer);
        let mut flushed = match self.pii {
            Some(ref context) => flush_stream_buffer(&pii_rest, context),
            None => pii_rest,
        };

        let mut secrets_rest = std::mem::take(&mut self.secrets_buffer);
        if self.secrets.is_some() || !secrets_rest.is_empty() {
            secrets_rest.push_str(&flushed);
            flushed = match self.secrets {
                Some(ref context) => flush_redaction_buffer(&secrets_rest, context),
                None => secrets_rest,
            };
        }

        if flushed.is_empty() {
            return;
        }

        debug!("Flushing {} buffered bytes as a synthetic event", flushed.len());
        match format_event(&ChatCompletionChunk::synthetic(flushed)) {
            Ok(event) => output.push_str(&event),
            Err(e) => warn!("Failed to serialize flush event: {}", e),
        }
    }
}

/// Incremental UTF-8 decoder. A multi-byte character split across chunks is
/// held until its remaining bytes arrive; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut output = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    output.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    output.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid) => {
                            output.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        output
    }

    fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let output = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        output
    }
}
