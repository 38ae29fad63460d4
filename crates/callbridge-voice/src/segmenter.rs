//! Cuts streamed model output into speakable sentences.

use crate::llm::Segment;

const TERMINATORS: &[char] = &['。', '！', '？', '；', '.', '!', '?', ';', '\n'];

/// Accumulates completion deltas and yields whole sentences.
///
/// The most recent complete sentence is held back until more speakable text
/// arrives or the stream ends, so that a trailing hang-up marker can still
/// set `auto_hangup` on the last segment of the reply. Markers are removed
/// from the spoken text wherever they occur.
#[derive(Debug)]
pub struct SentenceSegmenter {
    marker: String,
    buffer: String,
    pending: Option<String>,
    hangup: bool,
}

impl SentenceSegmenter {
    pub fn new(hangup_marker: impl Into<String>) -> Self {
        Self {
            marker: hangup_marker.into(),
            buffer: String::new(),
            pending: None,
            hangup: false,
        }
    }

    /// Whether the hang-up marker has been seen so far.
    pub fn hangup_requested(&self) -> bool {
        self.hangup
    }

    /// Feeds one delta; returns the segments it completed.
    pub fn push(&mut self, delta: &str) -> Vec<Segment> {
        self.buffer.push_str(delta);
        self.strip_markers();

        let mut out = Vec::new();
        loop {
            if self.pending.is_some() {
                if self.awaiting_more() {
                    break;
                }
                if let Some(text) = self.pending.take() {
                    out.push(Segment::new(text, false));
                }
            }

            let Some(end) = find_terminator(&self.buffer) else {
                break;
            };
            let sentence: String = self.buffer.drain(..end).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                self.pending = Some(sentence.to_string());
            }
        }
        out
    }

    /// Flushes everything left once the stream has ended.
    pub fn finish(&mut self) -> Vec<Segment> {
        self.strip_markers();

        let mut texts: Vec<String> = self.pending.take().into_iter().collect();
        let tail = self.buffer.trim();
        if !tail.is_empty() {
            texts.push(tail.to_string());
        }
        self.buffer.clear();

        let last = texts.len().saturating_sub(1);
        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Segment::new(text, self.hangup && i == last))
            .collect()
    }

    /// True while the text after the pending sentence is blank or could
    /// still grow into a marker.
    fn awaiting_more(&self) -> bool {
        let rest = self.buffer.trim_start();
        rest.is_empty() || (!self.marker.is_empty() && self.marker.starts_with(rest))
    }

    fn strip_markers(&mut self) {
        if self.marker.is_empty() {
            return;
        }
        while let Some(pos) = self.buffer.find(&self.marker) {
            self.buffer.replace_range(pos..pos + self.marker.len(), "");
            self.hangup = true;
        }
    }
}

/// Removes every occurrence of `marker` from a full reply.
pub fn strip_marker(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.trim().to_string();
    }
    text.replace(marker, "").trim().to_string()
}

fn find_terminator(text: &str) -> Option<usize> {
    text.char_indices()
        .find(|(_, c)| TERMINATORS.contains(c))
        .map(|(i, c)| i + c.len_utf8())
}
