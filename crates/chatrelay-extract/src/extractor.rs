//! Mutation-driven incremental text extraction.
//!
//! One [`StreamExtractor`] lives for one dispatch cycle. Observation ticks go
//! in, chunk and terminal events come out; the caller owns delivery. The
//! rendered entry is re-flattened wholesale on every tick and diffed against
//! the last seen full text: the host renderer may rewrite its structure
//! non-incrementally, so per-mutation deltas are not a usable diff base.

use chatrelay_core::observe::MarkerState;

use crate::flatten::flatten_rendered;

/// Events produced by the extraction state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractEvent {
    /// Newly-appeared output text.
    Chunk(String),
    /// Production finished; any remaining buffer was flushed first.
    Finished,
    /// The output region lost its recognizable shape.
    Failed,
}

impl ExtractEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Incremental-diff state machine for a single dispatch cycle.
pub struct StreamExtractor {
    /// Entry count at submit time; the response appears one past the entry
    /// our own message appended.
    baseline: usize,
    /// Index of the response entry, resolved once per cycle.
    anchor: Option<usize>,
    /// Full flattened text as of the last tick; the prefix-diff base.
    last_seen: String,
    /// Text not yet forwarded as a chunk.
    buffer: String,
    flush_threshold: usize,
    decorative: Option<String>,
    finished: bool,
}

impl StreamExtractor {
    pub fn new(baseline: usize, flush_threshold: usize, decorative: Option<String>) -> Self {
        Self {
            baseline,
            anchor: None,
            last_seen: String::new(),
            buffer: String::new(),
            flush_threshold,
            decorative,
            finished: false,
        }
    }

    /// Whether a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance the state machine with one observation tick.
    pub fn observe(&mut self, entries: &[String], marker: MarkerState) -> Vec<ExtractEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        // Locate the response entry: the first new entry appended after the
        // cycle's own submitted message. Until it exists, ticks are no-ops.
        let anchor = match self.anchor {
            Some(idx) => idx,
            None => {
                let idx = self.baseline + 1;
                if entries.len() <= idx {
                    return events;
                }
                self.anchor = Some(idx);
                idx
            }
        };
        let Some(html) = entries.get(anchor) else {
            return events;
        };

        let text = flatten_rendered(html, self.decorative.as_deref());
        // If the renderer rewrote earlier content the prefix no longer
        // matches; fall back to the whole text rather than losing it.
        let new_text = text.strip_prefix(self.last_seen.as_str()).unwrap_or(&text);
        self.buffer.push_str(new_text);

        match marker {
            MarkerState::Missing => {
                self.finished = true;
                events.push(ExtractEvent::Failed);
            }
            MarkerState::InProgress => {
                if self.buffer.len() > self.flush_threshold {
                    events.push(ExtractEvent::Chunk(std::mem::take(&mut self.buffer)));
                }
                self.last_seen = text;
            }
            MarkerState::Done => {
                // Final flush bypasses the threshold.
                if !self.buffer.is_empty() {
                    events.push(ExtractEvent::Chunk(std::mem::take(&mut self.buffer)));
                }
                self.last_seen = text;
                self.finished = true;
                events.push(ExtractEvent::Finished);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn no_op_until_response_entry_appears() {
        let mut ex = StreamExtractor::new(1, 10, None);
        // Only the submitted message itself has rendered so far.
        let ticked = ex.observe(&entries(&["<p>q</p>", "<p>hi</p>"]), MarkerState::InProgress);
        assert!(ticked.is_empty());
        assert!(!ex.is_finished());
    }

    #[test]
    fn threshold_accumulation_across_ticks() {
        let mut ex = StreamExtractor::new(0, 10, None);
        let user = "<p>question</p>";

        // "hello" is 5 chars, below threshold: accumulate silently.
        let ev = ex.observe(
            &entries(&[user, "<p>hello</p>"]),
            MarkerState::InProgress,
        );
        assert!(ev.is_empty());

        // Diff is " world"; combined buffer "hello world" (11 > 10) flushes
        // as one chunk.
        let ev = ex.observe(
            &entries(&[user, "<p>hello world</p>"]),
            MarkerState::InProgress,
        );
        assert_eq!(ev, vec![ExtractEvent::Chunk("hello world".into())]);

        // Done with text unchanged: nothing further buffered, just Finished.
        let ev = ex.observe(&entries(&[user, "<p>hello world</p>"]), MarkerState::Done);
        assert_eq!(ev, vec![ExtractEvent::Finished]);
        assert!(ex.is_finished());
    }

    #[test]
    fn done_flushes_below_threshold() {
        let mut ex = StreamExtractor::new(0, 10, None);
        let ev = ex.observe(&entries(&["<p>q</p>", "<p>hi</p>"]), MarkerState::Done);
        assert_eq!(
            ev,
            vec![ExtractEvent::Chunk("hi".into()), ExtractEvent::Finished]
        );
    }

    #[test]
    fn missing_marker_fails_once() {
        let mut ex = StreamExtractor::new(0, 10, None);
        let ev = ex.observe(&entries(&["<p>q</p>", "<p>partial</p>"]), MarkerState::Missing);
        assert_eq!(ev, vec![ExtractEvent::Failed]);

        // Nothing further for this cycle, whatever arrives.
        let ev = ex.observe(&entries(&["<p>q</p>", "<p>more text</p>"]), MarkerState::Done);
        assert!(ev.is_empty());
    }

    #[test]
    fn ticks_after_finish_are_no_ops() {
        let mut ex = StreamExtractor::new(0, 10, None);
        let _ = ex.observe(&entries(&["<p>q</p>", "<p>answer</p>"]), MarkerState::Done);
        let ev = ex.observe(&entries(&["<p>q</p>", "<p>answer more</p>"]), MarkerState::Done);
        assert!(ev.is_empty());
    }

    #[test]
    fn repeated_tick_without_new_text_emits_nothing() {
        let mut ex = StreamExtractor::new(0, 5, None);
        let ev = ex.observe(
            &entries(&["<p>q</p>", "<p>chunk one</p>"]),
            MarkerState::InProgress,
        );
        assert_eq!(ev.len(), 1);

        let ev = ex.observe(
            &entries(&["<p>q</p>", "<p>chunk one</p>"]),
            MarkerState::InProgress,
        );
        assert!(ev.is_empty());
    }

    #[test]
    fn chunks_concatenate_to_final_text() {
        let mut ex = StreamExtractor::new(0, 10, None);
        let user = "<p>q</p>";
        let stages = [
            "<p>The quick</p>",
            "<p>The quick brown fox</p>",
            "<p>The quick brown fox jumps over</p>",
            "<p>The quick brown fox jumps over the lazy dog</p>",
        ];

        let mut collected = String::new();
        for html in &stages[..stages.len() - 1] {
            for ev in ex.observe(&entries(&[user, html]), MarkerState::InProgress) {
                if let ExtractEvent::Chunk(c) = ev {
                    collected.push_str(&c);
                }
            }
        }
        let final_html = stages[stages.len() - 1];
        for ev in ex.observe(&entries(&[user, final_html]), MarkerState::Done) {
            if let ExtractEvent::Chunk(c) = ev {
                collected.push_str(&c);
            }
        }

        assert_eq!(collected, flatten_rendered(final_html, None));
    }

    #[test]
    fn rewritten_prefix_falls_back_to_full_text() {
        let mut ex = StreamExtractor::new(0, 0, None);
        let _ = ex.observe(
            &entries(&["<p>q</p>", "<p>first draft</p>"]),
            MarkerState::InProgress,
        );
        // Renderer rewrote the entry from scratch.
        let ev = ex.observe(
            &entries(&["<p>q</p>", "<p>second draft</p>"]),
            MarkerState::InProgress,
        );
        assert_eq!(ev, vec![ExtractEvent::Chunk("second draft".into())]);
    }

    #[test]
    fn anchor_is_cached_across_ticks() {
        let mut ex = StreamExtractor::new(0, 0, None);
        let _ = ex.observe(
            &entries(&["<p>q</p>", "<p>reply</p>"]),
            MarkerState::InProgress,
        );
        // A later entry appearing after the anchor does not move it.
        let ev = ex.observe(
            &entries(&["<p>q</p>", "<p>reply two</p>", "<p>unrelated</p>"]),
            MarkerState::InProgress,
        );
        assert_eq!(ev, vec![ExtractEvent::Chunk(" two".into())]);
    }

    #[test]
    fn terminal_event_classification() {
        assert!(ExtractEvent::Finished.is_terminal());
        assert!(ExtractEvent::Failed.is_terminal());
        assert!(!ExtractEvent::Chunk("x".into()).is_terminal());
    }
}
