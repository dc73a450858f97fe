//! Output parser (C3): a restartable, byte-buffering line splitter that
//! feeds complete lines to [`parser::parse_line`].

pub mod parser;

pub use parser::{canonical_tool_name, OutputEvent, ToolCallSubtype};

/// Buffers incomplete trailing bytes across calls to [`Self::push`] and
/// emits one [`OutputEvent`] per complete `\n`-terminated line. Malformed
/// lines are skipped (logged by the caller) rather than aborting the
/// stream.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: String,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-read bytes in, returning every event completed by this
    /// call. Invalid UTF-8 bytes are replaced, matching how captured
    /// subprocess output is read elsewhere in the supervisor.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<OutputEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        self.drain_complete_lines()
    }

    fn drain_complete_lines(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            match parser::parse_line(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::debug!(error = %e, line = trimmed, "skipping malformed output line");
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_incomplete_trailing_line() {
        let mut p = StreamParser::new();
        let events = p.push(b"{\"type\":\"assistant\",\"message\":{\"content\":[");
        assert!(events.is_empty());
        let events = p.push(b"{\"type\":\"text\",\"text\":\"hi\"}]}}\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn splits_multiple_complete_lines_in_one_push() {
        let mut p = StreamParser::new();
        let chunk = b"{\"type\":\"other_a\"}\n{\"type\":\"other_b\"}\n";
        let events = p.push(chunk);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn skips_malformed_line_without_losing_later_events() {
        let mut p = StreamParser::new();
        let events = p.push(b"not json\n{\"type\":\"other\"}\n");
        assert_eq!(events.len(), 1);
    }
}
