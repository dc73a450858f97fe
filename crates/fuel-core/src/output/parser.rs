//! Classification of a single JSONL event line into an [`OutputEvent`].
//! Grounded on the Claude Code stream-json classifier: a `type` field
//! selects the branch, unrecognized types pass through unchanged
//! rather than being dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallSubtype {
    Start,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputEvent {
    /// First text content item extracted from an `assistant` message.
    Text { content: String },
    /// A tool invocation, with its canonical name and start/progress
    /// subtype.
    ToolCall {
        tool: String,
        subtype: ToolCallSubtype,
    },
    /// Any event whose `type` we don't specifically classify, passed
    /// through unchanged so downstream consumers can still see it.
    Opaque { event_type: String, raw: Value },
}

/// Map a tool-call key (e.g. `"readToolCall"`) to its canonical tool
/// name (e.g. `"Read"`).
pub fn canonical_tool_name(key: &str) -> String {
    match key {
        "readToolCall" => "Read".to_string(),
        "writeToolCall" => "Write".to_string(),
        "editToolCall" => "Edit".to_string(),
        "shellToolCall" | "bashToolCall" => "Bash".to_string(),
        "globToolCall" => "Glob".to_string(),
        "grepToolCall" => "Grep".to_string(),
        other => {
            let stripped = other.strip_suffix("ToolCall").unwrap_or(other);
            let mut chars = stripped.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => stripped.to_string(),
            }
        }
    }
}

/// Parse one complete JSONL line into an [`OutputEvent`]. Malformed
/// JSON is reported as an error so the caller can log-and-skip without
/// crashing the stream.
pub fn parse_line(line: &str) -> Result<OutputEvent, serde_json::Error> {
    let v: Value = serde_json::from_str(line)?;
    let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        "assistant" => {
            let content = v
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
                .and_then(|items| items.iter().find(|item| item.get("type").and_then(|t| t.as_str()) == Some("text")))
                .and_then(|item| item.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            Ok(OutputEvent::Text { content })
        }
        "tool_call" => {
            let tool_key = v
                .as_object()
                .and_then(|obj| obj.keys().find(|k| k.ends_with("ToolCall")))
                .cloned()
                .unwrap_or_else(|| "unknownToolCall".to_string());
            let subtype = match v.get("subtype").and_then(|s| s.as_str()) {
                Some("progress") => ToolCallSubtype::Progress,
                _ => ToolCallSubtype::Start,
            };
            Ok(OutputEvent::ToolCall {
                tool: canonical_tool_name(&tool_key),
                subtype,
            })
        }
        other => Ok(OutputEvent::Opaque {
            event_type: other.to_string(),
            raw: v,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_match_known_tools() {
        assert_eq!(canonical_tool_name("readToolCall"), "Read");
        assert_eq!(canonical_tool_name("shellToolCall"), "Bash");
        assert_eq!(canonical_tool_name("bashToolCall"), "Bash");
        assert_eq!(canonical_tool_name("globToolCall"), "Glob");
    }

    #[test]
    fn canonical_name_falls_back_to_capitalized_prefix() {
        assert_eq!(canonical_tool_name("fetchToolCall"), "Fetch");
    }

    #[test]
    fn parses_assistant_text() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#;
        let event = parse_line(line).unwrap();
        assert_eq!(event, OutputEvent::Text { content: "hi".into() });
    }

    #[test]
    fn parses_tool_call_start() {
        let line = r#"{"type":"tool_call","readToolCall":{"path":"a.rs"}}"#;
        let event = parse_line(line).unwrap();
        assert_eq!(
            event,
            OutputEvent::ToolCall {
                tool: "Read".into(),
                subtype: ToolCallSubtype::Start
            }
        );
    }

    #[test]
    fn parses_tool_call_progress() {
        let line = r#"{"type":"tool_call","subtype":"progress","bashToolCall":{}}"#;
        let event = parse_line(line).unwrap();
        assert_eq!(
            event,
            OutputEvent::ToolCall {
                tool: "Bash".into(),
                subtype: ToolCallSubtype::Progress
            }
        );
    }

    #[test]
    fn unrecognized_type_passes_through_opaque() {
        let line = r#"{"type":"result","result":"done"}"#;
        let event = parse_line(line).unwrap();
        match event {
            OutputEvent::Opaque { event_type, .. } => assert_eq!(event_type, "result"),
            other => panic!("expected Opaque, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_line("not json").is_err());
    }
}
