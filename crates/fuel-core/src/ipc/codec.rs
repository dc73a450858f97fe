//! IPC protocol codec (C4): one structured message per `\n`-terminated
//! line.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages the supervisor emits to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot {
        ts: DateTime<Utc>,
        running: usize,
        ready: usize,
        agent_backoff: HashMap<String, i64>,
    },
    TaskStarted {
        ts: DateTime<Utc>,
        task_id: String,
        agent: String,
    },
    TaskCompleted {
        ts: DateTime<Utc>,
        task_id: String,
    },
    TaskFailed {
        ts: DateTime<Utc>,
        task_id: String,
        reason: String,
    },
    AgentBackoff {
        ts: DateTime<Utc>,
        agent: String,
        seconds: i64,
    },
    Shutdown {
        ts: DateTime<Utc>,
    },
}

/// Commands a client may send. Anything that doesn't parse into one of
/// these becomes [`Decoded::Error`] rather than closing the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    Pause,
    Resume,
    Retry { id: String },
    Subscribe,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Message(T),
    Error { raw: String },
}

/// Encode a message as one line, guaranteed to contain no embedded `\n`
/// except the trailing terminator (JSON string escaping already turns
/// any `\n` inside a field value into the two-byte sequence `\n`).
pub fn encode<T: Serialize>(msg: &T) -> String {
    let mut line = serde_json::to_string(msg).expect("message types are always serializable");
    debug_assert!(!line.contains('\n'), "encoded message must not contain a raw newline");
    line.push('\n');
    line
}

/// Decode one line (without its trailing `\n`). Empty lines should be
/// skipped by the caller before reaching here.
pub fn decode<T: DeserializeOwned>(line: &str) -> Decoded<T> {
    match serde_json::from_str::<T>(line) {
        Ok(msg) => Decoded::Message(msg),
        Err(_) => Decoded::Error { raw: line.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_client_messages() {
        for msg in [
            ClientMessage::Pause,
            ClientMessage::Resume,
            ClientMessage::Retry { id: "f-aaaaaa".into() },
            ClientMessage::Subscribe,
        ] {
            let line = encode(&msg);
            assert!(line.ends_with('\n'));
            assert_eq!(line.matches('\n').count(), 1);
            let decoded = decode::<ClientMessage>(line.trim_end());
            assert_eq!(decoded, Decoded::Message(msg));
        }
    }

    #[test]
    fn round_trips_server_messages() {
        let mut agent_backoff = HashMap::new();
        agent_backoff.insert("claude".to_string(), 12);
        for msg in [
            ServerMessage::Snapshot {
                ts: Utc::now(),
                running: 1,
                ready: 2,
                agent_backoff: agent_backoff.clone(),
            },
            ServerMessage::TaskStarted {
                ts: Utc::now(),
                task_id: "f-aaaaaa".into(),
                agent: "claude".into(),
            },
            ServerMessage::TaskCompleted {
                ts: Utc::now(),
                task_id: "f-aaaaaa".into(),
            },
            ServerMessage::TaskFailed {
                ts: Utc::now(),
                task_id: "f-aaaaaa".into(),
                reason: "exit code 1".into(),
            },
            ServerMessage::AgentBackoff {
                ts: Utc::now(),
                agent: "claude".into(),
                seconds: 20,
            },
            ServerMessage::Shutdown { ts: Utc::now() },
        ] {
            let line = encode(&msg);
            assert!(line.ends_with('\n'));
            assert_eq!(line.matches('\n').count(), 1);
            let decoded = decode::<ServerMessage>(line.trim_end());
            assert_eq!(decoded, Decoded::Message(msg));
        }
    }

    #[test]
    fn embedded_newline_in_field_is_escaped() {
        let msg = ClientMessage::Retry {
            id: "line1\nline2".to_string(),
        };
        let line = encode(&msg);
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn unparseable_line_becomes_error_without_panicking() {
        let decoded = decode::<ClientMessage>("not json");
        assert_eq!(
            decoded,
            Decoded::Error {
                raw: "not json".to_string()
            }
        );
    }

    #[test]
    fn unknown_kind_becomes_error() {
        let decoded = decode::<ClientMessage>(r#"{"kind":"frobnicate"}"#);
        assert!(matches!(decoded, Decoded::Error { .. }));
    }
}
