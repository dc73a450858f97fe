//! Health tracker (C2): per-agent failure counter and availability gate.
//!
//! Process-local and rebuilt empty on restart — after a supervisor
//! crash, every agent is optimistically retried rather than held in
//! backoff from a state nobody remembers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::backoff::delay_seconds;

#[derive(Debug, Clone, Default)]
struct AgentRecord {
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_available_at: Option<DateTime<Utc>>,
}

/// Tracks consecutive failures per agent and the resulting backoff
/// window.
#[derive(Debug, Default)]
pub struct HealthTracker {
    agents: HashMap<String, AgentRecord>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the agent's failure counter and clear its backoff.
    pub fn record_success(&mut self, agent: &str) {
        let record = self.agents.entry(agent.to_string()).or_default();
        record.consecutive_failures = 0;
        record.last_failure_at = None;
        record.next_available_at = None;
    }

    /// Increment the agent's failure counter and set its next
    /// available time based on the backoff for the *previous* count.
    pub fn record_failure(&mut self, agent: &str) {
        let now = Utc::now();
        let record = self.agents.entry(agent.to_string()).or_default();
        let delay = delay_seconds(record.consecutive_failures);
        record.consecutive_failures += 1;
        record.last_failure_at = Some(now);
        record.next_available_at = Some(now + chrono::Duration::seconds(delay as i64));
    }

    pub fn is_available(&self, agent: &str, now: DateTime<Utc>) -> bool {
        match self.agents.get(agent).and_then(|r| r.next_available_at) {
            Some(next) => next <= now,
            None => true,
        }
    }

    /// Seconds remaining before `agent` becomes available again, or 0.
    pub fn backoff_seconds(&self, agent: &str, now: DateTime<Utc>) -> i64 {
        match self.agents.get(agent).and_then(|r| r.next_available_at) {
            Some(next) => (next - now).num_seconds().max(0),
            None => 0,
        }
    }

    pub fn consecutive_failures(&self, agent: &str) -> u32 {
        self.agents.get(agent).map(|r| r.consecutive_failures).unwrap_or(0)
    }
}
