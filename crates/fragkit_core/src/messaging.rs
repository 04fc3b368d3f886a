//! Outward player-facing chat delivery.
//!
//! Lines carry inline color tokens (`^0`..`^9`) that are passed through
//! untouched. Only hosts that render plain text strip them.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

static COLOR_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^[0-9]").expect("valid color token regex"));

/// Sink for chat lines addressed to one game server.
pub trait MessageSink: Send + Sync {
    fn send_chat(&self, server_id: &str, line: &str) -> Result<(), String>;
}

/// Removes `^N` color tokens.
pub fn strip_color_tokens(line: &str) -> String {
    COLOR_TOKEN_RE.replace_all(line, "").into_owned()
}

/// Lines kept by `MemoryMessageSink::new`.
pub const DEFAULT_CHAT_HISTORY: usize = 256;

/// Keeps the most recent lines in memory; older lines are dropped.
#[derive(Debug)]
pub struct MemoryMessageSink {
    capacity: usize,
    lines: Mutex<VecDeque<(String, String)>>,
}

impl Default for MemoryMessageSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHAT_HISTORY)
    }
}

impl MemoryMessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `capacity` is raised to at least one line.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Snapshot of the retained `(server_id, line)` pairs in send order.
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl MessageSink for MemoryMessageSink {
    fn send_chat(&self, server_id: &str, line: &str) -> Result<(), String> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| "message buffer lock poisoned".to_string())?;
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back((server_id.to_string(), line.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{strip_color_tokens, MemoryMessageSink, MessageSink};

    #[test]
    fn strips_only_digit_tokens() {
        assert_eq!(
            strip_color_tokens("^2Private^7 reached ^xlevel 2^"),
            "Private reached ^xlevel 2^"
        );
    }

    #[test]
    fn memory_sink_keeps_send_order() {
        let sink = MemoryMessageSink::new();
        sink.send_chat("srv-1", "^2hello").unwrap();
        sink.send_chat("srv-2", "bye").unwrap();
        assert_eq!(
            sink.lines(),
            vec![
                ("srv-1".to_string(), "^2hello".to_string()),
                ("srv-2".to_string(), "bye".to_string()),
            ]
        );
    }

    #[test]
    fn memory_sink_drops_oldest_lines_past_capacity() {
        let sink = MemoryMessageSink::with_capacity(2);
        for line in ["one", "two", "three"] {
            sink.send_chat("srv", line).unwrap();
        }
        let kept: Vec<String> = sink.lines().into_iter().map(|(_, line)| line).collect();
        assert_eq!(kept, vec!["two", "three"]);
    }
}
