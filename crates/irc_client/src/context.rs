//! L11 — Context/Scrollback Model. A context is a bounded ring buffer of
//! immutable rendered lines with a last-read marker (§4.11).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_INTERACTIVE_CAP: usize = 500;
pub const DEFAULT_HEADLESS_CAP: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    Status,
    Channel,
    Query,
}

/// One rendered line retained in a context's scrollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedLine {
    pub text: String,
    pub timestamp_millis: i64,
}

/// A named message buffer: `status`, a channel, or a query with a nick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub kind: ContextKind,
    cap: usize,
    lines: VecDeque<RenderedLine>,
    /// Monotonically increasing index of the oldest retained line; lets
    /// `iter_from` address lines that have since been evicted.
    base_offset: u64,
    scroll_offset: usize,
    last_read: u64,
}

impl Context {
    pub fn new(id: impl Into<String>, kind: ContextKind, cap: usize) -> Self {
        Context {
            id: id.into(),
            kind,
            cap: cap.max(1),
            lines: VecDeque::new(),
            base_offset: 0,
            scroll_offset: 0,
            last_read: 0,
        }
    }

    /// Append a line, evicting the oldest once the cap is exceeded.
    pub fn append(&mut self, line: RenderedLine) {
        self.lines.push_back(line);
        if self.lines.len() > self.cap {
            self.lines.pop_front();
            self.base_offset += 1;
        }
    }

    /// Lines at or after the given global offset, oldest first.
    pub fn iter_from(&self, offset: u64) -> impl Iterator<Item = (u64, &RenderedLine)> {
        let skip = offset.saturating_sub(self.base_offset);
        self.lines
            .iter()
            .enumerate()
            .skip(skip as usize)
            .map(move |(i, line)| (self.base_offset + i as u64, line))
    }

    pub fn clear(&mut self) {
        self.base_offset += self.lines.len() as u64;
        self.lines.clear();
        self.scroll_offset = 0;
    }

    /// Drop the oldest lines until at most `max_len` remain. Used when
    /// persisting only a bounded tail of the live scrollback.
    pub fn truncate_to_tail(&mut self, max_len: usize) {
        while self.lines.len() > max_len {
            self.lines.pop_front();
            self.base_offset += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The offset one past the newest retained line.
    pub fn head_offset(&self) -> u64 {
        self.base_offset + self.lines.len() as u64
    }

    pub fn last_read(&self) -> u64 {
        self.last_read
    }

    pub fn mark_read(&mut self) {
        self.last_read = self.head_offset();
    }

    pub fn has_unread(&self) -> bool {
        self.last_read < self.head_offset()
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn set_scroll_offset(&mut self, offset: usize) {
        self.scroll_offset = offset;
    }
}

/// Canonical enumeration order (§4.11): status first, then channels in
/// join order, then queries in first-message order. Callers append ids to
/// this tracker at creation time; it never reorders existing entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextOrder {
    status: Option<String>,
    channels: Vec<String>,
    queries: Vec<String>,
}

impl ContextOrder {
    pub fn record(&mut self, id: &str, kind: ContextKind) {
        match kind {
            ContextKind::Status => {
                if self.status.is_none() {
                    self.status = Some(id.to_string());
                }
            }
            ContextKind::Channel => {
                if !self.channels.iter().any(|c| c == id) {
                    self.channels.push(id.to_string());
                }
            }
            ContextKind::Query => {
                if !self.queries.iter().any(|c| c == id) {
                    self.queries.push(id.to_string());
                }
            }
        }
    }

    pub fn remove(&mut self, id: &str) {
        if self.status.as_deref() == Some(id) {
            self.status = None;
        }
        self.channels.retain(|c| c != id);
        self.queries.retain(|c| c != id);
    }

    pub fn ordered_ids(&self) -> Vec<String> {
        self.status
            .iter()
            .cloned()
            .chain(self.channels.iter().cloned())
            .chain(self.queries.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> RenderedLine {
        RenderedLine {
            text: text.to_string(),
            timestamp_millis: 0,
        }
    }

    #[test]
    fn append_past_cap_evicts_oldest() {
        let mut ctx = Context::new("#chan", ContextKind::Channel, 3);
        for i in 0..5 {
            ctx.append(line(&i.to_string()));
        }
        assert_eq!(ctx.len(), 3);
        let remaining: Vec<_> = ctx.iter_from(0).map(|(_, l)| l.text.clone()).collect();
        assert_eq!(remaining, vec!["2", "3", "4"]);
    }

    #[test]
    fn iter_from_addresses_evicted_offsets_by_skipping() {
        let mut ctx = Context::new("#chan", ContextKind::Channel, 2);
        for i in 0..4 {
            ctx.append(line(&i.to_string()));
        }
        let from_offset_2: Vec<_> = ctx.iter_from(2).map(|(_, l)| l.text.clone()).collect();
        assert_eq!(from_offset_2, vec!["2", "3"]);
    }

    #[test]
    fn mark_read_clears_unread_flag() {
        let mut ctx = Context::new("status", ContextKind::Status, 10);
        ctx.append(line("hello"));
        assert!(ctx.has_unread());
        ctx.mark_read();
        assert!(!ctx.has_unread());
        ctx.append(line("world"));
        assert!(ctx.has_unread());
    }

    #[test]
    fn clear_advances_base_offset_past_the_cleared_lines() {
        let mut ctx = Context::new("#chan", ContextKind::Channel, 10);
        for i in 0..3 {
            ctx.append(line(&i.to_string()));
        }
        let head_before = ctx.head_offset();
        ctx.clear();
        assert_eq!(ctx.head_offset(), head_before, "head_offset must not rewind on clear");
        assert!(ctx.is_empty());

        ctx.append(line("fresh"));
        let fresh: Vec<_> = ctx.iter_from(head_before).map(|(_, l)| l.text.clone()).collect();
        assert_eq!(fresh, vec!["fresh"], "offsets issued after clear must not alias evicted lines");
    }

    #[test]
    fn context_order_places_status_then_channels_then_queries() {
        let mut order = ContextOrder::default();
        order.record("alice", ContextKind::Query);
        order.record("#b", ContextKind::Channel);
        order.record("status", ContextKind::Status);
        order.record("#a", ContextKind::Channel);
        assert_eq!(order.ordered_ids(), vec!["status", "#b", "#a", "alice"]);
    }
}
