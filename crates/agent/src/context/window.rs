//! ContextWindowManager: the bounded message history sent to the model.
//!
//! Messages are costed once, when they enter the window. When the running
//! total exceeds the budget, the oldest non-pinned messages are evicted
//! until it fits. Pinned messages are the system prompt and everything from
//! the N-th most recent user message onward; they are never evicted. If the
//! pinned messages alone exceed the budget the append is refused with
//! [`Error::ContextOverflow`] and the window is left as it was.
//!
//! Eviction depends only on the message sequence and the budget, so the same
//! history always compacts to the same context.

use crate::context::token::estimate_message_tokens;
use conduit_core::error::Error;
use chrono::{DateTime, Utc};
use conduit_core::message::{Message, Role};
use tracing::debug;

/// Id of the system prompt injected by [`ContextWindow::from_history`].
pub const SYSTEM_PROMPT_ID: &str = "system-prompt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_tokens: usize,
    /// Most recent user turns kept verbatim. Values below 1 act as 1.
    pub pinned_recent_turns: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_tokens: 128_000,
            pinned_recent_turns: 2,
        }
    }
}

/// What one compaction pass removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    pub evicted: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Result of a successful append.
#[derive(Debug, Clone)]
pub struct Appended {
    /// The message as stored, with its token cost filled in
    pub message: Message,
    pub compaction: Option<Compaction>,
}

#[derive(Debug, Clone)]
pub struct ContextWindow {
    budget: ContextBudget,
    messages: Vec<Message>,
    total: usize,
    evicted: usize,
}

impl ContextWindow {
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            budget,
            messages: Vec::new(),
            total: 0,
            evicted: 0,
        }
    }

    /// Rebuild a window from persisted history, then compact it.
    ///
    /// Stored token costs are kept as-is. Unlike [`append`](Self::append),
    /// an oversized pinned tail is accepted here; the next append reports
    /// the overflow. The same inputs always yield the same window: the
    /// injected system prompt has a fixed id and is stamped with the first
    /// history timestamp.
    pub fn from_history(
        budget: ContextBudget,
        system_prompt: Option<&str>,
        history: &[Message],
    ) -> Self {
        let mut window = Self::new(budget);
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            let mut system = Message::system(prompt);
            system.id = SYSTEM_PROMPT_ID.to_string();
            system.timestamp = history
                .first()
                .map_or(DateTime::<Utc>::UNIX_EPOCH, |first| first.timestamp);
            window.push(system);
        }
        for message in history {
            window.push(message.clone());
        }
        window.enforce_budget();
        window
    }

    /// Add a message, compacting older history if needed.
    pub fn append(&mut self, message: Message) -> Result<Appended, Error> {
        let message = self.push(message);

        let pinned = self.pinned_tokens();
        if pinned > self.budget.max_tokens {
            if let Some(rejected) = self.messages.pop() {
                self.total -= rejected.token_cost;
            }
            return Err(Error::ContextOverflow {
                tokens: pinned,
                budget: self.budget.max_tokens,
            });
        }

        Ok(Appended {
            message,
            compaction: self.enforce_budget(),
        })
    }

    /// Evict the oldest non-pinned messages until the total fits.
    ///
    /// Returns `None` when nothing had to be removed. Running it again
    /// without an intervening append is a no-op.
    pub fn enforce_budget(&mut self) -> Option<Compaction> {
        if self.total <= self.budget.max_tokens {
            return None;
        }

        let tokens_before = self.total;
        let max_tokens = self.budget.max_tokens;
        let boundary = self.pinned_from();
        let mut total = self.total;
        let mut evicted = 0;
        let mut index = 0;
        self.messages.retain(|message| {
            let evictable = index < boundary && message.role != Role::System;
            index += 1;
            if evictable && total > max_tokens {
                total -= message.token_cost;
                evicted += 1;
                false
            } else {
                true
            }
        });
        self.total = total;

        if evicted == 0 {
            return None;
        }
        self.evicted += evicted;
        debug!(
            evicted,
            tokens_before,
            tokens_after = self.total,
            "Context compacted"
        );
        Some(Compaction {
            evicted,
            tokens_before,
            tokens_after: self.total,
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Sum of the token costs of the messages in the window.
    pub fn token_count(&self) -> usize {
        self.total
    }

    /// Messages evicted over the life of this window.
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn budget(&self) -> ContextBudget {
        self.budget
    }

    pub fn is_pinned(&self, index: usize) -> bool {
        self.messages
            .get(index)
            .is_some_and(|m| m.role == Role::System || index >= self.pinned_from())
    }

    pub fn pinned_tokens(&self) -> usize {
        let boundary = self.pinned_from();
        self.messages
            .iter()
            .enumerate()
            .filter(|(i, m)| *i >= boundary || m.role == Role::System)
            .map(|(_, m)| m.token_cost)
            .sum()
    }

    fn push(&mut self, mut message: Message) -> Message {
        if message.token_cost == 0 {
            message.token_cost = estimate_message_tokens(&message);
        }
        self.total += message.token_cost;
        self.messages.push(message.clone());
        message
    }

    /// Index of the first message in the pinned recent tail.
    fn pinned_from(&self) -> usize {
        let turns = self.budget.pinned_recent_turns.max(1);
        let mut seen = 0;
        for (i, message) in self.messages.iter().enumerate().rev() {
            if message.role == Role::User {
                seen += 1;
                if seen == turns {
                    return i;
                }
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_tokens: usize, pinned_recent_turns: usize) -> ContextBudget {
        ContextBudget {
            max_tokens,
            pinned_recent_turns,
        }
    }

    // 40 chars -> 10 tokens + 4 overhead = 14 per message
    fn text(n: usize) -> String {
        format!("{n:0>40}")
    }

    fn fill(window: &mut ContextWindow, turns: usize) {
        for n in 0..turns {
            window.append(Message::user(text(n))).unwrap();
            window.append(Message::assistant(text(n))).unwrap();
        }
    }

    #[test]
    fn append_costs_messages() {
        let mut window = ContextWindow::new(budget(1000, 2));
        let appended = window.append(Message::user(text(1))).unwrap();
        assert_eq!(appended.message.token_cost, 14);
        assert!(appended.compaction.is_none());
        assert_eq!(window.token_count(), 14);
    }

    #[test]
    fn evicts_oldest_unpinned_first() {
        let mut window = ContextWindow::new(budget(100, 2));
        window.append(Message::system("be brief")).unwrap();
        fill(&mut window, 4);

        // system 6 + 8 * 14 = 118 > 100: the first two turn messages go.
        assert_eq!(window.messages().len(), 7);
        assert_eq!(window.messages()[0].role, Role::System);
        assert_eq!(window.messages()[1].text(), text(1));
        assert_eq!(window.token_count(), 6 + 6 * 14);
        assert_eq!(window.evicted(), 2);
    }

    #[test]
    fn token_count_matches_message_costs() {
        let mut window = ContextWindow::new(budget(90, 1));
        fill(&mut window, 6);
        let sum: usize = window.messages().iter().map(|m| m.token_cost).sum();
        assert_eq!(window.token_count(), sum);
        assert!(window.token_count() <= 90);
    }

    #[test]
    fn enforce_budget_is_idempotent() {
        let mut window = ContextWindow::new(budget(100, 2));
        fill(&mut window, 5);
        let first: Vec<_> = window.messages().iter().map(|m| m.id.clone()).collect();
        assert!(window.enforce_budget().is_none());
        assert!(window.enforce_budget().is_none());
        let second: Vec<_> = window.messages().iter().map(|m| m.id.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn compaction_is_deterministic() {
        let history: Vec<Message> = (0..10)
            .map(|n| {
                if n % 2 == 0 {
                    Message::user(text(n))
                } else {
                    Message::assistant(text(n))
                }
            })
            .collect();
        let a = ContextWindow::from_history(budget(80, 2), Some("sys"), &history);
        let b = ContextWindow::from_history(budget(80, 2), Some("sys"), &history);
        assert_eq!(a.messages(), b.messages());
        assert_eq!(a.token_count(), b.token_count());
        assert_eq!(a.evicted(), b.evicted());
        assert!(a.evicted() > 0);

        let system = &a.messages()[0];
        assert_eq!(system.role, Role::System);
        assert_eq!(system.id, SYSTEM_PROMPT_ID);
        assert_eq!(system.timestamp, history[0].timestamp);
    }

    #[test]
    fn pinned_messages_survive_pressure() {
        let mut window = ContextWindow::new(budget(70, 2));
        window.append(Message::system("rules")).unwrap();
        fill(&mut window, 2);
        // Everything is pinned: system plus the two most recent turns.
        for i in 0..window.messages().len() {
            assert!(window.is_pinned(i));
        }
        assert_eq!(window.messages().len(), 5);
    }

    #[test]
    fn overflow_when_only_pinned_content_remains() {
        let mut window = ContextWindow::new(budget(40, 1));
        window.append(Message::system("rules")).unwrap();
        window.append(Message::user(text(1))).unwrap();
        let before: Vec<_> = window.messages().iter().map(|m| m.id.clone()).collect();

        let err = window
            .append(Message::assistant("x".repeat(200)))
            .unwrap_err();
        assert!(matches!(err, Error::ContextOverflow { budget: 40, .. }));

        // The window is unchanged; nothing pinned was dropped.
        let after: Vec<_> = window.messages().iter().map(|m| m.id.clone()).collect();
        assert_eq!(before, after);
        assert_eq!(window.token_count(), 6 + 14);
    }

    #[test]
    fn from_history_keeps_stored_costs() {
        let mut stored = Message::user("hi");
        stored.token_cost = 42;
        let window = ContextWindow::from_history(budget(1000, 2), None, &[stored]);
        assert_eq!(window.token_count(), 42);
        assert_eq!(window.messages().len(), 1);
    }

    #[test]
    fn blank_system_prompt_is_skipped() {
        let window = ContextWindow::from_history(budget(1000, 2), Some("  "), &[]);
        assert!(window.messages().is_empty());
    }
}
