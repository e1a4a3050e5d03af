//! Bounded conversation context
//!
//! A ring buffer of the last `max` turns. The oldest turn is evicted
//! before a new one is appended, so with `max = 1` every step sees only
//! the newest turn.

use std::collections::VecDeque;

use crate::llm::Message;

#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: VecDeque<Message>,
    max: usize,
}

impl ConversationContext {
    pub fn new(max: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max: max.max(1),
        }
    }

    /// Append a turn, evicting the oldest beyond capacity
    pub fn push(&mut self, message: Message) {
        while self.turns.len() >= self.max {
            self.turns.pop_front();
        }
        self.turns.push_back(message);
    }

    /// Snapshot of the current window for a completion request
    pub fn messages(&self) -> Vec<Message> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageContent;

    fn text_of(message: &Message) -> &str {
        match &message.content {
            MessageContent::Text(t) => t,
            MessageContent::Blocks(_) => "",
        }
    }

    #[test]
    fn test_push_within_capacity() {
        let mut ctx = ConversationContext::new(3);
        ctx.push(Message::user("a"));
        ctx.push(Message::assistant("b"));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_oldest_evicted_at_capacity() {
        let mut ctx = ConversationContext::new(3);
        for text in ["a", "b", "c", "d"] {
            ctx.push(Message::user(text));
        }

        let messages = ctx.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(text_of(&messages[0]), "b");
        assert_eq!(text_of(&messages[2]), "d");
    }

    #[test]
    fn test_capacity_one_keeps_only_newest() {
        let mut ctx = ConversationContext::new(1);
        ctx.push(Message::user("first"));
        ctx.push(Message::user("second"));

        let messages = ctx.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(text_of(&messages[0]), "second");
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let mut ctx = ConversationContext::new(0);
        ctx.push(Message::user("only"));
        assert_eq!(ctx.len(), 1);
    }
}
