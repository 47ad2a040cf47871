use chatwire_core::{ConversationTurn, StreamingState};
use std::sync::Arc;

/// Selects which prior turns are sent along with a new one.
/// Only complete turns count, and only the newest `max_turns` of them.
#[derive(Debug, Clone, Copy)]
pub struct HistoryWindow {
    max_turns: usize,
}

impl HistoryWindow {
    pub fn new(max_turns: usize) -> Self {
        Self { max_turns }
    }

    pub fn select<'a>(
        &self,
        turns: &'a [Arc<ConversationTurn>],
    ) -> impl Iterator<Item = &'a ConversationTurn> + 'a {
        let complete = turns
            .iter()
            .filter(|t| t.state == StreamingState::Complete)
            .count();
        let skip = complete.saturating_sub(self.max_turns);
        turns
            .iter()
            .filter(|t| t.state == StreamingState::Complete)
            .skip(skip)
            .map(Arc::as_ref)
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(100)
    }
}
