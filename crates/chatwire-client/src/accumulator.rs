use chatwire_core::{ConversationTurn, Role, StreamingState};
use std::sync::Arc;

/// The conversation timeline, append-only except for rollback.
///
/// Turns are held behind `Arc`. [`MessageAccumulator::snapshot`] clones the
/// pointers, and a mutation copies only the turn it touches (and only when a
/// snapshot still shares it). Observers can therefore compare turns with
/// `Arc::ptr_eq` to find what changed.
#[derive(Debug, Default, Clone)]
pub struct MessageAccumulator {
    turns: Vec<Arc<ConversationTurn>>,
}

impl MessageAccumulator {
    /// Creates an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(Arc::new(turn));
    }

    /// Mutates the last turn if it is an assistant turn in `Streaming` state.
    ///
    /// Returns `None` without calling `mutator` otherwise.
    pub fn update_last<F, R>(&mut self, mutator: F) -> Option<R>
    where
        F: FnOnce(&mut ConversationTurn) -> R,
    {
        let last = self.turns.last_mut()?;
        if !last.is_streaming_assistant() {
            return None;
        }
        Some(mutator(Arc::make_mut(last)))
    }

    /// Moves a pending assistant placeholder at the end to `Streaming`.
    pub fn begin_streaming(&mut self) -> bool {
        match self.turns.last_mut() {
            Some(last) if last.role == Role::Assistant && last.state == StreamingState::Pending => {
                Arc::make_mut(last).state = StreamingState::Streaming;
                true
            }
            _ => false,
        }
    }

    /// Freezes the last assistant turn at `state` if it is still open.
    pub fn finish_last(&mut self, state: StreamingState) -> bool {
        match self.turns.last_mut() {
            Some(last) if last.role == Role::Assistant && last.state.is_open() => {
                Arc::make_mut(last).state = state;
                true
            }
            _ => false,
        }
    }

    /// Drops every turn after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    /// Removes the last turn if it is an assistant turn with no parts.
    pub fn pop_empty_placeholder(&mut self) -> bool {
        match self.turns.last() {
            Some(last) if last.role == Role::Assistant && last.is_empty() => {
                self.turns.pop();
                true
            }
            _ => false,
        }
    }

    /// The last turn.
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last().map(Arc::as_ref)
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// A view of the timeline that later mutations will not affect.
    pub fn snapshot(&self) -> Vec<Arc<ConversationTurn>> {
        self.turns.clone()
    }
}
