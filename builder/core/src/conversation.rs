//! Conversation Log
//!
//! Append-only record of the turns received for one conversation. Insertion
//! order is the canonical order; nothing is ever reordered or removed while a
//! conversation is live.

use std::collections::HashSet;

use thiserror::Error;

use crate::messages::{ConversationTurn, TurnId};

/// A turn was rejected because its id is already in the log
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Duplicate turn id: {0}")]
pub struct DuplicateTurn(pub TurnId);

/// Ordered, append-only sequence of turns
#[derive(Clone, Debug, Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
    ids: HashSet<TurnId>,
}

impl ConversationLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateTurn`] if a turn with the same id was already
    /// appended; the log is left unchanged.
    pub fn append(&mut self, turn: ConversationTurn) -> Result<&ConversationTurn, DuplicateTurn> {
        if !self.ids.insert(turn.id().clone()) {
            return Err(DuplicateTurn(turn.id().clone()));
        }
        self.turns.push(turn);
        let index = self.turns.len() - 1;
        Ok(&self.turns[index])
    }

    /// All turns in append order
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Look up a turn by id
    #[must_use]
    pub fn get(&self, id: &TurnId) -> Option<&ConversationTurn> {
        if !self.ids.contains(id) {
            return None;
        }
        self.turns.iter().find(|t| t.id() == id)
    }

    /// Whether a turn id has been seen
    #[must_use]
    pub fn contains(&self, id: &TurnId) -> bool {
        self.ids.contains(id)
    }

    /// Most recent turn
    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
