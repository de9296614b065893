use crate::types::{Role, Turn};

/// Per-user bounded conversation history.
///
/// Implementations keep at most `capacity()` turns per user and evict the
/// oldest turn before appending once a user's context is full.
pub trait ContextStore: Send + Sync {
    /// Append a turn to the user's context, evicting the oldest turn if full.
    fn append_turn(&self, user_id: &str, role: Role, content: &str);

    /// Snapshot of the user's turns in order; empty for an unknown user.
    fn get_context(&self, user_id: &str) -> Vec<Turn>;

    /// Maximum number of turns kept per user.
    fn capacity(&self) -> usize;
}
