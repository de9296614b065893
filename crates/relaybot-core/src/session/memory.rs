use std::collections::VecDeque;

use dashmap::DashMap;

use crate::config::DEFAULT_CONTEXT_LIMIT;
use crate::types::{Role, Turn};

use super::store::ContextStore;

/// Process-local context store. Contexts are lost on restart.
pub struct InMemoryContextStore {
    contexts: DashMap<String, VecDeque<Turn>>,
    capacity: usize,
}

impl InMemoryContextStore {
    /// Create a store that keeps at most `capacity` turns per user (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            contexts: DashMap::new(),
            capacity: capacity.max(1),
        }
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_LIMIT)
    }
}

impl ContextStore for InMemoryContextStore {
    fn append_turn(&self, user_id: &str, role: Role, content: &str) {
        // The entry guard holds the shard lock across evict + push.
        let mut turns = self
            .contexts
            .entry(user_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        while turns.len() >= self.capacity {
            turns.pop_front();
        }
        turns.push_back(Turn::new(role, content));
    }

    fn get_context(&self, user_id: &str) -> Vec<Turn> {
        self.contexts
            .get(user_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_unknown_user_is_empty() {
        let store = InMemoryContextStore::default();
        assert!(store.get_context("nobody").is_empty());
        assert!(store.contexts.is_empty());
    }

    #[test]
    fn test_append_keeps_order() {
        let store = InMemoryContextStore::default();
        store.append_turn("u1", Role::User, "Hello");
        store.append_turn("u1", Role::Assistant, "Hi there!");

        let turns = store.get_context("u1");
        assert_eq!(turns, vec![Turn::user("Hello"), Turn::assistant("Hi there!")]);
    }

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let store = InMemoryContextStore::new(10);
        for i in 0..25 {
            store.append_turn("u1", Role::User, &format!("msg {i}"));
            assert!(store.get_context("u1").len() <= 10);
        }

        let turns = store.get_context("u1");
        assert_eq!(turns.len(), 10);
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        let expected: Vec<String> = (15..25).map(|i| format!("msg {i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_users_are_isolated() {
        let store = InMemoryContextStore::new(2);
        store.append_turn("a", Role::User, "a1");
        store.append_turn("b", Role::User, "b1");
        store.append_turn("a", Role::User, "a2");
        store.append_turn("a", Role::User, "a3");

        assert_eq!(store.get_context("a"), vec![Turn::user("a2"), Turn::user("a3")]);
        assert_eq!(store.get_context("b"), vec![Turn::user("b1")]);
        assert_eq!(store.contexts.len(), 2);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = InMemoryContextStore::default();
        store.append_turn("u1", Role::User, "first");
        let snapshot = store.get_context("u1");
        store.append_turn("u1", Role::Assistant, "second");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.get_context("u1").len(), 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let store = InMemoryContextStore::new(0);
        assert_eq!(store.capacity(), 1);
        store.append_turn("u1", Role::User, "one");
        store.append_turn("u1", Role::User, "two");
        assert_eq!(store.get_context("u1"), vec![Turn::user("two")]);
    }

    #[test]
    fn test_concurrent_appends_respect_capacity() {
        let store = Arc::new(InMemoryContextStore::new(10));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.append_turn("shared", Role::User, &format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_context("shared").len(), 10);
    }
}
