use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Persisted per-user message counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub messages: u64,
}

/// Aggregate over all user records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub users: u64,
    pub messages: u64,
}

/// Trait for usage counter backends.
#[async_trait]
pub trait UsageCounter: Send + Sync {
    /// Load or create the user's record, add one message, commit.
    /// Returns the new count.
    async fn increment(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Fetch a single user's record.
    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Count of users and sum of their message counters.
    async fn stats(&self) -> Result<UsageStats, StoreError>;
}

/// In-memory usage counter (for local dev/testing).
pub struct InMemoryUsageCounter {
    records: std::sync::Mutex<HashMap<String, UserRecord>>,
}

impl InMemoryUsageCounter {
    pub fn new() -> Self {
        Self {
            records: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUsageCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageCounter for InMemoryUsageCounter {
    async fn increment(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Corrupt(format!("usage lock poisoned: {e}")))?;
        let record = records
            .entry(user_id.to_string())
            .or_insert_with(|| UserRecord {
                id: user_id.to_string(),
                created_at: Utc::now(),
                messages: 0,
            });
        record.messages += 1;
        Ok(record.messages)
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Corrupt(format!("usage lock poisoned: {e}")))?;
        Ok(records.get(user_id).cloned())
    }

    async fn stats(&self) -> Result<UsageStats, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Corrupt(format!("usage lock poisoned: {e}")))?;
        Ok(UsageStats {
            users: records.len() as u64,
            messages: records.values().map(|r| r.messages).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_increment() {
        let counter = InMemoryUsageCounter::new();

        assert_eq!(counter.increment("u1").await.unwrap(), 1);
        assert_eq!(counter.increment("u1").await.unwrap(), 2);
        assert_eq!(counter.increment("u2").await.unwrap(), 1);

        let record = counter.get("u1").await.unwrap().unwrap();
        assert_eq!(record.id, "u1");
        assert_eq!(record.messages, 2);
        assert!(counter.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_stats() {
        let counter = InMemoryUsageCounter::new();
        assert_eq!(counter.stats().await.unwrap(), UsageStats::default());

        for _ in 0..3 {
            counter.increment("u1").await.unwrap();
        }
        counter.increment("u2").await.unwrap();

        let stats = counter.stats().await.unwrap();
        assert_eq!(stats, UsageStats { users: 2, messages: 4 });
    }
}
