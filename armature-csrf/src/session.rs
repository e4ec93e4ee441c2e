//! Session abstraction used by [`SessionStorage`](crate::SessionStorage).
//!
//! Session infrastructure lives outside this crate. A session is seen here as
//! a key-value mapping scoped to one client; the application attaches it to
//! each [`RequestContext`](crate::RequestContext).

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Key-value view of the current client's session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `Ok(None)` if the key is not set.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, replacing any previous one.
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

/// Session data held in memory.
///
/// Useful when the application loads session data up front and writes it
/// back after the response, and in tests.
#[derive(Debug, Default)]
pub struct MemorySession {
    data: RwLock<HashMap<String, String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session pre-filled with `data`
    pub fn from_map(data: HashMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy of the current session data
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.data.read().clone()
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }
}
