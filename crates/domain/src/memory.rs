use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single recalled memory item for an agent within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub content: String,
    pub score: f64,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// The session memory external collaborator (spec.md §6.4): fetch/record
/// agent memory scoped to a session. Concrete transports (REST, MCP, a
/// vector store) are out of scope for this crate; callers depend only on
/// this trait, which `shannon-gateway` wires to whatever backend is
/// configured.
#[async_trait]
pub trait SessionMemory: Send + Sync {
    async fn fetch_agent_memory(
        &self,
        session_id: &str,
        agent_id: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryItem>>;

    async fn record_agent_memory(
        &self,
        session_id: &str,
        agent_id: &str,
        content: &str,
    ) -> Result<()>;
}

/// An in-memory `SessionMemory` with no persistence, sufficient for tests
/// and for running with memory recall disabled.
#[derive(Debug, Default)]
pub struct NullSessionMemory;

#[async_trait]
impl SessionMemory for NullSessionMemory {
    async fn fetch_agent_memory(
        &self,
        _session_id: &str,
        _agent_id: &str,
        _top_k: usize,
    ) -> Result<Vec<MemoryItem>> {
        Ok(Vec::new())
    }

    async fn record_agent_memory(&self, _session_id: &str, _agent_id: &str, _content: &str) -> Result<()> {
        Ok(())
    }
}
