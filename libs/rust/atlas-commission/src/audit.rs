//! Audit trail
//!
//! Every state-changing operation on a commission, settlement, mapping or
//! rate model writes exactly one audit entry: entity, action, actor and a
//! structured before/after diff. The sink is a port so the engine can be
//! exercised without a database.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Mutex;

use crate::error::CommissionError;
use crate::model::AuditEntry;

impl AuditEntry {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: i64,
        action: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            action: action.into(),
            actor: actor.into(),
            created_at: Utc::now(),
            diff: serde_json::Value::Null,
        }
    }

    /// Attach a `{before, after}` diff.
    pub fn with_diff<B: Serialize, A: Serialize>(mut self, before: B, after: A) -> Self {
        self.diff = json!({ "before": before, "after": after });
        self
    }

    /// Attach free-form structured detail.
    pub fn with_detail<D: Serialize>(mut self, detail: D) -> Self {
        self.diff = serde_json::to_value(detail).unwrap_or(serde_json::Value::Null);
        self
    }
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), CommissionError>;
}

/// Collecting sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count_for(&self, entity_type: &str, action: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.entity_type == entity_type && e.action == action)
            .count()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), CommissionError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemoryAuditSink::new();
        sink.record(
            AuditEntry::new("commission", 5, "match", "backoffice")
                .with_diff(json!({"status": "unmatched"}), json!({"status": "auto_matched"})),
        )
        .await
        .unwrap();
        sink.record(AuditEntry::new("settlement", 2, "status", "backoffice"))
            .await
            .unwrap();

        assert_eq!(sink.entries().len(), 2);
        assert_eq!(sink.count_for("commission", "match"), 1);
        let diff = &sink.entries()[0].diff;
        assert_eq!(diff["before"]["status"], "unmatched");
        assert_eq!(diff["after"]["status"], "auto_matched");
    }
}
