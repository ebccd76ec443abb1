//! Append-only audit trail
//!
//! Every state-changing event in the pipeline lands here exactly once.
//! Entries are never mutated or removed; there is no update surface.

use crate::error::Result;
use crate::models::{AuditEntry, AuditEvent};
use crate::store::Repository;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Query filter for the audit trail. All fields optional; an empty filter
/// returns the full history.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor: Option<String>,
    pub entity: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Audit trail storage. The sequence counter breaks timestamp ties so the
/// history has a total order even within one clock tick.
pub struct AuditLog {
    entries: Repository<AuditEntry>,
    seq: AtomicU64,
}

impl AuditLog {
    /// Wrap an entry store, resuming the sequence counter past whatever the
    /// store already holds.
    pub async fn new(entries: Repository<AuditEntry>) -> Self {
        let max_seq = entries
            .list()
            .await
            .iter()
            .map(|entry| entry.seq)
            .max()
            .unwrap_or(0);

        Self {
            entries,
            seq: AtomicU64::new(max_seq),
        }
    }

    /// Append one entry. Assigns id, timestamp, sequence number, and the
    /// integrity hash.
    pub async fn append(&self, event: AuditEvent) -> Result<AuditEntry> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut entry = AuditEntry {
            entry_id: Uuid::new_v4(),
            seq,
            timestamp: Utc::now(),
            actor: event.actor,
            actor_kind: event.actor_kind,
            action: event.action,
            entity: event.entity,
            entity_id: event.entity_id,
            before: event.before,
            after: event.after,
            amount: event.amount,
            reason: event.reason,
            integrity_hash: String::new(),
        };
        entry.integrity_hash = entry_hash(&entry);

        self.entries.create(entry.clone()).await?;

        debug!(
            seq = entry.seq,
            action = %entry.action,
            entity = %entry.entity,
            "Audit entry appended"
        );

        Ok(entry)
    }

    pub async fn get(&self, entry_id: Uuid) -> Option<AuditEntry> {
        self.entries.get(&entry_id.to_string()).await
    }

    /// Entries matching the filter, ordered by `(timestamp, seq)` ascending.
    pub async fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .list()
            .await
            .into_iter()
            .filter(|entry| {
                filter
                    .actor
                    .as_ref()
                    .map(|actor| &entry.actor == actor)
                    .unwrap_or(true)
                    && filter
                        .entity
                        .as_ref()
                        .map(|entity| &entry.entity == entity)
                        .unwrap_or(true)
                    && filter.from.map(|from| entry.timestamp >= from).unwrap_or(true)
                    && filter.to.map(|to| entry.timestamp <= to).unwrap_or(true)
            })
            .collect();

        entries.sort_by_key(|entry| (entry.timestamp, entry.seq));
        entries
    }

    pub async fn len(&self) -> usize {
        self.entries.len().await
    }

    /// Recompute an entry's hash and compare with the stored one.
    pub async fn verify_integrity(&self, entry_id: Uuid) -> bool {
        match self.get(entry_id).await {
            Some(entry) => {
                let mut unhashed = entry.clone();
                unhashed.integrity_hash = String::new();
                entry_hash(&unhashed) == entry.integrity_hash
            }
            None => false,
        }
    }
}

/// Compute the SHA-256 hash of an entry's JSON form.
/// Uses zero-copy streaming serialization into the hasher.
pub fn entry_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), entry).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActorKind;

    fn event(actor: &str, action: &str, entity: &str) -> AuditEvent {
        AuditEvent {
            actor: actor.to_string(),
            actor_kind: ActorKind::Ai,
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: "ent_1".to_string(),
            before: None,
            after: None,
            amount: None,
            reason: "test".to_string(),
        }
    }

    async fn fresh_log() -> AuditLog {
        AuditLog::new(Repository::in_memory()).await
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_seq() {
        let log = fresh_log().await;

        let first = log.append(event("A", "Created", "Invoice")).await.unwrap();
        let second = log.append(event("B", "Created", "Invoice")).await.unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let log = fresh_log().await;

        log.append(event("Risk Assessor", "Risk Elevated", "Risk"))
            .await
            .unwrap();
        log.append(event("Admin User", "Approval Granted", "Approval"))
            .await
            .unwrap();
        log.append(event("Risk Assessor", "Risk Lowered", "Risk"))
            .await
            .unwrap();

        let all = log.query(&AuditFilter::default()).await;
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| (w[0].timestamp, w[0].seq) <= (w[1].timestamp, w[1].seq)));

        let by_actor = log
            .query(&AuditFilter {
                actor: Some("Risk Assessor".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_actor.len(), 2);

        let by_entity = log
            .query(&AuditFilter {
                entity: Some("Approval".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_entity.len(), 1);
        assert_eq!(by_entity[0].action, "Approval Granted");
    }

    #[tokio::test]
    async fn test_time_range_filter() {
        let log = fresh_log().await;

        let entry = log.append(event("A", "Created", "Invoice")).await.unwrap();

        let inside = log
            .query(&AuditFilter {
                from: Some(entry.timestamp),
                to: Some(entry.timestamp),
                ..Default::default()
            })
            .await;
        assert_eq!(inside.len(), 1);

        let after = log
            .query(&AuditFilter {
                from: Some(entry.timestamp + chrono::Duration::seconds(1)),
                ..Default::default()
            })
            .await;
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_integrity_hash_verifies() {
        let log = fresh_log().await;

        let entry = log.append(event("A", "Created", "Invoice")).await.unwrap();

        assert!(!entry.integrity_hash.is_empty());
        assert!(log.verify_integrity(entry.entry_id).await);
        assert!(!log.verify_integrity(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_seq_resumes_from_store() {
        let entries: Repository<AuditEntry> = Repository::in_memory();

        {
            let log = AuditLog::new(entries.clone()).await;
            log.append(event("A", "Created", "Invoice")).await.unwrap();
            log.append(event("A", "Created", "Invoice")).await.unwrap();
        }

        let resumed = AuditLog::new(entries).await;
        let next = resumed.append(event("B", "Created", "Invoice")).await.unwrap();
        assert_eq!(next.seq, 3);
    }
}
