//! Keyed entity stores
//!
//! One repository per entity kind, injected explicitly into the components
//! that own it. In-memory maps behind a lock, with an optional JSON file
//! under each map so records survive process restarts.

use crate::error::Result;
use crate::models::{Approval, AuditEntry, Budget, Invoice, PaymentBatch, Plan};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Anything a repository can hold. Keys are generated by the owning
/// component, never by external callers.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn key(&self) -> String;
}

impl Entity for Plan {
    fn key(&self) -> String {
        self.plan_id.to_string()
    }
}

impl Entity for Approval {
    fn key(&self) -> String {
        self.approval_id.to_string()
    }
}

impl Entity for AuditEntry {
    fn key(&self) -> String {
        self.entry_id.to_string()
    }
}

impl Entity for Invoice {
    fn key(&self) -> String {
        self.invoice_id.to_string()
    }
}

impl Entity for PaymentBatch {
    fn key(&self) -> String {
        self.batch_id.to_string()
    }
}

impl Entity for Budget {
    fn key(&self) -> String {
        self.budget_id.clone()
    }
}

/// Generic keyed collection with write-through JSON persistence.
///
/// All mutation happens under the write lock, so `update` is an atomic
/// read-modify-write: the closure sees a consistent value and its result is
/// committed before any other writer runs. A failed write-through is rolled
/// back in memory before the error surfaces, so callers never observe a
/// state that was not durably stored.
#[derive(Clone)]
pub struct Repository<T: Entity> {
    items: Arc<RwLock<HashMap<String, T>>>,
    persist: Option<Arc<PathBuf>>,
}

impl<T: Entity> Repository<T> {
    pub fn in_memory() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            persist: None,
        }
    }

    /// Open a file-backed repository, loading the file if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let items = if path.exists() {
            let raw = std::fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            HashMap::new()
        };

        Ok(Self {
            items: Arc::new(RwLock::new(items)),
            persist: Some(Arc::new(path)),
        })
    }

    /// Insert an entity under its own key. A colliding key overwrites
    /// silently; keys come from the owning component, so collisions only
    /// happen on deliberate re-insertion.
    pub async fn create(&self, item: T) -> Result<()> {
        let key = item.key();
        let mut items = self.items.write().await;

        let previous = items.insert(key.clone(), item);

        if let Err(e) = self.flush(&items) {
            match previous {
                Some(old) => items.insert(key, old),
                None => items.remove(&key),
            };
            return Err(e);
        }

        Ok(())
    }

    /// Atomic read-modify-write. Returns `None` without touching anything
    /// when the id is missing (a no-op, not an error).
    pub async fn update<R, F>(&self, id: &str, apply: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut T) -> R + Send,
        R: Send,
    {
        let mut items = self.items.write().await;

        let Some(current) = items.get(id) else {
            return Ok(None);
        };

        let previous = current.clone();
        let mut next = current.clone();
        let result = apply(&mut next);
        items.insert(id.to_string(), next);

        if let Err(e) = self.flush(&items) {
            items.insert(id.to_string(), previous);
            return Err(e);
        }

        Ok(Some(result))
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut items = self.items.write().await;

        let Some(removed) = items.remove(id) else {
            return Ok(false);
        };

        if let Err(e) = self.flush(&items) {
            items.insert(id.to_string(), removed);
            return Err(e);
        }

        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        let items = self.items.read().await;
        items.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<T> {
        let items = self.items.read().await;
        items.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let items = self.items.read().await;
        items.len()
    }

    fn flush(&self, items: &HashMap<String, T>) -> Result<()> {
        if let Some(path) = &self.persist {
            let raw = serde_json::to_vec_pretty(items)?;
            std::fs::write(path.as_ref(), raw)?;
        }
        Ok(())
    }
}

/// The full set of repositories the pipeline works against, bundled for
/// dependency injection.
#[derive(Clone)]
pub struct Stores {
    pub plans: Repository<Plan>,
    pub approvals: Repository<Approval>,
    pub audit_entries: Repository<AuditEntry>,
    pub invoices: Repository<Invoice>,
    pub payments: Repository<PaymentBatch>,
    pub budgets: Repository<Budget>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            plans: Repository::in_memory(),
            approvals: Repository::in_memory(),
            audit_entries: Repository::in_memory(),
            invoices: Repository::in_memory(),
            payments: Repository::in_memory(),
            budgets: Repository::in_memory(),
        }
    }

    /// File-backed stores under `dir`, one JSON file per entity kind.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            plans: Repository::open(dir.join("plans.json"))?,
            approvals: Repository::open(dir.join("approvals.json"))?,
            audit_entries: Repository::open(dir.join("audit_log.json"))?,
            invoices: Repository::open(dir.join("invoices.json"))?,
            payments: Repository::open(dir.join("payments.json"))?,
            budgets: Repository::open(dir.join("budgets.json"))?,
        })
    }
}
