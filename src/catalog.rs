//! Unified operation catalog
//!
//! Maps operation names to the descriptor of the backend that provides them.
//! Names are unique across the whole catalog: a second backend reporting a
//! name that is already present is rejected with
//! [`Error::DuplicateOperation`]. Registration order is remembered so that
//! listings and rank ties are deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gateway_core::OperationDescriptor;
use parking_lot::RwLock;
use tracing::debug;

use crate::usage::{UsageEntry, UsageTracker};
use crate::{Error, Result};

#[derive(Debug)]
struct CatalogEntry {
    seq: u64,
    descriptor: Arc<OperationDescriptor>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    entries: HashMap<String, CatalogEntry>,
    next_seq: u64,
}

impl CatalogInner {
    /// Owner check for one name. Same-backend re-registration is allowed.
    fn check_owner(&self, descriptor: &OperationDescriptor) -> Result<()> {
        match self.entries.get(&descriptor.name) {
            Some(existing) if existing.descriptor.backend_id != descriptor.backend_id => {
                Err(Error::DuplicateOperation {
                    name: descriptor.name.clone(),
                    existing_backend: existing.descriptor.backend_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn insert(&mut self, descriptor: OperationDescriptor) {
        let descriptor = Arc::new(descriptor);
        if let Some(existing) = self.entries.get_mut(&descriptor.name) {
            existing.descriptor = descriptor;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(descriptor.name.clone(), CatalogEntry { seq, descriptor });
    }
}

/// Operation catalog plus its usage counts
#[derive(Debug, Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
    usage: UsageTracker,
}

impl Catalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single descriptor.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDescriptor`] if validation fails,
    /// [`Error::DuplicateOperation`] if another backend owns the name.
    pub fn register(&self, descriptor: OperationDescriptor) -> Result<()> {
        descriptor.validate()?;
        let mut inner = self.inner.write();
        inner.check_owner(&descriptor)?;
        debug!(operation = %descriptor.name, backend = %descriptor.backend_id, "Registered operation");
        inner.insert(descriptor);
        Ok(())
    }

    /// Register every descriptor of one backend, or none of them.
    ///
    /// Descriptors whose `backend_id` differs from `backend_id` are rejected,
    /// as are names repeated within the batch.
    ///
    /// # Errors
    ///
    /// The first validation or collision error; the catalog is unchanged.
    pub fn register_batch(
        &self,
        backend_id: &str,
        descriptors: Vec<OperationDescriptor>,
    ) -> Result<usize> {
        let mut seen = HashSet::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            descriptor.validate()?;
            if descriptor.backend_id != backend_id {
                return Err(Error::Internal(format!(
                    "Descriptor '{}' belongs to backend '{}', not '{backend_id}'",
                    descriptor.name, descriptor.backend_id
                )));
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(Error::DuplicateOperation {
                    name: descriptor.name.clone(),
                    existing_backend: backend_id.to_string(),
                });
            }
        }

        let mut inner = self.inner.write();
        for descriptor in &descriptors {
            inner.check_owner(descriptor)?;
        }
        let count = descriptors.len();
        for descriptor in descriptors {
            inner.insert(descriptor);
        }
        debug!(backend = %backend_id, count, "Registered operations");
        Ok(count)
    }

    /// Remove every operation owned by `backend_id`, returning how many went.
    pub fn unregister_all(&self, backend_id: &str) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.descriptor.backend_id != backend_id);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(backend = %backend_id, removed, "Unregistered operations");
        }
        removed
    }

    /// Look up an operation by name.
    ///
    /// # Errors
    ///
    /// [`Error::OperationNotFound`] when no backend provides `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<OperationDescriptor>> {
        self.inner
            .read()
            .entries
            .get(name)
            .map(|entry| Arc::clone(&entry.descriptor))
            .ok_or_else(|| Error::OperationNotFound(name.to_string()))
    }

    /// Count one invocation of `name`. Ignored once the name is unregistered.
    pub fn record_invocation(&self, name: &str) {
        if self.inner.read().entries.contains_key(name) {
            self.usage.record(name);
        }
    }

    /// Invocations recorded for `name`
    pub fn usage_count(&self, name: &str) -> u64 {
        self.usage.count(name)
    }

    /// Administrative reset of all usage counts
    pub fn clear_usage(&self) {
        self.usage.clear();
    }

    /// Most-used operations, for status output
    pub fn top_used(&self, n: usize) -> Vec<UsageEntry> {
        self.usage.top(n)
    }

    /// All descriptors in registration order
    pub fn snapshot(&self) -> Vec<Arc<OperationDescriptor>> {
        let inner = self.inner.read();
        let mut entries: Vec<&CatalogEntry> = inner.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| Arc::clone(&entry.descriptor))
            .collect()
    }

    /// All descriptors paired with their usage counts, in registration order
    pub fn snapshot_with_usage(&self) -> Vec<(Arc<OperationDescriptor>, u64)> {
        self.snapshot()
            .into_iter()
            .map(|d| {
                let usage = self.usage.count(&d.name);
                (d, usage)
            })
            .collect()
    }

    /// Operations provided by one backend, in registration order
    pub fn operations_for(&self, backend_id: &str) -> Vec<Arc<OperationDescriptor>> {
        self.snapshot()
            .into_iter()
            .filter(|d| d.backend_id == backend_id)
            .collect()
    }

    /// Number of registered operations
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
