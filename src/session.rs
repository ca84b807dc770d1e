//! Caller session tracking
//!
//! A session records which backends a caller has touched plus free-form
//! metadata. Sessions expire on inactivity and are removed by a periodic
//! sweep.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{Error, Result};

/// One caller session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session id
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time the session was touched
    pub last_activity: DateTime<Utc>,
    /// Attached backend ids
    pub backends: BTreeSet<String>,
    /// Arbitrary caller metadata
    pub metadata: HashMap<String, Value>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            backends: BTreeSet::new(),
            metadata: HashMap::new(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Generate a process-unique session id: `s-<unix millis hex>-<random hex>`
#[must_use]
pub fn generate_session_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("s-{millis:x}-{}", &random[..12])
}

/// Thread-safe session store
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, or touch and return the existing one with that id.
    pub fn create(&self, id: Option<&str>) -> Session {
        let mut sessions = self.sessions.write();
        let id = match id {
            Some(id) => id.to_string(),
            None => loop {
                let candidate = generate_session_id();
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        if let Some(existing) = sessions.get_mut(&id) {
            existing.touch();
            return existing.clone();
        }

        let session = Session::new(id.clone());
        sessions.insert(id.clone(), session.clone());
        info!(session_id = %id, "Created session");
        session
    }

    /// Snapshot of one session
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] for an unknown id.
    pub fn get(&self, id: &str) -> Result<Session> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Whether `id` is tracked
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    fn with_session<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> Result<T> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.touch();
        Ok(f(session))
    }

    /// Refresh last-activity
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] for an unknown id.
    pub fn touch(&self, id: &str) -> Result<()> {
        self.with_session(id, |_| ())
    }

    /// Attach a backend. Attaching twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] for an unknown id.
    pub fn attach_backend(&self, id: &str, backend_id: &str) -> Result<()> {
        self.with_session(id, |s| {
            if s.backends.insert(backend_id.to_string()) {
                debug!(session_id = %id, backend = %backend_id, "Attached backend");
            }
        })
    }

    /// Detach a backend. Detaching an unattached backend is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] for an unknown id.
    pub fn detach_backend(&self, id: &str, backend_id: &str) -> Result<()> {
        self.with_session(id, |s| {
            s.backends.remove(backend_id);
        })
    }

    /// Detach a backend from every session without touching activity.
    /// Returns how many sessions had it attached.
    pub fn detach_backend_everywhere(&self, backend_id: &str) -> usize {
        let mut detached = 0;
        for session in self.sessions.write().values_mut() {
            if session.backends.remove(backend_id) {
                detached += 1;
            }
        }
        detached
    }

    /// Set one metadata key, returning the previous value
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] for an unknown id.
    pub fn set_metadata(&self, id: &str, key: &str, value: Value) -> Result<Option<Value>> {
        self.with_session(id, |s| s.metadata.insert(key.to_string(), value))
    }

    /// Remove one metadata key, returning its value
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] for an unknown id.
    pub fn remove_metadata(&self, id: &str, key: &str) -> Result<Option<Value>> {
        self.with_session(id, |s| s.metadata.remove(key))
    }

    /// Delete a session. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session deleted");
        }
        removed
    }

    /// Remove sessions idle for at least `max_age`. `max_age` of zero removes
    /// every session.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.sweep_expired_before(cutoff)
    }

    /// Remove sessions whose last activity is at or before `cutoff`
    pub fn sweep_expired_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity > cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Swept expired sessions");
        }
        removed
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All session ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn generated_ids_have_expected_shape_and_differ() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("s-"));
        assert_eq!(a.split('-').count(), 3);
        assert_ne!(a, b);
    }

    #[test]
    fn create_with_existing_id_returns_same_session() {
        let tracker = SessionTracker::new();
        let first = tracker.create(Some("abc"));
        tracker.attach_backend("abc", "fs").unwrap();
        let again = tracker.create(Some("abc"));

        assert_eq!(again.created_at, first.created_at);
        assert!(again.backends.contains("fs"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn attach_has_set_semantics() {
        let tracker = SessionTracker::new();
        let s = tracker.create(None);
        tracker.attach_backend(&s.id, "fs").unwrap();
        tracker.attach_backend(&s.id, "fs").unwrap();
        tracker.attach_backend(&s.id, "git").unwrap();
        let got = tracker.get(&s.id).unwrap();
        assert_eq!(got.backends.into_iter().collect::<Vec<_>>(), vec!["fs", "git"]);

        tracker.detach_backend(&s.id, "fs").unwrap();
        tracker.detach_backend(&s.id, "fs").unwrap();
        assert_eq!(tracker.get(&s.id).unwrap().backends.len(), 1);
    }

    #[test]
    fn attach_touches_last_activity() {
        let tracker = SessionTracker::new();
        let s = tracker.create(None);
        std::thread::sleep(Duration::from_millis(5));
        tracker.attach_backend(&s.id, "fs").unwrap();
        assert!(tracker.get(&s.id).unwrap().last_activity > s.last_activity);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let tracker = SessionTracker::new();
        assert!(matches!(
            tracker.attach_backend("nope", "fs"),
            Err(Error::SessionNotFound(_))
        ));
        assert!(matches!(tracker.get("nope"), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn sweep_with_zero_max_age_removes_everything() {
        let tracker = SessionTracker::new();
        let s = tracker.create(None);
        tracker.attach_backend(&s.id, "a").unwrap();
        tracker.attach_backend(&s.id, "b").unwrap();

        assert_eq!(tracker.sweep_expired(Duration::ZERO), 1);
        assert!(matches!(tracker.get(&s.id), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn sweep_keeps_recent_sessions() {
        let tracker = SessionTracker::new();
        tracker.create(Some("fresh"));
        assert_eq!(tracker.sweep_expired(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.sweep_expired(Duration::MAX), 0);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn sweep_before_cutoff_is_selective() {
        let tracker = SessionTracker::new();
        tracker.create(Some("old"));
        std::thread::sleep(Duration::from_millis(5));
        let cutoff = Utc::now();
        std::thread::sleep(Duration::from_millis(5));
        tracker.create(Some("new"));

        assert_eq!(tracker.sweep_expired_before(cutoff), 1);
        assert_eq!(tracker.ids(), vec!["new"]);
    }

    #[test]
    fn detach_everywhere_leaves_activity_alone() {
        let tracker = SessionTracker::new();
        for id in ["a", "b"] {
            tracker.create(Some(id));
            tracker.attach_backend(id, "fs").unwrap();
        }
        let before = tracker.get("a").unwrap().last_activity;

        assert_eq!(tracker.detach_backend_everywhere("fs"), 2);
        let a = tracker.get("a").unwrap();
        assert!(a.backends.is_empty());
        assert_eq!(a.last_activity, before);
    }

    #[test]
    fn metadata_set_and_remove() {
        let tracker = SessionTracker::new();
        tracker.create(Some("m"));
        assert_eq!(tracker.set_metadata("m", "project", json!("toolhub")).unwrap(), None);
        assert_eq!(
            tracker.set_metadata("m", "project", json!("other")).unwrap(),
            Some(json!("toolhub"))
        );
        assert_eq!(tracker.remove_metadata("m", "project").unwrap(), Some(json!("other")));
        assert!(tracker.get("m").unwrap().metadata.is_empty());
    }

    #[test]
    fn delete_reports_existence() {
        let tracker = SessionTracker::new();
        tracker.create(Some("x"));
        assert!(tracker.delete("x"));
        assert!(!tracker.delete("x"));
        assert!(tracker.is_empty());
    }
}
