use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::session::{Session, SessionSummary};

/// Identity-keyed map of live sessions behind one lock.
///
/// The lock is only ever held for a lookup, insert, removal or snapshot. The
/// `create` closure of [`SessionRegistry::get_or_create`] runs under it so
/// that concurrent resolvers for one identity observe exactly one insert; it
/// must not wait on I/O or on a process.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live session for `identity`, creating it if absent.
    /// The flag is `true` when this call created the session.
    pub fn get_or_create<E>(
        &self,
        identity: &str,
        create: impl FnOnce() -> Result<Session, E>,
    ) -> Result<(Arc<Session>, bool), E> {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(identity) {
            return Ok((existing.clone(), false));
        }
        let session = Arc::new(create()?);
        sessions.insert(identity.to_string(), session.clone());
        Ok((session, true))
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Session>> {
        self.lock().get(identity).cloned()
    }

    /// Removes the session only if it is still the one recorded under `trace_id`.
    pub fn remove(&self, identity: &str, trace_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.lock();
        match sessions.get(identity) {
            Some(session) if session.trace_id() == trace_id => sessions.remove(identity),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.lock().values().map(|session| session.summary()).collect();
        summaries.sort_by(|left, right| left.identity.cmp(&right.identity));
        summaries
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
