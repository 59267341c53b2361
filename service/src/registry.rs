//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! Session registry
//!
//! The registry is the single source of truth for who is connected. A
//! session exists in it iff its identity completed the register handshake
//! and has not since logged off, failed or been reaped.
//!
//! Display names live in one namespace shared by registered sessions and
//! bridge reservations. Every operation that reads or changes that namespace
//! takes the name index lock first and the session map second, so a
//! check-and-set on a name is atomic with respect to every other one.

use crate::{ConnectionId, SessionId, Transport};
use dashmap::DashMap;
use metrics::gauge;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

/// Detached view of one registered session
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    name: String,
    transport: Arc<dyn Transport>,
    connected_at: Instant,
    sequence: u64,
    last_liveness: u64,
}

impl Session {
    /// Identity chosen by the client
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write handle for this session
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// When the session registered
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Registration order, starting at 1
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Liveness mark (epoch milliseconds) at the time of the lookup
    pub fn last_liveness(&self) -> u64 {
        self.last_liveness
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connection", &self.transport.connection_id())
            .field("sequence", &self.sequence)
            .field("last_liveness", &self.last_liveness)
            .finish()
    }
}

struct SessionEntry {
    name: String,
    transport: Arc<dyn Transport>,
    connected_at: Instant,
    sequence: u64,
    last_liveness: AtomicU64,
}

impl SessionEntry {
    fn detach(&self, id: &SessionId) -> Session {
        Session {
            id: id.clone(),
            name: self.name.clone(),
            transport: self.transport.clone(),
            connected_at: self.connected_at,
            sequence: self.sequence,
            last_liveness: self.last_liveness.load(Ordering::Acquire),
        }
    }
}

#[derive(Default)]
struct NameIndex {
    registered: HashMap<String, SessionId>,
    reserved: HashSet<String>,
}

impl NameIndex {
    fn is_active(&self, name: &str) -> bool {
        self.registered.contains_key(name) || self.reserved.contains(name)
    }
}

/// Concurrent store of connected identities and name reservations
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    names: Mutex<NameIndex>,
    sequence: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn names(&self) -> MutexGuard<'_, NameIndex> {
        // The index holds no invariants a panicking holder could break halfway.
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session
    ///
    /// Succeeds only if `name` is neither registered nor reserved and `id`
    /// is not already present. Of any number of concurrent registrations
    /// for the same name exactly one returns `true`.
    pub fn register(&self, id: SessionId, name: &str, transport: Arc<dyn Transport>) -> bool {
        self.register_at(id, name, transport, crate::types::epoch_millis())
    }

    /// Register a session with an explicit initial liveness mark
    pub fn register_at(
        &self,
        id: SessionId,
        name: &str,
        transport: Arc<dyn Transport>,
        liveness: u64,
    ) -> bool {
        let mut names = self.names();
        if names.is_active(name) || self.sessions.contains_key(&id) {
            debug!(session_id = %id, name, "Registration refused");
            return false;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        names.registered.insert(name.to_string(), id.clone());
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                name: name.to_string(),
                transport,
                connected_at: Instant::now(),
                sequence,
                last_liveness: AtomicU64::new(liveness),
            },
        );
        gauge!("chatrelay.sessions.active").set(self.sessions.len() as f64);
        info!(session_id = %id, name, sequence, "Session registered");
        true
    }

    /// Remove a session, freeing its name
    ///
    /// Returns `None` if the session was already gone.
    pub fn delete(&self, id: &SessionId) -> Option<Session> {
        let mut names = self.names();
        let (id, entry) = self.sessions.remove(id)?;
        if names.registered.get(&entry.name) == Some(&id) {
            names.registered.remove(&entry.name);
        }
        drop(names);
        gauge!("chatrelay.sessions.active").set(self.sessions.len() as f64);
        info!(session_id = %id, name = %entry.name, "Session removed");
        Some(entry.detach(&id))
    }

    /// Look up a session by id
    pub fn lookup(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.detach(id))
    }

    /// Find the session registered under a display name
    pub fn find_by_name(&self, name: &str) -> Option<SessionId> {
        self.names().registered.get(name).cloned()
    }

    /// Find the session bound to a connection
    pub fn find_by_connection(&self, connection: ConnectionId) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|entry| entry.transport.connection_id() == connection)
            .map(|entry| entry.key().clone())
    }

    /// Display name of a session
    pub fn name_of(&self, id: &SessionId) -> Option<String> {
        self.sessions.get(id).map(|entry| entry.name.clone())
    }

    /// Whether a session with this id is registered
    pub fn contains_uuid(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Whether a name is active (registered or reserved)
    pub fn contains_name(&self, name: &str) -> bool {
        self.names().is_active(name)
    }

    /// Reserve a name without a session
    ///
    /// Fails if the name is already registered or reserved.
    pub fn reserve_name(&self, name: &str) -> bool {
        let mut names = self.names();
        if names.is_active(name) {
            return false;
        }
        names.reserved.insert(name.to_string());
        debug!(name, "Name reserved");
        true
    }

    /// Release a reservation, returning whether it existed
    pub fn release_reservation(&self, name: &str) -> bool {
        let released = self.names().reserved.remove(name);
        if released {
            debug!(name, "Reservation released");
        }
        released
    }

    /// Advance a session's liveness mark to `max(current, candidate)`
    ///
    /// Returns `false` if the session is not registered.
    pub fn touch_liveness(&self, id: &SessionId, candidate: u64) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.last_liveness.fetch_max(candidate, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Current liveness mark of a session
    pub fn liveness(&self, id: &SessionId) -> Option<u64> {
        self.sessions
            .get(id)
            .map(|entry| entry.last_liveness.load(Ordering::Acquire))
    }

    /// Detached copies of every session, in registration order
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.value().detach(entry.key()))
            .collect();
        sessions.sort_by_key(Session::sequence);
        sessions
    }

    /// Every active name, registered and reserved
    pub fn active_names(&self) -> Vec<String> {
        let names = self.names();
        let mut active: Vec<String> = names
            .registered
            .keys()
            .chain(names.reserved.iter())
            .cloned()
            .collect();
        active.sort();
        active
    }

    /// Remove every session and reservation, returning the removed sessions
    pub fn clear(&self) -> Vec<Session> {
        let mut names = self.names();
        let removed = self.snapshot();
        self.sessions.clear();
        names.registered.clear();
        names.reserved.clear();
        drop(names);
        gauge!("chatrelay.sessions.active").set(0.0);
        removed
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("names", &self.active_names())
            .finish()
    }
}
