//! Session storage and the unit-of-work boundary.
//!
//! All sessions live in a [`SessionBook`]. Every check-then-write sequence
//! (conflict checks, bed allocation, phase transitions) runs inside
//! [`SessionStore::transaction`], which holds the store's exclusive lock and
//! commits the book only when the closure returns `Ok`.

use crate::{Error, Result, Session};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

/// The complete collection of sessions
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionBook {
    #[serde(default)]
    sessions: BTreeMap<Uuid, Session>,
}

impl SessionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Look up a session or fail with NotFound
    pub fn require(&self, id: Uuid) -> Result<&Session> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    pub fn require_mut(&mut self, id: Uuid) -> Result<&mut Session> {
        self.get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    /// Insert or replace a session
    pub fn put(&mut self, session: Session) {
        self.sessions.insert(session.id, session);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Sessions booked on `date`, any slot
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(move |s| s.date == date)
    }

    /// Sessions booked in `slot_id` on `date`
    pub fn in_slot<'a>(
        &'a self,
        slot_id: &'a str,
        date: NaiveDate,
    ) -> impl Iterator<Item = &'a Session> + 'a {
        self.sessions
            .values()
            .filter(move |s| s.date == date && s.slot_id == slot_id)
    }

    /// Sessions for `patient_id` on `date`
    pub fn for_patient<'a>(
        &'a self,
        patient_id: &'a str,
        date: NaiveDate,
    ) -> impl Iterator<Item = &'a Session> + 'a {
        self.sessions
            .values()
            .filter(move |s| s.date == date && s.patient_id == patient_id)
    }
}

/// Persistent home of the session book
pub trait SessionStore: Send + Sync {
    /// Run `f` against a consistent snapshot without writing
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SessionBook) -> Result<T>;

    /// Run `f` under the store's exclusive lock; commit only on `Ok`
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionBook) -> Result<T>;
}

/// In-process store guarded by a mutex
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    book: Mutex<SessionBook>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_book(book: SessionBook) -> Self {
        Self {
            book: Mutex::new(book),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SessionBook) -> Result<T>,
    {
        let book = self
            .book
            .lock()
            .map_err(|_| Error::Other("session store lock poisoned".into()))?;
        f(&book)
    }

    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionBook) -> Result<T>,
    {
        let mut book = self
            .book
            .lock()
            .map_err(|_| Error::Other("session store lock poisoned".into()))?;

        // Work on a copy so a failed closure leaves nothing behind
        let mut working = book.clone();
        let value = f(&mut working)?;
        *book = working;
        Ok(value)
    }
}
