//! Session registry
//!
//! Owns every session behind a stable [`SessionId`]. Handles stay valid when
//! other sessions are removed, and a removed session's handle never comes
//! back to life. Listing order is newest first.

use slotmap::{new_key_type, SlotMap};

use super::session::Session;

new_key_type! {
    /// Handle of a session in a [`Registry`]
    pub struct SessionId;
}

/// Session registry
#[derive(Default)]
pub struct Registry {
    sessions: SlotMap<SessionId, Session>,
    /// Newest first
    order: Vec<SessionId>,
    /// The session receiving keystrokes
    active: Option<SessionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session
    pub fn insert(&mut self, session: Session) -> SessionId {
        let id = self.sessions.insert(session);
        self.order.insert(0, id);
        id
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Remove a session; it is dropped by the caller
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.order.retain(|&other| other != id);
        if self.active == Some(id) {
            self.active = None;
        }
        Some(session)
    }

    /// Session ids, newest first
    pub fn list(&self) -> &[SessionId] {
        &self.order
    }

    /// Session whose name is `name`
    pub fn find_by_name(&self, name: &str) -> Option<SessionId> {
        self.order
            .iter()
            .copied()
            .find(|&id| self.sessions.get(id).is_some_and(|s| s.name() == name))
    }

    pub fn active(&self) -> Option<SessionId> {
        self.active
    }

    /// Set the session receiving keystrokes
    pub fn set_active(&mut self, id: Option<SessionId>) {
        self.active = id.filter(|&id| self.sessions.contains_key(id));
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scrollback::CellAttr;

    fn session(name: &str) -> Session {
        Session::detached(name, CellAttr::default())
    }

    #[test]
    fn test_newest_first() {
        let mut registry = Registry::new();
        let a = registry.insert(session("a"));
        let b = registry.insert(session("b"));
        assert_eq!(registry.list(), &[b, a]);
        assert_eq!(registry.find_by_name("a"), Some(a));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_remove_clears_active() {
        let mut registry = Registry::new();
        let a = registry.insert(session("a"));
        let b = registry.insert(session("b"));
        registry.set_active(Some(a));
        assert_eq!(registry.active(), Some(a));

        assert!(registry.remove(a).is_some());
        assert_eq!(registry.active(), None);
        assert_eq!(registry.list(), &[b]);
        assert!(registry.get(a).is_none());
        assert!(registry.remove(a).is_none());

        registry.set_active(Some(a));
        assert_eq!(registry.active(), None);
    }

    #[test]
    fn test_independent_registries() {
        let mut first = Registry::new();
        let mut second = Registry::new();
        first.insert(session("x"));
        assert!(second.is_empty());
        second.insert(session("y"));
        assert_eq!(first.find_by_name("y"), None);
    }
}
