//! Window Manager - keeps the panes showing sessions

use std::collections::HashMap;

use super::pane::{Pane, PaneId};
use crate::core::registry::SessionId;

/// Window Manager - owns all panes
pub struct WindowManager {
    /// All panes
    panes: HashMap<PaneId, Pane>,
    /// Opening order
    pane_order: Vec<PaneId>,
    /// Pane receiving keys
    focused: Option<PaneId>,
    /// Next pane ID
    next_pane_id: PaneId,
    /// Host screen dimensions
    pub width: u16,
    pub height: u16,
}

impl WindowManager {
    /// Create a window manager for a host screen of the given size
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            panes: HashMap::new(),
            pane_order: Vec::new(),
            focused: None,
            next_pane_id: 1,
            width,
            height,
        }
    }

    /// Open a pane showing `session` at the given area and focus it
    pub fn open(&mut self, session: SessionId, x: u16, y: u16, width: u16, height: u16) -> PaneId {
        let id = self.next_pane_id;
        self.next_pane_id += 1;
        self.panes.insert(id, Pane::new(id, session, x, y, width, height));
        self.pane_order.push(id);
        self.set_focus(id);
        tracing::debug!("Opened pane {} ({}x{} at {},{})", id, width, height, x, y);
        id
    }

    /// Open a pane covering the whole host screen
    pub fn open_full(&mut self, session: SessionId) -> PaneId {
        self.open(session, 0, 0, self.width, self.height)
    }

    /// Close a pane
    pub fn close(&mut self, id: PaneId) -> bool {
        if self.panes.remove(&id).is_none() {
            return false;
        }
        self.pane_order.retain(|&p| p != id);
        if self.focused == Some(id) {
            self.focused = None;
            if let Some(&last) = self.pane_order.last() {
                self.set_focus(last);
            }
        }
        true
    }

    /// Close every pane showing `session`; returns how many were closed
    pub fn close_session(&mut self, session: SessionId) -> usize {
        let ids = self.showing(session);
        for &id in &ids {
            self.close(id);
        }
        ids.len()
    }

    pub fn get(&self, id: PaneId) -> Option<&Pane> {
        self.panes.get(&id)
    }

    pub fn get_mut(&mut self, id: PaneId) -> Option<&mut Pane> {
        self.panes.get_mut(&id)
    }

    /// Panes showing `session`, in opening order
    pub fn showing(&self, session: SessionId) -> Vec<PaneId> {
        self.pane_order
            .iter()
            .copied()
            .filter(|id| self.panes.get(id).is_some_and(|p| p.session == session))
            .collect()
    }

    pub fn is_shown(&self, session: SessionId) -> bool {
        self.panes.values().any(|p| p.session == session)
    }

    /// Mutable access to the panes showing `session`
    pub fn showing_mut(&mut self, session: SessionId) -> impl Iterator<Item = &mut Pane> {
        self.panes.values_mut().filter(move |p| p.session == session)
    }

    pub fn focused(&self) -> Option<&Pane> {
        self.focused.and_then(|id| self.panes.get(&id))
    }

    pub fn focused_mut(&mut self) -> Option<&mut Pane> {
        self.focused.and_then(|id| self.panes.get_mut(&id))
    }

    pub fn set_focus(&mut self, id: PaneId) {
        if !self.panes.contains_key(&id) {
            return;
        }
        for pane in self.panes.values_mut() {
            pane.focused = pane.id == id;
        }
        self.focused = Some(id);
    }

    /// Panes in opening order
    pub fn panes(&self) -> impl Iterator<Item = &Pane> {
        self.pane_order.iter().filter_map(|id| self.panes.get(id))
    }

    pub fn count(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    /// Resize the host screen; panes that covered it keep covering it
    pub fn resize(&mut self, width: u16, height: u16) {
        let (old_w, old_h) = (self.width, self.height);
        self.width = width;
        self.height = height;
        for pane in self.panes.values_mut() {
            if (pane.x, pane.y, pane.width, pane.height) == (0, 0, old_w, old_h) {
                pane.resize(width, height);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn sid(n: u64) -> SessionId {
        SessionId::from(KeyData::from_ffi(n))
    }

    #[test]
    fn test_open_and_focus() {
        let mut wm = WindowManager::new(80, 24);
        let a = wm.open_full(sid(1));
        let b = wm.open(sid(2), 0, 0, 40, 10);
        assert_eq!(wm.focused().map(|p| p.id), Some(b));
        assert!(!wm.get(a).unwrap().focused);

        assert!(wm.close(b));
        assert_eq!(wm.focused().map(|p| p.id), Some(a));
        assert!(!wm.close(b));
    }

    #[test]
    fn test_close_session() {
        let mut wm = WindowManager::new(80, 24);
        wm.open_full(sid(1));
        wm.open(sid(1), 0, 0, 40, 10);
        let other = wm.open(sid(2), 0, 0, 40, 10);
        assert_eq!(wm.showing(sid(1)).len(), 2);
        assert_eq!(wm.close_session(sid(1)), 2);
        assert_eq!(wm.count(), 1);
        assert_eq!(wm.showing(sid(2)), vec![other]);
    }

    #[test]
    fn test_resize_full_panes() {
        let mut wm = WindowManager::new(80, 24);
        let full = wm.open_full(sid(1));
        let small = wm.open(sid(1), 0, 0, 20, 5);
        wm.resize(100, 30);
        assert_eq!(wm.get(full).map(|p| (p.width, p.height)), Some((100, 30)));
        assert_eq!(wm.get(small).map(|p| (p.width, p.height)), Some((20, 5)));
    }
}
