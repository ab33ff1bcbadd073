//! Socket table: a fixed pool of connection records addressed by handle.
//!
//! ```text
//!  handle:   0         1        2        …   N-1
//!         ┌─────────┬────────┬────────┬───┬────────┐
//!         │ control │ conn?  │ conn?  │ … │ conn?  │
//!         └─────────┴────────┴────────┴───┴────────┘
//! ```
//!
//! Slot 0 is the control channel and is never handed out by
//! [`SocketTable::allocate`].  Every other slot is either free or owns
//! exactly one [`Connection`].

use std::fmt;

use crate::connection::Connection;
use crate::error::TransportError;
use crate::state::ConnectionState;

/// Small integer naming a socket-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u8);

/// The reserved control-channel handle.
pub const CONTROL_HANDLE: Handle = Handle(0);

impl Handle {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed-capacity arena of connection records.
#[derive(Debug)]
pub struct SocketTable {
    slots: Vec<Option<Connection>>,
}

impl SocketTable {
    /// A table with `capacity` slots, all free.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots, the control slot included.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Put the control record in slot 0.
    pub fn install_control(&mut self, conn: Connection) {
        if let Some(slot) = self.slots.first_mut() {
            *slot = Some(conn);
        }
    }

    /// Store `conn` in the lowest free non-control slot.
    pub fn allocate(&mut self, conn: Connection) -> Result<Handle, TransportError> {
        let index = self
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(i, s)| s.is_none().then_some(i))
            .ok_or(TransportError::NoFreeSlots)?;
        let handle = Handle(u8::try_from(index).map_err(|_| TransportError::NoFreeSlots)?);
        log::debug!("[table] allocate {} port {}", handle, conn.local_port());
        self.slots[index] = Some(conn);
        Ok(handle)
    }

    pub fn get(&self, handle: Handle) -> Result<&Connection, TransportError> {
        self.slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(TransportError::InvalidHandle)
    }

    pub fn lookup(&mut self, handle: Handle) -> Result<&mut Connection, TransportError> {
        self.slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(TransportError::InvalidHandle)
    }

    /// Free a slot.  Only a record in CLOSED may be released, and the control
    /// slot never is.
    pub fn release(&mut self, handle: Handle) -> Result<Connection, TransportError> {
        if handle == CONTROL_HANDLE {
            return Err(TransportError::InvalidHandle);
        }
        let slot = self
            .slots
            .get_mut(handle.index())
            .ok_or(TransportError::InvalidHandle)?;
        match slot {
            Some(conn) if conn.state() == ConnectionState::Closed => {}
            Some(_) => return Err(TransportError::BadState),
            None => return Err(TransportError::InvalidHandle),
        }
        log::debug!("[table] release {}", handle);
        slot.take().ok_or(TransportError::InvalidHandle)
    }

    /// Occupied slots in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Connection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| Some((Handle(i as u8), s.as_ref()?)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut Connection)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| Some((Handle(i as u8), s.as_mut()?)))
    }

    /// First handle whose record satisfies `pred`.
    pub fn find(&self, mut pred: impl FnMut(&Connection) -> bool) -> Option<Handle> {
        self.iter().find_map(|(h, c)| pred(c).then_some(h))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::TransportConfig;

    fn conn(port: u8) -> Connection {
        Connection::new(port, Arc::new(TransportConfig::default()))
    }

    #[test]
    fn allocation_skips_control_slot() {
        let mut table = SocketTable::new(3);
        table.install_control(conn(255));
        assert_eq!(table.allocate(conn(1)), Ok(Handle(1)));
        assert_eq!(table.allocate(conn(2)), Ok(Handle(2)));
        assert_eq!(table.allocate(conn(3)).err(), Some(TransportError::NoFreeSlots));
    }

    #[test]
    fn released_slot_is_reused() {
        let mut table = SocketTable::new(4);
        let a = table.allocate(conn(1)).unwrap();
        let _b = table.allocate(conn(2)).unwrap();
        assert!(table.release(a).is_ok());
        assert_eq!(table.lookup(a).err(), Some(TransportError::InvalidHandle));
        assert_eq!(table.allocate(conn(3)), Ok(a));
    }

    #[test]
    fn release_requires_closed_record() {
        let mut table = SocketTable::new(2);
        let mut listening = conn(41);
        listening.listen(0);
        let h = table.allocate(listening).unwrap();
        assert_eq!(table.release(h).err(), Some(TransportError::BadState));
        assert_eq!(table.release(Handle(9)).err(), Some(TransportError::InvalidHandle));
    }

    #[test]
    fn control_slot_cannot_be_released() {
        let mut table = SocketTable::new(2);
        table.install_control(conn(255));
        assert_eq!(
            table.release(CONTROL_HANDLE).err(),
            Some(TransportError::InvalidHandle)
        );
        assert_eq!(table.live(), 1);
    }
}
