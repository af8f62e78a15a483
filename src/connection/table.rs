use std::net;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Connection, ConnectionRecord, Handle, Mode, State};
use crate::config::Config;
use crate::error::{Error, Result};

/// Fixed-capacity set of connection slots, indexed by [`Handle`].
///
/// Lock order: table, then a connection's record, then its buffer.
#[derive(Debug)]
pub(crate) struct Table {
    slots: Mutex<Vec<Arc<Connection>>>,
    capacity: usize,
}

impl Table {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Arc<Connection>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a connection record, preferring to reuse a closed slot.
    pub fn open(&self, mode: Mode, local_addr: net::SocketAddr, config: &Config) -> Result<Handle> {
        let mut slots = self.slots();

        for conn in slots.iter() {
            let handle = {
                let record = conn.record();
                (record.state == State::Closed).then_some(record.handle)
            };

            if let Some(handle) = handle {
                conn.reset(mode, local_addr, config);
                log::debug!("{} reopened as {:?}", handle, mode);
                return Ok(handle);
            }
        }

        if slots.len() >= self.capacity {
            return Err(Error::NoFreeSlot);
        }

        let handle = Handle(slots.len());
        slots.push(Arc::new(Connection::new(handle, mode, local_addr, config)));

        log::debug!("{} opened as {:?}", handle, mode);

        Ok(handle)
    }

    /// Returns the live connection behind `handle`.
    pub fn get(&self, handle: Handle) -> Result<Arc<Connection>> {
        let conn = self
            .slots()
            .get(handle.0)
            .cloned()
            .ok_or(Error::InvalidHandle)?;

        if conn.record().state == State::Closed {
            return Err(Error::InvalidHandle);
        }

        Ok(conn)
    }

    /// Returns the first connection whose record satisfies `pred`.
    pub fn find<F>(&self, mut pred: F) -> Option<Arc<Connection>>
    where
        F: FnMut(&ConnectionRecord) -> bool,
    {
        self.slots()
            .iter()
            .find(|conn| pred(&*conn.record()))
            .cloned()
    }
}
