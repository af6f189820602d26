//! Bounded per-node connection pool.
//!
//! A ring buffer of pooled connections plus an open-connection count that
//! also covers checked-out connections. Invariants:
//!
//! - `size() <= max_size`
//! - `total_open() >= size()`: a connection is either pooled or checked
//!   out, never both
//!
//! The pool itself does no I/O; the owning node dials, closes, and decides
//! what to do with rejected or idle connections.

use std::collections::VecDeque;
use std::time::Duration;

use crate::net::connection::Connection;

#[derive(Debug)]
pub(crate) struct Pool {
    conns: VecDeque<Connection>,
    min_size: usize,
    max_size: usize,
    total_open: usize,
}

impl Pool {
    pub(crate) fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            conns: VecDeque::with_capacity(max_size),
            min_size,
            max_size,
            total_open: 0,
        }
    }

    /// Returns a connection to the pool, most-recently-used first.
    ///
    /// # Errors
    ///
    /// Gives the connection back when the pool is full; the caller must
    /// close it and release its open slot.
    pub(crate) fn offer(&mut self, conn: Connection) -> Result<(), Connection> {
        if self.conns.len() >= self.max_size {
            return Err(conn);
        }
        self.conns.push_back(conn);
        Ok(())
    }

    /// Checks out the most recently used connection.
    pub(crate) fn take(&mut self) -> Option<Connection> {
        self.conns.pop_back()
    }

    /// Pops the oldest pooled connection if it has idled past `window`.
    pub(crate) fn take_idle(&mut self, window: Duration) -> Option<Connection> {
        if self.conns.front()?.idle_longer_than(window) {
            self.conns.pop_front()
        } else {
            None
        }
    }

    /// Reserves an open-connection slot ahead of a dial.
    ///
    /// Returns `false` when the node is already at `max_size` open
    /// connections (pooled + checked out).
    pub(crate) fn reserve_open(&mut self) -> bool {
        if self.total_open >= self.max_size {
            return false;
        }
        self.total_open += 1;
        true
    }

    /// Releases an open slot after a failed dial or a close.
    pub(crate) fn release_open(&mut self) {
        self.total_open = self.total_open.saturating_sub(1);
    }

    /// Pooled connection count.
    pub(crate) fn size(&self) -> usize {
        self.conns.len()
    }

    /// Open connections, pooled or checked out.
    pub(crate) fn total_open(&self) -> usize {
        self.total_open
    }

    /// Open connections above (positive) or below (negative) the floor.
    pub(crate) fn excess(&self) -> isize {
        self.total_open as isize - self.min_size as isize
    }

    /// Drains every pooled connection for shutdown.
    pub(crate) fn drain(&mut self) -> Vec<Connection> {
        self.conns.drain(..).collect()
    }
}
