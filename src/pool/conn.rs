use crate::host::Host;
use crate::stream::Stream;

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use super::ConnectionPool;

/// A single connection to a server, stamped with the pool generation it was
/// created in.
pub struct Connection {
    pub(crate) id: u32,
    pub(crate) address: Host,
    pub(crate) generation: u32,
    // Always Some until the connection is handed back to its pool.
    stream: Option<Box<dyn Stream>>,
    pub(crate) errored: bool,
    pub(crate) created: Instant,
    pub(crate) last_used: Instant,
}

impl Connection {
    pub(crate) fn new(id: u32, address: Host, generation: u32, stream: Box<dyn Stream>) -> Connection {
        let now = Instant::now();
        Connection {
            id,
            address,
            generation,
            stream: Some(stream),
            errored: false,
            created: now,
            last_used: now,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> &Host {
        &self.address
    }

    /// The pool generation this connection was created in.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Flags the connection so that it is closed instead of reused on check-in.
    pub fn mark_errored(&mut self) {
        self.errored = true;
    }

    pub fn age(&self) -> std::time::Duration {
        self.created.elapsed()
    }

    // Moves the stream into a new connection with the same identity.
    fn detach(&mut self) -> Connection {
        Connection {
            id: self.id,
            address: self.address.clone(),
            generation: self.generation,
            stream: self.stream.take(),
            errored: self.errored,
            created: self.created,
            last_used: self.last_used,
        }
    }

    fn stream(&mut self) -> io::Result<&mut Box<dyn Stream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection was checked in"))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("generation", &self.generation)
            .field("errored", &self.errored)
            .finish()
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

/// Holds a checked-out connection, with logic to return the connection
/// to the connection pool when dropped.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Connection,
    pool: ConnectionPool,
}

impl PooledConnection {
    pub(crate) fn new(conn: Connection, pool: ConnectionPool) -> PooledConnection {
        PooledConnection { conn, pool }
    }

    /// Returns the connection to its pool.
    pub fn check_in(self) {}
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Read for PooledConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.conn.read(buf)
    }
}

impl Write for PooledConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.conn.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.flush()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = self.conn.detach();
        self.pool.check_in(conn);
    }
}
