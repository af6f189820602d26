//! Network layer: endpoint identity, deadline-bounded connections, and the
//! per-node connection pool.

pub mod connection;
pub mod host;
pub(crate) mod pool;

pub use connection::Connection;
pub use host::Host;
