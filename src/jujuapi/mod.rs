//! Outbound Juju RPC: wire types, the websocket connection and the shared
//! connection pool used by the dispatcher and the monitor.

pub mod conn;
pub mod params;
pub mod pool;

pub use conn::Connection;
pub use params::*;
pub use pool::{ConnHandle, ConnectionPool};
