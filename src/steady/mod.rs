//! Fault-tolerant ("steady") wrappers around one raw driver connection and
//! its cursors. Transient failures are repaired by reconnecting; anything
//! touching data integrity propagates untouched.

mod connection;
mod cursor;

pub use connection::{ConnectOptions, SteadyConnection, SteadyHandle};
pub use cursor::SteadyCursor;

use serde::{Deserialize, Serialize};

/// Bitmask controlling when a pooled connection is ping-checked.
///
/// The bits combine: `PingPolicy::ALWAYS` is checkout | cursor | execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPolicy(pub u8);

impl PingPolicy {
    /// Never ping.
    pub const NEVER: PingPolicy = PingPolicy(0);
    /// Ping when a connection is checked out of the pool.
    pub const ON_CHECKOUT: PingPolicy = PingPolicy(1);
    /// Ping when a cursor is created.
    pub const ON_CURSOR: PingPolicy = PingPolicy(2);
    /// Ping before executing a statement.
    pub const ON_EXECUTE: PingPolicy = PingPolicy(4);
    /// Ping at every opportunity.
    pub const ALWAYS: PingPolicy = PingPolicy(7);

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn contains(self, trigger: PingPolicy) -> bool {
        self.0 & trigger.0 != 0
    }
}

impl Default for PingPolicy {
    fn default() -> Self {
        PingPolicy::ON_CHECKOUT
    }
}
