use serde::{Deserialize, Serialize};

use crate::error::SteadyDbError;
use crate::steady::PingPolicy;

/// Pool sizing and behavior knobs.
///
/// All counts treat `0` as "unbounded" (or "none", for the caches).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections opened up front when the pool starts.
    pub min_cached: usize,
    /// Maximum idle connections kept around; overflow is closed physically.
    pub max_cached: usize,
    /// Maximum distinct connections in the shared cache (0 disables shared
    /// leases entirely).
    pub max_shared: usize,
    /// Hard cap on outstanding connections (dedicated plus distinct shared).
    pub max_connections: usize,
    /// At the cap: `true` blocks on the pool condvar until a lease returns,
    /// `false` fails immediately with a capacity error.
    pub blocking: bool,
    /// Per-connection reuse budget before an automatic reset (0 = unlimited).
    pub max_usage: u64,
    /// Session-preparation statements run on every fresh connection.
    pub set_session: Vec<String>,
    /// When connections are ping-checked.
    pub ping: PingPolicy,
    /// Always roll back on return to the pool, not only when a transaction
    /// is known to be open.
    pub reset_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_cached: 0,
            max_cached: 0,
            max_shared: 0,
            max_connections: 0,
            blocking: false,
            max_usage: 0,
            set_session: Vec::new(),
            ping: PingPolicy::default(),
            reset_on_return: true,
        }
    }
}

impl PoolConfig {
    /// Enforce the sizing invariants, raising the dependent bounds the way
    /// the caller almost certainly meant: `max_cached` covers `min_cached`,
    /// and a nonzero `max_connections` covers both caches.
    pub fn normalized(mut self) -> Result<Self, SteadyDbError> {
        if self.max_cached > 0 && self.max_cached < self.min_cached {
            self.max_cached = self.min_cached;
        }
        if self.max_connections > 0 {
            if self.max_connections < self.max_cached {
                self.max_connections = self.max_cached;
            }
            if self.max_connections < self.max_shared {
                self.max_connections = self.max_shared;
            }
            if self.min_cached > self.max_connections {
                return Err(SteadyDbError::Config(format!(
                    "min_cached ({}) exceeds max_connections ({})",
                    self.min_cached, self.max_connections
                )));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_raises_dependent_bounds() {
        let cfg = PoolConfig {
            min_cached: 4,
            max_cached: 2,
            max_shared: 6,
            max_connections: 3,
            ..PoolConfig::default()
        };
        let cfg = cfg.normalized().unwrap();
        assert_eq!(cfg.max_cached, 4);
        assert_eq!(cfg.max_connections, 6);
    }

    #[test]
    fn zero_max_connections_stays_unbounded() {
        let cfg = PoolConfig {
            max_cached: 5,
            ..PoolConfig::default()
        };
        let cfg = cfg.normalized().unwrap();
        assert_eq!(cfg.max_connections, 0);
    }

    #[test]
    fn min_cached_beyond_hard_cap_is_rejected() {
        let cfg = PoolConfig {
            min_cached: 10,
            max_connections: 2,
            ..PoolConfig::default()
        };
        assert!(matches!(cfg.normalized(), Err(SteadyDbError::Config(_))));
    }
}
