//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types so callers can get
//! going with a single `use`.

pub use crate::condition::{CmpOp, Condition, Entry};
pub use crate::driver::{
    Driver, DriverError, FailureClass, RawConnection, RawCursor, SqlDialect, ThreadSafety,
};
pub use crate::error::SteadyDbError;
pub use crate::gateway::{
    ExecStatus, FieldType, FieldTypeMap, QueryOptions, TableGateway, TableRegistry, TableSchema,
};
pub use crate::pool::{ConnectionPool, PoolConfig, PoolStats, PooledLease};
pub use crate::results::{ResultSet, Row};
pub use crate::steady::{ConnectOptions, PingPolicy, SteadyConnection, SteadyCursor};
pub use crate::types::SqlValue;
