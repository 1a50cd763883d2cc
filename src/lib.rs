pub mod condition;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod pool;
pub mod results;
pub mod steady;
pub mod types;

pub mod prelude;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::SteadyDbError;

pub use condition::{CmpOp, Condition, Entry};
pub use driver::{
    Driver, DriverError, FailureClass, RawConnection, RawCursor, SqlDialect, ThreadSafety,
    TransientPredicate,
};
pub use gateway::{
    ExecStatus, ExecutionState, FieldType, FieldTypeMap, QueryOptions, TableGateway,
    TableRegistry, TableSchema,
};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledLease};
pub use results::{ResultSet, Row};
pub use steady::{ConnectOptions, PingPolicy, SteadyConnection, SteadyCursor, SteadyHandle};
pub use types::SqlValue;
