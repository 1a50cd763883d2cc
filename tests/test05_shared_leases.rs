use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sql_steady::test_utils::{MockDriver, MockScript};
use sql_steady::{ConnectionPool, PoolConfig, ThreadSafety};

fn shared_pool(script: &MockScript, max_shared: usize, max_connections: usize) -> ConnectionPool {
    ConnectionPool::open(
        Arc::new(MockDriver::new(script.clone())),
        PoolConfig {
            max_shared,
            max_connections,
            blocking: true,
            ..PoolConfig::default()
        },
    )
    .unwrap()
}

#[test]
fn shared_leases_reuse_one_connection() {
    let script = MockScript::new();
    let pool = shared_pool(&script, 1, 0);

    let a = pool.connection(true).unwrap();
    let b = pool.connection(true).unwrap();
    assert!(a.is_shared());
    assert!(b.is_shared());
    assert_eq!(script.connects(), 1);

    let stats = pool.stats();
    assert_eq!(stats.shared_slots, 1);
    assert_eq!(stats.connections, 1);
}

#[test]
fn shared_cache_fills_before_sharing() {
    let script = MockScript::new();
    let pool = shared_pool(&script, 2, 0);

    let _a = pool.connection(true).unwrap();
    let _b = pool.connection(true).unwrap();
    assert_eq!(script.connects(), 2);
    assert_eq!(pool.stats().shared_slots, 2);

    // A third lease shares instead of opening another connection.
    let _c = pool.connection(true).unwrap();
    assert_eq!(script.connects(), 2);
}

#[test]
fn last_holder_returns_the_connection_to_the_idle_cache() {
    let script = MockScript::new();
    let pool = shared_pool(&script, 1, 0);

    let a = pool.connection(true).unwrap();
    let b = pool.connection(true).unwrap();
    drop(a);
    assert_eq!(pool.stats().shared_slots, 1);
    drop(b);

    let stats = pool.stats();
    assert_eq!(stats.shared_slots, 0);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.connections, 0);
}

#[test]
fn transactional_shared_connection_is_not_handed_out() {
    let script = MockScript::new();
    let pool = shared_pool(&script, 1, 1);

    let holder = pool.connection(true).unwrap();
    holder.begin().unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter_pool = pool.clone();
    let waiter = thread::spawn(move || {
        let lease = waiter_pool.connection(true).unwrap();
        tx.send(lease.in_transaction()).unwrap();
        drop(lease);
    });

    // While the only shared connection sits in a transaction, nobody else
    // gets it.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    holder.commit().unwrap();
    drop(holder);
    let in_transaction = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(!in_transaction);
    waiter.join().unwrap();
}

#[test]
fn dedicated_and_shared_leases_coexist() {
    let script = MockScript::new();
    let pool = shared_pool(&script, 1, 0);

    let shared = pool.connection(true).unwrap();
    let dedicated = pool.connection(false).unwrap();
    assert!(shared.is_shared());
    assert!(!dedicated.is_shared());
    assert_eq!(script.connects(), 2);
    assert_eq!(pool.stats().connections, 2);
}

#[test]
fn module_level_safety_silently_disables_sharing() {
    let script = MockScript::new();
    let driver = MockDriver::new(script.clone()).with_thread_safety(ThreadSafety::Module);
    let pool = ConnectionPool::open(
        Arc::new(driver),
        PoolConfig {
            max_shared: 4,
            ..PoolConfig::default()
        },
    )
    .unwrap();

    let lease = pool.connection(true).unwrap();
    assert!(!lease.is_shared());
    assert_eq!(pool.stats().shared_slots, 0);
}

#[test]
fn share_counts_balance_toward_the_least_shared() {
    let script = MockScript::new();
    let pool = shared_pool(&script, 2, 0);

    let _a = pool.connection(true).unwrap();
    let b = pool.connection(true).unwrap();
    let _c = pool.connection(true).unwrap();
    // Slots now carry counts 2 and 1; dropping the single holder of the
    // second slot leaves it the emptier target for the next lease.
    drop(b);
    let _d = pool.connection(true).unwrap();
    assert_eq!(script.connects(), 2);
    assert_eq!(pool.stats().shared_slots, 2);
}
