use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use varandb::transaction::{
    AbortReason, IsolationLevel, LockManager, TransactionError, TransactionManager,
    TransactionState,
};

fn setup() -> (Arc<LockManager>, TransactionManager) {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(lock_manager.clone());
    (lock_manager, txn_manager)
}

#[test]
fn test_shared_locks_coexist() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_shared(&t1, 1).unwrap());
    assert!(lock_manager.lock_shared(&t2, 1).unwrap());
    assert!(t1.is_shared_locked(1));
    assert!(t2.is_shared_locked(1));

    // Re-acquiring an already-held shared lock succeeds immediately.
    assert!(lock_manager.lock_shared(&t1, 1).unwrap());
}

#[test]
fn test_exclusive_lock_basic() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_exclusive(&t1, 1).unwrap());
    assert!(t1.is_exclusive_locked(1));
    assert_eq!(t1.state(), TransactionState::Growing);

    assert!(lock_manager.unlock(&t1, 1));
    assert!(!t1.is_exclusive_locked(1));
    assert_eq!(t1.state(), TransactionState::Shrinking);
}

#[test]
fn test_wound_wait_aborts_younger_holder() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    // The younger transaction takes the lock first.
    assert!(lock_manager.lock_exclusive(&t2, 1).unwrap());

    // The older transaction wounds it and proceeds.
    assert!(lock_manager.lock_exclusive(&t1, 1).unwrap());
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert_eq!(t1.state(), TransactionState::Growing);

    txn_manager.abort(&t2).unwrap();
}

#[test]
fn test_wounded_waiter_returns_false() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t3 = txn_manager.begin(IsolationLevel::RepeatableRead);

    // t2 holds the row; t3 queues up behind it.
    assert!(lock_manager.lock_exclusive(&t2, 1).unwrap());

    let waiter = {
        let lock_manager = lock_manager.clone();
        let t3 = t3.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t3, 1).unwrap())
    };
    // Give the waiter time to enqueue and block.
    thread::sleep(Duration::from_millis(100));

    // The oldest transaction wounds both younger ones and gets the lock.
    assert!(lock_manager.lock_shared(&t1, 1).unwrap());
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert_eq!(t3.state(), TransactionState::Aborted);

    // The wounded waiter observes the abort and fails its lock call.
    assert!(!waiter.join().unwrap());
}

#[test]
fn test_lock_upgrade_waits_for_other_readers() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    // The younger reader is first in the queue, the older one behind it.
    assert!(lock_manager.lock_shared(&t2, 1).unwrap());
    assert!(lock_manager.lock_shared(&t1, 1).unwrap());

    let upgraded = Arc::new(AtomicBool::new(false));
    let upgrader = {
        let lock_manager = lock_manager.clone();
        let t1 = t1.clone();
        let upgraded = upgraded.clone();
        thread::spawn(move || {
            let result = lock_manager.lock_upgrade(&t1, 1).unwrap();
            upgraded.store(true, Ordering::SeqCst);
            result
        })
    };

    // The upgrade cannot complete while the other reader holds the row.
    thread::sleep(Duration::from_millis(200));
    assert!(!upgraded.load(Ordering::SeqCst));

    assert!(lock_manager.unlock(&t2, 1));
    assert!(upgrader.join().unwrap());
    assert!(upgraded.load(Ordering::SeqCst));
    assert!(t1.is_exclusive_locked(1));
    assert!(!t1.is_shared_locked(1));
}

#[test]
fn test_exclusive_waits_for_older_holder() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_exclusive(&t1, 1).unwrap());

    let granted = Arc::new(AtomicBool::new(false));
    let waiter = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        let granted = granted.clone();
        thread::spawn(move || {
            let result = lock_manager.lock_exclusive(&t2, 1).unwrap();
            granted.store(true, Ordering::SeqCst);
            result
        })
    };

    // The younger transaction waits for the older holder.
    thread::sleep(Duration::from_millis(200));
    assert!(!granted.load(Ordering::SeqCst));

    assert!(lock_manager.unlock(&t1, 1));
    assert!(waiter.join().unwrap());
    assert!(t2.is_exclusive_locked(1));
}

#[test]
fn test_lock_shared_on_read_uncommitted_aborts() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::ReadUncommitted);

    let err = lock_manager.lock_shared(&t1, 1).unwrap_err();
    assert!(matches!(
        err,
        TransactionError::Abort {
            reason: AbortReason::LockSharedOnReadUncommitted,
            ..
        }
    ));
    assert_eq!(t1.state(), TransactionState::Aborted);
}

#[test]
fn test_lock_on_shrinking_aborts() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_shared(&t1, 1).unwrap());
    assert!(lock_manager.unlock(&t1, 1));
    assert_eq!(t1.state(), TransactionState::Shrinking);

    // No transaction in its shrinking phase may acquire a lock.
    let err = lock_manager.lock_shared(&t1, 2).unwrap_err();
    assert!(matches!(
        err,
        TransactionError::Abort {
            reason: AbortReason::LockOnShrinking,
            ..
        }
    ));
    assert_eq!(t1.state(), TransactionState::Aborted);

    // Once aborted, further lock calls simply fail.
    assert!(!lock_manager.lock_exclusive(&t1, 3).unwrap());
}

#[test]
fn test_read_committed_early_shared_release() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::ReadCommitted);

    // Releasing a shared lock under READ_COMMITTED does not end the growing
    // phase.
    assert!(lock_manager.lock_shared(&t1, 1).unwrap());
    assert!(lock_manager.unlock(&t1, 1));
    assert_eq!(t1.state(), TransactionState::Growing);

    // Releasing an exclusive lock does.
    assert!(lock_manager.lock_exclusive(&t1, 2).unwrap());
    assert!(lock_manager.unlock(&t1, 2));
    assert_eq!(t1.state(), TransactionState::Shrinking);
}

#[test]
fn test_repeatable_read_shared_release_shrinks() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_shared(&t1, 1).unwrap());
    assert!(lock_manager.unlock(&t1, 1));
    assert_eq!(t1.state(), TransactionState::Shrinking);
}

#[test]
fn test_unlock_without_lock_returns_false() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    // No queue for the row at all.
    assert!(!lock_manager.unlock(&t1, 42));

    // A queue exists but holds no request from this transaction.
    assert!(lock_manager.lock_shared(&t2, 42).unwrap());
    assert!(!lock_manager.unlock(&t1, 42));
}

#[test]
fn test_upgrade_preconditions() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    // Upgrading without holding the shared lock fails.
    assert!(!lock_manager.lock_upgrade(&t1, 1).unwrap());

    // Upgrading in the shrinking phase fails.
    assert!(lock_manager.lock_shared(&t1, 1).unwrap());
    assert!(lock_manager.lock_shared(&t1, 2).unwrap());
    assert!(lock_manager.unlock(&t1, 2));
    assert_eq!(t1.state(), TransactionState::Shrinking);
    assert!(!lock_manager.lock_upgrade(&t1, 1).unwrap());
}

#[test]
fn test_commit_releases_locks() {
    let (lock_manager, txn_manager) = setup();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_exclusive(&t1, 1).unwrap());
    assert!(lock_manager.lock_shared(&t1, 2).unwrap());
    txn_manager.commit(&t1).unwrap();
    assert!(!t1.is_exclusive_locked(1));
    assert!(!t1.is_shared_locked(2));

    // A later transaction gets the rows without contention.
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(lock_manager.lock_exclusive(&t2, 1).unwrap());
    assert!(lock_manager.lock_exclusive(&t2, 2).unwrap());
}
