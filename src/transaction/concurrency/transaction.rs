use std::collections::HashSet;
use std::fmt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction starts out growing, enters
/// shrinking on its first lock release (isolation level permitting), and ends
/// committed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why the lock manager aborted a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Shared lock requested under READ_UNCOMMITTED.
    LockSharedOnReadUncommitted,
    /// Lock requested after the transaction entered its shrinking phase.
    LockOnShrinking,
    /// Wounded by an older transaction.
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::LockSharedOnReadUncommitted => {
                write!(f, "shared lock requested under READ_UNCOMMITTED")
            }
            AbortReason::LockOnShrinking => {
                write!(f, "lock requested in the shrinking phase")
            }
            AbortReason::Deadlock => write!(f, "wounded to prevent a deadlock"),
        }
    }
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {txn_id} aborted: {reason}")]
    Abort { txn_id: TxnId, reason: AbortReason },

    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),
}

/// An active transaction: identity, isolation level, 2PL state, and the rows
/// it holds locks on.
///
/// Shared as `Arc<Transaction>`; the state is interiorly mutable because an
/// older transaction may wound this one from another thread.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Snapshot of the shared-locked rows.
    pub fn shared_locks(&self) -> Vec<Rid> {
        self.shared_lock_set.lock().iter().copied().collect()
    }

    /// Snapshot of the exclusive-locked rows.
    pub fn exclusive_locks(&self) -> Vec<Rid> {
        self.exclusive_lock_set.lock().iter().copied().collect()
    }
}
