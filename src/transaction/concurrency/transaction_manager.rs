use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Creates and tracks transactions, and ends them by releasing every lock
/// they hold.
///
/// Ids are handed out monotonically, which is what gives WOUND-WAIT its age
/// order: a smaller id is an older transaction.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions
            .lock()
            .insert(txn_id, txn.clone());
        txn
    }

    /// Commit the transaction and release all of its locks.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::InvalidState(txn.id()));
            }
            _ => {}
        }

        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort the transaction and release all of its locks.
    ///
    /// Aborting an already-wounded transaction is the normal way for it to
    /// clean up, so only a committed transaction is rejected here.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Look up an active transaction by id.
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.exclusive_locks() {
            self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.shared_locks() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
