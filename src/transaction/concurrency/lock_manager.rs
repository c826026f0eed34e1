use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::Rid;
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Two lock requests conflict unless both are shared.
fn conflicts(a: LockMode, b: LockMode) -> bool {
    a == LockMode::Exclusive || b == LockMode::Exclusive
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

struct LockRequestQueue {
    queue: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Row-granularity two-phase lock manager with WOUND-WAIT deadlock
/// prevention.
///
/// One global mutex guards the per-row request queues; waiters block on the
/// queue's condition variable. Transaction ids order age: on conflict an older
/// transaction wounds (aborts) younger holders and proceeds, a younger one
/// waits. Queues are created on demand and never removed.
pub struct LockManager {
    latch: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on the row.
    ///
    /// Returns `Ok(false)` when the transaction is (or becomes) aborted, and
    /// an `Abort` error on a protocol violation.
    pub fn lock_shared(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        // A read-uncommitted transaction never reads a committed value, so a
        // shared lock makes no sense for it.
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.is_shared_locked(rid) {
            return Ok(true);
        }

        let mut table = self.latch.lock();
        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
        queue.queue.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Shared,
            granted: false,
        });
        txn.add_shared_lock(rid);
        let cv = queue.cv.clone();

        loop {
            let queue = table.get(&rid).expect("lock queue removed while in use");
            if !Self::need_wait(txn, queue) {
                break;
            }
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return Ok(false);
            }
        }

        let queue = table.get_mut(&rid).expect("lock queue removed while in use");
        for request in queue.queue.iter_mut() {
            if request.txn.id() == txn.id() {
                request.granted = true;
            }
        }
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Take an exclusive lock on the row.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let mut table = self.latch.lock();
        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
        queue.queue.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        txn.add_exclusive_lock(rid);
        let cv = queue.cv.clone();

        loop {
            let queue = table.get(&rid).expect("lock queue removed while in use");
            if !Self::need_wait(txn, queue) {
                break;
            }
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return Ok(false);
            }
        }

        let queue = table.get_mut(&rid).expect("lock queue removed while in use");
        for request in queue.queue.iter_mut() {
            if request.txn.id() == txn.id() {
                request.granted = true;
            }
        }
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Upgrade an already-held shared lock to exclusive.
    ///
    /// The transaction's queue entry changes mode in place; the upgrade is
    /// granted once the entry reaches the head of the queue.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() != TransactionState::Growing {
            return Ok(false);
        }
        if !txn.is_shared_locked(rid) {
            return Ok(false);
        }

        let mut table = self.latch.lock();
        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return Ok(false),
        };

        for request in queue.queue.iter_mut() {
            if request.txn.id() == txn.id() && request.mode == LockMode::Shared {
                request.mode = LockMode::Exclusive;
                request.granted = false;
                break;
            }
        }
        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        let cv = queue.cv.clone();

        loop {
            let queue = table.get(&rid).expect("lock queue removed while in use");
            let at_head = queue
                .queue
                .front()
                .map(|request| request.txn.id() == txn.id())
                .unwrap_or(false);
            if at_head {
                break;
            }
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return Ok(false);
            }
        }

        let queue = table.get_mut(&rid).expect("lock queue removed while in use");
        for request in queue.queue.iter_mut() {
            if request.txn.id() == txn.id() {
                request.granted = true;
            }
        }
        Ok(true)
    }

    /// Release the transaction's lock on the row.
    ///
    /// Moves the transaction into its shrinking phase when two-phase locking
    /// requires it: releasing an exclusive lock always does; releasing a
    /// shared lock does only under REPEATABLE_READ.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.latch.lock();
        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return false,
        };

        let position = queue
            .queue
            .iter()
            .position(|request| request.txn.id() == txn.id());
        let mode = match position {
            Some(position) => {
                let request = queue.queue.remove(position);
                request.map(|r| r.mode)
            }
            None => None,
        };
        let mode = match mode {
            Some(mode) => mode,
            None => return false,
        };

        if (mode == LockMode::Exclusive
            || txn.isolation_level() == IsolationLevel::RepeatableRead)
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
        queue.cv.notify_all();
        true
    }

    /// WOUND-WAIT admission predicate, run with the table latch held.
    ///
    /// Scans the queue from the head to this transaction's own request:
    /// conflicting younger transactions are wounded on the spot, conflicting
    /// older ones force a wait. Wounding broadcasts so the wounded waiters
    /// observe their aborted state and bail out.
    fn need_wait(txn: &Transaction, queue: &LockRequestQueue) -> bool {
        let self_id = txn.id();
        let self_mode = match queue
            .queue
            .iter()
            .find(|request| request.txn.id() == self_id)
        {
            Some(request) => request.mode,
            None => return false,
        };

        if let Some(first) = queue.queue.front() {
            let head_compatible = match self_mode {
                LockMode::Shared => {
                    first.txn.id() == self_id || first.mode == LockMode::Shared
                }
                LockMode::Exclusive => first.txn.id() == self_id,
            };
            if head_compatible {
                return false;
            }
        }

        let mut need_wait = false;
        let mut wounded = false;
        for request in queue.queue.iter() {
            if request.txn.id() == self_id {
                break;
            }
            if request.txn.id() > self_id {
                // Younger conflicting holder: wound it.
                if conflicts(self_mode, request.mode)
                    && request.txn.state() != TransactionState::Aborted
                {
                    debug!("txn {} wounds txn {}", self_id, request.txn.id());
                    request.txn.set_state(TransactionState::Aborted);
                    wounded = true;
                }
            } else if conflicts(self_mode, request.mode) {
                // Older conflicting holder: wait for it.
                need_wait = true;
            }
        }

        if wounded {
            queue.cv.notify_all();
        }
        need_wait
    }
}
