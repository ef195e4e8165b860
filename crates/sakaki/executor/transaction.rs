//! Transaction lifecycle state machine and its KV-engine binding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::lob::{LobId, LobKind};
use sakaki_common::status::Status;
use sakaki_index::{IndexError, LobResolver};
use sakaki_kvs::{Database, KvsError, Transaction, TransactionOption};
use sakaki_storage::UniqueLock;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Undefined,
    Init,
    Active,
    GoingToCommit,
    GoingToAbort,
    /// Abort initiated without a user request (engine early abort).
    AbortedDirectly,
    CcCommitting,
    /// Commit decided; results visible to others.
    CommittedAvailable,
    /// Commit durable.
    CommittedStored,
    Aborted,
    /// The CC engine lost track of the transaction.
    Unknown,
}

impl TransactionState {
    /// Transition table of the lifecycle machine. Anything not listed is
    /// rejected.
    pub fn can_transition_to(self, to: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, to),
            (Undefined, Init)
                | (Init, Active)
                | (Init, Aborted)
                | (Active, GoingToCommit)
                | (Active, GoingToAbort)
                | (Active, AbortedDirectly)
                | (Active, Aborted)
                | (Active, Unknown)
                | (GoingToCommit, CcCommitting)
                | (GoingToAbort, Aborted)
                | (AbortedDirectly, Aborted)
                | (CcCommitting, CommittedAvailable)
                | (CcCommitting, CommittedStored)
                | (CcCommitting, Aborted)
                | (CommittedAvailable, CommittedStored)
        )
    }
}

static TRANSACTION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Engine-side context of one transaction.
///
/// Owns the KV transaction handle, the lifecycle state, the first fatal
/// error observed, registered LOB ids and the DDL unique lock pinned for
/// the transaction's lifetime.
pub struct TransactionContext {
    id: u64,
    option: TransactionOption,
    state: Mutex<TransactionState>,
    kvs_tx: Arc<dyn Transaction>,
    error_info: Mutex<Option<ErrorInfo>>,
    lob_sequence: AtomicU64,
    lob_ids: Mutex<Vec<LobId>>,
    unique_lock: Mutex<Option<UniqueLock>>,
}

impl TransactionContext {
    pub fn create(
        db: &dyn Database,
        option: TransactionOption,
    ) -> Result<Arc<Self>, ErrorInfo> {
        let kvs_tx = db.create_transaction(option.clone()).map_err(|e| {
            ErrorInfo::new(ErrorCode::SqlServiceException, e.to_string(), e.status())
        })?;
        Ok(Arc::new(Self {
            id: TRANSACTION_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1,
            option,
            state: Mutex::new(TransactionState::Init),
            kvs_tx,
            error_info: Mutex::new(None),
            lob_sequence: AtomicU64::new(0),
            lob_ids: Mutex::new(Vec::new()),
            unique_lock: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn option(&self) -> &TransactionOption {
        &self.option
    }

    pub fn readonly(&self) -> bool {
        self.option.readonly()
    }

    pub fn kvs_transaction(&self) -> &Arc<dyn Transaction> {
        &self.kvs_tx
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock().expect("transaction state poisoned")
    }

    /// Attempts a validated state transition.
    pub fn transition(&self, to: TransactionState) -> bool {
        let mut state = self.state.lock().expect("transaction state poisoned");
        if !state.can_transition_to(to) {
            warn!(tx = self.id, from = ?*state, ?to, "rejected transaction state transition");
            return false;
        }
        debug!(tx = self.id, from = ?*state, ?to, "transaction state transition");
        *state = to;
        true
    }

    /// Moves a fresh transaction into `Active`; no-op when already there.
    pub fn activate(&self) {
        let mut state = self.state.lock().expect("transaction state poisoned");
        if *state == TransactionState::Init {
            *state = TransactionState::Active;
        }
    }

    /// Commits the transaction.
    ///
    /// In any state but `Active` this is a no-op returning the appropriate
    /// status error; a transaction aborted early by the CC engine reports
    /// `inactive_transaction`.
    pub fn commit(&self) -> Result<(), ErrorInfo> {
        {
            let mut state = self.state.lock().expect("transaction state poisoned");
            if *state != TransactionState::Active {
                return Err(ErrorInfo::new(
                    ErrorCode::InactiveTransactionException,
                    format!("transaction is not active ({:?})", *state),
                    Status::ErrInactiveTransaction,
                ));
            }
            *state = TransactionState::GoingToCommit;
            *state = TransactionState::CcCommitting;
        }
        match self.kvs_tx.commit() {
            Ok(()) => {
                self.transition(TransactionState::CommittedAvailable);
                self.transition(TransactionState::CommittedStored);
                self.release_unique_lock();
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state.lock().expect("transaction state poisoned");
                    *state = TransactionState::Aborted;
                }
                self.release_unique_lock();
                let code = match e {
                    KvsError::InactiveTransaction => ErrorCode::InactiveTransactionException,
                    KvsError::SerializationFailure => ErrorCode::CcException,
                    KvsError::ConflictOnWritePreserve => {
                        ErrorCode::ConflictOnWritePreserveException
                    }
                    _ => ErrorCode::SqlExecutionException,
                };
                Err(ErrorInfo::new(code, e.to_string(), e.status()))
            }
        }
    }

    /// Commits and invokes `on_completion` with the outcome.
    pub fn commit_with_callback<F>(&self, on_completion: F)
    where
        F: FnOnce(Result<(), ErrorInfo>),
    {
        on_completion(self.commit());
    }

    /// Waits until a successful commit is durable.
    pub fn wait_for_commit(&self, timeout_ns: u64) -> Result<(), ErrorInfo> {
        self.kvs_tx.wait_for_commit(timeout_ns).map_err(|e| {
            ErrorInfo::new(ErrorCode::SqlExecutionException, e.to_string(), e.status())
        })
    }

    /// Aborts the transaction; a no-op in any non-active state.
    pub fn abort(&self) -> Result<(), ErrorInfo> {
        {
            let mut state = self.state.lock().expect("transaction state poisoned");
            match *state {
                TransactionState::Active => {
                    *state = TransactionState::GoingToAbort;
                    *state = TransactionState::Aborted;
                }
                TransactionState::Init => {
                    *state = TransactionState::Aborted;
                }
                _ => return Ok(()),
            }
        }
        let _ = self.kvs_tx.abort();
        self.release_unique_lock();
        Ok(())
    }

    /// Records an engine-side early abort: the KV layer already gave up on
    /// the transaction, the state machine follows.
    pub fn force_abort(&self) {
        {
            let mut state = self.state.lock().expect("transaction state poisoned");
            match *state {
                TransactionState::Aborted
                | TransactionState::CommittedAvailable
                | TransactionState::CommittedStored => return,
                _ => *state = TransactionState::Aborted,
            }
        }
        let _ = self.kvs_tx.abort();
        self.release_unique_lock();
    }

    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.error_info.lock().expect("error slot poisoned").clone()
    }

    /// Stores the first error only; later ones are dropped.
    pub fn set_error_info(&self, info: ErrorInfo) {
        let mut slot = self.error_info.lock().expect("error slot poisoned");
        if slot.is_none() {
            *slot = Some(info);
        }
    }

    /// Registered LOB ids, in assignment order.
    pub fn lob_ids(&self) -> Vec<LobId> {
        self.lob_ids.lock().expect("lob registry poisoned").clone()
    }

    /// Pins the DDL unique lock to this transaction.
    pub fn pin_unique_lock(&self, lock: UniqueLock) {
        *self.unique_lock.lock().expect("unique lock slot poisoned") = Some(lock);
    }

    pub fn with_unique_lock<R>(&self, f: impl FnOnce(Option<&mut UniqueLock>) -> R) -> R {
        let mut slot = self.unique_lock.lock().expect("unique lock slot poisoned");
        f(slot.as_mut())
    }

    fn release_unique_lock(&self) {
        self.unique_lock.lock().expect("unique lock slot poisoned").take();
    }

    /// Creates a strand serializing worker-local access for one task.
    pub fn strand(self: &Arc<Self>) -> Strand {
        Strand { tx: Arc::clone(self), active: true }
    }
}

impl LobResolver for TransactionContext {
    fn assign_lob_id(&self, _kind: LobKind) -> Result<LobId, IndexError> {
        if !self.kvs_tx.is_active() {
            return Err(IndexError::Kvs(KvsError::InactiveTransaction));
        }
        let seq = self.lob_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let id = (self.id << 20) | seq;
        self.lob_ids.lock().expect("lob registry poisoned").push(id);
        Ok(id)
    }
}

/// Thin per-task sub-transaction handle.
///
/// Parallel scan strands funnel their reads through the parent transaction;
/// the strand only tracks its own lifetime and is reset when the task
/// completes.
pub struct Strand {
    tx: Arc<TransactionContext>,
    active: bool,
}

impl Strand {
    pub fn transaction(&self) -> &Arc<TransactionContext> {
        &self.tx
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Ends the strand; further use goes through a fresh strand.
    pub fn reset(&mut self) {
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_kvs::memory::MemoryDatabase;

    fn tx(option: TransactionOption) -> Arc<TransactionContext> {
        let db = MemoryDatabase::new();
        TransactionContext::create(&db, option).unwrap()
    }

    #[test]
    fn accepted_transitions() {
        let t = tx(TransactionOption::occ());
        assert_eq!(t.state(), TransactionState::Init);
        assert!(t.transition(TransactionState::Active));
        assert!(t.transition(TransactionState::GoingToCommit));
        assert!(t.transition(TransactionState::CcCommitting));
        assert!(t.transition(TransactionState::CommittedAvailable));
        assert!(t.transition(TransactionState::CommittedStored));
    }

    #[test]
    fn rejected_transitions() {
        let t = tx(TransactionOption::occ());
        assert!(!t.transition(TransactionState::CcCommitting));
        t.activate();
        assert!(!t.transition(TransactionState::CommittedStored));
        assert!(t.transition(TransactionState::Aborted));
        assert!(!t.transition(TransactionState::Active));
    }

    #[test]
    fn commit_from_active_reaches_stored() {
        let t = tx(TransactionOption::occ());
        t.activate();
        t.commit().unwrap();
        assert_eq!(t.state(), TransactionState::CommittedStored);
    }

    #[test]
    fn commit_without_activation_is_rejected() {
        let t = tx(TransactionOption::occ());
        let err = t.commit().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InactiveTransactionException);
        assert_eq!(err.status(), Status::ErrInactiveTransaction);
    }

    #[test]
    fn abort_is_idempotent() {
        let t = tx(TransactionOption::occ());
        t.activate();
        t.abort().unwrap();
        assert_eq!(t.state(), TransactionState::Aborted);
        t.abort().unwrap();
        assert_eq!(t.state(), TransactionState::Aborted);
        // commit after abort reports inactive
        let err = t.commit().unwrap_err();
        assert_eq!(err.status(), Status::ErrInactiveTransaction);
    }

    #[test]
    fn force_abort_preserves_commit_outcome() {
        let t = tx(TransactionOption::occ());
        t.activate();
        t.commit().unwrap();
        t.force_abort();
        assert_eq!(t.state(), TransactionState::CommittedStored);
    }

    #[test]
    fn first_error_wins() {
        let t = tx(TransactionOption::occ());
        t.set_error_info(ErrorInfo::new(
            ErrorCode::OccReadException,
            "first",
            Status::ErrSerializationFailure,
        ));
        t.set_error_info(ErrorInfo::new(
            ErrorCode::SqlExecutionException,
            "second",
            Status::ErrUnknown,
        ));
        assert_eq!(t.error_info().unwrap().message(), "first");
    }

    #[test]
    fn strand_lifecycle() {
        let t = tx(TransactionOption::rtx());
        let mut strand = t.strand();
        assert!(strand.is_active());
        strand.reset();
        assert!(!strand.is_active());
    }

    #[test]
    fn lob_ids_are_registered_in_order() {
        let t = tx(TransactionOption::occ());
        let a = t.assign_lob_id(LobKind::Blob).unwrap();
        let b = t.assign_lob_id(LobKind::Clob).unwrap();
        assert!(a < b);
        assert_eq!(t.lob_ids(), vec![a, b]);
    }
}
