//! Threaded interface for submitting and controlling transactions.
//!
//! Transactions submitted here run on a background thread each. They are
//! still serialized by the database writer lock, so submitting several at
//! once only queues them. Cancellation is cooperative through an
//! `Arc<AtomicBool>` and is all-or-nothing: the token is checked right
//! before the commit point, and a cancelled transaction leaves no trace.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::construct::Database;
use crate::error::{Result, SchemataError};
use crate::transact::{TxOp, TxReport};

/// Cancellation token shared with the worker thread. A token may also carry
/// a deadline, after which it reads as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(u64);

/// Handle to a running or completed transaction.
pub struct TransactionHandle {
    pub id: TxId,
    cancel: CancelToken,
    started: Instant,
    join: Option<JoinHandle<Result<TxReport>>>,
}
impl TransactionHandle {
    /// Request cancellation. It takes effect unless the commit already happened.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    /// Wait for the transaction to finish and return its report.
    pub fn join(mut self) -> Result<TxReport> {
        match self.join.take() {
            Some(join) => join
                .join()
                .unwrap_or_else(|_| Err(SchemataError::Lock(String::from("transaction thread panicked")))),
            None => Err(SchemataError::Cancelled),
        }
    }
    /// Elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Transaction submission options.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Cancel the transaction if it has not committed within this time.
    pub timeout: Option<Duration>,
}

/// Registry managing transaction lifecycles.
pub struct TransactionInterface {
    db: Arc<Database>,
    next_id: Mutex<u64>,
    active: Arc<Mutex<HashMap<TxId, CancelToken>>>,
}

impl TransactionInterface {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            next_id: Mutex::new(0),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allocate_id(&self) -> Result<TxId> {
        let mut next = self.next_id.lock()?;
        *next += 1;
        Ok(TxId(*next))
    }

    /// Submit a transaction for execution on a background thread.
    pub fn start_transaction(&self, ops: Vec<TxOp>, options: TransactionOptions) -> Result<TransactionHandle> {
        let id = self.allocate_id()?;
        let cancel = CancelToken::new();
        self.active.lock()?.insert(id, cancel.clone());

        let db = Arc::clone(&self.db);
        let active = Arc::clone(&self.active);
        let cancel_for_thread = cancel.clone();
        let started = Instant::now();
        let timeout = options.timeout;
        let join = std::thread::spawn(move || {
            let result = if timeout.is_some_and(|d| d.is_zero()) {
                Err(SchemataError::Cancelled)
            } else {
                let token = match timeout {
                    Some(timeout) => cancel_for_thread.with_deadline(started + timeout),
                    None => cancel_for_thread,
                };
                db.transact_cancellable(ops, &token)
            };
            if let Ok(mut active) = active.lock() {
                active.remove(&id);
            }
            match &result {
                Ok(report) => debug!(?id, t = report.t, "background transaction committed"),
                Err(e) => warn!(?id, error = %e, "background transaction failed"),
            }
            result
        });

        Ok(TransactionHandle {
            id,
            cancel,
            started,
            join: Some(join),
        })
    }

    /// Run a transaction synchronously on the current thread.
    pub fn run_sync(&self, ops: Vec<TxOp>) -> Result<TxReport> {
        self.db.transact(ops)
    }

    /// Cancel a transaction by id. Returns false when it is no longer running.
    pub fn cancel(&self, id: TxId) -> Result<bool> {
        match self.active.lock()?.get(&id) {
            Some(token) => {
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of transactions submitted and not yet finished.
    pub fn active(&self) -> Result<usize> {
        Ok(self.active.lock()?.len())
    }
}
