use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sakaki_common::config::Config;
use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::status::Status;
use sakaki_data::PagePool;
use sakaki_kvs::Database;
use sakaki_storage::StorageManager;

use crate::error::OperatorError;
use crate::io::record_channel::RecordChannel;
use crate::io::writer_pool::WriterPool;
use crate::transaction::TransactionContext;

/// Per-request state shared by every task of a statement execution.
pub struct RequestContext {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    storage_manager: Arc<StorageManager>,
    transaction: Arc<TransactionContext>,
    channel: Option<Arc<dyn RecordChannel>>,
    writer_pool: Arc<WriterPool>,
    page_pool: Arc<PagePool>,
    session_user: Option<String>,
    error: Mutex<Option<ErrorInfo>>,
    cancel: AtomicBool,
    deadline: Option<Instant>,
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        database: Arc<dyn Database>,
        storage_manager: Arc<StorageManager>,
        transaction: Arc<TransactionContext>,
        channel: Option<Arc<dyn RecordChannel>>,
        writer_pool: Arc<WriterPool>,
        page_pool: Arc<PagePool>,
        session_user: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            database,
            storage_manager,
            transaction,
            channel,
            writer_pool,
            page_pool,
            session_user,
            error: Mutex::new(None),
            cancel: AtomicBool::new(false),
            deadline: None,
        })
    }

    pub fn with_deadline(mut self: Arc<Self>, deadline: Instant) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("deadline set before sharing").deadline = Some(deadline);
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn storage_manager(&self) -> &Arc<StorageManager> {
        &self.storage_manager
    }

    pub fn transaction(&self) -> &Arc<TransactionContext> {
        &self.transaction
    }

    pub fn channel(&self) -> Option<&Arc<dyn RecordChannel>> {
        self.channel.as_ref()
    }

    pub fn writer_pool(&self) -> &Arc<WriterPool> {
        &self.writer_pool
    }

    pub fn page_pool(&self) -> &Arc<PagePool> {
        &self.page_pool
    }

    pub fn session_user(&self) -> Option<&str> {
        self.session_user.as_deref()
    }

    /// First fatal error of the request, if any.
    pub fn error(&self) -> Option<ErrorInfo> {
        self.error.lock().expect("error slot poisoned").clone()
    }

    /// Records the error; only the first one is kept. The transaction's
    /// error slot follows the request's.
    pub fn set_error(&self, info: ErrorInfo) {
        let mut slot = self.error.lock().expect("error slot poisoned");
        if slot.is_none() {
            self.transaction.set_error_info(info.clone());
            *slot = Some(info);
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Safe-point check inside operator loops.
    pub fn check_cancel(&self) -> Result<(), OperatorError> {
        if self.cancel_requested() {
            return Err(OperatorError::new(ErrorInfo::new(
                ErrorCode::RequestCanceled,
                "request canceled",
                Status::UserRollback,
            )));
        }
        Ok(())
    }

    /// Refuses to start new work past the request deadline.
    pub fn check_deadline(&self) -> Result<(), ErrorInfo> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(ErrorInfo::new(
                    ErrorCode::SqlRequestTimeoutException,
                    "request deadline exceeded",
                    Status::ErrTimeOut,
                ));
            }
        }
        Ok(())
    }
}
