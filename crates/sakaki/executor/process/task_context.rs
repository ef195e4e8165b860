use std::cell::RefCell;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use sakaki_data::{PagePool, PagedArena};
use sakaki_index::dist::KeyRange;

use crate::exchange::{ExchangeReader, ExchangeWriter};
use crate::io::record_channel::RecordWriter;
use crate::io::writer_pool::WriterSeat;
use crate::process::variable_table::VariableTable;
use crate::transaction::{Strand, TransactionContext};

/// Per-task, per-operator state (open iterators, scratch buffers, acquired
/// writers). Slots are populated lazily by the operators themselves.
pub struct ContextContainer {
    slots: Vec<RefCell<Option<Box<dyn std::any::Any + Send>>>>,
}

impl ContextContainer {
    pub fn new(operator_count: usize) -> Self {
        Self { slots: (0..operator_count).map(|_| RefCell::new(None)).collect() }
    }

    /// Borrows the slot of operator `index`.
    pub fn slot(&self, index: usize) -> &RefCell<Option<Box<dyn std::any::Any + Send>>> {
        &self.slots[index]
    }
}

/// Everything one task needs to run its operator chain.
///
/// The context is owned by at most one worker at a time; interior
/// mutability lets the chain borrow individual parts independently while
/// recursing through operators.
pub struct TaskContext {
    pub partition: usize,
    pub variable_tables: Vec<VariableTable>,
    pub contexts: ContextContainer,
    /// Page source for stores materialized by operators.
    pub pool: Arc<PagePool>,
    /// Work arena for record scratch space.
    pub arena: PagedArena,
    /// Arena backing varlen content of variables and decoded fields.
    pub varlen: PagedArena,
    pub transaction: Arc<TransactionContext>,
    pub strand: RefCell<Option<Strand>>,
    /// Exchange readers per input port.
    pub readers: Vec<RefCell<ExchangeReader>>,
    /// Exchange writers per output port.
    pub writers: Vec<RefCell<ExchangeWriter>>,
    /// Result writer acquired by the emit operator.
    pub channel_writer: RefCell<Option<Box<dyn RecordWriter>>>,
    /// Writer seat held while the chain runs.
    pub seat: RefCell<Option<WriterSeat>>,
    /// Wakeup flag for sleeping on seat admission.
    pub waker: Arc<AtomicBool>,
    /// Range restriction of a parallel-scan strand task.
    pub scan_range: Option<KeyRange>,
    /// Every upstream shuffle partition was empty.
    pub empty_input_from_shuffle: bool,
    /// The task may migrate workers mid transaction.
    pub in_transaction_and_non_sticky: bool,
}

impl TaskContext {
    pub fn variables(&self, block: usize) -> &VariableTable {
        &self.variable_tables[block]
    }

    /// Ends the task: deliver exchange output, close the result writer,
    /// release the strand.
    pub fn finish(&self) {
        for w in &self.writers {
            w.borrow_mut().flush();
        }
        if let Some(writer) = self.channel_writer.borrow_mut().take() {
            writer.release();
        }
        if let Some(strand) = self.strand.borrow_mut().as_mut() {
            strand.reset();
        }
    }
}

/// Thread-safe pool the process executor draws task contexts from.
///
/// Yielding returns the context so another worker can resume it.
pub struct TaskContextPool {
    contexts: Mutex<Vec<Box<TaskContext>>>,
}

impl TaskContextPool {
    pub fn new(contexts: Vec<Box<TaskContext>>) -> Self {
        Self { contexts: Mutex::new(contexts) }
    }

    pub fn pop(&self) -> Option<Box<TaskContext>> {
        self.contexts.lock().expect("context pool poisoned").pop()
    }

    pub fn push(&self, context: Box<TaskContext>) {
        self.contexts.lock().expect("context pool poisoned").push(context);
    }
}
