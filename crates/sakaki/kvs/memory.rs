//! In-memory KV engine.
//!
//! Backs tests and embedded runs with the same interface contract as the
//! production engine: snapshot scans, read-your-writes overlays, put options
//! and long/read-only transaction write restrictions. Commits apply the
//! write set atomically under a database-wide commit lock.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::database::{
    Database, EndPointKind, KvsIterator, PutOption, Storage, Transaction, TransactionOption,
    TransactionType,
};
use crate::error::KvsError;

type KeySpace = BTreeMap<Vec<u8>, Vec<u8>>;
/// `None` marks a delete staged by the transaction.
type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Default)]
struct DatabaseInner {
    storages: RwLock<HashMap<String, Arc<MemoryStorage>>>,
    /// Serializes commit application.
    commit_lock: Mutex<()>,
}

/// In-memory implementation of [`Database`].
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<DatabaseInner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn create_transaction(
        &self,
        option: TransactionOption,
    ) -> Result<Arc<dyn Transaction>, KvsError> {
        Ok(Arc::new(MemoryTransaction {
            db: Arc::clone(&self.inner),
            option,
            state: Mutex::new(TxState { active: true, write_sets: HashMap::new() }),
        }))
    }

    fn create_storage(&self, name: &str) -> Result<Arc<dyn Storage>, KvsError> {
        let mut storages = self.inner.storages.write().expect("storage registry poisoned");
        if storages.contains_key(name) {
            return Err(KvsError::AlreadyExists);
        }
        let storage = Arc::new(MemoryStorage {
            name: name.to_owned(),
            data: RwLock::new(KeySpace::new()),
        });
        storages.insert(name.to_owned(), Arc::clone(&storage));
        debug!(storage = name, "created storage");
        Ok(storage)
    }

    fn get_storage(&self, name: &str) -> Option<Arc<dyn Storage>> {
        let storages = self.inner.storages.read().expect("storage registry poisoned");
        storages.get(name).cloned().map(|s| s as Arc<dyn Storage>)
    }

    fn get_or_create_storage(&self, name: &str) -> Result<Arc<dyn Storage>, KvsError> {
        if let Some(existing) = self.get_storage(name) {
            return Ok(existing);
        }
        match self.create_storage(name) {
            Err(KvsError::AlreadyExists) => {
                self.get_storage(name).ok_or_else(|| KvsError::Internal("storage vanished".into()))
            }
            other => other,
        }
    }

    fn delete_storage(&self, name: &str) -> Result<(), KvsError> {
        let mut storages = self.inner.storages.write().expect("storage registry poisoned");
        storages.remove(name).map(|_| ()).ok_or(KvsError::NotFound)
    }

    fn list_storages(&self) -> Vec<String> {
        let storages = self.inner.storages.read().expect("storage registry poisoned");
        let mut names: Vec<String> = storages.keys().cloned().collect();
        names.sort();
        names
    }
}

struct TxState {
    active: bool,
    write_sets: HashMap<String, WriteSet>,
}

pub struct MemoryTransaction {
    db: Arc<DatabaseInner>,
    option: TransactionOption,
    state: Mutex<TxState>,
}

impl MemoryTransaction {
    /// Checks that this transaction may write `storage`, marking the
    /// transaction aborted when the engine would early-abort it.
    fn check_write_allowed(&self, state: &mut TxState, storage: &str) -> Result<(), KvsError> {
        let allowed = match self.option.transaction_type {
            TransactionType::Occ => true,
            TransactionType::Rtx => false,
            TransactionType::Ltx => {
                self.option.write_preserves.iter().any(|wp| wp == storage)
            }
        };
        if !allowed {
            state.active = false;
            return Err(KvsError::IllegalOperation);
        }
        Ok(())
    }
}

impl Transaction for MemoryTransaction {
    fn commit(&self) -> Result<(), KvsError> {
        let mut state = self.state.lock().expect("transaction state poisoned");
        if !state.active {
            return Err(KvsError::InactiveTransaction);
        }
        let _commit = self.db.commit_lock.lock().expect("commit lock poisoned");
        let storages = self.db.storages.read().expect("storage registry poisoned");
        for (name, writes) in &state.write_sets {
            let Some(storage) = storages.get(name) else {
                let missing = name.clone();
                state.active = false;
                return Err(KvsError::Internal(format!("storage {missing} dropped mid transaction")));
            };
            let mut data = storage.data.write().expect("storage data poisoned");
            for (key, value) in writes {
                match value {
                    Some(v) => {
                        data.insert(key.clone(), v.clone());
                    }
                    None => {
                        data.remove(key);
                    }
                }
            }
        }
        state.write_sets.clear();
        state.active = false;
        Ok(())
    }

    fn abort(&self) -> Result<(), KvsError> {
        let mut state = self.state.lock().expect("transaction state poisoned");
        state.write_sets.clear();
        state.active = false;
        Ok(())
    }

    fn wait_for_commit(&self, _timeout_ns: u64) -> Result<(), KvsError> {
        // commits apply synchronously
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.lock().expect("transaction state poisoned").active
    }

    fn option(&self) -> TransactionOption {
        self.option.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MemoryStorage {
    name: String,
    data: RwLock<KeySpace>,
}

impl MemoryStorage {
    fn downcast<'a>(&self, tx: &'a dyn Transaction) -> Result<&'a MemoryTransaction, KvsError> {
        tx.as_any()
            .downcast_ref::<MemoryTransaction>()
            .ok_or_else(|| KvsError::Internal("foreign transaction handle".into()))
    }
}

/// Returns the next key after every key having `prefix` as prefix.
fn upper_bound_of_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

fn within_range(
    key: &[u8],
    begin_key: &[u8],
    begin_kind: EndPointKind,
    end_key: &[u8],
    end_kind: EndPointKind,
) -> bool {
    let after_begin = match begin_kind {
        EndPointKind::Unbound => true,
        EndPointKind::Inclusive | EndPointKind::PrefixInclusive => key >= begin_key,
        EndPointKind::Exclusive => key > begin_key,
    };
    if !after_begin {
        return false;
    }
    match end_kind {
        EndPointKind::Unbound => true,
        EndPointKind::Inclusive => key <= end_key,
        EndPointKind::Exclusive => key < end_key,
        EndPointKind::PrefixInclusive => match upper_bound_of_prefix(end_key) {
            Some(bound) => key < bound.as_slice(),
            None => true,
        },
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn content_get(&self, tx: &dyn Transaction, key: &[u8]) -> Result<Option<Vec<u8>>, KvsError> {
        let tx = self.downcast(tx)?;
        let state = tx.state.lock().expect("transaction state poisoned");
        if !state.active {
            return Err(KvsError::InactiveTransaction);
        }
        if let Some(writes) = state.write_sets.get(&self.name) {
            if let Some(staged) = writes.get(key) {
                return Ok(staged.clone());
            }
        }
        let data = self.data.read().expect("storage data poisoned");
        Ok(data.get(key).cloned())
    }

    fn content_put(
        &self,
        tx: &dyn Transaction,
        key: &[u8],
        value: &[u8],
        option: PutOption,
    ) -> Result<(), KvsError> {
        let tx = self.downcast(tx)?;
        let mut state = tx.state.lock().expect("transaction state poisoned");
        if !state.active {
            return Err(KvsError::InactiveTransaction);
        }
        tx.check_write_allowed(&mut state, &self.name)?;
        let exists = {
            match state.write_sets.get(&self.name).and_then(|w| w.get(key)) {
                Some(staged) => staged.is_some(),
                None => {
                    let data = self.data.read().expect("storage data poisoned");
                    data.contains_key(key)
                }
            }
        };
        match option {
            PutOption::Create if exists => return Err(KvsError::AlreadyExists),
            PutOption::Update if !exists => return Err(KvsError::NotFound),
            _ => {}
        }
        state
            .write_sets
            .entry(self.name.clone())
            .or_default()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn content_delete(&self, tx: &dyn Transaction, key: &[u8]) -> Result<(), KvsError> {
        let tx = self.downcast(tx)?;
        let mut state = tx.state.lock().expect("transaction state poisoned");
        if !state.active {
            return Err(KvsError::InactiveTransaction);
        }
        tx.check_write_allowed(&mut state, &self.name)?;
        let exists = {
            match state.write_sets.get(&self.name).and_then(|w| w.get(key)) {
                Some(staged) => staged.is_some(),
                None => {
                    let data = self.data.read().expect("storage data poisoned");
                    data.contains_key(key)
                }
            }
        };
        if !exists {
            return Err(KvsError::NotFound);
        }
        state.write_sets.entry(self.name.clone()).or_default().insert(key.to_vec(), None);
        Ok(())
    }

    fn content_scan(
        &self,
        tx: &dyn Transaction,
        begin_key: &[u8],
        begin_kind: EndPointKind,
        end_key: &[u8],
        end_kind: EndPointKind,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Box<dyn KvsIterator + Send>, KvsError> {
        let tx = self.downcast(tx)?;
        let state = tx.state.lock().expect("transaction state poisoned");
        if !state.active {
            return Err(KvsError::InactiveTransaction);
        }
        // snapshot of committed data overlaid with own writes
        let mut merged: KeySpace = {
            let data = self.data.read().expect("storage data poisoned");
            data.iter()
                .filter(|(k, _)| within_range(k, begin_key, begin_kind, end_key, end_kind))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        if let Some(writes) = state.write_sets.get(&self.name) {
            for (k, v) in writes {
                if !within_range(k, begin_key, begin_kind, end_key, end_kind) {
                    continue;
                }
                match v {
                    Some(value) => {
                        merged.insert(k.clone(), value.clone());
                    }
                    None => {
                        merged.remove(k);
                    }
                }
            }
        }
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = merged.into_iter().collect();
        if reverse {
            entries.reverse();
        }
        if let Some(n) = limit {
            entries.truncate(n);
        }
        Ok(Box::new(MemoryIterator { entries, pos: None }))
    }
}

struct MemoryIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
}

impl KvsIterator for MemoryIterator {
    fn next(&mut self) -> Result<bool, KvsError> {
        let next = self.pos.map_or(0, |p| p + 1);
        if next >= self.entries.len() {
            return Ok(false);
        }
        self.pos = Some(next);
        Ok(true)
    }

    fn key(&self) -> &[u8] {
        let pos = self.pos.expect("cursor positioned on an entry");
        &self.entries[pos].0
    }

    fn value(&self) -> &[u8] {
        let pos = self.pos.expect("cursor positioned on an entry");
        &self.entries[pos].1
    }
}
