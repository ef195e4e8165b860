use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::entry::StorageEntry;

/// Sorted, deduplicated list of storage ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageList(Vec<u64>);

impl StorageList {
    pub fn new(mut ids: Vec<u64>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn add(&mut self, id: u64) {
        if let Err(pos) = self.0.binary_search(&id) {
            self.0.insert(pos, id);
        }
    }

    fn remove(&mut self, id: u64) {
        if let Ok(pos) = self.0.binary_search(&id) {
            self.0.remove(pos);
        }
    }
}

impl From<Vec<u64>> for StorageList {
    fn from(ids: Vec<u64>) -> Self {
        Self::new(ids)
    }
}

impl FromIterator<u64> for StorageList {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Default)]
struct LockState {
    unique_owner: Option<u64>,
    shared_total: usize,
    /// Shared holds created through a unique lock, keyed by its id.
    shared_by_owner: HashMap<u64, usize>,
}

#[derive(Default)]
struct LockTable {
    next_lock_id: u64,
    states: HashMap<u64, LockState>,
}

impl LockTable {
    fn state(&mut self, storage: u64) -> &mut LockState {
        self.states.entry(storage).or_default()
    }
}

/// DML-side lock over a set of storages. Released on drop.
pub struct SharedLock {
    table: Arc<Mutex<LockTable>>,
    storages: StorageList,
    owner: Option<u64>,
}

impl SharedLock {
    pub fn storage(&self) -> &StorageList {
        &self.storages
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        let mut table = self.table.lock().expect("lock table poisoned");
        for id in self.storages.iter() {
            let state = table.state(id);
            state.shared_total = state.shared_total.saturating_sub(1);
            if let Some(owner) = self.owner {
                if let Some(count) = state.shared_by_owner.get_mut(&owner) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        state.shared_by_owner.remove(&owner);
                    }
                }
            }
        }
    }
}

/// DDL-side lock whose storage coverage grows and shrinks during the
/// transaction. Remaining coverage is released on drop.
pub struct UniqueLock {
    table: Arc<Mutex<LockTable>>,
    id: u64,
    storages: StorageList,
}

impl UniqueLock {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn storage(&self) -> &StorageList {
        &self.storages
    }
}

impl Drop for UniqueLock {
    fn drop(&mut self) {
        let mut table = self.table.lock().expect("lock table poisoned");
        for id in self.storages.iter() {
            let state = table.state(id);
            if state.unique_owner == Some(self.id) {
                state.unique_owner = None;
            }
        }
    }
}

struct Registry {
    entries: HashMap<u64, Arc<RwLock<StorageEntry>>>,
    name_index: HashMap<String, u64>,
}

/// Process-wide registry of storage entries with the shared/unique lock
/// protocol coordinating DML against DDL.
pub struct StorageManager {
    registry: RwLock<Registry>,
    locks: Arc<Mutex<LockTable>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                entries: HashMap::new(),
                name_index: HashMap::new(),
            }),
            locks: Arc::new(Mutex::new(LockTable::default())),
        }
    }

    /// Registers a new entry; `false` when the id or name is taken.
    pub fn add_entry(&self, id: u64, name: &str) -> bool {
        self.add_entry_with_key(id, name, None)
    }

    /// Registers an index entry, minting a surrogate storage key when the
    /// deployment enables them.
    pub fn register_storage(&self, id: u64, name: &str, enable_storage_key: bool) -> bool {
        let key = enable_storage_key.then(|| format!("__system_{id}"));
        self.add_entry_with_key(id, name, key)
    }

    pub fn add_entry_with_key(&self, id: u64, name: &str, storage_key: Option<String>) -> bool {
        let mut registry = self.registry.write().expect("registry poisoned");
        if registry.entries.contains_key(&id) || registry.name_index.contains_key(name) {
            return false;
        }
        let entry = Arc::new(RwLock::new(StorageEntry::new(id, name, storage_key)));
        registry.entries.insert(id, entry);
        registry.name_index.insert(name.to_owned(), id);
        debug!(id, name, "registered storage entry");
        true
    }

    /// Unregisters an entry; `false` when absent.
    pub fn remove_entry(&self, id: u64) -> bool {
        let mut registry = self.registry.write().expect("registry poisoned");
        let Some(entry) = registry.entries.remove(&id) else {
            return false;
        };
        let name = entry.read().expect("entry poisoned").name().to_owned();
        registry.name_index.remove(&name);
        true
    }

    pub fn find_entry(&self, id: u64) -> Option<Arc<RwLock<StorageEntry>>> {
        let registry = self.registry.read().expect("registry poisoned");
        registry.entries.get(&id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<u64> {
        let registry = self.registry.read().expect("registry poisoned");
        registry.name_index.get(name).copied()
    }

    pub fn size(&self) -> usize {
        self.registry.read().expect("registry poisoned").entries.len()
    }

    /// Takes a shared lock over `storages`.
    ///
    /// Granted unless some storage is covered by a unique lock other than
    /// `owner`; a shared lock created through its own unique lock always
    /// succeeds.
    pub fn create_shared_lock(
        &self,
        storages: &StorageList,
        owner: Option<&UniqueLock>,
    ) -> Option<SharedLock> {
        let mut table = self.locks.lock().expect("lock table poisoned");
        let owner_id = owner.map(UniqueLock::id);
        for id in storages.iter() {
            if let Some(holder) = table.state(id).unique_owner {
                if Some(holder) != owner_id {
                    debug!(storage = id, "shared lock blocked by unique lock");
                    return None;
                }
            }
        }
        for id in storages.iter() {
            let state = table.state(id);
            state.shared_total += 1;
            if let Some(o) = owner_id {
                *state.shared_by_owner.entry(o).or_insert(0) += 1;
            }
        }
        Some(SharedLock {
            table: Arc::clone(&self.locks),
            storages: storages.clone(),
            owner: owner_id,
        })
    }

    /// Creates a unique lock covering no storage yet.
    pub fn create_unique_lock(&self) -> UniqueLock {
        let mut table = self.locks.lock().expect("lock table poisoned");
        table.next_lock_id += 1;
        let id = table.next_lock_id;
        UniqueLock { table: Arc::clone(&self.locks), id, storages: StorageList::default() }
    }

    /// Atomically extends `lock` to also cover `storages`.
    ///
    /// Fails when any of them is shared-locked by another owner or uniquely
    /// held by another lock; already covered storages are fine.
    pub fn add_locked_storages(&self, storages: &StorageList, lock: &mut UniqueLock) -> bool {
        let mut table = self.locks.lock().expect("lock table poisoned");
        for id in storages.iter() {
            let state = table.state(id);
            if let Some(holder) = state.unique_owner {
                if holder != lock.id {
                    return false;
                }
            }
            let own_shared = state.shared_by_owner.get(&lock.id).copied().unwrap_or(0);
            if state.shared_total > own_shared {
                debug!(storage = id, "unique lock blocked by shared locks");
                return false;
            }
        }
        for id in storages.iter() {
            table.state(id).unique_owner = Some(lock.id);
            lock.storages.add(id);
        }
        true
    }

    /// Releases part of the coverage of `lock`.
    pub fn remove_locked_storages(&self, storages: &StorageList, lock: &mut UniqueLock) {
        let mut table = self.locks.lock().expect("lock table poisoned");
        for id in storages.iter() {
            if !lock.storages.contains(id) {
                continue;
            }
            let state = table.state(id);
            if state.unique_owner == Some(lock.id) {
                state.unique_owner = None;
            }
            lock.storages.remove(id);
        }
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicates() {
        let mgr = StorageManager::new();
        assert_eq!(mgr.size(), 0);
        assert!(mgr.add_entry(1, "T1"));
        assert_eq!(mgr.size(), 1);
        assert!(mgr.add_entry(2, "T2"));
        assert_eq!(mgr.size(), 2);
        assert!(!mgr.add_entry(1, "T1"));
        assert!(!mgr.add_entry(2, "T2"));
    }

    #[test]
    fn register_storage_mints_surrogate_keys() {
        let mgr = StorageManager::new();
        assert!(mgr.register_storage(1, "T1", true));
        assert!(mgr.register_storage(2, "T2", false));
        let with_key = mgr.find_entry(1).unwrap();
        assert_eq!(with_key.read().unwrap().storage_key(), Some("__system_1"));
        let without = mgr.find_entry(2).unwrap();
        assert_eq!(without.read().unwrap().storage_key(), None);
    }

    #[test]
    fn find_by_id_and_name() {
        let mgr = StorageManager::new();
        assert!(mgr.add_entry(1, "T1"));
        assert!(mgr.add_entry(2, "T2"));
        assert!(mgr.find_entry(1).is_some());
        assert!(mgr.find_entry(2).is_some());
        assert!(mgr.find_entry(3).is_none());
        assert_eq!(mgr.find_by_name("T1"), Some(1));
        assert_eq!(mgr.find_by_name("T2"), Some(2));
        assert_eq!(mgr.find_by_name("T3"), None);
    }

    #[test]
    fn remove_unregisters_the_name() {
        let mgr = StorageManager::new();
        assert!(mgr.add_entry(1, "T1"));
        assert!(mgr.add_entry(2, "T2"));
        assert!(mgr.remove_entry(1));
        assert_eq!(mgr.size(), 1);
        assert!(mgr.find_entry(1).is_none());
        assert_eq!(mgr.find_by_name("T1"), None);
        assert!(!mgr.remove_entry(3));
    }

    #[test]
    fn shared_and_unique_lock_lifecycle() {
        let mgr = StorageManager::new();
        mgr.add_entry(1, "T1");
        mgr.add_entry(2, "T2");
        let stgs = StorageList::from(vec![1, 2]);
        {
            let sl = mgr.create_shared_lock(&stgs, None);
            assert!(sl.is_some());
            assert_eq!(sl.unwrap().storage(), &stgs);
        }
        {
            let mut ul = mgr.create_unique_lock();
            assert!(ul.storage().is_empty());
            assert!(mgr.add_locked_storages(&stgs, &mut ul));
            assert_eq!(ul.storage(), &stgs);
        }
        {
            let mut ul = mgr.create_unique_lock();
            assert!(mgr.add_locked_storages(&stgs, &mut ul));
            mgr.remove_locked_storages(&StorageList::from(vec![1]), &mut ul);
            assert_eq!(ul.storage(), &StorageList::from(vec![2]));
            mgr.remove_locked_storages(&StorageList::from(vec![2]), &mut ul);
            assert!(ul.storage().is_empty());
        }
    }

    #[test]
    fn multiple_shared_locks_coexist() {
        let mgr = StorageManager::new();
        mgr.add_entry(1, "T1");
        let stgs = StorageList::from(vec![1]);
        let a = mgr.create_shared_lock(&stgs, None);
        let b = mgr.create_shared_lock(&stgs, None);
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[test]
    fn unique_lock_blocks_shared_until_released() {
        let mgr = StorageManager::new();
        mgr.add_entry(1, "T1");
        let stgs = StorageList::from(vec![1]);
        let mut ul = mgr.create_unique_lock();
        assert!(mgr.add_locked_storages(&stgs, &mut ul));
        assert!(mgr.create_shared_lock(&stgs, None).is_none());
        drop(ul);
        assert!(mgr.create_shared_lock(&stgs, None).is_some());
    }

    #[test]
    fn shared_lock_blocks_unique_until_released() {
        let mgr = StorageManager::new();
        mgr.add_entry(1, "T1");
        let stgs = StorageList::from(vec![1]);
        let sl = mgr.create_shared_lock(&stgs, None).unwrap();
        let mut ul = mgr.create_unique_lock();
        assert!(!mgr.add_locked_storages(&stgs, &mut ul));
        drop(sl);
        assert!(mgr.add_locked_storages(&stgs, &mut ul));
    }

    #[test]
    fn shared_lock_through_own_unique_lock_is_granted() {
        let mgr = StorageManager::new();
        mgr.add_entry(1, "T1");
        let stgs = StorageList::from(vec![1]);
        let mut ul = mgr.create_unique_lock();
        assert!(mgr.add_locked_storages(&stgs, &mut ul));
        // DML inside the DDL transaction
        let sl = mgr.create_shared_lock(&stgs, Some(&ul));
        assert!(sl.is_some());
        // a foreign unique lock still cannot take it over
        let mut other = mgr.create_unique_lock();
        assert!(!mgr.add_locked_storages(&stgs, &mut other));
        // own shared locks do not block growing the own cover again
        assert!(mgr.add_locked_storages(&stgs, &mut ul));
    }

    #[test]
    fn adding_covered_storage_again_is_idempotent() {
        let mgr = StorageManager::new();
        mgr.add_entry(1, "T1");
        mgr.add_entry(2, "T2");
        let mut ul = mgr.create_unique_lock();
        assert!(mgr.add_locked_storages(&StorageList::from(vec![1]), &mut ul));
        assert!(mgr.add_locked_storages(&StorageList::from(vec![2]), &mut ul));
        assert!(mgr.add_locked_storages(&StorageList::from(vec![1]), &mut ul));
        assert_eq!(ul.storage(), &StorageList::from(vec![1, 2]));
    }
}
