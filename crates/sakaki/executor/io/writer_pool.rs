use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

/// Admission token for one emit-bearing task. Returned to the pool on drop.
pub struct WriterSeat {
    pool: Arc<WriterPool>,
}

impl Drop for WriterSeat {
    fn drop(&mut self) {
        self.pool.release_one();
    }
}

struct PoolState {
    in_use: usize,
    /// Flags of sleeping tasks waiting for a seat; flipped on release.
    waiters: Vec<Arc<AtomicBool>>,
}

/// Bounded pool gating how many tasks may buffer results concurrently.
pub struct WriterPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl WriterPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "writer pool needs at least one seat");
        Arc::new(Self {
            capacity,
            state: Mutex::new(PoolState { in_use: 0, waiters: Vec::new() }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().expect("writer pool poisoned").in_use
    }

    /// Non-blocking seat acquisition.
    pub fn acquire(self: &Arc<Self>) -> Option<WriterSeat> {
        let mut state = self.state.lock().expect("writer pool poisoned");
        if state.in_use >= self.capacity {
            return None;
        }
        state.in_use += 1;
        trace!(in_use = state.in_use, capacity = self.capacity, "writer seat acquired");
        Some(WriterSeat { pool: Arc::clone(self) })
    }

    /// Acquires a seat or registers `waker` to be flipped when one frees.
    pub fn acquire_or_wait(self: &Arc<Self>, waker: &Arc<AtomicBool>) -> Option<WriterSeat> {
        let mut state = self.state.lock().expect("writer pool poisoned");
        if state.in_use < self.capacity {
            state.in_use += 1;
            return Some(WriterSeat { pool: Arc::clone(self) });
        }
        waker.store(false, Ordering::Release);
        state.waiters.push(Arc::clone(waker));
        None
    }

    fn release_one(&self) {
        let mut state = self.state.lock().expect("writer pool poisoned");
        state.in_use = state.in_use.saturating_sub(1);
        if let Some(waiter) = state.waiters.pop() {
            waiter.store(true, Ordering::Release);
        }
        trace!(in_use = state.in_use, "writer seat released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_bounds_acquisition() {
        let pool = WriterPool::new(2);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.in_use(), 2);
        drop(a);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn waiter_is_woken_on_release() {
        let pool = WriterPool::new(1);
        let seat = pool.acquire().unwrap();
        let waker = Arc::new(AtomicBool::new(false));
        assert!(pool.acquire_or_wait(&waker).is_none());
        assert!(!waker.load(Ordering::Acquire));
        drop(seat);
        assert!(waker.load(Ordering::Acquire));
        assert!(pool.acquire().is_some());
    }
}
