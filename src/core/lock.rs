//! Reentrant Bus Lock
//!
//! One process-wide lock serializes every transport operation and registry
//! mutation. It is reentrant per thread: a poll cycle holding the lock may
//! run a handler that dispatches an event, which takes the lock again.
//!
//! Holding the lock and borrowing the protected value are separate steps.
//! [`BusLock::hold`] keeps the lock for a whole cycle without borrowing;
//! [`BusLock::with`] borrows mutably for the duration of a closure. Nested
//! `with` calls on the same thread are a logic error and panic.

use std::cell::RefCell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Guard that keeps the lock held by the current thread.
pub type BusHold<'a, T> = ReentrantMutexGuard<'a, RefCell<T>>;

/// Owner-aware recursive lock around a value.
#[derive(Debug)]
pub struct BusLock<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T> BusLock<T> {
    /// Wrap a value.
    pub fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(value)),
        }
    }

    /// Acquire (or re-acquire) the lock without borrowing the value.
    pub fn hold(&self) -> BusHold<'_, T> {
        self.inner.lock()
    }

    /// Try to acquire without blocking. Succeeds if free or already ours.
    pub fn try_hold(&self) -> Option<BusHold<'_, T>> {
        self.inner.try_lock()
    }

    /// Run `f` with exclusive access to the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let guard = self.inner.lock();
        let mut value = guard.borrow_mut();
        f(&mut value)
    }

    /// Whether some thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_hold() {
        let lock = BusLock::new(0u32);
        let _outer = lock.hold();
        let _inner = lock.hold();
        lock.with(|v| *v += 1);
        // Still ours after the nested with
        assert!(lock.try_hold().is_some());
        assert_eq!(lock.with(|v| *v), 1);
    }

    #[test]
    fn test_other_thread_blocked_while_held() {
        let lock = Arc::new(BusLock::new(Vec::<u8>::new()));
        let guard = lock.hold();

        let other = Arc::clone(&lock);
        let blocked = std::thread::spawn(move || other.try_hold().is_none())
            .join()
            .unwrap();
        assert!(blocked);

        drop(guard);
        let other = Arc::clone(&lock);
        let acquired = std::thread::spawn(move || other.try_hold().is_some())
            .join()
            .unwrap();
        assert!(acquired);
    }

    #[test]
    fn test_with_is_serialized() {
        let lock = Arc::new(BusLock::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        lock.with(|v| *v += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(lock.with(|v| *v), 4000);
    }
}
