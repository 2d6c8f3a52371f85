use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// A non-reentrant busy-wait mutual-exclusion lock.
///
/// This is the single serialization primitive for kernel state that is
/// touched from multiple cores, such as the physical page pool. Critical
/// sections must be short and must not attempt to re-acquire the lock;
/// there is no wait queue and no deadlock detection.
///
/// # Guarantees
/// - Mutual exclusion for the protected value.
/// - `Sync` when `T: Send`, so a `static SpinLock<T>` can be shared freely.
/// - The guard releases on drop, including on unwind out of a critical
///   section.
///
/// # Caveats
/// - Does **not** mask interrupts; do not take it from an interrupt handler
///   that can preempt a holder on the same core.
pub struct SpinLock<T> {
    /// `false`: unlocked, `true`: locked.
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}

// Safety: the lock enforces exclusive access; only T: Send may cross cores.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    #[must_use]
    pub const fn new(inner: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinLockGuard { lock: self })
        }
    }

    /// Spin until acquired, then return a guard.
    ///
    /// Uses a test-and-test-and-set loop: the atomic swap is only retried
    /// after a plain read observes the lock free, keeping the cache line
    /// quiet under contention.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Run `f` with exclusive access, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Mutable access when holding `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release publishes the critical section.
        self.lock.locked.store(false, Ordering::Release);
    }
}
