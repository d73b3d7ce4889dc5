//! The guarded resource and its writer-priority admission protocol.
//!
//! Two primitives protect the state:
//! * The *guard*, a mutex over [`Counters`] paired with the `may_read` and
//!   `may_write` condition variables.
//! * The *exclusive resource lock*, a mutex over the value itself which
//!   serializes writers against each other.
//!
//! Lock order: the guard is never held while acquiring the exclusive resource
//! lock. A writer releases the guard before it locks the resource, and while
//! holding the resource it only takes the guard briefly for defensive checks.
//! No other nesting exists, so the two locks cannot deadlock.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::event::{Clock, Snapshot};

/// Admission counters protected by the guard.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Readers inside the read critical section.
    pub active_readers: usize,
    /// Writers which declared intent and wait for active readers to leave.
    pub waiting_writers: usize,
    /// Writers released from the reader wait which have not exited yet.
    pub admitted_writers: usize,
    /// Largest value `active_readers` has reached.
    pub max_concurrent_readers: usize,
}

impl Counters {
    /// Test if any writer has declared intent and not exited yet. New readers
    /// are held back while this is true.
    #[inline]
    pub fn writers_pending(&self) -> bool {
        self.waiting_writers + self.admitted_writers > 0
    }
}

/// The shared value and the primitives guarding it.
pub struct SharedState {
    guard: Mutex<Counters>,
    may_read: Condvar,
    may_write: Condvar,
    resource: Mutex<u64>,
    // Last value written, readable without the exclusive resource lock.
    published: AtomicU64,
}

impl SharedState {
    /// Construct a new state holding `value`.
    pub fn new(value: u64) -> Self {
        Self {
            guard: Mutex::new(Counters::default()),
            may_read: Condvar::new(),
            may_write: Condvar::new(),
            resource: Mutex::new(value),
            published: AtomicU64::new(value),
        }
    }

    /// Enter the read critical section, blocking while writers are pending.
    #[inline]
    pub fn enter_read(&self) -> ReadGuard<'_> {
        self.enter_read_with(|_| {})
    }

    /// Enter the read critical section.
    ///
    /// If the reader has to wait, `on_wait` is called once with the guard held
    /// before suspending.
    pub fn enter_read_with<F>(&self, on_wait: F) -> ReadGuard<'_>
    where
        F: FnOnce(&Counters),
    {
        let mut counters = self.guard.lock();
        let mut on_wait = Some(on_wait);

        // Woken readers race each other and newly arriving writers, so the
        // condition is rechecked after every wake.
        while counters.writers_pending() {
            if let Some(on_wait) = on_wait.take() {
                on_wait(&*counters);
            }

            self.may_read.wait(&mut counters);
        }

        counters.active_readers += 1;
        counters.max_concurrent_readers = counters
            .max_concurrent_readers
            .max(counters.active_readers);

        ReadGuard {
            state: self,
            active_readers: counters.active_readers,
        }
    }

    /// Enter the write critical section, blocking until every active reader
    /// has left and the exclusive resource lock is acquired.
    #[inline]
    pub fn enter_write(&self) -> Result<WriteGuard<'_>> {
        self.enter_write_with(|_| {})
    }

    /// Enter the write critical section.
    ///
    /// `on_declare` is called with the guard held right after the writer has
    /// been counted as waiting.
    pub fn enter_write_with<F>(&self, on_declare: F) -> Result<WriteGuard<'_>>
    where
        F: FnOnce(&Counters),
    {
        let mut counters = self.guard.lock();
        counters.waiting_writers += 1;
        on_declare(&*counters);

        while counters.active_readers > 0 {
            self.may_write.wait(&mut counters);
        }

        counters.waiting_writers -= 1;
        counters.admitted_writers += 1;
        drop(counters);

        let guard = WriteGuard {
            state: self,
            resource: Some(self.resource.lock()),
        };

        // Dropping the guard on failure releases the admission again.
        self.check_exclusive("writer acquired exclusive access while readers are active")?;
        Ok(guard)
    }

    /// Leave the read critical section, returning the remaining number of
    /// active readers.
    fn exit_read(&self) -> Result<usize> {
        let mut counters = self.guard.lock();

        if counters.active_readers == 0 {
            return Err(self.violation("reader exited without being active", &*counters));
        }

        counters.active_readers -= 1;

        // Every waiting writer is released, the exclusive resource lock then
        // serializes them.
        if counters.active_readers == 0 {
            self.may_write.notify_all();
        }

        Ok(counters.active_readers)
    }

    /// Release the admission of a writer whose exclusive resource lock has
    /// already been dropped.
    fn exit_write(&self) -> Counters {
        let mut counters = self.guard.lock();
        counters.admitted_writers = counters.admitted_writers.saturating_sub(1);
        self.may_read.notify_all();
        *counters
    }

    /// Sample the state into a snapshot timestamped by `clock`.
    pub fn sample(&self, clock: &Clock) -> Snapshot {
        let counters = self.guard.lock();

        Snapshot {
            timestamp: clock.now(),
            active_readers: counters.active_readers,
            waiting_writers: counters.waiting_writers,
            admitted_writers: counters.admitted_writers,
            value: self.value(),
        }
    }

    /// A copy of the current counters.
    pub fn counters(&self) -> Counters {
        *self.guard.lock()
    }

    /// The last value written.
    #[inline]
    pub fn value(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Must only be called while holding the exclusive resource lock.
    fn check_exclusive(&self, what: &'static str) -> Result<()> {
        let counters = self.guard.lock();

        if counters.active_readers > 0 {
            return Err(self.violation(what, &*counters));
        }

        Ok(())
    }

    fn violation(&self, what: &'static str, counters: &Counters) -> Error {
        Error::InvariantViolation {
            what,
            active_readers: counters.active_readers,
            waiting_writers: counters.waiting_writers,
            value: self.value(),
        }
    }
}

impl Default for SharedState {
    #[inline]
    fn default() -> Self {
        Self::new(0)
    }
}

/// Shared access to the state, held by an active reader.
///
/// Dropping the guard leaves the read critical section.
pub struct ReadGuard<'a> {
    state: &'a SharedState,
    active_readers: usize,
}

impl ReadGuard<'_> {
    /// Number of active readers right after this reader entered.
    pub fn active_readers(&self) -> usize {
        self.active_readers
    }

    /// The value visible to this reader.
    pub fn value(&self) -> u64 {
        self.state.value()
    }

    /// Leave the read critical section, returning the remaining number of
    /// active readers.
    pub fn exit(self) -> Result<usize> {
        let this = ManuallyDrop::new(self);
        this.state.exit_read()
    }
}

impl Drop for ReadGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        if let Err(error) = self.state.exit_read() {
            tracing::error!(%error, "failed to leave read section");
        }
    }
}

/// Exclusive access to the state, held by a writer.
///
/// Dropping the guard releases the exclusive resource lock first, and then
/// wakes every reader waiting for admission.
pub struct WriteGuard<'a> {
    state: &'a SharedState,
    resource: Option<MutexGuard<'a, u64>>,
}

impl WriteGuard<'_> {
    /// Apply `f` to the value under exclusive access, returning the old and
    /// the new value.
    pub fn apply<F>(&mut self, f: F) -> Result<(u64, u64)>
    where
        F: FnOnce(u64) -> u64,
    {
        self.state
            .check_exclusive("writer mutating the value while readers are active")?;

        let Some(resource) = self.resource.as_mut() else {
            unreachable!("resource is only released on exit");
        };

        let old = **resource;
        let new = f(old);
        **resource = new;
        self.state.published.store(new, Ordering::Release);
        Ok((old, new))
    }

    /// Leave the write critical section, returning the counters as they were
    /// right after the admission was released.
    pub fn exit(self) -> Counters {
        let mut this = ManuallyDrop::new(self);
        drop(this.resource.take());
        this.state.exit_write()
    }
}

impl Deref for WriteGuard<'_> {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match &self.resource {
            Some(resource) => &**resource,
            None => unreachable!("resource is only released on exit"),
        }
    }
}

impl Drop for WriteGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        drop(self.resource.take());
        self.state.exit_write();
    }
}
