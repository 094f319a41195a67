//! Reader-writer lock with acquisition diagnostics.
use log::warn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

const SPIN: Duration = Duration::from_millis(1);

/// Writer-preferring `RwLock` that warns when an acquisition stalls.
///
/// Inference holds the read side, variable swaps and training hold the
/// write side. New readers defer while a writer is waiting, so sustained
/// inference traffic cannot starve the training loop. A stalled
/// acquisition usually means one side holds its guard too long, which is
/// a performance bug worth surfacing; it is never an error.
pub struct DiagRwLock<T> {
    inner: RwLock<T>,
    warn_after: Duration,
    writers_waiting: AtomicUsize,
}

impl<T> DiagRwLock<T> {
    /// Wraps `value`, warning when an acquisition takes longer than
    /// `warn_after`.
    pub fn new(value: T, warn_after: Duration) -> Self {
        Self {
            inner: RwLock::new(value),
            warn_after,
            writers_waiting: AtomicUsize::new(0),
        }
    }

    /// Acquires the read side, yielding to waiting writers.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let start = Instant::now();
        let mut warned = false;
        loop {
            if self.writers_waiting.load(Ordering::Acquire) == 0 {
                match self.inner.try_read() {
                    Ok(guard) => return guard,
                    Err(TryLockError::Poisoned(e)) => panic!("Model lock poisoned: {}", e),
                    Err(TryLockError::WouldBlock) => {}
                }
            }
            warned = self.maybe_warn("read", start, warned);
            thread::sleep(SPIN);
        }
    }

    /// Acquires the write side; new readers hold off until it is done.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let start = Instant::now();
        let mut warned = false;
        self.writers_waiting.fetch_add(1, Ordering::AcqRel);
        loop {
            match self.inner.try_write() {
                Ok(guard) => {
                    self.writers_waiting.fetch_sub(1, Ordering::AcqRel);
                    return guard;
                }
                Err(TryLockError::Poisoned(e)) => panic!("Model lock poisoned: {}", e),
                Err(TryLockError::WouldBlock) => {}
            }
            warned = self.maybe_warn("write", start, warned);
            thread::sleep(SPIN);
        }
    }

    fn maybe_warn(&self, side: &str, start: Instant, warned: bool) -> bool {
        if !warned && start.elapsed() > self.warn_after {
            warn!(
                "Acquiring the {} lock has taken more than {:?}",
                side, self.warn_after
            );
            return true;
        }
        warned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_blocked_write_eventually_acquires() {
        let lock = Arc::new(DiagRwLock::new(0u32, Duration::from_millis(5)));

        let reader = {
            let lock = lock.clone();
            thread::spawn(move || {
                let guard = lock.read();
                thread::sleep(Duration::from_millis(30));
                *guard
            })
        };

        // let the reader win the race for the lock
        thread::sleep(Duration::from_millis(5));
        {
            let mut guard = lock.write();
            *guard = 7;
        }
        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(*lock.read(), 7);
    }

    #[test]
    fn test_new_readers_defer_to_waiting_writer() {
        let lock = Arc::new(DiagRwLock::new(0u32, Duration::from_millis(100)));

        let first_read = lock.read();
        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                *lock.write() = 7;
            })
        };
        // let the writer reach its waiting loop
        thread::sleep(Duration::from_millis(10));

        // a reader arriving behind the waiting writer must observe its
        // write, not slip in ahead of it
        let late_reader = {
            let lock = lock.clone();
            thread::spawn(move || *lock.read())
        };
        thread::sleep(Duration::from_millis(10));

        drop(first_read);
        writer.join().unwrap();
        assert_eq!(late_reader.join().unwrap(), 7);
    }
}
