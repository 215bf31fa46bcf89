//! Save concurrency primitives
//!
//! - `CancelToken`: shared flag checked by partition workers on every row
//! - `TokenPool`: bounds the number of partitions saved at once
//! - `SaveContext`: the per-call parameters of `Driver::save`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Cancellation signal shared by everything working for one save.
///
/// A child token is cancelled when it or any ancestor is.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled together with `self`, whose own cancellation does
    /// not reach `self`
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.parent
            .as_ref()
            .map(|p| p.is_cancelled())
            .unwrap_or(false)
    }
}

/// Counting semaphore handing out at most `size` tokens
#[derive(Debug)]
pub struct TokenPool {
    available: Mutex<usize>,
    released: Condvar,
}

impl TokenPool {
    pub fn new(size: usize) -> Self {
        Self {
            available: Mutex::new(size.max(1)),
            released: Condvar::new(),
        }
    }

    /// Blocks until a token is free
    pub fn acquire(&self) -> PoolToken<'_> {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *available -= 1;
        PoolToken { pool: self }
    }

    fn release(&self) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *available += 1;
        self.released.notify_one();
    }
}

/// Returns its token to the pool on drop
#[derive(Debug)]
pub struct PoolToken<'a> {
    pool: &'a TokenPool,
}

impl Drop for PoolToken<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// Parameters of one `Driver::save` call
#[derive(Debug, Clone, Default)]
pub struct SaveContext {
    /// Cancelling it stops the save; the index stays marked as processing
    pub cancel: CancelToken,
    /// Partitions saved at once, overriding the driver setting
    pub threads: Option<usize>,
}

impl SaveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
