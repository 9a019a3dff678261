//! Reusable scratch-set pool
//!
//! Workers borrow a scratch set for the duration of one row band and give
//! it back on scope exit. Reuse is LIFO so the most recently touched
//! buffers, still warm in cache, go out first. The lock is held only
//! around a stack push or pop.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

pub struct BufferPool<S> {
    stack: Mutex<Vec<S>>,
}

impl<S: Default> BufferPool<S> {
    pub fn new() -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Pop the most recently released set, constructing a fresh one only
    /// when the pool is empty.
    pub fn acquire(&self) -> PoolGuard<'_, S> {
        let set = self.lock().pop().unwrap_or_else(|| {
            log::debug!("scratch pool empty, constructing a new set");
            S::default()
        });
        PoolGuard {
            pool: self,
            set: Some(set),
        }
    }

    /// Number of sets currently parked in the pool.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, set: S) {
        self.lock().push(set);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<S>> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S: Default> Default for BufferPool<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive loan of one scratch set; returns it to the pool on drop.
pub struct PoolGuard<'a, S: Default> {
    pool: &'a BufferPool<S>,
    set: Option<S>,
}

impl<S: Default> Deref for PoolGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.set.as_ref().expect("scratch set taken")
    }
}

impl<S: Default> DerefMut for PoolGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.set.as_mut().expect("scratch set taken")
    }
}

impl<S: Default> Drop for PoolGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            self.pool.release(set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Marked(Vec<u8>);

    #[test]
    fn test_release_on_scope_exit_and_reuse() {
        let pool: BufferPool<Marked> = BufferPool::new();
        {
            let mut g = pool.acquire();
            g.0.push(42);
        }
        assert_eq!(pool.idle(), 1);
        let g = pool.acquire();
        assert_eq!(g.0, vec![42]);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_lifo_order() {
        let pool: BufferPool<Marked> = BufferPool::new();
        let mut a = pool.acquire();
        a.0.push(1);
        let mut b = pool.acquire();
        b.0.push(2);
        drop(a);
        drop(b);
        // b was released last, so it comes back first
        let top = pool.acquire();
        assert_eq!(top.0, vec![2]);
    }

    #[test]
    fn test_concurrent_checkout_constructs_distinct_sets() {
        let pool: BufferPool<Marked> = BufferPool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        assert!(a.0.is_empty() && b.0.is_empty());
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 2);
    }
}
