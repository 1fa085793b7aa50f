//! Generic bounded LIFO object pool, used to recycle per-task control blocks.

use parking_lot::Mutex;

/// A type that can be reset to a fresh, reusable state before being handed
/// back out by an [`ObjectPool`].
pub trait Poolable {
    /// Clear all per-use state (closure, result, timestamps, ...) so the
    /// object can be returned to the pool and reused.
    fn reset(&mut self);
}

/// Point-in-time counters for an [`ObjectPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectPoolStats {
    /// Total objects ever constructed by this pool.
    pub total_created: u64,
    /// Objects currently sitting free in the pool.
    pub free: usize,
    /// Objects currently checked out (`total_created - destroyed - free`,
    /// tracked directly rather than derived).
    pub in_use: u64,
    /// Configured maximum number of free objects retained.
    pub max_pool_size: usize,
}

struct Inner<T> {
    free: Vec<T>,
    total_created: u64,
    in_use: u64,
}

/// A bounded last-in-first-out container of reusable `T`s.
///
/// Invariants: `free + in_use <= total_created`; `free <= max_pool_size`.
/// On release, if the pool is full the object is dropped instead of
/// retained. Both operations take a single mutex; the fast path is one
/// mutex acquire and one `Vec::push`/`Vec::pop`.
pub struct ObjectPool<T> {
    max_pool_size: usize,
    inner: Mutex<Inner<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool that starts with `initial` pre-built objects and never
    /// retains more than `max_pool_size` free objects at once.
    pub fn new(initial: usize, max_pool_size: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let free: Vec<T> = (0..initial).map(|_| factory()).collect();
        let total_created = free.len() as u64;
        Self {
            max_pool_size,
            inner: Mutex::new(Inner {
                free,
                total_created,
                in_use: 0,
            }),
            factory: Box::new(factory),
        }
    }

    /// Acquire a free object, constructing a new one if the pool is empty.
    pub fn acquire(&self) -> T {
        let mut inner = self.inner.lock();
        let obj = match inner.free.pop() {
            Some(obj) => obj,
            None => {
                inner.total_created += 1;
                (self.factory)()
            }
        };
        inner.in_use += 1;
        obj
    }

    /// Return an object to the pool. Resets it first; if the pool is
    /// already at `max_pool_size` free objects, the object is dropped
    /// instead of retained.
    pub fn release(&self, mut obj: T) {
        obj.reset();
        let mut inner = self.inner.lock();
        inner.in_use = inner.in_use.saturating_sub(1);
        if inner.free.len() < self.max_pool_size {
            inner.free.push(obj);
        }
        // else: obj is dropped here, destroyed instead of retained.
    }

    /// Current pool counters.
    #[must_use]
    pub fn stats(&self) -> ObjectPoolStats {
        let inner = self.inner.lock();
        ObjectPoolStats {
            total_created: inner.total_created,
            free: inner.free.len(),
            in_use: inner.in_use,
            max_pool_size: self.max_pool_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Block {
        value: u32,
    }

    impl Poolable for Block {
        fn reset(&mut self) {
            self.value = 0;
        }
    }

    #[test]
    fn acquire_then_release_recycles_the_object() {
        let pool = ObjectPool::new(0, 4, Block::default);
        let stats = pool.stats();
        assert_eq!(stats.total_created, 0);

        let mut obj = pool.acquire();
        obj.value = 7;
        assert_eq!(pool.stats().in_use, 1);

        pool.release(obj);
        let stats = pool.stats();
        assert_eq!(stats.free, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total_created, 1);

        let recycled = pool.acquire();
        assert_eq!(recycled.value, 0, "release() must reset state");
    }

    #[test]
    fn overflow_objects_are_destroyed_not_retained() {
        let pool = ObjectPool::new(0, 1, Block::default);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);

        let stats = pool.stats();
        assert_eq!(stats.free, 1, "pool caps at max_pool_size, extra is destroyed");
        assert_eq!(stats.total_created, 2);
    }

    #[test]
    fn invariant_free_plus_in_use_never_exceeds_total_created() {
        let pool = ObjectPool::new(2, 10, Block::default);
        let objs: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        let stats = pool.stats();
        assert!(stats.free as u64 + stats.in_use <= stats.total_created);
        for o in objs {
            pool.release(o);
        }
        let stats = pool.stats();
        assert!(stats.free as u64 + stats.in_use <= stats.total_created);
    }
}
