//! Generic bounded connection pool.
//!
//! A pool of reusable clients `T`, built from an async factory, bounded by a semaphore so
//! `Get` blocks rather than grows unbounded, with idle eviction and explicit close
//! semantics. Grounded on [`crate::backend`]'s `Semaphore`-bounded concurrency idiom,
//! generalized from "one semaphore gating concurrent backend calls" to "a semaphore
//! gating how many clients may exist at once".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::{Error, Result};

/// An async factory that produces a new client `T`, or fails with a string reason that
/// becomes [`Error::PoolFactory`].
pub type Factory<T> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = std::result::Result<T, String>> + Send>> + Send + Sync>;

struct Idle<T> {
    value: T,
    returned_at: Instant,
}

struct Inner<T> {
    idle: Mutex<Vec<Idle<T>>>,
    factory: Factory<T>,
    semaphore: Semaphore,
    max_idle: usize,
    idle_timeout: Duration,
    closed: std::sync::atomic::AtomicBool,
    close_notify: Notify,
}

/// A bounded pool of reusable clients.
///
/// Invariants (§3/§4.4): `idle.len() <= max_idle`; after [`ConnectionPool::close`], every
/// `get` fails and every in-flight blocked `get` wakes with [`Error::PoolClosed`]; clients
/// returned via [`ConnectionPool::put`] after close are dropped rather than pooled.
pub struct ConnectionPool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A client checked out of the pool. Dropping it without calling [`PooledClient::release`]
/// still returns it to the pool (or discards it if the pool closed meanwhile), matching
/// the teacher's "always `Put` the client back, even on failure" rule in §4.2.3.
pub struct PooledClient<T> {
    value: Option<T>,
    pool: ConnectionPool<T>,
}

impl<T> std::ops::Deref for PooledClient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("PooledClient value taken twice")
    }
}

impl<T> std::ops::DerefMut for PooledClient<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("PooledClient value taken twice")
    }
}

impl<T> PooledClient<T> {
    /// Explicitly return the client to the pool now, rather than on drop.
    pub fn release(mut self) {
        if let Some(v) = self.value.take() {
            self.pool.put(v);
        }
    }
}

impl<T> Drop for PooledClient<T> {
    fn drop(&mut self) {
        if let Some(v) = self.value.take() {
            self.pool.put(v);
        }
    }
}

impl<T: Send + 'static> ConnectionPool<T> {
    /// Build a pool. `max_size` bounds the number of clients that may exist at once
    /// (checked out or idle); `max_idle` bounds how many idle clients are retained for
    /// reuse; `idle_timeout` evicts idle clients older than that on the next `get`.
    #[must_use]
    pub fn new(factory: Factory<T>, max_size: usize, max_idle: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(Vec::new()),
                factory,
                semaphore: Semaphore::new(max_size),
                max_idle,
                idle_timeout,
                closed: std::sync::atomic::AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        }
    }

    /// Acquire a client, reusing an idle one if available and not expired, otherwise
    /// invoking the factory. Blocks (honoring `timeout`) when the pool is at `max_size`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] if the pool is closed (or closes while waiting) and
    /// [`Error::PoolFactory`] if a new client could not be constructed.
    pub async fn get(&self, timeout: Duration) -> Result<PooledClient<T>> {
        if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let permit = tokio::select! {
            biased;
            () = self.inner.close_notify.notified() => return Err(Error::PoolClosed),
            acquired = tokio::time::timeout(timeout, self.inner.semaphore.acquire()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(Error::PoolClosed),
                    Err(_) => return Err(Error::PoolFactory("timed out waiting for pool slot".to_string())),
                }
            }
        };
        permit.forget();

        if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
            self.inner.semaphore.add_permits(1);
            return Err(Error::PoolClosed);
        }

        let now = Instant::now();
        let reused = {
            let mut idle = self.inner.idle.lock();
            idle.retain(|c| now.duration_since(c.returned_at) < self.inner.idle_timeout);
            idle.pop()
        };

        let value = if let Some(idle) = reused {
            idle.value
        } else {
            match (self.inner.factory)().await {
                Ok(v) => v,
                Err(e) => {
                    self.inner.semaphore.add_permits(1);
                    return Err(Error::PoolFactory(e));
                }
            }
        };

        Ok(PooledClient {
            value: Some(value),
            pool: self.clone(),
        })
    }

    /// Return a client to the idle list, or drop it if the pool is closed or already at
    /// `max_idle`. Non-blocking, per §5.
    pub fn put(&self, value: T) {
        self.inner.semaphore.add_permits(1);
        if self.inner.closed.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        let mut idle = self.inner.idle.lock();
        if idle.len() < self.inner.max_idle {
            idle.push(Idle {
                value,
                returned_at: Instant::now(),
            });
        }
    }

    /// Close the pool. Idempotent; wakes every blocked `get` with [`Error::PoolClosed`]
    /// and drops all currently-idle clients.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        self.inner.idle.lock().clear();
        self.inner.close_notify.notify_waiters();
    }

    /// Number of idle clients currently retained.
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Whether [`ConnectionPool::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}
