//! Bounded pool of pre-established resources with scoped leasing.
//!
//! Workers share one `ResourcePool` through an `Arc`. A [`Lease`] grants
//! exclusive use of one resource and returns it when dropped, so a resource
//! can never be released twice and every exit path (including unwinding)
//! gives it back.
//!
//! | Operation            | Behaviour when empty                  |
//! |----------------------|---------------------------------------|
//! | `acquire()`          | blocks until a lease is released      |
//! | `try_acquire()`      | fails with `PoolExhausted`            |
//! | `acquire_timeout(d)` | waits up to `d`, then `PoolExhausted` |

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{EtudeError, EtudeResult};

pub struct ResourcePool<R> {
    available: Mutex<Vec<R>>,
    returned: Condvar,
    size: usize,
}

impl<R> ResourcePool<R> {
    /// Build a pool from already-established resources. The pool never grows.
    pub fn new(resources: Vec<R>) -> EtudeResult<Self> {
        if resources.is_empty() {
            return Err(EtudeError::Config("resource pool needs at least one resource".into()));
        }
        Ok(Self {
            size: resources.len(),
            available: Mutex::new(resources),
            returned: Condvar::new(),
        })
    }

    /// Establish `size` resources with `connect`, failing on the first error.
    pub fn connect<E>(size: usize, mut connect: impl FnMut() -> Result<R, E>) -> Result<Self, E>
    where
        E: From<EtudeError>,
    {
        let mut resources = Vec::with_capacity(size);
        for _ in 0..size {
            resources.push(connect()?);
        }
        Ok(Self::new(resources)?)
    }

    /// Block until a resource is free.
    pub fn acquire(&self) -> Lease<'_, R> {
        let mut available = self.available.lock();
        loop {
            if let Some(resource) = available.pop() {
                return self.lease(resource);
            }
            self.returned.wait(&mut available);
        }
    }

    pub fn try_acquire(&self) -> EtudeResult<Lease<'_, R>> {
        let resource = self.available.lock().pop().ok_or(EtudeError::PoolExhausted)?;
        Ok(self.lease(resource))
    }

    /// Wait at most `timeout` for a resource.
    pub fn acquire_timeout(&self, timeout: Duration) -> EtudeResult<Lease<'_, R>> {
        let deadline = Instant::now() + timeout;
        let mut available = self.available.lock();
        loop {
            if let Some(resource) = available.pop() {
                return Ok(self.lease(resource));
            }
            if self.returned.wait_until(&mut available, deadline).timed_out() {
                // A release may have raced the timeout.
                return available
                    .pop()
                    .map(|resource| self.lease(resource))
                    .ok_or(EtudeError::PoolExhausted);
            }
        }
    }

    /// Number of resources not currently leased.
    pub fn available(&self) -> usize {
        self.available.lock().len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn lease(&self, resource: R) -> Lease<'_, R> {
        Lease {
            pool: self,
            resource: Some(resource),
        }
    }

    fn give_back(&self, resource: R) {
        self.available.lock().push(resource);
        self.returned.notify_one();
    }
}

/// Exclusive use of one pooled resource.
pub struct Lease<'a, R> {
    pool: &'a ResourcePool<R>,
    // Only `None` while being returned in `drop`.
    resource: Option<R>,
}

impl<R> Lease<'_, R> {
    /// Return the resource now instead of at end of scope.
    pub fn release(self) {}
}

impl<R> Deref for Lease<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<R> DerefMut for Lease<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<R> Drop for Lease<'_, R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.give_back(resource);
        }
    }
}
