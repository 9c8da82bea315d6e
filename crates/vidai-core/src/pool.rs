//! Blocking pool of reusable resources.

use crate::queue::BlockingQueue;
use std::ops::{Deref, DerefMut};

/// A set of interchangeable resources handed out one caller at a time.
///
/// `acquire` blocks until a resource is free. After [`destroy`](Self::destroy)
/// blocked and future acquires return `None`.
pub struct ResourcePool<T> {
    resources: BlockingQueue<T>,
}

impl<T> ResourcePool<T> {
    pub fn new() -> Self {
        Self {
            resources: BlockingQueue::new(),
        }
    }

    pub fn add(&self, resource: T) {
        self.resources.push(resource);
    }

    pub fn acquire(&self) -> Option<T> {
        self.resources.pop()
    }

    pub fn try_acquire(&self) -> Option<T> {
        self.resources.try_pop()
    }

    /// Acquire a resource that returns itself to the pool when dropped.
    pub fn acquire_guard(&self) -> Option<PoolGuard<'_, T>> {
        self.acquire().map(|resource| PoolGuard {
            pool: self,
            resource: Some(resource),
        })
    }

    pub fn release(&self, resource: T) {
        self.resources.push(resource);
    }

    /// Whether a resource is free right now.
    pub fn can_acquire(&self) -> bool {
        self.resources.len() > 0
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.len() == 0
    }

    pub fn destroy(&self) {
        self.resources.destroy();
    }

    pub fn initialize(&self) {
        self.resources.initialize();
    }

    pub fn clear(&self) {
        self.resources.clear();
    }
}

impl<T> Default for ResourcePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource checked out of a [`ResourcePool`].
pub struct PoolGuard<'a, T> {
    pool: &'a ResourcePool<T>,
    resource: Option<T>,
}

impl<T> PoolGuard<'_, T> {
    /// Keep the resource instead of returning it to the pool.
    pub fn detach(mut self) -> Option<T> {
        self.resource.take()
    }
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `detach` and `drop` take the resource, and both consume the guard.
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("pool guard used after detach"),
        }
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("pool guard used after detach"),
        }
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        }
    }
}
