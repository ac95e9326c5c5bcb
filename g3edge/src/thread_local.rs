/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use log::debug;

/// Per thread state shared by a connection handler and every connection
/// accepted on that thread.
#[derive(Debug)]
pub struct ThreadContext {
    id: u64,
    name: String,
    worker_id: Option<usize>,
    is_main: bool,
}

impl ThreadContext {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.is_main
    }
}

/// Registry of all threads that hold a [`ThreadContext`].
#[derive(Default)]
pub struct ThreadLocalRegistry {
    next_id: AtomicU64,
    threads: Mutex<HashMap<u64, String>>,
    shutdown: AtomicBool,
}

impl ThreadLocalRegistry {
    pub fn new() -> Self {
        ThreadLocalRegistry::default()
    }

    fn threads(&self) -> MutexGuard<'_, HashMap<u64, String>> {
        self.threads.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_thread(
        &self,
        name: &str,
        worker_id: Option<usize>,
        is_main: bool,
    ) -> anyhow::Result<Arc<ThreadContext>> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(anyhow!(
                "unable to register thread {name} after global shutdown"
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.threads().insert(id, name.to_string());
        debug!("registered thread context {name}#{id}");
        Ok(Arc::new(ThreadContext {
            id,
            name: name.to_string(),
            worker_id,
            is_main,
        }))
    }

    /// Tear down the thread context.
    ///
    /// # Panics
    ///
    /// Panics if the context is still shared, i.e. some connection or task
    /// on that thread outlived its owner.
    pub fn shutdown_thread(&self, ctx: Arc<ThreadContext>) {
        let ctx = match Arc::try_unwrap(ctx) {
            Ok(ctx) => ctx,
            Err(ctx) => panic!(
                "thread context {}#{} is still referenced by {} owners at shutdown",
                ctx.name,
                ctx.id,
                Arc::strong_count(&ctx) - 1
            ),
        };
        if self.threads().remove(&ctx.id).is_none() {
            panic!("thread context {}#{} is not registered", ctx.name, ctx.id);
        }
        debug!("shutdown thread context {}#{}", ctx.name, ctx.id);
    }

    /// Refuse any new registration.
    pub fn shutdown_global_threading(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn registered_count(&self) -> usize {
        self.threads().len()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.threads().values().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_shutdown() {
        let registry = ThreadLocalRegistry::new();
        let a = registry.register_thread("worker#0", Some(0), false).unwrap();
        let b = registry.register_thread("main", None, true).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.worker_id(), Some(0));
        assert!(b.is_main());
        assert_eq!(registry.registered_names(), vec!["main", "worker#0"]);

        registry.shutdown_thread(a);
        assert_eq!(registry.registered_count(), 1);

        registry.shutdown_global_threading();
        assert!(registry.register_thread("worker#1", Some(1), false).is_err());
        registry.shutdown_thread(b);
        assert_eq!(registry.registered_count(), 0);
    }

    #[test]
    #[should_panic(expected = "still referenced")]
    fn shutdown_shared() {
        let registry = ThreadLocalRegistry::new();
        let a = registry.register_thread("worker#0", Some(0), false).unwrap();
        let _conn = a.clone();
        registry.shutdown_thread(a);
    }
}
