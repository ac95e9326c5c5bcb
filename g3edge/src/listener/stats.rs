/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicIsize, AtomicU64, Ordering};

use super::ProxyProtocolReadError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSnapshot {
    pub accepted: u64,
    pub active: i64,
    pub dropped: u64,
    pub timeout: u64,
    pub failed: u64,
    pub verify_failed: u64,
}

/// Counters of one listener, shared by all workers.
#[derive(Debug)]
pub struct ListenerStats {
    name: String,

    runtime_count: AtomicIsize,
    accepted: AtomicU64,
    active: AtomicI64,
    dropped: AtomicU64,
    timeout: AtomicU64,
    failed: AtomicU64,
    verify_failed: AtomicU64,
}

impl ListenerStats {
    pub fn new(name: &str) -> Self {
        ListenerStats {
            name: name.to_string(),
            runtime_count: AtomicIsize::new(0),
            accepted: AtomicU64::new(0),
            active: AtomicI64::new(0),
            dropped: AtomicU64::new(0),
            timeout: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            verify_failed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn add_running_runtime(self: &Arc<Self>) -> ListenAliveGuard {
        self.runtime_count.fetch_add(1, Ordering::Relaxed);
        ListenAliveGuard(self.clone())
    }

    pub fn running_runtime_count(&self) -> isize {
        self.runtime_count.load(Ordering::Relaxed)
    }

    pub fn add_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_active(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_active(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_timeout(&self) {
        self.timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_verify_failed(&self) {
        self.verify_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_by_proxy_protocol_error(&self, e: &ProxyProtocolReadError) {
        match e {
            ProxyProtocolReadError::ReadFailed(_) | ProxyProtocolReadError::ClosedUnexpected => {
                self.add_failed()
            }
            ProxyProtocolReadError::InvalidMagicHeader
            | ProxyProtocolReadError::InvalidDataLength(_)
            | ProxyProtocolReadError::InvalidFamily
            | ProxyProtocolReadError::InvalidSrcAddr
            | ProxyProtocolReadError::InvalidDstAddr => self.add_dropped(),
        }
    }

    pub fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            verify_failed: self.verify_failed.load(Ordering::Relaxed),
        }
    }
}

pub struct ListenAliveGuard(Arc<ListenerStats>);

impl Drop for ListenAliveGuard {
    fn drop(&mut self) {
        self.0.runtime_count.fetch_sub(1, Ordering::Relaxed);
    }
}
