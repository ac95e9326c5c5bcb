/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Liveness beacon of a single thread.
///
/// Only the owning thread should call [`WatchDog::touch`], the guard dog
/// thread reads the last touch time.
pub struct WatchDog {
    thread_id: ThreadId,
    name: String,
    touch_interval: Duration,
    epoch: Instant,
    last_touch_ms: AtomicU64,
    pub(crate) miss: AtomicBool,
    pub(crate) mega_miss: AtomicBool,
}

impl WatchDog {
    pub(crate) fn new(thread_id: ThreadId, name: String, touch_interval: Duration) -> Self {
        WatchDog {
            thread_id,
            name,
            touch_interval,
            epoch: Instant::now(),
            last_touch_ms: AtomicU64::new(0),
            miss: AtomicBool::new(false),
            mega_miss: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The period the owner should use for its touch timer.
    #[inline]
    pub fn touch_interval(&self) -> Duration {
        self.touch_interval
    }

    pub fn touch(&self) {
        debug_assert_eq!(std::thread::current().id(), self.thread_id);
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_touch_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn since_last_touch(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.epoch);
        let last = Duration::from_millis(self.last_touch_ms.load(Ordering::Relaxed));
        elapsed.saturating_sub(last)
    }

    pub fn is_unresponsive(&self) -> bool {
        self.miss.load(Ordering::Relaxed)
    }
}
