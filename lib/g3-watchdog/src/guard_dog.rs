/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

use anyhow::anyhow;
use log::{debug, info};

use crate::{GuardDogConfig, GuardDogStats, WatchDog, WatchDogAction};

const GUARD_DOG_THREAD_NAME: &str = "guard-dog";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct GuardDogInner {
    config: GuardDogConfig,
    action: Arc<dyn WatchDogAction>,
    stats: GuardDogStats,
    dogs: Mutex<Vec<Arc<WatchDog>>>,
    quit: Mutex<bool>,
    quit_cond: Condvar,
}

impl GuardDogInner {
    fn run(&self) {
        let interval = self.config.check_interval();
        let mut quit = lock(&self.quit);
        while !*quit {
            let (guard, _) = self
                .quit_cond
                .wait_timeout(quit, interval)
                .unwrap_or_else(|e| e.into_inner());
            quit = guard;
            if *quit {
                break;
            }
            self.check(Instant::now());
        }
    }

    fn check(&self, now: Instant) {
        let miss_timeout = self.config.miss_timeout();
        let megamiss_timeout = self.config.megamiss_timeout();

        let dogs = lock(&self.dogs);
        for dog in dogs.iter() {
            let delta = dog.since_last_touch(now);
            if delta > miss_timeout {
                if !dog.miss.swap(true, Ordering::Relaxed) {
                    self.stats.add_miss();
                    self.action.on_miss(dog, delta);
                }
            } else {
                dog.miss.store(false, Ordering::Relaxed);
                dog.mega_miss.store(false, Ordering::Relaxed);
                continue;
            }

            if delta > megamiss_timeout && !dog.mega_miss.swap(true, Ordering::Relaxed) {
                self.stats.add_mega_miss();
                self.action.on_mega_miss(dog, delta);
            }
        }
    }
}

/// Process wide supervisor of all registered [`WatchDog`]s.
///
/// A background thread checks every watch dog at the configured interval.
/// The thread is stopped when [`GuardDog::stop`] is called or the guard dog
/// is dropped.
pub struct GuardDog {
    inner: Arc<GuardDogInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl GuardDog {
    pub fn start(
        config: GuardDogConfig,
        action: Arc<dyn WatchDogAction>,
    ) -> anyhow::Result<Arc<Self>> {
        config.check()?;

        let inner = Arc::new(GuardDogInner {
            config,
            action,
            stats: GuardDogStats::default(),
            dogs: Mutex::new(Vec::new()),
            quit: Mutex::new(false),
            quit_cond: Condvar::new(),
        });

        let thread_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name(GUARD_DOG_THREAD_NAME.to_string())
            .spawn(move || thread_inner.run())
            .map_err(|e| anyhow!("failed to spawn guard dog thread: {e}"))?;
        info!("guard dog started");

        Ok(Arc::new(GuardDog {
            inner,
            thread: Mutex::new(Some(handle)),
        }))
    }

    #[inline]
    pub fn config(&self) -> &GuardDogConfig {
        &self.inner.config
    }

    #[inline]
    pub fn stats(&self) -> &GuardDogStats {
        &self.inner.stats
    }

    /// Register a new watch dog for the thread with id `thread_id`.
    pub fn create_watch_dog(&self, thread_id: ThreadId, name: &str) -> Arc<WatchDog> {
        let dog = Arc::new(WatchDog::new(
            thread_id,
            name.to_string(),
            self.inner.config.touch_interval(),
        ));
        lock(&self.inner.dogs).push(dog.clone());
        debug!("start watching thread {name}");
        dog
    }

    /// Unregister `dog`. Must not be called from inside the watched loop.
    pub fn stop_watching(&self, dog: &Arc<WatchDog>) {
        let mut dogs = lock(&self.inner.dogs);
        dogs.retain(|d| !Arc::ptr_eq(d, dog));
        debug!("stop watching thread {}", dog.name());
    }

    pub fn watched_count(&self) -> usize {
        lock(&self.inner.dogs).len()
    }

    /// Names of the threads currently considered unresponsive.
    pub fn unresponsive(&self) -> Vec<String> {
        lock(&self.inner.dogs)
            .iter()
            .filter(|d| d.is_unresponsive())
            .map(|d| d.name().to_string())
            .collect()
    }

    pub fn stop(&self) {
        let Some(handle) = lock(&self.thread).take() else {
            return;
        };
        *lock(&self.inner.quit) = true;
        self.inner.quit_cond.notify_all();
        let _ = handle.join();
        info!("guard dog stopped");
    }
}

impl Drop for GuardDog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountAction {
        miss: AtomicUsize,
        mega_miss: AtomicUsize,
    }

    impl WatchDogAction for CountAction {
        fn on_miss(&self, _dog: &WatchDog, _since: Duration) {
            self.miss.fetch_add(1, Ordering::Relaxed);
        }

        fn on_mega_miss(&self, _dog: &WatchDog, _since: Duration) {
            self.mega_miss.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn config(miss_ms: u64, megamiss_ms: u64) -> GuardDogConfig {
        let mut config = GuardDogConfig::default();
        config.set_miss_timeout(Duration::from_millis(miss_ms));
        config.set_megamiss_timeout(Duration::from_millis(megamiss_ms));
        config
    }

    #[test]
    fn check_once_per_stall() {
        let action = Arc::new(CountAction::default());
        let mut config = config(1000, 2000);
        config.set_check_interval(Duration::from_secs(3600));
        let guard_dog = GuardDog::start(config, action.clone()).unwrap();
        let dog = guard_dog.create_watch_dog(std::thread::current().id(), "test#0");

        let now = Instant::now();
        guard_dog.inner.check(now);
        assert_eq!(action.miss.load(Ordering::Relaxed), 0);

        guard_dog.inner.check(now + Duration::from_millis(1500));
        guard_dog.inner.check(now + Duration::from_millis(1600));
        assert_eq!(action.miss.load(Ordering::Relaxed), 1);
        assert_eq!(action.mega_miss.load(Ordering::Relaxed), 0);
        assert_eq!(guard_dog.unresponsive(), vec!["test#0".to_string()]);

        guard_dog.inner.check(now + Duration::from_millis(2500));
        assert_eq!(action.mega_miss.load(Ordering::Relaxed), 1);
        assert_eq!(guard_dog.stats().get_miss(), 1);
        assert_eq!(guard_dog.stats().get_mega_miss(), 1);

        dog.touch();
        guard_dog.inner.check(Instant::now());
        assert!(guard_dog.unresponsive().is_empty());

        guard_dog.stop_watching(&dog);
        assert_eq!(guard_dog.watched_count(), 0);
        guard_dog.stop();
    }

    #[test]
    fn untouched_flagged() {
        let action = Arc::new(CountAction::default());
        let guard_dog = GuardDog::start(config(50, 1000), action.clone()).unwrap();
        let _dog = guard_dog.create_watch_dog(std::thread::current().id(), "idle");

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(action.miss.load(Ordering::Relaxed), 1);
        assert_eq!(guard_dog.unresponsive().len(), 1);
    }

    #[test]
    fn touched_never_flagged() {
        let action = Arc::new(CountAction::default());
        let guard_dog = GuardDog::start(config(500, 1000), action.clone()).unwrap();

        let gd = guard_dog.clone();
        let handle = std::thread::spawn(move || {
            let dog = gd.create_watch_dog(std::thread::current().id(), "busy");
            for _ in 0..15 {
                dog.touch();
                std::thread::sleep(Duration::from_millis(20));
            }
            gd.stop_watching(&dog);
        });
        handle.join().unwrap();

        assert_eq!(action.miss.load(Ordering::Relaxed), 0);
        assert_eq!(guard_dog.watched_count(), 0);
    }

    #[test]
    fn stop_twice() {
        let guard_dog = GuardDog::start(GuardDogConfig::default(), Arc::new(crate::LogAction))
            .unwrap();
        guard_dog.stop();
        guard_dog.stop();
    }
}
