/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct GuardDogStats {
    miss: AtomicU64,
    mega_miss: AtomicU64,
}

impl GuardDogStats {
    pub(crate) fn add_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_mega_miss(&self) {
        self.mega_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_miss(&self) -> u64 {
        self.miss.load(Ordering::Relaxed)
    }

    pub fn get_mega_miss(&self) -> u64 {
        self.mega_miss.load(Ordering::Relaxed)
    }
}
