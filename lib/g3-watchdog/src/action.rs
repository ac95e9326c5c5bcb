/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use log::{error, warn};

use crate::WatchDog;

/// Policy applied when a watched thread stops touching its watch dog.
///
/// Each method is called once per stall, from the guard dog thread.
pub trait WatchDogAction: Send + Sync {
    fn on_miss(&self, dog: &WatchDog, since_last_touch: Duration);
    fn on_mega_miss(&self, dog: &WatchDog, since_last_touch: Duration);
}

pub struct LogAction;

impl WatchDogAction for LogAction {
    fn on_miss(&self, dog: &WatchDog, since_last_touch: Duration) {
        warn!(
            "thread {} has not responded for {}ms",
            dog.name(),
            since_last_touch.as_millis()
        );
    }

    fn on_mega_miss(&self, dog: &WatchDog, since_last_touch: Duration) {
        error!(
            "thread {} has been stalled for {}ms",
            dog.name(),
            since_last_touch.as_millis()
        );
    }
}
