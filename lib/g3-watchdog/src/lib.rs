/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod config;
pub use config::GuardDogConfig;

mod watch_dog;
pub use watch_dog::WatchDog;

mod action;
pub use action::{LogAction, WatchDogAction};

mod stats;
pub use stats::GuardDogStats;

mod guard_dog;
pub use guard_dog::GuardDog;
