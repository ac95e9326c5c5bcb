/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use slog::{Drain, slog_o};
use slog_scope::GlobalLoggerGuard;

mod stdio;
pub use stdio::{AsyncStdioDrain, LogStats};

const PROCESS_LOG_THREAD_NAME: &str = "log-process";
const PROCESS_LOG_CHANNEL_CAPACITY: usize = 1024;

fn verbose_to_level(verbose_level: u8) -> log::Level {
    match verbose_level {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

pub fn setup(verbose_level: u8) -> anyhow::Result<GlobalLoggerGuard> {
    let drain = stdio::new_async_drain(
        PROCESS_LOG_THREAD_NAME,
        PROCESS_LOG_CHANNEL_CAPACITY,
        true,
    )?;
    let logger = slog::Logger::root(drain.fuse(), slog_o!());

    let scope_guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(verbose_to_level(verbose_level))
        .map_err(|e| anyhow::anyhow!("failed to set std logger: {e}"))?;
    Ok(scope_guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level() {
        assert_eq!(verbose_to_level(0), log::Level::Warn);
        assert_eq!(verbose_to_level(1), log::Level::Info);
        assert_eq!(verbose_to_level(2), log::Level::Debug);
        assert_eq!(verbose_to_level(5), log::Level::Trace);
    }
}
