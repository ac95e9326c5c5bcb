/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use log::info;

/// Whether a connection should be closed at its next safe point.
pub trait DrainDecision: Send + Sync {
    fn drain_close(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrainStrategy {
    /// close connections with a probability growing over the drain time
    #[default]
    Gradual,
    /// close every connection as soon as draining starts
    Immediate,
}

impl FromStr for DrainStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gradual" => Ok(DrainStrategy::Gradual),
            "immediate" => Ok(DrainStrategy::Immediate),
            _ => Err(anyhow!("unsupported drain strategy {s}")),
        }
    }
}

const DEFAULT_DRAIN_TIME: Duration = Duration::from_secs(600);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainConfig {
    pub strategy: DrainStrategy,
    pub drain_time: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        DrainConfig {
            strategy: DrainStrategy::default(),
            drain_time: DEFAULT_DRAIN_TIME,
        }
    }
}

pub struct DrainManager {
    config: DrainConfig,
    started: OnceLock<Instant>,
}

impl DrainManager {
    pub fn new(config: DrainConfig) -> Self {
        DrainManager {
            config,
            started: OnceLock::new(),
        }
    }

    pub fn start_drain(&self) {
        if self.started.set(Instant::now()).is_ok() {
            info!(
                "drain started with {:?} strategy, drain time {:?}",
                self.config.strategy, self.config.drain_time
            );
        }
    }

    pub fn draining(&self) -> bool {
        self.started.get().is_some()
    }

    #[inline]
    pub fn drain_time(&self) -> Duration {
        self.config.drain_time
    }

    /// The time left before every connection should have been drained.
    pub fn remaining(&self) -> Option<Duration> {
        self.started
            .get()
            .map(|start| self.config.drain_time.saturating_sub(start.elapsed()))
    }

    fn drain_close_at(&self, elapsed: Duration) -> bool {
        match self.config.strategy {
            DrainStrategy::Immediate => true,
            DrainStrategy::Gradual => {
                if elapsed >= self.config.drain_time {
                    return true;
                }
                let ratio = elapsed.as_secs_f64() / self.config.drain_time.as_secs_f64();
                fastrand::f64() < ratio
            }
        }
    }
}

impl DrainDecision for DrainManager {
    fn drain_close(&self) -> bool {
        match self.started.get() {
            Some(start) => self.drain_close_at(start.elapsed()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_draining() {
        let m = DrainManager::new(DrainConfig::default());
        assert!(!m.draining());
        assert!(m.remaining().is_none());
        for _ in 0..100 {
            assert!(!m.drain_close());
        }
    }

    #[test]
    fn immediate() {
        let m = DrainManager::new(DrainConfig {
            strategy: DrainStrategy::Immediate,
            drain_time: Duration::from_secs(60),
        });
        m.start_drain();
        assert!(m.draining());
        assert!(m.drain_close());
    }

    #[test]
    fn gradual() {
        let m = DrainManager::new(DrainConfig {
            strategy: DrainStrategy::Gradual,
            drain_time: Duration::from_secs(100),
        });
        assert!(!m.drain_close_at(Duration::ZERO));
        assert!(m.drain_close_at(Duration::from_secs(100)));
        assert!(m.drain_close_at(Duration::from_secs(200)));

        let closed = (0..1000)
            .filter(|_| m.drain_close_at(Duration::from_secs(50)))
            .count();
        assert!(closed > 300 && closed < 700);
    }

    #[test]
    fn zero_drain_time() {
        let m = DrainManager::new(DrainConfig {
            strategy: DrainStrategy::Gradual,
            drain_time: Duration::ZERO,
        });
        m.start_drain();
        assert!(m.drain_close());
        assert_eq!(m.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn strategy() {
        assert_eq!(
            DrainStrategy::from_str("Immediate").unwrap(),
            DrainStrategy::Immediate
        );
        assert_eq!(
            DrainStrategy::from_str("gradual").unwrap(),
            DrainStrategy::Gradual
        );
        assert!(DrainStrategy::from_str("fast").is_err());
    }
}
