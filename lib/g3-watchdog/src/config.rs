/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

const DEFAULT_MISS_TIMEOUT: Duration = Duration::from_millis(200);
const DEFAULT_MEGAMISS_TIMEOUT: Duration = Duration::from_millis(1000);
const MINIMAL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GuardDogConfig {
    miss_timeout: Duration,
    megamiss_timeout: Duration,
    check_interval: Option<Duration>,
    touch_interval: Option<Duration>,
}

impl Default for GuardDogConfig {
    fn default() -> Self {
        GuardDogConfig {
            miss_timeout: DEFAULT_MISS_TIMEOUT,
            megamiss_timeout: DEFAULT_MEGAMISS_TIMEOUT,
            check_interval: None,
            touch_interval: None,
        }
    }
}

impl GuardDogConfig {
    pub fn set_miss_timeout(&mut self, timeout: Duration) {
        self.miss_timeout = timeout;
    }

    pub fn set_megamiss_timeout(&mut self, timeout: Duration) {
        self.megamiss_timeout = timeout;
    }

    pub fn set_check_interval(&mut self, interval: Duration) {
        self.check_interval = Some(interval.max(MINIMAL_INTERVAL));
    }

    pub fn set_touch_interval(&mut self, interval: Duration) {
        self.touch_interval = Some(interval.max(MINIMAL_INTERVAL));
    }

    #[inline]
    pub fn miss_timeout(&self) -> Duration {
        self.miss_timeout
    }

    #[inline]
    pub fn megamiss_timeout(&self) -> Duration {
        self.megamiss_timeout
    }

    fn default_interval(&self) -> Duration {
        (self.miss_timeout.min(self.megamiss_timeout) / 2).max(MINIMAL_INTERVAL)
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
            .unwrap_or_else(|| self.default_interval())
    }

    pub fn touch_interval(&self) -> Duration {
        self.touch_interval
            .unwrap_or_else(|| self.default_interval())
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if self.miss_timeout.is_zero() {
            return Err(anyhow::anyhow!("miss timeout should not be zero"));
        }
        if self.megamiss_timeout < self.miss_timeout {
            return Err(anyhow::anyhow!(
                "megamiss timeout should not be less than miss timeout"
            ));
        }
        if self.touch_interval() >= self.miss_timeout {
            return Err(anyhow::anyhow!(
                "touch interval should be less than miss timeout"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval() {
        let config = GuardDogConfig::default();
        assert_eq!(config.check_interval(), Duration::from_millis(100));
        assert_eq!(config.touch_interval(), Duration::from_millis(100));
        assert!(config.check().is_ok());
    }

    #[test]
    fn custom() {
        let mut config = GuardDogConfig::default();
        config.set_miss_timeout(Duration::from_secs(2));
        config.set_megamiss_timeout(Duration::from_secs(5));
        assert_eq!(config.touch_interval(), Duration::from_secs(1));
        config.set_touch_interval(Duration::from_millis(300));
        assert_eq!(config.touch_interval(), Duration::from_millis(300));
        assert_eq!(config.check_interval(), Duration::from_secs(1));
        assert!(config.check().is_ok());

        config.set_megamiss_timeout(Duration::from_secs(1));
        assert!(config.check().is_err());
    }

    #[test]
    fn touch_too_slow() {
        let mut config = GuardDogConfig::default();
        config.set_touch_interval(Duration::from_millis(500));
        assert!(config.check().is_err());
    }
}
