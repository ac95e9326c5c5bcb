/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader};

use g3_tls_context::ContextManager;
use g3_watchdog::GuardDogConfig;

use crate::drain::{DrainConfig, DrainStrategy};
use crate::trace::TracingConfig;
use crate::worker::WorkerConfig;

mod listener;
mod tls;
mod yaml;

pub use listener::ListenerEntry;

#[derive(Default)]
pub struct EdgeConfig {
    pub worker: WorkerConfig,
    pub watchdog: GuardDogConfig,
    pub drain: DrainConfig,
    pub tracing: TracingConfig,
    pub listeners: Vec<ListenerEntry>,
}

/// Load the config file. Multiple yaml docs in it are merged.
pub fn load(path: &Path, tls_manager: &ContextManager) -> anyhow::Result<EdgeConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {e}", path.display()))?;
    let lookup_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    let lookup_dir = if lookup_dir.as_os_str().is_empty() {
        std::env::current_dir()?
    } else {
        lookup_dir
    };
    load_str(&content, &lookup_dir, tls_manager)
}

pub fn load_str(
    content: &str,
    lookup_dir: &Path,
    tls_manager: &ContextManager,
) -> anyhow::Result<EdgeConfig> {
    let docs = YamlLoader::load_from_str(content)
        .map_err(|e| anyhow!("invalid yaml content: {e}"))?;
    let mut config = EdgeConfig::default();
    for (i, doc) in docs.iter().enumerate() {
        match doc {
            Yaml::Hash(map) => load_doc(&mut config, map, lookup_dir, tls_manager)
                .context(format!("failed to load yaml doc #{i}"))?,
            _ => return Err(anyhow!("yaml doc root should be hash")),
        }
    }
    config.watchdog.check()?;
    Ok(config)
}

fn load_doc(
    config: &mut EdgeConfig,
    map: &yaml_rust::yaml::Hash,
    lookup_dir: &Path,
    tls_manager: &ContextManager,
) -> anyhow::Result<()> {
    yaml::foreach_kv(map, |k, v| match k {
        "worker" => load_worker(&mut config.worker, v),
        "watchdog" => load_watchdog(&mut config.watchdog, v),
        "drain" => load_drain(&mut config.drain, v),
        "tracing" => load_tracing(&mut config.tracing, v),
        "listener" => {
            let entries = listener::load_all(v, lookup_dir, tls_manager)?;
            config.listeners.extend(entries);
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k} in main conf")),
    })
}

fn load_worker(config: &mut WorkerConfig, v: &Yaml) -> anyhow::Result<()> {
    yaml::foreach_kv(yaml::as_hash(v)?, |k, v| {
        match k {
            "thread_number" => {
                let n = yaml::as_usize(v)?;
                config.thread_number =
                    NonZeroUsize::new(n).ok_or_else(|| anyhow!("thread number should not be 0"))?;
            }
            "thread_stack_size" => config.thread_stack_size = Some(yaml::as_humanize_usize(v)?),
            "max_io_events_per_tick" => config.max_io_events_per_tick = Some(yaml::as_usize(v)?),
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    })
}

fn load_watchdog(config: &mut GuardDogConfig, v: &Yaml) -> anyhow::Result<()> {
    yaml::foreach_kv(yaml::as_hash(v)?, |k, v| {
        match k {
            "miss_timeout" => config.set_miss_timeout(yaml::as_duration(v)?),
            "megamiss_timeout" => config.set_megamiss_timeout(yaml::as_duration(v)?),
            "check_interval" => config.set_check_interval(yaml::as_duration(v)?),
            "touch_interval" => config.set_touch_interval(yaml::as_duration(v)?),
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    })
}

fn load_drain(config: &mut DrainConfig, v: &Yaml) -> anyhow::Result<()> {
    yaml::foreach_kv(yaml::as_hash(v)?, |k, v| {
        match k {
            "strategy" => config.strategy = DrainStrategy::from_str(&yaml::as_string(v)?)?,
            "drain_time" => config.drain_time = yaml::as_duration(v)?,
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    })
}

fn as_percent(v: &Yaml) -> anyhow::Result<u32> {
    let p = yaml::as_u32(v)?;
    if p > 100 {
        return Err(anyhow!("percentage {p} should not be greater than 100"));
    }
    Ok(p)
}

fn load_tracing(config: &mut TracingConfig, v: &Yaml) -> anyhow::Result<()> {
    yaml::foreach_kv(yaml::as_hash(v)?, |k, v| {
        match k {
            "client_enabled" => config.client_enabled = as_percent(v)?,
            "global_enabled" => config.global_enabled = as_percent(v)?,
            "random_sampling" => {
                let n = yaml::as_u32(v)?;
                if n > 10000 {
                    return Err(anyhow!("random sampling {n} should not be greater than 10000"));
                }
                config.random_sampling = n;
            }
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    })
}
