/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::Context;
use log::{debug, error, info, warn};

use g3_tls_context::ContextManager;
use g3_watchdog::{GuardDog, LogAction};

use g3edge::config::EdgeConfig;
use g3edge::drain::DrainManager;
use g3edge::server::Controller;
use g3edge::signal::ShutdownKind;
use g3edge::trace::UuidTraceMutator;

const CERT_EXPIRY_WARN_DAYS: u32 = 30;

fn main() -> anyhow::Result<()> {
    openssl::init();

    let Some(proc_args) =
        g3edge::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    // set up process logger early, only proc args is used inside
    let _log_guard =
        g3edge::log::setup(proc_args.verbose_level).context("failed to setup logger")?;

    let tls_manager = ContextManager::new();
    let config = g3edge::config::load(&proc_args.config_file, &tls_manager)
        .context(format!("failed to load config, opts: {:?}", &proc_args))?;
    debug!("loaded config from {}", proc_args.config_file.display());

    if proc_args.test_config {
        info!("the format of the config file is ok");
        return Ok(());
    }

    match run(config, &tls_manager) {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{:?}", e);
            Err(e)
        }
    }
}

fn run(config: EdgeConfig, tls_manager: &ContextManager) -> anyhow::Result<()> {
    if let Some(days) = tls_manager.days_until_first_cert_expires() {
        if days < CERT_EXPIRY_WARN_DAYS {
            warn!("the first certificate expires in {days} days");
        } else {
            info!("the first certificate expires in {days} days");
        }
    }

    let guard_dog = GuardDog::start(config.watchdog.clone(), Arc::new(LogAction))
        .context("failed to start guard dog")?;
    let drain = Arc::new(DrainManager::new(config.drain.clone()));
    let trace = Arc::new(UuidTraceMutator::new(config.tracing.clone()));

    let mut controller = Controller::new(&config.worker, guard_dog.clone(), drain, trace)
        .context("failed to create workers")?;
    for entry in config.listeners {
        let name = entry.config.name().to_string();
        controller
            .add_listener(entry.config, entry.filter)
            .context(format!("failed to add listener {name}"))?;
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start main runtime")?;

    let ret = rt.block_on(async {
        controller.start().context("failed to start workers")?;
        g3edge::signal::wait_for_shutdown().await
    });

    if let Ok(ShutdownKind::Graceful) = ret {
        controller.drain_listeners();
        rt.block_on(async {
            tokio::select! {
                _ = controller.wait_drained() => {}
                r = g3edge::signal::wait_for_shutdown() => {
                    if let Ok(kind) = r {
                        info!("drain interrupted by {kind:?} shutdown");
                    }
                }
            }
        });
    }

    controller.shutdown();
    guard_dog.stop();
    ret.map(|_| ())
}
