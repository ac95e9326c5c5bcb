/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use log::info;
use tokio::signal::unix::{SignalKind, signal};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownKind {
    /// drain connections before stopping
    Graceful,
    Immediate,
}

/// Wait for SIGTERM (graceful), or SIGINT / SIGQUIT (immediate).
pub async fn wait_for_shutdown() -> anyhow::Result<ShutdownKind> {
    let mut term_sig = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("failed to create SIGTERM listener: {e}"))?;
    let mut int_sig = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("failed to create SIGINT listener: {e}"))?;
    let mut quit_sig = signal(SignalKind::quit())
        .map_err(|e| anyhow!("failed to create SIGQUIT listener: {e}"))?;

    tokio::select! {
        _ = term_sig.recv() => {
            info!("got offline signal");
            Ok(ShutdownKind::Graceful)
        }
        _ = int_sig.recv() => {
            info!("got quit signal");
            Ok(ShutdownKind::Immediate)
        }
        _ = quit_sig.recv() => {
            info!("got quit signal");
            Ok(ShutdownKind::Immediate)
        }
    }
}
