/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{ConnectionContext, FilterChainFactory};
use crate::handler::ConnectionStream;

/// Writes back everything it reads.
#[derive(Default)]
pub struct EchoFilterFactory {}

impl EchoFilterFactory {
    pub fn new() -> Self {
        EchoFilterFactory::default()
    }
}

#[async_trait]
impl FilterChainFactory for EchoFilterFactory {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn run(&self, mut stream: ConnectionStream, ctx: ConnectionContext) {
        let mut buf = vec![0u8; ctx.buffer_size()];
        loop {
            let nr = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(
                        "echo: read from {} failed: {e}",
                        ctx.info.client_addr()
                    );
                    return;
                }
            };
            if let Err(e) = stream.write_all(&buf[..nr]).await {
                debug!("echo: write to {} failed: {e}", ctx.info.client_addr());
                return;
            }
            if ctx.drain.drain_close() {
                debug!("echo: closing {} for drain", ctx.info.client_addr());
                break;
            }
        }
        let _ = stream.shutdown().await;
    }
}
