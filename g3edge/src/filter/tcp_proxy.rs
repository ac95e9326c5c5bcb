/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use g3_tls_context::ClientContext;

use super::{ConnectionContext, FilterChainFactory};
use crate::handler::ConnectionStream;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TcpProxyConfig {
    upstream: SocketAddr,
    connect_timeout: Duration,
    tls_client: Option<Arc<ClientContext>>,
    tls_name: Option<String>,
}

impl TcpProxyConfig {
    pub fn new(upstream: SocketAddr) -> Self {
        TcpProxyConfig {
            upstream,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls_client: None,
            tls_name: None,
        }
    }

    #[inline]
    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_tls_client(&mut self, ctx: Arc<ClientContext>, tls_name: Option<String>) {
        self.tls_client = Some(ctx);
        self.tls_name = tls_name;
    }
}

/// Relays bytes between the client and a fixed upstream.
pub struct TcpProxyFilterFactory {
    config: TcpProxyConfig,
}

enum UpstreamStream {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl TcpProxyFilterFactory {
    pub fn new(config: TcpProxyConfig) -> Self {
        TcpProxyFilterFactory { config }
    }

    async fn connect(&self) -> anyhow::Result<UpstreamStream> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.upstream),
        )
        .await
        .map_err(|_| anyhow!("timed out connecting to {}", self.config.upstream))?
        .map_err(|e| anyhow!("failed to connect to {}: {e}", self.config.upstream))?;

        let Some(client) = &self.config.tls_client else {
            return Ok(UpstreamStream::Plain(stream));
        };
        let ssl = client.new_ssl(self.config.tls_name.as_deref())?;
        let mut tls = SslStream::new(ssl, stream)
            .map_err(|e| anyhow!("failed to create tls stream: {e}"))?;
        tokio::time::timeout(
            client.handshake_timeout(),
            std::pin::Pin::new(&mut tls).connect(),
        )
        .await
        .map_err(|_| anyhow!("upstream tls handshake timed out"))?
        .map_err(|e| anyhow!("upstream tls handshake failed: {e}"))?;
        if !client.verify_peer(tls.ssl()) {
            return Err(anyhow!("upstream certificate subject alt name mismatch"));
        }
        Ok(UpstreamStream::Tls(tls))
    }
}

#[async_trait]
impl FilterChainFactory for TcpProxyFilterFactory {
    fn name(&self) -> &'static str {
        "tcp_proxy"
    }

    async fn run(&self, mut stream: ConnectionStream, mut ctx: ConnectionContext) {
        ctx.trace
            .mutate_request_id(&mut ctx.request_id, false, false);
        let decision = ctx.trace.is_tracing(false, Some(&ctx.request_id));
        debug!(
            "tcp_proxy: request {} from {} trace {:?}",
            ctx.request_id,
            ctx.info.client_addr(),
            decision
        );

        let upstream = match self.connect().await {
            Ok(s) => s,
            Err(e) => {
                info!("tcp_proxy: request {}: {e:?}", ctx.request_id);
                let _ = stream.shutdown().await;
                return;
            }
        };

        let size = ctx.buffer_size();
        let r = match upstream {
            UpstreamStream::Plain(mut ups) => {
                tokio::io::copy_bidirectional_with_sizes(&mut stream, &mut ups, size, size).await
            }
            UpstreamStream::Tls(mut ups) => {
                tokio::io::copy_bidirectional_with_sizes(&mut stream, &mut ups, size, size).await
            }
        };
        match r {
            Ok((up, down)) => debug!(
                "tcp_proxy: request {} finished, {up} bytes up, {down} bytes down",
                ctx.request_id
            ),
            Err(e) => debug!("tcp_proxy: request {} closed: {e}", ctx.request_id),
        }
    }
}
