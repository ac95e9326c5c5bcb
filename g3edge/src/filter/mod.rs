/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;

use crate::drain::DrainDecision;
use crate::handler::{ConnectionInfo, ConnectionStream};
use crate::thread_local::ThreadContext;
use crate::trace::TraceMutator;

mod echo;
pub use echo::EchoFilterFactory;

mod tcp_proxy;
pub use tcp_proxy::{TcpProxyConfig, TcpProxyFilterFactory};

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Per connection values handed to a filter chain.
pub struct ConnectionContext {
    pub info: ConnectionInfo,
    pub request_id: String,
    pub drain: Arc<dyn DrainDecision>,
    pub trace: Arc<dyn TraceMutator>,
    pub thread: Arc<ThreadContext>,
    pub buffer_limit: Option<usize>,
}

impl ConnectionContext {
    /// Size of the read buffer. The buffer limit only caps it.
    pub fn buffer_size(&self) -> usize {
        read_buffer_size(self.buffer_limit)
    }
}

fn read_buffer_size(limit: Option<usize>) -> usize {
    match limit {
        Some(limit) => limit.clamp(1, DEFAULT_BUFFER_SIZE),
        None => DEFAULT_BUFFER_SIZE,
    }
}

/// Protocol processing applied to an accepted connection.
#[async_trait]
pub trait FilterChainFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Serve the connection until either side closes it.
    async fn run(&self, stream: ConnectionStream, ctx: ConnectionContext);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size() {
        assert_eq!(read_buffer_size(None), DEFAULT_BUFFER_SIZE);
        assert_eq!(read_buffer_size(Some(512)), 512);
        assert_eq!(read_buffer_size(Some(1 << 30)), DEFAULT_BUFFER_SIZE);
    }
}
