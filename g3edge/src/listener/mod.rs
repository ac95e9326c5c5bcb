/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use g3_tls_context::ServerContext;

use crate::filter::FilterChainFactory;

mod proxy_protocol;
pub use proxy_protocol::{ProxyAddr, ProxyProtocolReadError, read_proxy_protocol_v1};

mod stats;
pub use stats::{ListenAliveGuard, ListenerSnapshot, ListenerStats};

const DEFAULT_BACKLOG: u32 = 4096;
const DEFAULT_PROXY_PROTOCOL_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// accept on the bound socket, or only take redirected connections
    pub bind_to_port: bool,
    pub use_proxy_protocol: bool,
    /// hand accepted connections to the listener owning their local address
    pub use_original_dst: bool,
    pub per_connection_buffer_limit_bytes: Option<usize>,
}

impl ListenerOptions {
    pub fn new() -> Self {
        ListenerOptions {
            bind_to_port: true,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub enum TransportMode {
    Plain,
    Tls(Arc<ServerContext>),
}

impl fmt::Debug for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Plain => f.write_str("Plain"),
            TransportMode::Tls(_) => f.write_str("Tls"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ListenerConfig {
    name: String,
    address: SocketAddr,
    backlog: u32,
    options: ListenerOptions,
    transport: TransportMode,
    proxy_protocol_read_timeout: Duration,
}

impl ListenerConfig {
    pub fn new(name: &str, address: SocketAddr) -> Self {
        ListenerConfig {
            name: name.to_string(),
            address,
            backlog: DEFAULT_BACKLOG,
            options: ListenerOptions::new(),
            transport: TransportMode::Plain,
            proxy_protocol_read_timeout: DEFAULT_PROXY_PROTOCOL_READ_TIMEOUT,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[inline]
    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    #[inline]
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    #[inline]
    pub fn transport(&self) -> &TransportMode {
        &self.transport
    }

    #[inline]
    pub fn proxy_protocol_read_timeout(&self) -> Duration {
        self.proxy_protocol_read_timeout
    }

    pub fn set_address(&mut self, address: SocketAddr) {
        self.address = address;
    }

    pub fn set_backlog(&mut self, backlog: u32) {
        self.backlog = backlog;
    }

    pub fn set_options(&mut self, options: ListenerOptions) {
        self.options = options;
    }

    pub fn options_mut(&mut self) -> &mut ListenerOptions {
        &mut self.options
    }

    pub fn set_transport(&mut self, transport: TransportMode) {
        self.transport = transport;
    }

    pub fn set_proxy_protocol_read_timeout(&mut self, timeout: Duration) {
        self.proxy_protocol_read_timeout = timeout;
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("listener name is empty"));
        }
        if !self.options.bind_to_port && self.address.port() == 0 {
            return Err(anyhow!(
                "listener {} is not bound to port and needs a fixed port",
                self.name
            ));
        }
        if self.options.per_connection_buffer_limit_bytes == Some(0) {
            return Err(anyhow!(
                "per connection buffer limit of listener {} should not be zero",
                self.name
            ));
        }
        Ok(())
    }
}

/// Listen socket bound once and shared by the listeners of every worker.
pub struct ListenSocket {
    local_addr: SocketAddr,
    socket: Option<Socket>,
}

impl ListenSocket {
    pub fn bind(config: &ListenerConfig) -> io::Result<Self> {
        if !config.options.bind_to_port {
            return Ok(ListenSocket {
                local_addr: config.address,
                socket: None,
            });
        }

        let addr = config.address;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if addr.port() != 0 {
            #[cfg(unix)]
            socket.set_reuse_address(true)?;
        }
        let bind_addr: SockAddr = addr.into();
        socket.bind(&bind_addr)?;
        socket.listen(config.backlog.min(i32::MAX as u32) as i32)?;

        let local_addr = socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::other("listen socket has no inet address"))?;
        Ok(ListenSocket {
            local_addr,
            socket: Some(socket),
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    /// Duplicate the listen fd for one worker.
    pub(crate) fn try_clone_std(&self) -> io::Result<Option<std::net::TcpListener>> {
        match &self.socket {
            Some(socket) => {
                let socket = socket.try_clone()?;
                socket.set_nonblocking(true)?;
                Ok(Some(socket.into()))
            }
            None => Ok(None),
        }
    }
}

/// Everything a connection handler needs to serve one listener.
#[derive(Clone)]
pub struct ListenerDescriptor {
    pub config: Arc<ListenerConfig>,
    pub socket: Arc<ListenSocket>,
    pub filter_chain_factory: Arc<dyn FilterChainFactory>,
    pub stats: Arc<ListenerStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn bind_ephemeral() {
        let config = ListenerConfig::new("echo", SocketAddr::from_str("127.0.0.1:0").unwrap());
        let socket = ListenSocket::bind(&config).unwrap();
        assert!(socket.is_bound());
        assert_ne!(socket.local_addr().port(), 0);

        let a = socket.try_clone_std().unwrap().unwrap();
        let b = socket.try_clone_std().unwrap().unwrap();
        assert_eq!(a.local_addr().unwrap(), b.local_addr().unwrap());
    }

    #[test]
    fn unbound() {
        let mut config =
            ListenerConfig::new("virtual", SocketAddr::from_str("127.0.0.1:10080").unwrap());
        config.options_mut().bind_to_port = false;
        let socket = ListenSocket::bind(&config).unwrap();
        assert!(!socket.is_bound());
        assert_eq!(socket.local_addr().port(), 10080);
        assert!(socket.try_clone_std().unwrap().is_none());
    }

    #[test]
    fn check() {
        let mut config =
            ListenerConfig::new("virtual", SocketAddr::from_str("127.0.0.1:0").unwrap());
        assert!(config.check().is_ok());
        config.options_mut().bind_to_port = false;
        assert!(config.check().is_err());
        config.set_address(SocketAddr::from_str("127.0.0.1:10080").unwrap());
        assert!(config.check().is_ok());
        config.options_mut().per_connection_buffer_limit_bytes = Some(0);
        assert!(config.check().is_err());
    }
}
