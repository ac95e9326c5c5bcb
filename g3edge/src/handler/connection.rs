/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::listener::{ListenerStats, ProxyAddr};

/// Accepted stream after the optional TLS handshake.
pub enum ConnectionStream {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl ConnectionStream {
    pub fn tcp_stream(&self) -> &TcpStream {
        match self {
            ConnectionStream::Plain(s) => s,
            ConnectionStream::Tls(s) => s.get_ref(),
        }
    }

    #[inline]
    pub fn is_tls(&self) -> bool {
        matches!(self, ConnectionStream::Tls(_))
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ConnectionStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ConnectionStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ConnectionStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ConnectionStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    worker_id: usize,
    listener_name: Arc<str>,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    sock_peer_addr: SocketAddr,
    sock_local_addr: SocketAddr,
}

impl ConnectionInfo {
    pub fn new(
        worker_id: usize,
        listener_name: Arc<str>,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        ConnectionInfo {
            worker_id,
            listener_name,
            client_addr: peer_addr,
            server_addr: local_addr,
            sock_peer_addr: peer_addr,
            sock_local_addr: local_addr,
        }
    }

    #[inline]
    pub fn set_proxy_addr(&mut self, addr: ProxyAddr) {
        self.client_addr = addr.src_addr;
        self.server_addr = addr.dst_addr;
    }

    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    #[inline]
    pub fn listener_name(&self) -> &str {
        &self.listener_name
    }

    #[inline]
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    #[inline]
    pub fn client_ip(&self) -> IpAddr {
        self.client_addr.ip()
    }

    #[inline]
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    #[inline]
    pub fn sock_peer_addr(&self) -> SocketAddr {
        self.sock_peer_addr
    }

    #[inline]
    pub fn sock_local_addr(&self) -> SocketAddr {
        self.sock_local_addr
    }
}

/// Keeps a connection counted for as long as it is alive.
pub(crate) struct ConnectionGuard {
    handler_count: Arc<AtomicU64>,
    stats: Arc<ListenerStats>,
}

impl ConnectionGuard {
    pub(crate) fn new(handler_count: Arc<AtomicU64>, stats: Arc<ListenerStats>) -> Self {
        handler_count.fetch_add(1, Ordering::Relaxed);
        stats.inc_active();
        ConnectionGuard {
            handler_count,
            stats,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.handler_count.fetch_sub(1, Ordering::Relaxed);
        self.stats.dec_active();
    }
}
