/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use arc_swap::ArcSwap;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::drain::DrainDecision;
use crate::filter::{ConnectionContext, FilterChainFactory};
use crate::listener::{ListenerConfig, ListenerDescriptor, ListenerStats, TransportMode};
use crate::thread_local::ThreadContext;
use crate::trace::TraceMutator;

mod connection;
pub use connection::{ConnectionInfo, ConnectionStream};
use connection::ConnectionGuard;

/// Listener as seen by the connections it serves.
struct ListenerTarget {
    name: Arc<str>,
    local_addr: SocketAddr,
    config: Arc<ListenerConfig>,
    factory: Arc<dyn FilterChainFactory>,
    stats: Arc<ListenerStats>,
    stop: CancellationToken,
}

impl ListenerTarget {
    fn new(desc: ListenerDescriptor) -> Self {
        ListenerTarget {
            name: Arc::from(desc.config.name()),
            local_addr: desc.socket.local_addr(),
            config: desc.config,
            factory: desc.filter_chain_factory,
            stats: desc.stats,
            stop: CancellationToken::new(),
        }
    }
}

struct ListenerEntry {
    target: Arc<ListenerTarget>,
    listener: Option<TcpListener>,
}

/// Find the listener owning `local_addr`, exact address first, then the
/// wildcard address with the same port.
fn find_redirect_target(
    targets: &[Arc<ListenerTarget>],
    local_addr: SocketAddr,
) -> Option<Arc<ListenerTarget>> {
    let open = || targets.iter().filter(|t| !t.stop.is_cancelled());
    if let Some(t) = open().find(|t| t.local_addr == local_addr) {
        return Some(t.clone());
    }
    open()
        .find(|t| {
            t.local_addr.ip().is_unspecified()
                && t.local_addr.port() == local_addr.port()
                && t.local_addr.is_ipv4() == local_addr.is_ipv4()
        })
        .cloned()
}

/// State shared by the accept loops of one handler.
struct HandlerShared {
    worker_id: usize,
    drain: Arc<dyn DrainDecision>,
    trace: Arc<dyn TraceMutator>,
    num_connections: Arc<AtomicU64>,
    redirect_targets: ArcSwap<Vec<Arc<ListenerTarget>>>,
    conn_tracker: TaskTracker,
    force_close: CancellationToken,
}

impl HandlerShared {
    fn handle_accepted(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        accepted_by: &Arc<ListenerTarget>,
        thread: &Arc<ThreadContext>,
    ) {
        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                accepted_by.stats.add_failed();
                warn!(
                    "listener {}@worker#{}: failed to get local addr: {e}",
                    accepted_by.name, self.worker_id
                );
                return;
            }
        };
        accepted_by.stats.add_accepted();

        let target = if accepted_by.config.options().use_original_dst {
            find_redirect_target(&self.redirect_targets.load(), local_addr)
                .unwrap_or_else(|| accepted_by.clone())
        } else {
            accepted_by.clone()
        };
        if !Arc::ptr_eq(&target, accepted_by) {
            debug!(
                "listener {}@worker#{}: {peer_addr} redirected to listener {}",
                accepted_by.name, self.worker_id, target.name
            );
        }

        let guard = ConnectionGuard::new(self.num_connections.clone(), target.stats.clone());
        let ctx = ConnectionContext {
            info: ConnectionInfo::new(self.worker_id, target.name.clone(), peer_addr, local_addr),
            request_id: crate::trace::new_request_id(),
            drain: self.drain.clone(),
            trace: self.trace.clone(),
            thread: thread.clone(),
            buffer_limit: target.config.options().per_connection_buffer_limit_bytes,
        };
        let force_close = self.force_close.clone();
        self.conn_tracker.spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;

                _ = force_close.cancelled() => {
                    debug!("listener {}: force closed connection from {peer_addr}", target.name);
                }
                _ = serve_connection(stream, ctx, &target) => {}
            }
        });
    }
}

async fn serve_connection(stream: TcpStream, mut ctx: ConnectionContext, target: &ListenerTarget) {
    let options = target.config.options();
    let stats = &target.stats;

    if let Some(limit) = options.per_connection_buffer_limit_bytes {
        let sock = socket2::SockRef::from(&stream);
        if let Err(e) = sock
            .set_recv_buffer_size(limit)
            .and_then(|_| sock.set_send_buffer_size(limit))
        {
            debug!("listener {}: failed to set buffer size: {e}", target.name);
        }
    }

    let mut stream = stream;
    if options.use_proxy_protocol {
        match tokio::time::timeout(
            target.config.proxy_protocol_read_timeout(),
            crate::listener::read_proxy_protocol_v1(&mut stream),
        )
        .await
        {
            Ok(Ok(Some(addr))) => ctx.info.set_proxy_addr(addr),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                stats.add_by_proxy_protocol_error(&e);
                debug!(
                    "listener {}: proxy protocol from {}: {e}",
                    target.name,
                    ctx.info.sock_peer_addr()
                );
                return;
            }
            Err(_) => {
                stats.add_timeout();
                debug!(
                    "listener {}: proxy protocol from {} timed out",
                    target.name,
                    ctx.info.sock_peer_addr()
                );
                return;
            }
        }
    }

    let stream = match target.config.transport() {
        TransportMode::Plain => ConnectionStream::Plain(stream),
        TransportMode::Tls(tls) => {
            let ssl = match tls.new_ssl() {
                Ok(ssl) => ssl,
                Err(e) => {
                    stats.add_failed();
                    warn!("listener {}: failed to create ssl: {e}", target.name);
                    return;
                }
            };
            let mut tls_stream = match SslStream::new(ssl, stream) {
                Ok(s) => s,
                Err(e) => {
                    stats.add_failed();
                    warn!("listener {}: failed to create ssl stream: {e}", target.name);
                    return;
                }
            };
            match tokio::time::timeout(
                tls.handshake_timeout(),
                Pin::new(&mut tls_stream).accept(),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.add_failed();
                    debug!(
                        "listener {}: tls handshake with {} failed: {e}",
                        target.name,
                        ctx.info.client_addr()
                    );
                    return;
                }
                Err(_) => {
                    stats.add_timeout();
                    debug!(
                        "listener {}: tls handshake with {} timed out",
                        target.name,
                        ctx.info.client_addr()
                    );
                    return;
                }
            }
            if !tls.verify_peer(tls_stream.ssl()) {
                stats.add_verify_failed();
                info!(
                    "listener {}: peer certificate of {} rejected",
                    target.name,
                    ctx.info.client_addr()
                );
                return;
            }
            ConnectionStream::Tls(tls_stream)
        }
    };

    target.factory.run(stream, ctx).await;
}

async fn accept_loop(
    listener: TcpListener,
    target: Arc<ListenerTarget>,
    shared: Arc<HandlerShared>,
    thread: Arc<ThreadContext>,
) {
    let _alive = target.stats.add_running_runtime();
    info!(
        "listener {}@worker#{} started on {}",
        target.name, shared.worker_id, target.local_addr
    );
    loop {
        tokio::select! {
            biased;

            _ = target.stop.cancelled() => break,
            r = listener.accept() => {
                match r {
                    Ok((stream, peer_addr)) => {
                        if target.stop.is_cancelled() {
                            break;
                        }
                        shared.handle_accepted(stream, peer_addr, &target, &thread);
                    }
                    Err(e) => {
                        target.stats.add_failed();
                        warn!("listener {}@worker#{} accept: {e:?}", target.name, shared.worker_id);
                    }
                }
            }
        }
    }
    info!("listener {}@worker#{} stopped", target.name, shared.worker_id);
}

/// Listeners and live connections of one worker thread.
pub struct ConnectionHandler {
    thread: Option<Arc<ThreadContext>>,
    shared: Arc<HandlerShared>,
    listeners: Vec<ListenerEntry>,
    listen_tracker: TaskTracker,
    activated: bool,
    listeners_closed: bool,
}

impl ConnectionHandler {
    pub fn new(
        worker_id: usize,
        thread: Arc<ThreadContext>,
        drain: Arc<dyn DrainDecision>,
        trace: Arc<dyn TraceMutator>,
    ) -> Self {
        ConnectionHandler {
            thread: Some(thread),
            shared: Arc::new(HandlerShared {
                worker_id,
                drain,
                trace,
                num_connections: Arc::new(AtomicU64::new(0)),
                redirect_targets: ArcSwap::from_pointee(Vec::new()),
                conn_tracker: TaskTracker::new(),
                force_close: CancellationToken::new(),
            }),
            listeners: Vec::new(),
            listen_tracker: TaskTracker::new(),
            activated: false,
            listeners_closed: false,
        }
    }

    #[inline]
    pub fn worker_id(&self) -> usize {
        self.shared.worker_id
    }

    pub fn num_connections(&self) -> u64 {
        self.shared.num_connections.load(Ordering::Relaxed)
    }

    pub(crate) fn num_connections_handle(&self) -> Arc<AtomicU64> {
        self.shared.num_connections.clone()
    }

    #[inline]
    pub fn num_listeners(&self) -> usize {
        self.listeners.len()
    }

    /// Register a listener. Must be called within the runtime of the owning
    /// thread. Nothing is changed if an error is returned.
    pub fn add_listener(&mut self, desc: ListenerDescriptor) -> anyhow::Result<()> {
        let listener = match desc.socket.try_clone_std().map_err(|e| {
            anyhow!(
                "failed to duplicate listen socket of {}: {e}",
                desc.config.name()
            )
        })? {
            Some(std_listener) => Some(TcpListener::from_std(std_listener).map_err(|e| {
                anyhow!(
                    "failed to register listen socket of {}: {e}",
                    desc.config.name()
                )
            })?),
            None => None,
        };

        let target = Arc::new(ListenerTarget::new(desc));
        let mut targets = Vec::clone(&self.shared.redirect_targets.load());
        targets.push(target.clone());
        self.shared.redirect_targets.store(Arc::new(targets));

        if self.listeners_closed {
            info!(
                "listener {}@worker#{} added after listeners closed, will not accept",
                target.name,
                self.worker_id()
            );
            target.stop.cancel();
            self.listeners.push(ListenerEntry {
                target,
                listener: None,
            });
            return Ok(());
        }

        let mut entry = ListenerEntry { target, listener };
        if self.activated {
            self.spawn_accept_loop(&mut entry);
        }
        self.listeners.push(entry);
        Ok(())
    }

    fn spawn_accept_loop(&self, entry: &mut ListenerEntry) {
        let Some(listener) = entry.listener.take() else {
            return;
        };
        let Some(thread) = &self.thread else {
            return;
        };
        self.listen_tracker.spawn(accept_loop(
            listener,
            entry.target.clone(),
            self.shared.clone(),
            thread.clone(),
        ));
    }

    /// Start accepting on every bound listener. Must be called within the
    /// runtime of the owning thread.
    pub fn activate(&mut self) {
        if self.activated || self.listeners_closed {
            return;
        }
        self.activated = true;
        let mut listeners = std::mem::take(&mut self.listeners);
        for entry in listeners.iter_mut() {
            self.spawn_accept_loop(entry);
        }
        self.listeners = listeners;
    }

    /// Stop accepting on all listeners. Accepted connections are left alone.
    pub fn close_listeners(&mut self) {
        if self.listeners_closed {
            return;
        }
        self.listeners_closed = true;
        for entry in self.listeners.iter_mut() {
            entry.target.stop.cancel();
            entry.listener = None;
        }
        debug!("worker#{} closed all listeners", self.worker_id());
    }

    /// Close all listeners and every live connection, and wait until all of
    /// the spawned tasks have finished.
    pub async fn close_connections(&mut self) {
        self.close_listeners();
        self.shared.force_close.cancel();
        self.listen_tracker.close();
        self.shared.conn_tracker.close();
        self.listen_tracker.wait().await;
        self.shared.conn_tracker.wait().await;
        debug!(
            "worker#{} closed all connections, {} left",
            self.worker_id(),
            self.num_connections()
        );
    }

    /// Take the thread context out of the handler for teardown.
    pub fn release_thread_context(&mut self) -> Option<Arc<ThreadContext>> {
        self.thread.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use crate::filter::EchoFilterFactory;
    use crate::listener::ListenSocket;

    fn target(name: &str, addr: &str) -> Arc<ListenerTarget> {
        let mut config = ListenerConfig::new(name, SocketAddr::from_str(addr).unwrap());
        config.options_mut().bind_to_port = false;
        let socket = ListenSocket::bind(&config).unwrap();
        Arc::new(ListenerTarget::new(ListenerDescriptor {
            config: Arc::new(config),
            socket: Arc::new(socket),
            filter_chain_factory: Arc::new(EchoFilterFactory::new()),
            stats: Arc::new(ListenerStats::new(name)),
        }))
    }

    #[test]
    fn redirect_exact_first() {
        let targets = vec![
            target("any", "0.0.0.0:10080"),
            target("exact", "127.0.0.1:10080"),
        ];
        let addr = SocketAddr::from_str("127.0.0.1:10080").unwrap();
        let t = find_redirect_target(&targets, addr).unwrap();
        assert_eq!(&*t.name, "exact");

        let addr = SocketAddr::from_str("127.0.0.2:10080").unwrap();
        let t = find_redirect_target(&targets, addr).unwrap();
        assert_eq!(&*t.name, "any");

        let addr = SocketAddr::from_str("127.0.0.1:10081").unwrap();
        assert!(find_redirect_target(&targets, addr).is_none());
    }

    #[test]
    fn redirect_skip_closed() {
        let targets = vec![
            target("any", "0.0.0.0:10080"),
            target("exact", "127.0.0.1:10080"),
        ];
        targets[1].stop.cancel();
        let addr = SocketAddr::from_str("127.0.0.1:10080").unwrap();
        let t = find_redirect_target(&targets, addr).unwrap();
        assert_eq!(&*t.name, "any");

        targets[0].stop.cancel();
        assert!(find_redirect_target(&targets, addr).is_none());
    }
}
