/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use log::{info, warn};

use g3_watchdog::GuardDog;

use crate::drain::DrainManager;
use crate::filter::FilterChainFactory;
use crate::listener::{ListenSocket, ListenerConfig, ListenerDescriptor, ListenerStats};
use crate::thread_local::{ThreadContext, ThreadLocalRegistry};
use crate::trace::TraceMutator;
use crate::worker::{Worker, WorkerConfig, WorkerFactory};

const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Owner of all workers and of the listen sockets they share.
pub struct Controller {
    registry: Arc<ThreadLocalRegistry>,
    main_thread: Option<Arc<ThreadContext>>,
    guard_dog: Arc<GuardDog>,
    drain: Arc<DrainManager>,
    workers: Vec<Worker>,
    listeners: Vec<ListenerDescriptor>,
}

impl Controller {
    pub fn new(
        config: &WorkerConfig,
        guard_dog: Arc<GuardDog>,
        drain: Arc<DrainManager>,
        trace: Arc<dyn TraceMutator>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(ThreadLocalRegistry::new());
        let main_thread = registry.register_thread("main", None, true)?;

        let mut factory = WorkerFactory::new(config, registry.clone(), drain.clone(), trace);
        let mut workers = Vec::with_capacity(config.thread_number.get());
        for _ in 0..config.thread_number.get() {
            workers.push(factory.create_worker()?);
        }

        Ok(Controller {
            registry,
            main_thread: Some(main_thread),
            guard_dog,
            drain,
            workers,
            listeners: Vec::new(),
        })
    }

    /// Bind the listener once and add it to every worker.
    ///
    /// A failure on one worker is not rolled back on the workers before it.
    /// The listener is still recorded, so it is closed on drain and
    /// shutdown, and the caller should treat the error as fatal.
    pub fn add_listener(
        &mut self,
        config: Arc<ListenerConfig>,
        filter_chain_factory: Arc<dyn FilterChainFactory>,
    ) -> anyhow::Result<SocketAddr> {
        config.check()?;
        if self
            .listeners
            .iter()
            .any(|l| l.config.name() == config.name())
        {
            return Err(anyhow!("listener {} already exists", config.name()));
        }

        let socket = ListenSocket::bind(&config)
            .context(format!("failed to bind listener {} to {}", config.name(), config.address()))?;
        let local_addr = socket.local_addr();
        let desc = ListenerDescriptor {
            stats: Arc::new(ListenerStats::new(config.name())),
            config,
            socket: Arc::new(socket),
            filter_chain_factory,
        };
        for (i, worker) in self.workers.iter_mut().enumerate() {
            if let Err(e) = worker.add_listener(desc.clone()) {
                let e = e.context(format!(
                    "failed to add listener {} to {}",
                    desc.config.name(),
                    worker.name()
                ));
                if i > 0 {
                    self.listeners.push(desc);
                }
                return Err(e);
            }
        }
        info!(
            "listener {} ({}) added on {local_addr}",
            desc.config.name(),
            desc.filter_chain_factory.name()
        );
        self.listeners.push(desc);
        Ok(local_addr)
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        for worker in self.workers.iter_mut() {
            worker.start(&self.guard_dog)?;
        }
        info!("all {} workers started", self.workers.len());
        Ok(())
    }

    pub fn num_connections(&self) -> u64 {
        self.workers.iter().map(|w| w.num_connections()).sum()
    }

    pub fn listener_stats(&self) -> Vec<Arc<ListenerStats>> {
        self.listeners.iter().map(|l| l.stats.clone()).collect()
    }

    #[inline]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Stop accepting on all workers and let live connections drain.
    pub fn drain_listeners(&mut self) {
        self.drain.start_drain();
        for worker in self.workers.iter_mut() {
            worker.stop_listeners();
        }
        info!(
            "all listeners closed, {} connections left",
            self.num_connections()
        );
    }

    /// Wait until all connections are gone or the drain time is over.
    /// Returns whether everything drained.
    pub async fn wait_drained(&self) -> bool {
        loop {
            let left = self.num_connections();
            if left == 0 {
                info!("all connections drained");
                return true;
            }
            if self.drain.remaining().is_some_and(|d| d.is_zero()) {
                warn!("drain time is over with {left} connections left");
                return false;
            }
            tokio::time::sleep(DRAIN_CHECK_INTERVAL).await;
        }
    }

    /// Stop every worker, force closing what is left.
    pub fn shutdown(&mut self) {
        for worker in self.workers.iter_mut() {
            worker.stop();
        }
        if let Some(ctx) = self.main_thread.take() {
            self.registry.shutdown_thread(ctx);
        }
        self.registry.shutdown_global_threading();
        let left = self.registry.registered_names();
        if !left.is_empty() {
            warn!("threads still registered after shutdown: {left:?}");
        }
        info!("controller shutdown");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.main_thread.is_some() {
            self.shutdown();
        }
    }
}
