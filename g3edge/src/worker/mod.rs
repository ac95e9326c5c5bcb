/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::{Context, anyhow};
use log::{debug, error, info};

use g3_watchdog::GuardDog;

use crate::drain::DrainDecision;
use crate::event::{Dispatcher, DispatcherHandle, RunType};
use crate::handler::ConnectionHandler;
use crate::listener::ListenerDescriptor;
use crate::thread_local::ThreadLocalRegistry;
use crate::trace::TraceMutator;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub thread_number: NonZeroUsize,
    pub thread_stack_size: Option<usize>,
    pub max_io_events_per_tick: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            thread_number: std::thread::available_parallelism()
                .unwrap_or(NonZeroUsize::MIN),
            thread_stack_size: None,
            max_io_events_per_tick: None,
        }
    }
}

pub struct WorkerFactory {
    registry: Arc<ThreadLocalRegistry>,
    drain: Arc<dyn DrainDecision>,
    trace: Arc<dyn TraceMutator>,
    thread_stack_size: Option<usize>,
    max_io_events_per_tick: Option<usize>,
    next_id: usize,
}

impl WorkerFactory {
    pub fn new(
        config: &WorkerConfig,
        registry: Arc<ThreadLocalRegistry>,
        drain: Arc<dyn DrainDecision>,
        trace: Arc<dyn TraceMutator>,
    ) -> Self {
        WorkerFactory {
            registry,
            drain,
            trace,
            thread_stack_size: config.thread_stack_size,
            max_io_events_per_tick: config.max_io_events_per_tick,
            next_id: 0,
        }
    }

    pub fn create_worker(&mut self) -> anyhow::Result<Worker> {
        let id = self.next_id;
        let name = format!("worker#{id}");
        let dispatcher = Dispatcher::new(&name, self.max_io_events_per_tick)?;
        let thread = self.registry.register_thread(&name, Some(id), false)?;
        self.next_id += 1;

        let handler = ConnectionHandler::new(id, thread, self.drain.clone(), self.trace.clone());
        Ok(Worker {
            id,
            name,
            registry: self.registry.clone(),
            loop_handle: dispatcher.handle(),
            num_connections: handler.num_connections_handle(),
            dispatcher: Some(dispatcher),
            handler: Some(handler),
            stack_size: self.thread_stack_size,
            state: WorkerState::Idle,
            thread: None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// A thread running one event loop and one connection handler.
pub struct Worker {
    id: usize,
    name: String,
    registry: Arc<ThreadLocalRegistry>,
    loop_handle: DispatcherHandle<ConnectionHandler>,
    num_connections: Arc<AtomicU64>,
    dispatcher: Option<Dispatcher<ConnectionHandler>>,
    handler: Option<ConnectionHandler>,
    stack_size: Option<usize>,
    state: WorkerState,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn num_connections(&self) -> u64 {
        if self.state == WorkerState::Stopped {
            return 0;
        }
        self.num_connections.load(Ordering::Relaxed)
    }

    /// Add a listener. On a running worker the add is done on the worker
    /// thread, and this call waits for its result.
    pub fn add_listener(&mut self, desc: ListenerDescriptor) -> anyhow::Result<()> {
        match self.state {
            WorkerState::Stopped => Err(anyhow!("{} has been stopped", self.name)),
            WorkerState::Idle | WorkerState::Draining if self.thread.is_none() => {
                let (Some(dispatcher), Some(handler)) = (&self.dispatcher, &mut self.handler)
                else {
                    return Err(anyhow!("{} has no connection handler", self.name));
                };
                let _guard = dispatcher.enter();
                handler.add_listener(desc)
            }
            _ => {
                let (sender, receiver) = mpsc::sync_channel(1);
                self.loop_handle.post(move |handler: &mut ConnectionHandler| {
                    let _ = sender.send(handler.add_listener(desc));
                })?;
                receiver
                    .recv()
                    .map_err(|_| anyhow!("{} exited before adding the listener", self.name))?
            }
        }
    }

    pub fn start(&mut self, guard_dog: &Arc<GuardDog>) -> anyhow::Result<()> {
        if self.state != WorkerState::Idle {
            return Err(anyhow!("{} can not be started in state {:?}", self.name, self.state));
        }
        let (Some(dispatcher), Some(handler)) = (self.dispatcher.take(), self.handler.take())
        else {
            return Err(anyhow!("{} has no connection handler", self.name));
        };

        let mut builder = std::thread::Builder::new().name(self.name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let guard_dog = guard_dog.clone();
        let registry = self.registry.clone();
        let handle = builder
            .spawn(move || run_worker_thread(dispatcher, handler, guard_dog, registry))
            .context(format!("failed to spawn thread for {}", self.name))?;
        self.thread = Some(handle);
        self.state = WorkerState::Running;
        info!("{} started", self.name);
        Ok(())
    }

    /// Stop accepting new connections, and wait until the worker thread
    /// has closed its listeners.
    pub fn stop_listeners(&mut self) {
        match self.state {
            WorkerState::Idle => {
                if let Some(handler) = &mut self.handler {
                    handler.close_listeners();
                }
                self.state = WorkerState::Draining;
            }
            WorkerState::Running => {
                let (sender, receiver) = mpsc::sync_channel(1);
                let posted = self.loop_handle.post(move |handler: &mut ConnectionHandler| {
                    handler.close_listeners();
                    let _ = sender.send(());
                });
                match posted {
                    Ok(_) => {
                        if receiver.recv().is_err() {
                            debug!("{} exited before closing listeners", self.name);
                        }
                    }
                    Err(e) => debug!("{}: {e}", self.name),
                }
                self.state = WorkerState::Draining;
            }
            WorkerState::Draining | WorkerState::Stopped => {}
        }
    }

    pub fn stop(&mut self) {
        if self.state == WorkerState::Stopped {
            return;
        }
        if let Some(handle) = self.thread.take() {
            self.loop_handle.exit();
            if handle.join().is_err() {
                error!("{} panicked", self.name);
            }
        } else if let Some(mut handler) = self.handler.take() {
            handler.close_listeners();
            if let Some(ctx) = handler.release_thread_context() {
                self.registry.shutdown_thread(ctx);
            }
            drop(handler);
        }
        self.dispatcher = None;
        self.state = WorkerState::Stopped;
        info!("{} stopped", self.name);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker_thread(
    mut dispatcher: Dispatcher<ConnectionHandler>,
    mut handler: ConnectionHandler,
    guard_dog: Arc<GuardDog>,
    registry: Arc<ThreadLocalRegistry>,
) {
    let name = dispatcher.name().to_string();
    let watch_dog = guard_dog.create_watch_dog(std::thread::current().id(), &name);

    let touch_dog = watch_dog.clone();
    let touch_task = dispatcher.spawn(async move {
        let mut interval = tokio::time::interval(touch_dog.touch_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            touch_dog.touch();
        }
    });

    {
        let _guard = dispatcher.enter();
        handler.activate();
    }
    dispatcher.run(&mut handler, RunType::Block);

    guard_dog.stop_watching(&watch_dog);
    touch_task.abort();
    dispatcher.block_on(handler.close_connections());
    if let Some(ctx) = handler.release_thread_context() {
        registry.shutdown_thread(ctx);
    }
    drop(handler);
    debug!("{name} thread exit");
}
