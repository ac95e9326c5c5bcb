/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::anyhow;
use log::trace;
use tokio::runtime::{EnterGuard, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub type PostedTask<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunType {
    /// run until [`DispatcherHandle::exit`] is called
    Block,
    /// run all tasks already posted and the ready io events, then return
    NonBlock,
}

/// Cross thread handle of a [`Dispatcher`].
pub struct DispatcherHandle<C> {
    sender: mpsc::UnboundedSender<PostedTask<C>>,
    exit: Arc<watch::Sender<bool>>,
}

impl<C> Clone for DispatcherHandle<C> {
    fn clone(&self) -> Self {
        DispatcherHandle {
            sender: self.sender.clone(),
            exit: self.exit.clone(),
        }
    }
}

impl<C> DispatcherHandle<C> {
    /// Schedule `task` to run on the loop thread with the loop context.
    pub fn post<F>(&self, task: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.sender
            .send(Box::new(task))
            .map_err(|_| anyhow!("event loop has been dropped"))
    }

    /// Make the running [`RunType::Block`] loop return. Later runs return at once.
    pub fn exit(&self) {
        self.exit.send_replace(true);
    }
}

/// Single threaded event loop.
///
/// The loop owns a current thread tokio runtime. Spawned tasks make progress
/// only while one of [`Dispatcher::run`] or [`Dispatcher::block_on`] is being
/// called, which happens on the thread that owns the dispatcher.
pub struct Dispatcher<C> {
    name: String,
    runtime: Runtime,
    receiver: mpsc::UnboundedReceiver<PostedTask<C>>,
    exit: watch::Receiver<bool>,
    handle: DispatcherHandle<C>,
}

impl<C> Dispatcher<C> {
    pub fn new(name: &str, max_io_events_per_tick: Option<usize>) -> anyhow::Result<Self> {
        let mut builder = tokio::runtime::Builder::new_current_thread();
        builder.enable_all();
        if let Some(n) = max_io_events_per_tick {
            builder.max_io_events_per_tick(n);
        }
        let runtime = builder
            .build()
            .map_err(|e| anyhow!("failed to create tokio runtime for {name}: {e}"))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let (exit_sender, exit) = watch::channel(false);
        Ok(Dispatcher {
            name: name.to_string(),
            runtime,
            receiver,
            exit,
            handle: DispatcherHandle {
                sender,
                exit: Arc::new(exit_sender),
            },
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> DispatcherHandle<C> {
        self.handle.clone()
    }

    /// Enter the runtime context, needed to register io resources.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn run(&mut self, ctx: &mut C, run_type: RunType) {
        let Dispatcher {
            name,
            runtime,
            receiver,
            exit,
            ..
        } = self;

        match run_type {
            RunType::Block => {
                trace!("{name} entering dispatch loop");
                runtime.block_on(async {
                    loop {
                        if *exit.borrow_and_update() {
                            break;
                        }
                        tokio::select! {
                            biased;

                            r = exit.changed() => {
                                if r.is_err() {
                                    break;
                                }
                            }
                            task = receiver.recv() => {
                                match task {
                                    Some(task) => task(ctx),
                                    None => break,
                                }
                            }
                        }
                    }
                });
                trace!("{name} exited dispatch loop");
            }
            RunType::NonBlock => {
                runtime.block_on(async {
                    while let Ok(task) = receiver.try_recv() {
                        task(ctx);
                    }
                    tokio::task::yield_now().await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn post_non_block() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new("test", None).unwrap();
        let handle = dispatcher.handle();
        handle.post(|v| v.push(1)).unwrap();
        handle.post(|v| v.push(2)).unwrap();

        let mut ctx = Vec::new();
        dispatcher.run(&mut ctx, RunType::NonBlock);
        assert_eq!(ctx, vec![1, 2]);

        dispatcher.run(&mut ctx, RunType::NonBlock);
        assert_eq!(ctx, vec![1, 2]);
    }

    #[test]
    fn exit_from_other_thread() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new("test", None).unwrap();
        let handle = dispatcher.handle();

        let thread = std::thread::spawn(move || {
            let mut ctx = Vec::new();
            dispatcher.run(&mut ctx, RunType::Block);
            // exit is sticky
            dispatcher.run(&mut ctx, RunType::Block);
            ctx
        });

        handle.post(|v| v.push(7)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handle.exit();
        let ctx = thread.join().unwrap();
        assert_eq!(ctx, vec![7]);
    }

    #[test]
    fn exit_from_task() {
        let mut dispatcher = Dispatcher::<u32>::new("test", None).unwrap();
        let handle = dispatcher.handle();
        let exit_handle = dispatcher.handle();
        handle.post(|v| *v += 1).unwrap();
        handle.post(move |_| exit_handle.exit()).unwrap();

        let mut ctx = 0;
        dispatcher.run(&mut ctx, RunType::Block);
        assert_eq!(ctx, 1);
    }

    #[test]
    fn spawned_task_progress() {
        let dispatcher = Dispatcher::<()>::new("test", None).unwrap();
        let task = dispatcher.spawn(async { 40 + 2 });
        assert_eq!(dispatcher.block_on(task).unwrap(), 42);
    }

    #[test]
    fn post_after_drop() {
        let dispatcher = Dispatcher::<()>::new("test", None).unwrap();
        let handle = dispatcher.handle();
        drop(dispatcher);
        assert!(handle.post(|_| {}).is_err());
    }
}
