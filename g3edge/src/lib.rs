/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub mod config;
pub mod drain;
pub mod event;
pub mod filter;
pub mod handler;
pub mod listener;
pub mod log;
pub mod opts;
pub mod server;
pub mod signal;
pub mod thread_local;
pub mod trace;
pub mod worker;

mod build;
