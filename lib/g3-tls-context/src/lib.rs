/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::ContextError;

mod verify;
pub use verify::{dns_name_match, verify_subject_alt_name};

mod expiry;
pub use expiry::{days_until_expiration, days_until_first_cert_expires};

mod cipher;

mod info;

mod config;
pub use config::TlsContextConfig;

mod context;
pub use context::{ClientContext, ServerContext, TlsContext};

mod manager;
pub use manager::ContextManager;

#[cfg(test)]
mod test_util;
