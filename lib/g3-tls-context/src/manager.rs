/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex, Weak};

use crate::{ClientContext, ContextError, ServerContext, TlsContext, TlsContextConfig};

type TrackedContext = Weak<dyn TlsContext + Send + Sync>;

/// Creates TLS contexts and keeps track of the live ones for certificate
/// expiry reporting.
#[derive(Default)]
pub struct ContextManager {
    contexts: Mutex<Vec<TrackedContext>>,
}

impl ContextManager {
    pub fn new() -> Self {
        ContextManager::default()
    }

    fn track(&self, ctx: Arc<dyn TlsContext + Send + Sync>) {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.retain(|c| c.strong_count() > 0);
        contexts.push(Arc::downgrade(&ctx));
    }

    pub fn create_server_context(
        &self,
        config: &TlsContextConfig,
    ) -> Result<Arc<ServerContext>, ContextError> {
        let ctx = Arc::new(ServerContext::new(config)?);
        self.track(ctx.clone());
        Ok(ctx)
    }

    pub fn create_client_context(
        &self,
        config: &TlsContextConfig,
    ) -> Result<Arc<ClientContext>, ContextError> {
        let ctx = Arc::new(ClientContext::new(config)?);
        self.track(ctx.clone());
        Ok(ctx)
    }

    /// The nearest certificate expiry among all live contexts.
    pub fn days_until_first_cert_expires(&self) -> Option<u32> {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.retain(|c| c.strong_count() > 0);
        contexts
            .iter()
            .filter_map(|c| c.upgrade())
            .filter_map(|c| c.days_until_first_cert_expires())
            .min()
    }

    pub fn live_contexts(&self) -> usize {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.iter().filter(|c| c.strong_count() > 0).count()
    }
}
