/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ContextError;

const MINIMAL_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlsContextConfig {
    pub(crate) cert_chain_file: Option<PathBuf>,
    pub(crate) private_key_file: Option<PathBuf>,
    pub(crate) ca_cert_file: Option<PathBuf>,
    pub(crate) cipher_suites: Option<String>,
    pub(crate) verify_subject_alt_name: Vec<String>,
    pub(crate) handshake_timeout: Duration,
}

impl Default for TlsContextConfig {
    fn default() -> Self {
        TlsContextConfig::empty()
    }
}

impl TlsContextConfig {
    pub fn empty() -> Self {
        TlsContextConfig {
            cert_chain_file: None,
            private_key_file: None,
            ca_cert_file: None,
            cipher_suites: None,
            verify_subject_alt_name: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn set_cert_chain_file(&mut self, path: PathBuf) {
        self.cert_chain_file = Some(path);
    }

    pub fn set_private_key_file(&mut self, path: PathBuf) {
        self.private_key_file = Some(path);
    }

    pub fn set_ca_cert_file(&mut self, path: PathBuf) {
        self.ca_cert_file = Some(path);
    }

    pub fn set_cipher_suites(&mut self, list: String) {
        self.cipher_suites = Some(list);
    }

    pub fn set_verify_subject_alt_name(&mut self, names: Vec<String>) {
        self.verify_subject_alt_name = names;
    }

    pub fn set_handshake_timeout(&mut self, timeout: Duration) {
        self.handshake_timeout = timeout.max(MINIMAL_HANDSHAKE_TIMEOUT);
    }

    #[inline]
    pub fn cert_chain_file(&self) -> Option<&Path> {
        self.cert_chain_file.as_deref()
    }

    #[inline]
    pub fn ca_cert_file(&self) -> Option<&Path> {
        self.ca_cert_file.as_deref()
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn check(&self) -> Result<(), ContextError> {
        for (i, name) in self.verify_subject_alt_name.iter().enumerate() {
            if name.is_empty() {
                return Err(ContextError::EmptySubjectAltName(i));
            }
        }
        if self.cert_chain_file.is_some() && self.private_key_file.is_none() {
            return Err(ContextError::MissingField("private key file"));
        }
        if self.private_key_file.is_some() && self.cert_chain_file.is_none() {
            return Err(ContextError::MissingField("cert chain file"));
        }
        Ok(())
    }
}
