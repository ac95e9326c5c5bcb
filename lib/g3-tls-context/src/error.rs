/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::path::PathBuf;

use openssl::error::ErrorStack;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to read {kind} file {}: {source}", path.display())]
    ReadFile {
        kind: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("invalid {kind} pem data in file {}: {source}", path.display())]
    InvalidPem {
        kind: &'static str,
        path: PathBuf,
        source: ErrorStack,
    },
    #[error("no certificate found in file {}", .0.display())]
    EmptyCertFile(PathBuf),
    #[error("private key in file {} does not match the certificate", .0.display())]
    KeyMismatch(PathBuf),
    #[error("no usable cipher suite in list '{0}'")]
    NoCipherSuite(String),
    #[error("empty subject alt name entry at index {0}")]
    EmptySubjectAltName(usize),
    #[error("no {0} set")]
    MissingField(&'static str),
    #[error("openssl error: {0}")]
    Openssl(#[from] ErrorStack),
}
