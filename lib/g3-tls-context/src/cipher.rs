/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use log::warn;
use openssl::ssl::{SslContextBuilder, SslMethod};

use crate::ContextError;

fn is_modifier(token: &str) -> bool {
    token.starts_with(['!', '-', '+', '@'])
}

/// Drop the cipher suite names the ssl library does not know.
///
/// Each positive token is tried on its own, modifiers like `!aNULL` are
/// kept as is. Fails if no positive token is left.
pub(crate) fn filter_cipher_list(cipher_list: &str) -> Result<String, ContextError> {
    let mut tester = SslContextBuilder::new(SslMethod::tls())?;

    let mut kept = Vec::new();
    let mut has_cipher = false;
    for token in cipher_list.split(':') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if is_modifier(token) {
            kept.push(token);
            continue;
        }
        if tester.set_cipher_list(token).is_ok() {
            kept.push(token);
            has_cipher = true;
        } else {
            warn!("unsupported cipher suite '{token}' ignored");
        }
    }

    if !has_cipher {
        return Err(ContextError::NoCipherSuite(cipher_list.to_string()));
    }
    Ok(kept.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_unknown() {
        let v = filter_cipher_list(
            "ECDHE-RSA-AES128-GCM-SHA256:BOGUS:ECDHE-ECDSA-AES128-GCM-SHA256",
        )
        .unwrap();
        assert_eq!(
            v,
            "ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES128-GCM-SHA256"
        );
    }

    #[test]
    fn keep_modifier() {
        let v = filter_cipher_list("ECDHE-ECDSA-AES128-GCM-SHA256:!aNULL").unwrap();
        assert_eq!(v, "ECDHE-ECDSA-AES128-GCM-SHA256:!aNULL");
    }

    #[test]
    fn all_unknown() {
        assert!(matches!(
            filter_cipher_list("BOGUS1:BOGUS2"),
            Err(ContextError::NoCipherSuite(_))
        ));
        assert!(filter_cipher_list("!aNULL").is_err());
        assert!(filter_cipher_list("").is_err());
    }
}
