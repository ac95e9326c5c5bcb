/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use log::warn;
use openssl::asn1::Asn1TimeRef;
use openssl::x509::X509Ref;

/// Whole days left before `cert` expires, floored, 0 if already expired.
pub fn days_until_expiration(cert: &X509Ref, now: &Asn1TimeRef) -> u32 {
    match now.diff(cert.not_after()) {
        Ok(diff) => {
            // days and secs always share the same sign
            if diff.days > 0 { diff.days as u32 } else { 0 }
        }
        Err(e) => {
            warn!("failed to compare certificate expire time: {e}");
            0
        }
    }
}

/// The smallest [`days_until_expiration`] value of `certs`, `None` if empty.
pub fn days_until_first_cert_expires<'a, I>(certs: I, now: &Asn1TimeRef) -> Option<u32>
where
    I: IntoIterator<Item = &'a X509Ref>,
{
    certs
        .into_iter()
        .map(|cert| days_until_expiration(cert, now))
        .min()
}
