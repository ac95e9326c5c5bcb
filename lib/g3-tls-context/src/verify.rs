/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use openssl::x509::X509Ref;

/// Match a presented DNS name against a configured pattern.
///
/// Comparison is exact and case-sensitive. A pattern starting with `*.`
/// matches any name that ends with the rest of the pattern and has a
/// non-empty prefix before it, so `*.lyft.com` covers both `a.lyft.com`
/// and `a.b.lyft.com` but not `lyft.com`. A `*` not followed by `.` has
/// no special meaning.
pub fn dns_name_match(dns_name: &str, pattern: &str) -> bool {
    if dns_name.is_empty() || pattern.is_empty() {
        return false;
    }
    if dns_name == pattern {
        return true;
    }

    if pattern.starts_with("*.") {
        let suffix = &pattern[1..];
        return dns_name.len() > suffix.len() && dns_name.ends_with(suffix);
    }
    false
}

/// Check the DNS and URI subject alt names of `cert` against `allowed`.
///
/// DNS entries go through [`dns_name_match`], URI entries must be equal.
pub fn verify_subject_alt_name(cert: &X509Ref, allowed: &[String]) -> bool {
    let Some(names) = cert.subject_alt_names() else {
        return false;
    };

    for name in names.iter() {
        if let Some(dns) = name.dnsname() {
            if allowed.iter().any(|p| dns_name_match(dns, p)) {
                return true;
            }
        } else if let Some(uri) = name.uri() {
            if allowed.iter().any(|p| p == uri) {
                return true;
            }
        }
    }
    false
}
