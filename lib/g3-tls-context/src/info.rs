/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use openssl::asn1::Asn1TimeRef;
use openssl::x509::X509Ref;

use crate::days_until_expiration;

fn serial_number(cert: &X509Ref) -> String {
    match cert.serial_number().to_bn() {
        Ok(bn) => match bn.to_hex_str() {
            Ok(s) => s.to_lowercase(),
            Err(_) => String::new(),
        },
        Err(_) => String::new(),
    }
}

pub(crate) fn cert_information(path: &Path, cert: &X509Ref, now: &Asn1TimeRef) -> String {
    format!(
        "Certificate Path: {}, Serial Number: {}, Days until Expiration: {}",
        path.display(),
        serial_number(cert),
        days_until_expiration(cert, now)
    )
}
