/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509, X509Builder, X509NameBuilder};

const DAY_SECS: i64 = 86400;

pub(crate) struct TestCert {
    pub(crate) cert: X509,
    pub(crate) key: PKey<Private>,
}

pub(crate) struct TestCertBuilder {
    serial: u32,
    dns: Vec<&'static str>,
    uri: Vec<&'static str>,
    not_before_offset: i64,
    not_after_offset: i64,
    ca: bool,
}

impl Default for TestCertBuilder {
    fn default() -> Self {
        TestCertBuilder {
            serial: 0x1234abcd,
            dns: Vec::new(),
            uri: Vec::new(),
            not_before_offset: -DAY_SECS,
            not_after_offset: 30 * DAY_SECS,
            ca: false,
        }
    }
}

impl TestCertBuilder {
    pub(crate) fn serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    pub(crate) fn dns(mut self, name: &'static str) -> Self {
        self.dns.push(name);
        self
    }

    pub(crate) fn uri(mut self, uri: &'static str) -> Self {
        self.uri.push(uri);
        self
    }

    /// validity window relative to now, in seconds
    pub(crate) fn validity(mut self, not_before: i64, not_after: i64) -> Self {
        self.not_before_offset = not_before;
        self.not_after_offset = not_after;
        self
    }

    pub(crate) fn ca(mut self) -> Self {
        self.ca = true;
        self
    }

    pub(crate) fn build(self) -> TestCert {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "g3 test").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(self.serial).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let not_before = Asn1Time::from_unix(now + self.not_before_offset).unwrap();
        let not_after = Asn1Time::from_unix(now + self.not_after_offset).unwrap();
        builder.set_not_before(&not_before).unwrap();
        builder.set_not_after(&not_after).unwrap();

        if self.ca {
            let ext = BasicConstraints::new().critical().ca().build().unwrap();
            builder.append_extension(ext).unwrap();
        }
        if !self.dns.is_empty() || !self.uri.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for v in &self.dns {
                san.dns(v);
            }
            for v in &self.uri {
                san.uri(v);
            }
            let ext = san.build(&builder.x509v3_context(None, None)).unwrap();
            builder.append_extension(ext).unwrap();
        }

        builder.sign(&key, MessageDigest::sha256()).unwrap();
        TestCert {
            cert: builder.build(),
            key,
        }
    }
}

pub(crate) fn days(n: i64) -> i64 {
    n * DAY_SECS
}

static TEMP_FILE_ID: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn temp_file(name: &str, content: &[u8]) -> PathBuf {
    let id = TEMP_FILE_ID.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "g3-tls-context-{}-{id}-{name}",
        std::process::id()
    ));
    std::fs::write(&path, content).unwrap();
    path
}

impl TestCert {
    pub(crate) fn write_cert(&self) -> PathBuf {
        temp_file("cert.pem", &self.cert.to_pem().unwrap())
    }

    pub(crate) fn write_key(&self) -> PathBuf {
        temp_file("key.pem", &self.key.private_key_to_pem_pkcs8().unwrap())
    }
}
