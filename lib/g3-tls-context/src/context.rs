/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use openssl::asn1::Asn1Time;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{
    Ssl, SslAcceptor, SslConnector, SslContext, SslContextBuilder, SslMethod, SslRef,
    SslVerifyMode,
};
use openssl::x509::X509;
use openssl::x509::store::X509StoreBuilder;

use crate::cipher::filter_cipher_list;
use crate::info::cert_information;
use crate::{ContextError, TlsContextConfig, days_until_first_cert_expires, verify_subject_alt_name};

/// Certificate accounting shared by server and client contexts.
pub trait TlsContext {
    /// Days until the first of the configured CA and chain certificates
    /// expires, `None` if no certificate is configured.
    fn days_until_first_cert_expires(&self) -> Option<u32>;

    fn ca_cert_information(&self) -> String;

    fn cert_chain_information(&self) -> String;
}

struct CertFile {
    path: PathBuf,
    certs: Vec<X509>,
}

impl CertFile {
    fn load(kind: &'static str, path: &Path) -> Result<Self, ContextError> {
        let content = std::fs::read(path).map_err(|e| ContextError::ReadFile {
            kind,
            path: path.to_path_buf(),
            source: e,
        })?;
        let certs = X509::stack_from_pem(&content).map_err(|e| ContextError::InvalidPem {
            kind,
            path: path.to_path_buf(),
            source: e,
        })?;
        if certs.is_empty() {
            return Err(ContextError::EmptyCertFile(path.to_path_buf()));
        }
        Ok(CertFile {
            path: path.to_path_buf(),
            certs,
        })
    }

    fn information(&self) -> String {
        let Some(leaf) = self.certs.first() else {
            return String::new();
        };
        match Asn1Time::days_from_now(0) {
            Ok(now) => cert_information(&self.path, leaf, &now),
            Err(e) => {
                warn!("failed to get current asn1 time: {e}");
                String::new()
            }
        }
    }
}

fn load_private_key(path: &Path) -> Result<PKey<Private>, ContextError> {
    let content = std::fs::read(path).map_err(|e| ContextError::ReadFile {
        kind: "private key",
        path: path.to_path_buf(),
        source: e,
    })?;
    PKey::private_key_from_pem(&content).map_err(|e| ContextError::InvalidPem {
        kind: "private key",
        path: path.to_path_buf(),
        source: e,
    })
}

struct ContextCommon {
    ca_cert: Option<CertFile>,
    cert_chain: Option<CertFile>,
    private_key: Option<PKey<Private>>,
    verify_subject_alt_name: Vec<String>,
    handshake_timeout: Duration,
}

impl ContextCommon {
    fn load(config: &TlsContextConfig) -> Result<Self, ContextError> {
        config.check()?;

        let ca_cert = match &config.ca_cert_file {
            Some(path) => Some(CertFile::load("ca cert", path)?),
            None => None,
        };
        let cert_chain = match &config.cert_chain_file {
            Some(path) => Some(CertFile::load("cert chain", path)?),
            None => None,
        };
        let private_key = match &config.private_key_file {
            Some(path) => Some(load_private_key(path)?),
            None => None,
        };

        Ok(ContextCommon {
            ca_cert,
            cert_chain,
            private_key,
            verify_subject_alt_name: config.verify_subject_alt_name.clone(),
            handshake_timeout: config.handshake_timeout,
        })
    }

    fn apply(
        &self,
        builder: &mut SslContextBuilder,
        config: &TlsContextConfig,
    ) -> Result<(), ContextError> {
        if let Some(list) = &config.cipher_suites {
            let list = filter_cipher_list(list)?;
            builder.set_cipher_list(&list)?;
        }

        if let (Some(chain), Some(key)) = (&self.cert_chain, &self.private_key) {
            let mut certs = chain.certs.iter();
            if let Some(leaf) = certs.next() {
                builder.set_certificate(leaf)?;
            }
            for cert in certs {
                builder.add_extra_chain_cert(cert.clone())?;
            }
            if builder.set_private_key(key).is_err() || builder.check_private_key().is_err() {
                return Err(ContextError::KeyMismatch(chain.path.clone()));
            }
        }

        if let Some(ca) = &self.ca_cert {
            let mut store = X509StoreBuilder::new()?;
            for cert in &ca.certs {
                store.add_cert(cert.clone())?;
            }
            builder.set_cert_store(store.build());
        }
        Ok(())
    }

    fn verify_peer(&self, ssl: &SslRef) -> bool {
        if self.verify_subject_alt_name.is_empty() {
            return true;
        }
        match ssl.peer_certificate() {
            Some(cert) => verify_subject_alt_name(&cert, &self.verify_subject_alt_name),
            None => false,
        }
    }

    fn days_until_first_cert_expires(&self) -> Option<u32> {
        let now = match Asn1Time::days_from_now(0) {
            Ok(now) => now,
            Err(e) => {
                warn!("failed to get current asn1 time: {e}");
                return None;
            }
        };
        let certs = self
            .ca_cert
            .iter()
            .chain(self.cert_chain.iter())
            .flat_map(|f| f.certs.iter())
            .map(|c| &**c);
        days_until_first_cert_expires(certs, &now)
    }

    fn ca_cert_information(&self) -> String {
        self.ca_cert
            .as_ref()
            .map(|f| f.information())
            .unwrap_or_default()
    }

    fn cert_chain_information(&self) -> String {
        self.cert_chain
            .as_ref()
            .map(|f| f.information())
            .unwrap_or_default()
    }
}

/// Server side context used to terminate downstream TLS connections.
pub struct ServerContext {
    common: ContextCommon,
    ssl_context: SslContext,
}

impl ServerContext {
    /// A server context needs a certificate chain and its private key.
    ///
    /// If a CA certificate is set, the peer is required to present a
    /// certificate signed by it. Checking peer subject alt names needs a
    /// CA certificate, as no peer certificate is requested without it.
    pub fn new(config: &TlsContextConfig) -> Result<Self, ContextError> {
        if config.cert_chain_file.is_none() {
            return Err(ContextError::MissingField("cert chain file"));
        }
        if !config.verify_subject_alt_name.is_empty() && config.ca_cert_file.is_none() {
            return Err(ContextError::MissingField("ca cert file"));
        }
        let common = ContextCommon::load(config)?;

        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
        common.apply(&mut builder, config)?;
        if common.ca_cert.is_some() {
            builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
        }

        Ok(ServerContext {
            common,
            ssl_context: builder.build().into_context(),
        })
    }

    pub fn new_ssl(&self) -> Result<Ssl, ContextError> {
        Ok(Ssl::new(&self.ssl_context)?)
    }

    /// Check the subject alt names of the peer after the handshake.
    pub fn verify_peer(&self, ssl: &SslRef) -> bool {
        self.common.verify_peer(ssl)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        self.common.handshake_timeout
    }
}

impl TlsContext for ServerContext {
    fn days_until_first_cert_expires(&self) -> Option<u32> {
        self.common.days_until_first_cert_expires()
    }

    fn ca_cert_information(&self) -> String {
        self.common.ca_cert_information()
    }

    fn cert_chain_information(&self) -> String {
        self.common.cert_chain_information()
    }
}

/// Client side context used for upstream TLS connections.
pub struct ClientContext {
    common: ContextCommon,
    ssl_context: SslContext,
}

impl ClientContext {
    /// Without a CA certificate the system trust store is used.
    pub fn new(config: &TlsContextConfig) -> Result<Self, ContextError> {
        let common = ContextCommon::load(config)?;

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        common.apply(&mut builder, config)?;
        builder.set_verify(SslVerifyMode::PEER);

        Ok(ClientContext {
            common,
            ssl_context: builder.build().into_context(),
        })
    }

    pub fn new_ssl(&self, server_name: Option<&str>) -> Result<Ssl, ContextError> {
        let mut ssl = Ssl::new(&self.ssl_context)?;
        if let Some(name) = server_name {
            ssl.set_hostname(name)?;
            ssl.param_mut().set_host(name)?;
        }
        Ok(ssl)
    }

    pub fn verify_peer(&self, ssl: &SslRef) -> bool {
        self.common.verify_peer(ssl)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        self.common.handshake_timeout
    }
}

impl TlsContext for ClientContext {
    fn days_until_first_cert_expires(&self) -> Option<u32> {
        self.common.days_until_first_cert_expires()
    }

    fn ca_cert_information(&self) -> String {
        self.common.ca_cert_information()
    }

    fn cert_chain_information(&self) -> String {
        self.common.cert_chain_information()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestCertBuilder, days, temp_file};

    fn server_config() -> (TlsContextConfig, crate::test_util::TestCert) {
        let c = TestCertBuilder::default()
            .serial(0x10)
            .dns("server1.example.com")
            .validity(days(-1), days(40) + 60)
            .build();
        let mut config = TlsContextConfig::empty();
        config.set_cert_chain_file(c.write_cert());
        config.set_private_key_file(c.write_key());
        (config, c)
    }

    #[test]
    fn server_without_cert() {
        let config = TlsContextConfig::empty();
        assert!(matches!(
            ServerContext::new(&config),
            Err(ContextError::MissingField(_))
        ));
    }

    #[test]
    fn server_alt_name_without_ca() {
        let (mut config, _c) = server_config();
        config.set_verify_subject_alt_name(vec!["client.example.com".to_string()]);
        assert!(matches!(
            ServerContext::new(&config),
            Err(ContextError::MissingField("ca cert file"))
        ));

        let ca = TestCertBuilder::default().ca().build();
        config.set_ca_cert_file(ca.write_cert());
        assert!(ServerContext::new(&config).is_ok());
    }

    #[test]
    fn server_info() {
        let (config, _c) = server_config();
        let ctx = ServerContext::new(&config).unwrap();
        assert_eq!(ctx.days_until_first_cert_expires(), Some(40));
        assert_eq!(ctx.ca_cert_information(), "");
        let info = ctx.cert_chain_information();
        assert!(info.starts_with("Certificate Path: "));
        assert!(info.ends_with("Serial Number: 10, Days until Expiration: 40"));
        assert!(ctx.new_ssl().is_ok());
    }

    #[test]
    fn server_with_ca() {
        let (mut config, _c) = server_config();
        let ca = TestCertBuilder::default()
            .ca()
            .validity(days(-1), days(7) + 60)
            .build();
        config.set_ca_cert_file(ca.write_cert());
        let ctx = ServerContext::new(&config).unwrap();
        assert_eq!(ctx.days_until_first_cert_expires(), Some(7));
        assert!(ctx.ca_cert_information().ends_with("Days until Expiration: 7"));
    }

    #[test]
    fn expired_cert() {
        let c = TestCertBuilder::default()
            .validity(days(-30), days(-2))
            .build();
        let mut config = TlsContextConfig::empty();
        config.set_cert_chain_file(c.write_cert());
        config.set_private_key_file(c.write_key());
        let ctx = ServerContext::new(&config).unwrap();
        assert_eq!(ctx.days_until_first_cert_expires(), Some(0));
    }

    #[test]
    fn key_mismatch() {
        let (mut config, _c) = server_config();
        let other = TestCertBuilder::default().build();
        config.set_private_key_file(other.write_key());
        assert!(matches!(
            ServerContext::new(&config),
            Err(ContextError::KeyMismatch(_))
        ));
    }

    #[test]
    fn bad_files() {
        let (mut config, _c) = server_config();
        config.set_ca_cert_file(PathBuf::from("/nonexistent/g3-ca.pem"));
        assert!(matches!(
            ServerContext::new(&config),
            Err(ContextError::ReadFile { .. })
        ));

        let (mut config, _c) = server_config();
        config.set_cert_chain_file(temp_file("bad.pem", b"not a pem file"));
        assert!(matches!(
            ServerContext::new(&config),
            Err(ContextError::EmptyCertFile(_) | ContextError::InvalidPem { .. })
        ));
    }

    #[test]
    fn cipher_suites() {
        let (mut config, _c) = server_config();
        config.set_cipher_suites("ECDHE-ECDSA-AES128-GCM-SHA256:BOGUS".to_string());
        assert!(ServerContext::new(&config).is_ok());

        config.set_cipher_suites("BOGUS".to_string());
        assert!(matches!(
            ServerContext::new(&config),
            Err(ContextError::NoCipherSuite(_))
        ));
    }

    #[test]
    fn client_without_cert() {
        let ctx = ClientContext::new(&TlsContextConfig::empty()).unwrap();
        assert_eq!(ctx.days_until_first_cert_expires(), None);
        assert_eq!(ctx.ca_cert_information(), "");
        assert_eq!(ctx.cert_chain_information(), "");
        assert!(ctx.new_ssl(Some("server1.example.com")).is_ok());
    }
}
