/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::anyhow;
use yaml_rust::Yaml;

use g3_tls_context::TlsContextConfig;

use super::yaml;

/// Parse a tls map. Keys not known to the context are handed to `extra`.
pub(super) fn parse_tls_config<F>(
    v: &Yaml,
    lookup_dir: &Path,
    mut extra: F,
) -> anyhow::Result<TlsContextConfig>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    let map = yaml::as_hash(v)?;
    let mut config = TlsContextConfig::empty();
    yaml::foreach_kv(map, |k, v| {
        match k {
            "cert_chain_file" | "certificate" => {
                config.set_cert_chain_file(yaml::as_file_path(v, lookup_dir)?)
            }
            "private_key_file" | "private_key" => {
                config.set_private_key_file(yaml::as_file_path(v, lookup_dir)?)
            }
            "ca_cert_file" | "ca_certificate" => {
                config.set_ca_cert_file(yaml::as_file_path(v, lookup_dir)?)
            }
            "cipher_suites" => config.set_cipher_suites(yaml::as_string(v)?),
            "verify_subject_alt_name" => {
                config.set_verify_subject_alt_name(yaml::as_string_list(v)?)
            }
            "handshake_timeout" => config.set_handshake_timeout(yaml::as_duration(v)?),
            _ => extra(k, v)?,
        }
        Ok(())
    })?;
    config
        .check()
        .map_err(|e| anyhow!("invalid tls config: {e}"))?;
    Ok(config)
}
