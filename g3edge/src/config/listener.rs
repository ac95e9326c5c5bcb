/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use g3_tls_context::ContextManager;

use super::{tls, yaml};
use crate::filter::{
    EchoFilterFactory, FilterChainFactory, TcpProxyConfig, TcpProxyFilterFactory,
};
use crate::listener::{ListenerConfig, ListenerOptions, TransportMode};

/// A configured listener together with its filter chain.
pub struct ListenerEntry {
    pub config: Arc<ListenerConfig>,
    pub filter: Arc<dyn FilterChainFactory>,
}

pub(super) fn load_all(
    v: &Yaml,
    lookup_dir: &Path,
    tls_manager: &ContextManager,
) -> anyhow::Result<Vec<ListenerEntry>> {
    let Yaml::Array(seq) = v else {
        return Err(anyhow!("yaml value type for listener should be 'array'"));
    };
    seq.iter()
        .enumerate()
        .map(|(i, v)| {
            parse_listener(v, lookup_dir, tls_manager)
                .context(format!("invalid listener config #{i}"))
        })
        .collect()
}

fn parse_listener(
    v: &Yaml,
    lookup_dir: &Path,
    tls_manager: &ContextManager,
) -> anyhow::Result<ListenerEntry> {
    let map = yaml::as_hash(v)?;
    let mut name: Option<String> = None;
    let mut address: Option<SocketAddr> = None;
    let mut backlog = None;
    let mut options = ListenerOptions::new();
    let mut proxy_protocol_read_timeout = None;
    let mut transport = TransportMode::Plain;
    let mut filter: Option<Arc<dyn FilterChainFactory>> = None;

    yaml::foreach_kv(map, |k, v| {
        match k {
            "name" => name = Some(yaml::as_string(v)?),
            "listen" | "address" => address = Some(yaml::as_socket_addr(v)?),
            "backlog" => backlog = Some(yaml::as_u32(v)?),
            "bind_to_port" => options.bind_to_port = yaml::as_bool(v)?,
            "use_proxy_protocol" => options.use_proxy_protocol = yaml::as_bool(v)?,
            "use_original_dst" => options.use_original_dst = yaml::as_bool(v)?,
            "per_connection_buffer_limit_bytes" => {
                options.per_connection_buffer_limit_bytes = Some(yaml::as_humanize_usize(v)?)
            }
            "proxy_protocol_read_timeout" => {
                proxy_protocol_read_timeout = Some(yaml::as_duration(v)?)
            }
            "tls" => {
                let config = tls::parse_tls_config(v, lookup_dir, |k, _| {
                    Err(anyhow!("invalid key {k} in server tls config"))
                })?;
                let ctx = tls_manager.create_server_context(&config)?;
                transport = TransportMode::Tls(ctx);
            }
            "filter" => filter = Some(parse_filter(v, lookup_dir, tls_manager)?),
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    })?;

    let name = name.ok_or_else(|| anyhow!("no name set"))?;
    let address = address.ok_or_else(|| anyhow!("no listen address set for {name}"))?;
    let filter = filter.ok_or_else(|| anyhow!("no filter set for {name}"))?;

    let mut config = ListenerConfig::new(&name, address);
    if let Some(backlog) = backlog {
        config.set_backlog(backlog);
    }
    config.set_options(options);
    if let Some(timeout) = proxy_protocol_read_timeout {
        config.set_proxy_protocol_read_timeout(timeout);
    }
    config.set_transport(transport);
    config.check()?;

    Ok(ListenerEntry {
        config: Arc::new(config),
        filter,
    })
}

fn parse_filter(
    v: &Yaml,
    lookup_dir: &Path,
    tls_manager: &ContextManager,
) -> anyhow::Result<Arc<dyn FilterChainFactory>> {
    let map = yaml::as_hash(v)?;
    let mut filter_type: Option<String> = None;
    let mut upstream: Option<SocketAddr> = None;
    let mut connect_timeout = None;
    let mut tls_client = None;
    let mut tls_name: Option<String> = None;

    yaml::foreach_kv(map, |k, v| {
        match k {
            "type" => filter_type = Some(yaml::normalize(&yaml::as_string(v)?)),
            "upstream" => upstream = Some(yaml::as_socket_addr(v)?),
            "connect_timeout" => connect_timeout = Some(yaml::as_duration(v)?),
            "tls" | "tls_client" => {
                let config = tls::parse_tls_config(v, lookup_dir, |k, v| match k {
                    "server_name" | "tls_name" => {
                        tls_name = Some(yaml::as_string(v)?);
                        Ok(())
                    }
                    _ => Err(anyhow!("invalid key {k} in client tls config")),
                })?;
                tls_client = Some(tls_manager.create_client_context(&config)?);
            }
            _ => return Err(anyhow!("invalid key {k}")),
        }
        Ok(())
    })?;

    match filter_type.as_deref() {
        Some("echo") => Ok(Arc::new(EchoFilterFactory::new())),
        Some("tcp_proxy") => {
            let upstream = upstream.ok_or_else(|| anyhow!("no upstream set for tcp_proxy"))?;
            let mut config = TcpProxyConfig::new(upstream);
            if let Some(timeout) = connect_timeout {
                config.set_connect_timeout(timeout);
            }
            if let Some(client) = tls_client {
                config.set_tls_client(client, tls_name);
            }
            Ok(Arc::new(TcpProxyFilterFactory::new(config)))
        }
        Some(t) => Err(anyhow!("unsupported filter type {t}")),
        None => Err(anyhow!("no filter type set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use yaml_rust::YamlLoader;

    fn doc(s: &str) -> Yaml {
        YamlLoader::load_from_str(s).unwrap().pop().unwrap()
    }

    #[test]
    fn echo_listener() {
        let v = doc(
            r#"
            - name: echo
              listen: "127.0.0.1:8080"
              backlog: 128
              use-proxy-protocol: true
              per_connection_buffer_limit_bytes: 32KiB
              proxy_protocol_read_timeout: 2s
              filter:
                type: echo
            "#,
        );
        let manager = ContextManager::new();
        let entries = load_all(&v, Path::new("/"), &manager).unwrap();
        assert_eq!(entries.len(), 1);
        let config = &entries[0].config;
        assert_eq!(config.name(), "echo");
        assert_eq!(config.address().port(), 8080);
        assert_eq!(config.backlog(), 128);
        assert!(config.options().use_proxy_protocol);
        assert!(config.options().bind_to_port);
        assert_eq!(config.options().per_connection_buffer_limit_bytes, Some(32 * 1024));
        assert_eq!(config.proxy_protocol_read_timeout(), Duration::from_secs(2));
        assert_eq!(entries[0].filter.name(), "echo");
    }

    #[test]
    fn tcp_proxy_listener() {
        let v = doc(
            r#"
            - name: proxy
              listen: 10080
              bind_to_port: false
              filter:
                type: tcp-proxy
                upstream: "127.0.0.1:80"
                connect_timeout: 500ms
            "#,
        );
        let manager = ContextManager::new();
        let entries = load_all(&v, Path::new("/"), &manager).unwrap();
        assert!(!entries[0].config.options().bind_to_port);
        assert_eq!(entries[0].filter.name(), "tcp_proxy");
    }

    #[test]
    fn invalid_listener() {
        let manager = ContextManager::new();
        let v = doc("- name: echo\n  listen: 8080");
        assert!(load_all(&v, Path::new("/"), &manager).is_err());

        let v = doc("- name: echo\n  listen: 8080\n  filter: {type: echo}\n  unknown: 1");
        assert!(load_all(&v, Path::new("/"), &manager).is_err());

        let v = doc("- name: echo\n  listen: 8080\n  filter: {type: http}");
        assert!(load_all(&v, Path::new("/"), &manager).is_err());

        let v = doc("- name: proxy\n  listen: 8080\n  filter: {type: tcp_proxy}");
        assert!(load_all(&v, Path::new("/"), &manager).is_err());

        let v = doc("name: echo");
        assert!(load_all(&v, Path::new("/"), &manager).is_err());
    }
}
