/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use humanize_rs::ParseError;
use humanize_rs::bytes::Bytes;
use yaml_rust::{Yaml, yaml};

pub(crate) fn normalize(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

pub(crate) fn foreach_kv<F>(table: &yaml::Hash, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    for (k, v) in table.iter() {
        if let Yaml::String(key) = k {
            f(&normalize(key), v).context(format!("failed to parse value of key {key}"))?;
        } else {
            return Err(anyhow!("key in hash should be string"));
        }
    }
    Ok(())
}

pub(crate) fn as_hash(v: &Yaml) -> anyhow::Result<&yaml::Hash> {
    v.as_hash()
        .ok_or_else(|| anyhow!("yaml value type should be 'map'"))
}

pub(crate) fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.to_string()),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Real(s) => Ok(s.to_string()),
        _ => Err(anyhow!(
            "yaml value type for string should be 'string' / 'integer' / 'real'"
        )),
    }
}

/// A single string or a list of strings.
pub(crate) fn as_string_list(v: &Yaml) -> anyhow::Result<Vec<String>> {
    match v {
        Yaml::Array(seq) => seq
            .iter()
            .enumerate()
            .map(|(i, v)| as_string(v).context(format!("invalid string value for #{i}")))
            .collect(),
        _ => Ok(vec![as_string(v)?]),
    }
}

pub(crate) fn as_bool(v: &Yaml) -> anyhow::Result<bool> {
    match v {
        Yaml::String(s) => match s.to_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(true),
            "off" | "false" | "no" | "0" => Ok(false),
            _ => Err(anyhow!("invalid yaml string value for 'bool': {s}")),
        },
        Yaml::Boolean(value) => Ok(*value),
        Yaml::Integer(i) => Ok(*i != 0),
        _ => Err(anyhow!(
            "yaml value type for 'bool' should be 'boolean' / 'string' / 'integer'"
        )),
    }
}

pub(crate) fn as_u32(v: &Yaml) -> anyhow::Result<u32> {
    match v {
        Yaml::String(s) => Ok(u32::from_str(s)?),
        Yaml::Integer(i) => Ok(u32::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'u32' should be 'string' or 'integer'"
        )),
    }
}

pub(crate) fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(s) => Ok(usize::from_str(s)?),
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'usize' should be 'string' or 'integer'"
        )),
    }
}

/// Byte size with optional unit, like `64KiB`.
pub(crate) fn as_humanize_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(value) => {
            let v = value.parse::<Bytes>()?;
            Ok(v.size())
        }
        Yaml::Integer(value) => Ok(usize::try_from(*value)?),
        _ => Err(anyhow!(
            "yaml value type for humanize usize should be 'string' or 'integer'"
        )),
    }
}

/// Duration with optional unit, plain numbers are seconds.
pub(crate) fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(value) => match humanize_rs::duration::parse(value) {
            Ok(v) => Ok(v),
            Err(ParseError::MissingUnit) => {
                if let Ok(u) = u64::from_str(value) {
                    Ok(Duration::from_secs(u))
                } else if let Ok(f) = f64::from_str(value) {
                    Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
                } else {
                    Err(anyhow!("invalid duration string"))
                }
            }
            Err(e) => Err(anyhow!("invalid humanize duration string: {e}")),
        },
        Yaml::Integer(value) => {
            if let Ok(u) = u64::try_from(*value) {
                Ok(Duration::from_secs(u))
            } else {
                Err(anyhow!("unsupported duration value"))
            }
        }
        Yaml::Real(s) => {
            let f = f64::from_str(s).map_err(|e| anyhow!("invalid f64 value: {e}"))?;
            Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
        }
        _ => Err(anyhow!(
            "yaml value type for humanize duration should be 'string' or 'integer' or 'real'"
        )),
    }
}

pub(crate) fn as_socket_addr(v: &Yaml) -> anyhow::Result<SocketAddr> {
    match v {
        Yaml::String(s) => {
            SocketAddr::from_str(s).map_err(|e| anyhow!("invalid socket address {s}: {e}"))
        }
        Yaml::Integer(port) => {
            let port = u16::try_from(*port)?;
            Ok(SocketAddr::new(std::net::Ipv6Addr::UNSPECIFIED.into(), port))
        }
        _ => Err(anyhow!(
            "yaml value type for 'socket address' should be 'string' or 'integer'"
        )),
    }
}

/// Existing file path, relative paths are looked up in `lookup_dir`.
pub(crate) fn as_file_path(v: &Yaml, lookup_dir: &Path) -> anyhow::Result<PathBuf> {
    let Yaml::String(path) = v else {
        return Err(anyhow!("yaml value type for path should be string"));
    };
    let path = PathBuf::from(path);
    let path = if path.is_absolute() {
        path
    } else {
        lookup_dir.join(path)
    };
    if !path.is_file() {
        return Err(anyhow!("path {} is not an existing file", path.display()));
    }
    path.canonicalize()
        .map_err(|e| anyhow!("invalid path {}: {e:?}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    fn doc(s: &str) -> Yaml {
        YamlLoader::load_from_str(s).unwrap().pop().unwrap()
    }

    #[test]
    fn kv_normalized() {
        let v = doc("Thread-Number: 2\nthread_stack_size: 1");
        let mut keys = Vec::new();
        foreach_kv(as_hash(&v).unwrap(), |k, _| {
            keys.push(k.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(keys, ["thread_number", "thread_stack_size"]);

        let v = doc("123: 1");
        assert!(foreach_kv(as_hash(&v).unwrap(), |_, _| Ok(())).is_err());
    }

    #[test]
    fn duration() {
        assert_eq!(
            as_duration(&doc("1m30s")).unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(as_duration(&doc("200ms")).unwrap(), Duration::from_millis(200));
        assert_eq!(as_duration(&doc("10")).unwrap(), Duration::from_secs(10));
        assert_eq!(as_duration(&doc("1.5")).unwrap(), Duration::from_millis(1500));
        assert!(as_duration(&doc("-1")).is_err());
        assert!(as_duration(&doc("1x")).is_err());
    }

    #[test]
    fn humanize_size() {
        assert_eq!(as_humanize_usize(&doc("64KiB")).unwrap(), 64 * 1024);
        assert_eq!(as_humanize_usize(&doc("1000")).unwrap(), 1000);
        assert!(as_humanize_usize(&doc("abc")).is_err());
    }

    #[test]
    fn socket_addr() {
        assert_eq!(
            as_socket_addr(&doc("127.0.0.1:8080")).unwrap(),
            SocketAddr::from_str("127.0.0.1:8080").unwrap()
        );
        assert_eq!(as_socket_addr(&doc("8080")).unwrap().port(), 8080);
        assert!(as_socket_addr(&doc("localhost")).is_err());
    }

    #[test]
    fn string_list() {
        assert_eq!(as_string_list(&doc("a")).unwrap(), ["a"]);
        assert_eq!(as_string_list(&doc("[a, b]")).unwrap(), ["a", "b"]);
        assert!(as_string_list(&doc("[a, {b: c}]")).is_err());
    }

    #[test]
    fn bool_value() {
        assert!(as_bool(&doc("on")).unwrap());
        assert!(!as_bool(&doc("false")).unwrap());
        assert!(as_bool(&doc("maybe")).is_err());
    }

    #[test]
    fn file_path() {
        let dir = std::env::temp_dir();
        let name = format!("g3edge-yaml-{}.txt", std::process::id());
        std::fs::write(dir.join(&name), b"x").unwrap();
        let path = as_file_path(&Yaml::String(name.clone()), &dir).unwrap();
        assert!(path.is_absolute());
        assert!(as_file_path(&Yaml::String(format!("{name}.missing")), &dir).is_err());
    }
}
