/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const PROXY_DATA_V1_MAX_LEN: usize = 108;
const MAGIC_HEADER: &[u8] = b"PROXY ";

#[derive(Debug, Error)]
pub enum ProxyProtocolReadError {
    #[error("read failed: {0:?}")]
    ReadFailed(#[from] io::Error),
    #[error("closed unexpected")]
    ClosedUnexpected,
    #[error("invalid magic header")]
    InvalidMagicHeader,
    #[error("invalid data length {0}")]
    InvalidDataLength(usize),
    #[error("invalid family")]
    InvalidFamily,
    #[error("invalid src addr")]
    InvalidSrcAddr,
    #[error("invalid dst addr")]
    InvalidDstAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyAddr {
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
}

/// Read a PROXY protocol v1 line from the head of `stream`.
///
/// Nothing after the line is consumed. Returns `None` for the `UNKNOWN`
/// family.
pub async fn read_proxy_protocol_v1<R>(
    stream: &mut R,
) -> Result<Option<ProxyAddr>, ProxyProtocolReadError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; PROXY_DATA_V1_MAX_LEN];
    let mut offset = 0usize;
    loop {
        if offset >= PROXY_DATA_V1_MAX_LEN {
            return Err(ProxyProtocolReadError::InvalidDataLength(offset));
        }
        let nr = stream.read(&mut buf[offset..offset + 1]).await?;
        if nr == 0 {
            return Err(ProxyProtocolReadError::ClosedUnexpected);
        }
        offset += 1;

        let check_len = offset.min(MAGIC_HEADER.len());
        if buf[..check_len] != MAGIC_HEADER[..check_len] {
            return Err(ProxyProtocolReadError::InvalidMagicHeader);
        }
        if buf[offset - 1] == b'\n' {
            break;
        }
    }

    let line = &buf[..offset];
    let Some(end) = memchr::memmem::find(line, b"\r\n") else {
        return Err(ProxyProtocolReadError::InvalidDataLength(offset));
    };
    parse_line(&line[MAGIC_HEADER.len()..end])
}

fn parse_line(data: &[u8]) -> Result<Option<ProxyAddr>, ProxyProtocolReadError> {
    let line = std::str::from_utf8(data).map_err(|_| ProxyProtocolReadError::InvalidFamily)?;
    let mut iter = line.split(' ');

    let family = iter.next().ok_or(ProxyProtocolReadError::InvalidFamily)?;
    let v6 = match family {
        "TCP4" => false,
        "TCP6" => true,
        "UNKNOWN" => return Ok(None),
        _ => return Err(ProxyProtocolReadError::InvalidFamily),
    };

    let src_ip = iter.next().ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;
    let dst_ip = iter.next().ok_or(ProxyProtocolReadError::InvalidDstAddr)?;
    let src_port = iter.next().ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;
    let dst_port = iter.next().ok_or(ProxyProtocolReadError::InvalidDstAddr)?;
    if iter.next().is_some() {
        return Err(ProxyProtocolReadError::InvalidDstAddr);
    }

    let (src_ip, dst_ip) = if v6 {
        let src = Ipv6Addr::from_str(src_ip).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;
        let dst = Ipv6Addr::from_str(dst_ip).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;
        (IpAddr::V6(src), IpAddr::V6(dst))
    } else {
        let src = Ipv4Addr::from_str(src_ip).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;
        let dst = Ipv4Addr::from_str(dst_ip).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;
        (IpAddr::V4(src), IpAddr::V4(dst))
    };
    let src_port = u16::from_str(src_port).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;
    let dst_port = u16::from_str(dst_port).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;

    Ok(Some(ProxyAddr {
        src_addr: SocketAddr::new(src_ip, src_port),
        dst_addr: SocketAddr::new(dst_ip, dst_port),
    }))
}
