/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::net::{TcpListener, TcpStream};

use crate::config::FtpPortRange;
use crate::error::FtpDataChannelError;

/// Default bind address for the active listener: the unspecified address
/// of the advertised family.
fn default_bind_ip(external: IpAddr) -> IpAddr {
    match external {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Bind a single-use listener, walking the configured port range until a
/// port is free.
pub(crate) async fn bind_listener(
    external: IpAddr,
    bind_ip: Option<IpAddr>,
    range: FtpPortRange,
) -> Result<(TcpListener, u16), FtpDataChannelError> {
    let ip = bind_ip.unwrap_or_else(|| default_bind_ip(external));
    for port in range.iter() {
        match TcpListener::bind(SocketAddr::new(ip, port)).await {
            Ok(listener) => {
                debug!("active data listener bound to {ip}:{port}");
                return Ok((listener, port));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(FtpDataChannelError::ConnectFailed(e)),
        }
    }
    Err(FtpDataChannelError::NoAvailablePort)
}

/// Accept exactly one inbound data connection, then drop the listener.
pub(crate) async fn accept_one(
    listener: TcpListener,
    timeout: Duration,
) -> Result<TcpStream, FtpDataChannelError> {
    match tokio::time::timeout(timeout, listener.accept()).await {
        Ok(Ok((stream, peer))) => {
            debug!("active data connection accepted from {peer}");
            Ok(stream)
        }
        Ok(Err(e)) => Err(FtpDataChannelError::ConnectFailed(e)),
        Err(_) => Err(FtpDataChannelError::ConnectTimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walks_past_taken_ports() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().unwrap().port();
        if taken == u16::MAX {
            return;
        }
        let range = FtpPortRange { start: taken, end: taken + 1 };
        let (listener, port) = bind_listener(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            range,
        )
        .await
        .unwrap();
        assert_eq!(port, taken + 1);
        drop(listener);
    }

    #[tokio::test]
    async fn exhausted_range_is_an_error() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().unwrap().port();
        let range = FtpPortRange { start: taken, end: taken };
        let r = bind_listener(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            range,
        )
        .await;
        assert!(matches!(r, Err(FtpDataChannelError::NoAvailablePort)));
    }

    #[tokio::test]
    async fn accept_times_out() {
        let (listener, _port) = bind_listener(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            FtpPortRange { start: 0, end: 0 },
        )
        .await
        .unwrap();
        let r = accept_one(listener, Duration::from_millis(20)).await;
        assert!(matches!(r, Err(FtpDataChannelError::ConnectTimedOut)));
    }
}
