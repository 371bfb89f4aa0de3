/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::feature::FtpFeatureOverride;

/// Transport security for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FtpSecureMode {
    #[default]
    Plain,
    /// AUTH TLS (falling back to AUTH SSL) after the greeting, then PBSZ/PROT;
    /// both control and data channels are encrypted.
    Explicit,
    /// Same upgrade flow, but data channels stay in the clear.
    ControlOnly,
    /// TLS handshake before the greeting, typically on port 990.
    Implicit,
}

#[derive(Clone, Debug)]
pub struct FtpTlsConfig {
    /// Shared by the control upgrade and every data connection, so the
    /// client session cache resumes the control channel's TLS session on
    /// data sockets.
    pub client: Arc<rustls::ClientConfig>,
    /// Overrides the configured host as the TLS server name.
    pub server_name: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FtpControlConfig {
    pub max_line_len: usize,
    pub max_multi_lines: usize,
    pub command_timeout: Duration,
}

impl Default for FtpControlConfig {
    fn default() -> Self {
        FtpControlConfig {
            max_line_len: 2048,
            max_multi_lines: 128,
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Local port range walked when binding the active mode listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FtpPortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for FtpPortRange {
    fn default() -> Self {
        FtpPortRange { start: 5000, end: 8000 }
    }
}

impl FtpPortRange {
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl FromStr for FtpPortRange {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s.split_once('-').ok_or("no '-' delimiter in port range")?;
        let start = u16::from_str(a.trim()).map_err(|_| "invalid start port")?;
        let end = u16::from_str(b.trim()).map_err(|_| "invalid end port")?;
        if start > end {
            return Err("start port is greater than end port");
        }
        Ok(FtpPortRange { start, end })
    }
}

#[derive(Clone, Debug)]
pub struct FtpClientConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub secure: FtpSecureMode,
    pub tls: Option<FtpTlsConfig>,
    pub connect_timeout: Duration,
    pub data_timeout: Duration,
    /// NOOP injection interval while the queue is idle.
    pub keepalive: Duration,
    pub control: FtpControlConfig,
    /// External address advertised by PORT/EPRT; active mode is only
    /// attempted when this is set.
    pub port_address: Option<IpAddr>,
    pub port_range: FtpPortRange,
    /// Local address the active listener binds to; defaults to the
    /// unspecified address of `port_address`'s family.
    pub bind_address: Option<IpAddr>,
    /// Applied on top of the server FEAT reply, in order.
    pub feature_overrides: Vec<(String, FtpFeatureOverride)>,
}

impl Default for FtpClientConfig {
    fn default() -> Self {
        FtpClientConfig {
            host: "localhost".to_string(),
            port: 21,
            user: "anonymous".to_string(),
            password: "anonymous@".to_string(),
            secure: FtpSecureMode::Plain,
            tls: None,
            connect_timeout: Duration::from_secs(10),
            data_timeout: Duration::from_secs(10),
            keepalive: Duration::from_secs(10),
            control: FtpControlConfig::default(),
            port_address: None,
            port_range: FtpPortRange::default(),
            bind_address: None,
            feature_overrides: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_from_str() {
        let r = FtpPortRange::from_str("5000-8000").unwrap();
        assert_eq!(r, FtpPortRange { start: 5000, end: 8000 });
        assert!(FtpPortRange::from_str("8000-5000").is_err());
        assert!(FtpPortRange::from_str("5000").is_err());
    }

    #[test]
    fn defaults() {
        let config = FtpClientConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 21);
        assert_eq!(config.user, "anonymous");
        assert_eq!(config.password, "anonymous@");
        assert_eq!(config.keepalive, Duration::from_secs(10));
        assert_eq!(config.port_range.iter().next(), Some(5000));
    }
}
