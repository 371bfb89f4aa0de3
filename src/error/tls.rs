/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FtpTlsError {
    #[error("no tls client config available")]
    NoClientConfig,
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),
    #[error("unable to secure connection(s)")]
    NegotiationRejected,
    #[error("tls handshake failed: {0:?}")]
    HandshakeFailed(io::Error),
}
