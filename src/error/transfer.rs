/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use super::{FtpCommandError, FtpTlsError};

#[derive(Debug, Error)]
pub enum FtpDataChannelError {
    #[error("raw command error: {0}")]
    RawCommandError(FtpCommandError),
    #[error("service not available")]
    ServiceNotAvailable,
    #[error("invalid passive reply syntax")]
    InvalidPassiveReply,
    #[error("timed out while making data connection")]
    ConnectTimedOut,
    #[error("data connect failed: {0:?}")]
    ConnectFailed(io::Error),
    #[error("unable to find available port")]
    NoAvailablePort,
    #[error("no usable data connection mode")]
    NoUsableMode,
    #[error("tls setup failed: {0}")]
    TlsSetupFailed(#[from] FtpTlsError),
}

impl From<FtpCommandError> for FtpDataChannelError {
    fn from(e: FtpCommandError) -> Self {
        match e {
            FtpCommandError::ServiceNotAvailable => FtpDataChannelError::ServiceNotAvailable,
            _ => FtpDataChannelError::RawCommandError(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum FtpTransferError {
    #[error("data channel setup failed: {0}")]
    SetupFailed(#[from] FtpDataChannelError),
    #[error("raw command error: {0}")]
    RawCommandError(FtpCommandError),
    #[error("timeout to wait end reply")]
    TimeoutToWaitEndReply,
    #[error("data io failed: {0:?}")]
    DataIoFailed(io::Error),
    #[error("data transfer aborted")]
    Aborted,
}

impl From<FtpCommandError> for FtpTransferError {
    fn from(e: FtpCommandError) -> Self {
        match e {
            FtpCommandError::Aborted => FtpTransferError::Aborted,
            _ => FtpTransferError::RawCommandError(e),
        }
    }
}
