/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use super::{FtpCommandError, FtpTimeParseError, FtpTransferError};

#[derive(Debug, Error)]
pub enum FtpFileStatError {
    #[error("raw command error: {0}")]
    RawCommandError(#[from] FtpCommandError),
    #[error("listing fallback failed: {0}")]
    TransferFailed(#[from] FtpTransferError),
    #[error("file unavailable")]
    FileUnavailable,
    #[error("not a regular file")]
    NotAFile,
    #[error("invalid {0} reply from server")]
    InvalidServerReply(&'static str),
    #[error("{0}")]
    InvalidTimeFormat(FtpTimeParseError),
}
