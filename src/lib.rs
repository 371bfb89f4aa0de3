/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod client;
mod config;
mod connection;
mod control;
mod debug;
mod error;
mod event;
mod feature;
mod listing;
mod session;
mod transfer;

pub use client::FtpClient;
pub use config::{
    FtpClientConfig, FtpControlConfig, FtpPortRange, FtpSecureMode, FtpTlsConfig,
};
pub use connection::{BoxFtpStream, FtpConnectionProvider, FtpIoStream, TcpConnectionProvider};
pub use control::{FtpCommand, FtpReply, FtpTransferType};
pub use debug::{FTP_DEBUG_LOG_LEVEL, FTP_DEBUG_LOG_TARGET};
pub use error::{
    FtpCommandError, FtpConnectError, FtpDataChannelError, FtpFileStatError, FtpReplyError,
    FtpSessionOpenError, FtpTimeParseError, FtpTlsError, FtpTransferError,
};
pub use event::FtpEvent;
pub use feature::{FtpCommandSupport, FtpFeatureOverride, FtpServerFeature};
pub use listing::{FtpEntryRights, FtpEntryType, FtpFileEntry, FtpListEntry};
pub use session::FtpTlsStage;
pub use transfer::{FtpDataReader, FtpDataWriter};
