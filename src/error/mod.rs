/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod command;
mod connect;
mod file;
mod parse;
mod reply;
mod tls;
mod transfer;

pub use command::FtpCommandError;
pub use connect::{FtpConnectError, FtpSessionOpenError};
pub use file::FtpFileStatError;
pub use parse::FtpTimeParseError;
pub use reply::FtpReplyError;
pub use tls::FtpTlsError;
pub use transfer::{FtpDataChannelError, FtpTransferError};
