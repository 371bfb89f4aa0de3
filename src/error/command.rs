/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use super::FtpReplyError;

#[derive(Debug, Error)]
pub enum FtpCommandError {
    #[error("unable to send command: {0:?}")]
    SendFailed(io::Error),
    #[error("unable to recv reply: {0}")]
    RecvFailed(#[from] FtpReplyError),
    #[error("service not available")]
    ServiceNotAvailable,
    #[error("server replied {code} {text}")]
    Protocol { code: u16, text: String },
    #[error("unexpected reply code {1} to command {0}")]
    UnexpectedReplyCode(&'static str, u16),
    #[error("invalid reply {1} syntax to command {0}")]
    InvalidReplySyntax(&'static str, u16),
    #[error("data transfer aborted")]
    Aborted,
    #[error("session closed")]
    SessionClosed,
    #[error("wait reply for command {0} timed out")]
    ReplyTimedOut(&'static str),
}

impl FtpCommandError {
    pub(crate) fn from_reply(code: u16, text: String) -> Self {
        if code == 421 {
            FtpCommandError::ServiceNotAvailable
        } else {
            FtpCommandError::Protocol { code, text }
        }
    }

    /// true for 500 / 502 replies, the codes servers use for commands
    /// they do not implement
    pub fn is_not_implemented(&self) -> bool {
        matches!(
            self,
            FtpCommandError::Protocol {
                code: 500 | 502,
                ..
            }
        )
    }

    pub fn reply_code(&self) -> Option<u16> {
        match self {
            FtpCommandError::Protocol { code, .. } => Some(*code),
            FtpCommandError::UnexpectedReplyCode(_, code) => Some(*code),
            FtpCommandError::InvalidReplySyntax(_, code) => Some(*code),
            FtpCommandError::ServiceNotAvailable => Some(421),
            _ => None,
        }
    }
}
