/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

/// Session lifecycle notifications, delivered through the receiver
/// returned by [`crate::FtpClient::connect`].
///
/// Command-level failures are reported through each operation's
/// `Result`; only session-scoped conditions show up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpEvent {
    /// The server greeting text, before login.
    Greeting(String),
    /// Login, feature discovery and type negotiation all completed.
    Ready,
    /// The control connection drained and closed after `end()`.
    End,
    /// The control connection is gone, for any reason.
    Close { had_error: bool },
    /// A session-level error, e.g. an error reply with no command in
    /// flight or an unrecoverable socket failure.
    Error(String),
}
