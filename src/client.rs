/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex as TokioMutex};

use crate::config::{FtpClientConfig, FtpSecureMode};
use crate::connection::{FtpConnectionProvider, TcpConnectionProvider};
use crate::control::{FtpCommand, FtpControlHandle, FtpReply, FtpTransferType};
use crate::error::{
    FtpCommandError, FtpConnectError, FtpFileStatError, FtpTransferError,
};
use crate::event::FtpEvent;
use crate::feature::{FtpCommandSupport, FtpServerFeature};
use crate::listing::{
    parse_list_line, parse_machine_line, FtpEntryType, FtpFileEntry, FtpListEntry, FtpListFormat,
};
use crate::session::{open_session, run_command, FtpTlsStage};
use crate::transfer::{
    wait_preliminary, DataBroker, FtpDataReader, FtpDataWriter, FtpTlsContext, TransferParts,
};

struct ClientInner {
    config: FtpClientConfig,
    control: FtpControlHandle,
    provider: TokioMutex<Box<dyn FtpConnectionProvider>>,
    feature: FtpServerFeature,
    support: StdMutex<FtpCommandSupport>,
    control_peer: SocketAddr,
    tls: Option<FtpTlsContext>,
    tls_stage: FtpTlsStage,
    welcome: String,
    transfer_type: StdMutex<FtpTransferType>,
    data_lock: Arc<TokioMutex<()>>,
}

/// A single FTP(S) session. Cheap to clone; all clones share the same
/// control connection, and data transfers are serialized among them.
#[derive(Clone)]
pub struct FtpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for FtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient").finish_non_exhaustive()
    }
}

impl FtpClient {
    /// Connect over plain TCP and drive the session to `ready`.
    pub async fn connect(
        config: FtpClientConfig,
    ) -> Result<(FtpClient, mpsc::UnboundedReceiver<FtpEvent>), FtpConnectError> {
        Self::connect_with_provider(config, Box::new(TcpConnectionProvider)).await
    }

    /// Connect through a custom connection provider.
    pub async fn connect_with_provider(
        config: FtpClientConfig,
        mut provider: Box<dyn FtpConnectionProvider>,
    ) -> Result<(FtpClient, mpsc::UnboundedReceiver<FtpEvent>), FtpConnectError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = open_session(&config, provider.as_mut(), events_tx).await?;
        let inner = ClientInner {
            config,
            control: session.handle,
            provider: TokioMutex::new(provider),
            feature: session.feature,
            support: session.support,
            control_peer: session.control_peer,
            tls: session.tls,
            tls_stage: session.tls_stage,
            welcome: session.welcome,
            transfer_type: StdMutex::new(FtpTransferType::Image),
            data_lock: Arc::new(TokioMutex::new(())),
        };
        Ok((FtpClient { inner: Arc::new(inner) }, events_rx))
    }

    /// The server greeting text.
    pub fn welcome_msg(&self) -> &str {
        &self.inner.welcome
    }

    pub fn server_feature(&self) -> &FtpServerFeature {
        &self.inner.feature
    }

    pub fn tls_stage(&self) -> FtpTlsStage {
        self.inner.tls_stage
    }

    /// Whether `verb` was answered 500/502 earlier in this session and
    /// will not be retried.
    pub fn command_known_unsupported(&self, verb: &str) -> bool {
        self.known_unsupported(verb)
    }

    async fn command(
        &self,
        cmd: &FtpCommand,
        promote: bool,
    ) -> Result<FtpReply, FtpCommandError> {
        run_command(&self.inner.control, &self.inner.config, cmd, promote).await
    }

    fn known_unsupported(&self, verb: &str) -> bool {
        self.inner.support.lock().unwrap().known_unsupported(verb)
    }

    fn mark_unsupported(&self, verb: &'static str) {
        self.inner.support.lock().unwrap().mark_unsupported(verb);
    }

    // ---- type negotiation ----

    async fn set_transfer_type(&self, t: FtpTransferType) -> Result<(), FtpCommandError> {
        if *self.inner.transfer_type.lock().unwrap() == t {
            return Ok(());
        }
        let reply = self.command(&FtpCommand::Type(t), false).await?;
        if reply.group() != 2 {
            return Err(FtpCommandError::UnexpectedReplyCode("TYPE", reply.code));
        }
        *self.inner.transfer_type.lock().unwrap() = t;
        Ok(())
    }

    /// Switch to ASCII type. Line ending conversion is left to the
    /// server.
    pub async fn ascii(&self) -> Result<(), FtpCommandError> {
        self.set_transfer_type(FtpTransferType::Ascii).await
    }

    pub async fn binary(&self) -> Result<(), FtpCommandError> {
        self.set_transfer_type(FtpTransferType::Image).await
    }

    // ---- directory operations ----

    pub async fn cwd(&self, path: &str) -> Result<(), FtpCommandError> {
        self.cwd_inner(path, false).await
    }

    async fn cwd_inner(&self, path: &str, promote: bool) -> Result<(), FtpCommandError> {
        let reply = self
            .command(&FtpCommand::Cwd(path.to_string()), promote)
            .await?;
        if reply.group() != 2 {
            return Err(FtpCommandError::UnexpectedReplyCode("CWD", reply.code));
        }
        Ok(())
    }

    /// Current working directory, from the quoted path in the 257 reply.
    /// Returns `None` after falling back on servers without PWD.
    pub async fn pwd(&self) -> Result<Option<String>, FtpCommandError> {
        if self.known_unsupported("PWD") {
            self.cwd_inner(".", true).await?;
            return Ok(None);
        }
        match self.command(&FtpCommand::Pwd, false).await {
            Ok(reply) => match extract_quoted(&reply.text) {
                Some(path) => Ok(Some(path)),
                None => Err(FtpCommandError::InvalidReplySyntax("PWD", reply.code)),
            },
            Err(e) if e.is_not_implemented() => {
                self.mark_unsupported("PWD");
                self.cwd_inner(".", true).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Change to the parent directory, falling back to `CWD ..` on
    /// servers without CDUP.
    pub async fn cdup(&self) -> Result<(), FtpCommandError> {
        if self.known_unsupported("CDUP") {
            return self.cwd_inner("..", true).await;
        }
        match self.command(&FtpCommand::Cdup, false).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_implemented() => {
                self.mark_unsupported("CDUP");
                self.cwd_inner("..", true).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), FtpCommandError> {
        if !recursive {
            self.command(&FtpCommand::Mkd(path.to_string()), false)
                .await?;
            return Ok(());
        }

        let original = self.pwd().await?;
        let result = self.mkdir_walk(path).await;
        // restore the working directory even when a segment failed
        if let Some(original) = original {
            let restore = self.cwd(&original).await;
            if result.is_ok() {
                restore?;
            }
        }
        result
    }

    async fn mkdir_walk(&self, path: &str) -> Result<(), FtpCommandError> {
        if path.starts_with('/') {
            self.cwd("/").await?;
        }
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match self.cwd(segment).await {
                Ok(()) => continue,
                Err(FtpCommandError::Protocol { code: 550, .. }) => {
                    self.command(&FtpCommand::Mkd(segment.to_string()), false)
                        .await?;
                    self.cwd(segment).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FtpTransferError> {
        if recursive {
            self.rmdir_recursive(path).await?;
            return Ok(());
        }
        self.command(&FtpCommand::Rmd(path.to_string()), false)
            .await?;
        Ok(())
    }

    fn rmdir_recursive<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), FtpTransferError>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.list(Some(path), false).await?;
            for entry in &entries {
                let name = entry.name();
                if name == "." || name == ".." {
                    continue;
                }
                let child = join_path(path, name);
                let is_dir = entry
                    .as_entry()
                    .map(|e| e.entry_type == FtpEntryType::Directory)
                    .unwrap_or(false);
                if is_dir {
                    self.rmdir_recursive(&child).await?;
                } else {
                    self.delete(&child).await?;
                }
            }
            self.command(&FtpCommand::Rmd(path.to_string()), false)
                .await?;
            Ok(())
        })
    }

    pub async fn delete(&self, path: &str) -> Result<(), FtpCommandError> {
        self.command(&FtpCommand::Dele(path.to_string()), false)
            .await?;
        Ok(())
    }

    /// RNFR then RNTO; the sequel is promoted so nothing can slip in
    /// between the two.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), FtpCommandError> {
        let reply = self
            .command(&FtpCommand::Rnfr(from.to_string()), false)
            .await?;
        if reply.group() != 3 {
            return Err(FtpCommandError::UnexpectedReplyCode("RNFR", reply.code));
        }
        self.command(&FtpCommand::Rnto(to.to_string()), true)
            .await?;
        Ok(())
    }

    // ---- simple passthroughs ----

    pub async fn site(&self, cmd: &str) -> Result<(u16, String), FtpCommandError> {
        let reply = self.command(&FtpCommand::Site(cmd.to_string()), false).await?;
        Ok((reply.code, reply.text))
    }

    pub async fn status(&self) -> Result<String, FtpCommandError> {
        let reply = self.command(&FtpCommand::Stat, false).await?;
        Ok(reply.text)
    }

    /// The first token of the SYST reply, e.g. `UNIX`.
    pub async fn system(&self) -> Result<String, FtpCommandError> {
        let reply = self.command(&FtpCommand::Syst, false).await?;
        Ok(reply
            .text
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    /// Re-initialize the session to its pre-login state.
    pub async fn logout(&self) -> Result<(), FtpCommandError> {
        self.command(&FtpCommand::Rein, false).await?;
        Ok(())
    }

    /// Request that the next transfer starts at `offset`.
    pub async fn restart(&self, offset: u64) -> Result<(), FtpCommandError> {
        let reply = self.command(&FtpCommand::Rest(offset), false).await?;
        if reply.group() != 3 {
            return Err(FtpCommandError::UnexpectedReplyCode("REST", reply.code));
        }
        Ok(())
    }

    /// Abort the transfer in progress. The request is always promoted to
    /// the queue front; `immediate` is accepted for API compatibility and
    /// both values behave the same.
    pub async fn abort(&self, immediate: bool) -> Result<(), FtpCommandError> {
        let _ = immediate;
        self.command(&FtpCommand::Abor, true).await?;
        Ok(())
    }

    // ---- file metadata ----

    /// File size via SIZE, falling back to `file_info` on servers
    /// without it.
    pub async fn size(&self, path: &str) -> Result<u64, FtpFileStatError> {
        let try_size = !self.known_unsupported("SIZE")
            && (self.inner.feature.support_file_size() || self.inner.feature.is_empty());
        if try_size {
            match self.command(&FtpCommand::Size(path.to_string()), false).await {
                Ok(reply) => {
                    return reply
                        .text
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| FtpFileStatError::InvalidServerReply("SIZE"));
                }
                Err(e) if e.is_not_implemented() => self.mark_unsupported("SIZE"),
                Err(e) => return Err(e.into()),
            }
        }

        let entry = self.file_info(path).await?;
        if entry.entry_type == FtpEntryType::Directory {
            return Err(FtpFileStatError::NotAFile);
        }
        entry.size.ok_or(FtpFileStatError::FileUnavailable)
    }

    /// Last modification time via MDTM, falling back to `file_info`.
    pub async fn last_mod(&self, path: &str) -> Result<DateTime<Utc>, FtpFileStatError> {
        if !self.known_unsupported("MDTM") {
            match self.command(&FtpCommand::Mdtm(path.to_string()), false).await {
                Ok(reply) => {
                    return crate::listing::time_val::parse_from_str(reply.text.trim())
                        .map_err(FtpFileStatError::InvalidTimeFormat);
                }
                Err(e) if e.is_not_implemented() => self.mark_unsupported("MDTM"),
                Err(e) => return Err(e.into()),
            }
        }
        let entry = self.file_info(path).await?;
        entry.mtime.ok_or(FtpFileStatError::FileUnavailable)
    }

    /// A single entry's facts, preferring MLST and falling back to a
    /// LIST of the path.
    pub async fn file_info(&self, path: &str) -> Result<FtpFileEntry, FtpFileStatError> {
        if self.inner.feature.support_machine_list() && !self.known_unsupported("MLST") {
            match self.command(&FtpCommand::Mlst(path.to_string()), false).await {
                Ok(reply) => {
                    for line in reply.text.lines().skip(1) {
                        if let Some(entry) = parse_machine_line(line.trim_start()) {
                            return Ok(entry);
                        }
                    }
                    return Err(FtpFileStatError::FileUnavailable);
                }
                Err(e) if e.is_not_implemented() => self.mark_unsupported("MLST"),
                Err(e) => return Err(e.into()),
            }
        }

        let entries = self.list(Some(path), false).await?;
        let base = basename(path);
        let mut first = None;
        for entry in entries {
            if let FtpListEntry::Entry(e) = entry {
                if e.name == base || e.name == "." || e.name == path {
                    return Ok(e);
                }
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
        first.ok_or(FtpFileStatError::FileUnavailable)
    }

    // ---- data transfers ----

    fn data_tls(&self) -> Option<&FtpTlsContext> {
        if self.inner.config.secure == FtpSecureMode::Explicit
            || self.inner.config.secure == FtpSecureMode::Implicit
        {
            self.inner.tls.as_ref()
        } else {
            None
        }
    }

    /// MODE Z negotiation: a refusal records the mode unsupported and the
    /// transfer proceeds uncompressed.
    async fn enable_mode_z(&self) -> Result<bool, FtpCommandError> {
        if self.known_unsupported("MODE") {
            return Ok(false);
        }
        match self.command(&FtpCommand::Mode('Z'), false).await {
            Ok(reply) if reply.group() == 2 => Ok(true),
            Ok(_) | Err(FtpCommandError::Protocol { .. }) => {
                self.mark_unsupported("MODE");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn transfer_cleanup(&self, compressed: bool) {
        self.inner.control.clear_data_channel();
        if compressed {
            let _ = self.inner.control.send(&FtpCommand::Mode('S'), false);
        }
    }

    async fn open_transfer(
        &self,
        cmd: FtpCommand,
        transfer_type: FtpTransferType,
        compression: bool,
    ) -> Result<TransferParts, FtpTransferError> {
        let guard = self.inner.data_lock.clone().lock_owned().await;

        self.set_transfer_type(transfer_type).await?;
        let compressed = if compression {
            self.enable_mode_z().await?
        } else {
            false
        };

        let mut provider = self.inner.provider.lock().await;
        let broker = DataBroker {
            control: &self.inner.control,
            feature: &self.inner.feature,
            support: &self.inner.support,
            config: &self.inner.config,
            control_peer: self.inner.control_peer,
            tls: self.data_tls(),
        };

        let pending = match broker.negotiate(provider.as_mut()).await {
            Ok(pending) => pending,
            Err(e) => {
                self.transfer_cleanup(compressed);
                return Err(e.into());
            }
        };

        let abort = Arc::new(AtomicBool::new(false));
        self.inner.control.register_data_channel(Arc::clone(&abort));
        let mut replies = self.inner.control.send(&cmd, false);

        let first = wait_preliminary(&mut replies, cmd.verb(), self.inner.config.data_timeout).await;
        if let Err(e) = first {
            self.transfer_cleanup(compressed);
            return Err(e);
        }

        let stream = match broker.establish(pending).await {
            Ok(stream) => stream,
            Err(e) => {
                self.transfer_cleanup(compressed);
                return Err(e.into());
            }
        };

        Ok(TransferParts {
            stream,
            replies,
            abort,
            guard,
            compressed,
        })
    }

    /// Download `path` as a byte stream. Read it to EOF, then call
    /// [`FtpDataReader::finish`] to observe the transfer result.
    pub async fn get(&self, path: &str, compression: bool) -> Result<FtpDataReader, FtpTransferError> {
        let parts = self
            .open_transfer(
                FtpCommand::Retr(path.to_string()),
                FtpTransferType::Image,
                compression,
            )
            .await?;
        Ok(FtpDataReader::new(
            parts,
            self.inner.control.clone(),
            self.inner.config.data_timeout,
        ))
    }

    /// Upload `source` to `path`; resolves with the byte count once the
    /// terminating reply arrives.
    pub async fn put<R>(
        &self,
        source: &mut R,
        path: &str,
        compression: bool,
    ) -> Result<u64, FtpTransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store(FtpCommand::Stor(path.to_string()), source, compression)
            .await
    }

    /// Append `source` to `path`.
    pub async fn append<R>(
        &self,
        source: &mut R,
        path: &str,
        compression: bool,
    ) -> Result<u64, FtpTransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store(FtpCommand::Appe(path.to_string()), source, compression)
            .await
    }

    async fn store<R>(
        &self,
        cmd: FtpCommand,
        source: &mut R,
        compression: bool,
    ) -> Result<u64, FtpTransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let parts = self
            .open_transfer(cmd, FtpTransferType::Image, compression)
            .await?;
        let mut writer = FtpDataWriter::new(
            parts,
            self.inner.control.clone(),
            self.inner.config.data_timeout,
        );
        let copied = tokio::io::copy(source, &mut writer).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::Interrupted {
                FtpTransferError::Aborted
            } else {
                FtpTransferError::DataIoFailed(e)
            }
        })?;
        writer.finish().await?;
        Ok(copied)
    }

    /// Directory listing, preferring MLSD when the server advertises
    /// machine listings; one 500/502 downgrade to LIST per session.
    pub async fn list(
        &self,
        path: Option<&str>,
        compression: bool,
    ) -> Result<Vec<FtpListEntry>, FtpTransferError> {
        let machine = self.inner.feature.support_machine_list() && !self.known_unsupported("MLSD");
        if machine {
            let cmd = FtpCommand::Mlsd(path.map(str::to_string));
            match self.run_listing(cmd, FtpListFormat::Machine, compression).await {
                Err(FtpTransferError::RawCommandError(e)) if e.is_not_implemented() => {
                    self.mark_unsupported("MLSD");
                }
                r => return r,
            }
        }
        let cmd = FtpCommand::List(path.map(str::to_string));
        self.run_listing(cmd, FtpListFormat::Ls, compression).await
    }

    /// Name-only listing via NLST.
    pub async fn name_list(&self, path: Option<&str>) -> Result<Vec<String>, FtpTransferError> {
        let cmd = FtpCommand::Nlst(path.map(str::to_string));
        let text = self.read_listing_text(cmd, false).await?;
        Ok(text
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// `pwd` + `cwd` + `list`, restoring the working directory even when
    /// the listing fails.
    pub async fn list_safe(
        &self,
        path: &str,
        compression: bool,
    ) -> Result<Vec<FtpListEntry>, FtpTransferError> {
        let original = self.pwd().await.map_err(FtpTransferError::RawCommandError)?;
        self.cwd(path)
            .await
            .map_err(FtpTransferError::RawCommandError)?;
        let result = self.list(None, compression).await;
        if let Some(original) = original {
            let restore = self
                .cwd(&original)
                .await
                .map_err(FtpTransferError::RawCommandError);
            if result.is_ok() {
                restore?;
            }
        }
        result
    }

    async fn run_listing(
        &self,
        cmd: FtpCommand,
        format: FtpListFormat,
        compression: bool,
    ) -> Result<Vec<FtpListEntry>, FtpTransferError> {
        let text = self.read_listing_text(cmd, compression).await?;
        let now = Utc::now();
        Ok(text
            .lines()
            .filter_map(|line| parse_list_line(format, line, now))
            .collect())
    }

    async fn read_listing_text(
        &self,
        cmd: FtpCommand,
        compression: bool,
    ) -> Result<String, FtpTransferError> {
        let parts = self
            .open_transfer(cmd, FtpTransferType::Ascii, compression)
            .await?;
        let mut reader = FtpDataReader::new(
            parts,
            self.inner.control.clone(),
            self.inner.config.data_timeout,
        );
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::Interrupted {
                FtpTransferError::Aborted
            } else {
                FtpTransferError::DataIoFailed(e)
            }
        })?;
        reader.finish().await?;
        debug!("listing transfer finished, {} bytes", raw.len());
        // listing text is decoded as ISO-8859-1, matching the control
        // channel; UTF-8 names survive byte-for-byte in raw entries
        Ok(raw.iter().map(|&b| b as char).collect())
    }

    // ---- shutdown ----

    /// Send QUIT and let the queue drain before closing.
    pub fn end(&self) {
        let _ = self.inner.control.send(&FtpCommand::Quit, false);
        self.inner.control.end();
    }

    /// Tear the connection down immediately.
    pub fn destroy(&self) {
        self.inner.control.destroy();
    }
}

fn extract_quoted(text: &str) -> Option<String> {
    let start = text.find('"')?;
    let end = text.rfind('"')?;
    if start < end {
        Some(text[start + 1..end].to_string())
    } else {
        None
    }
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
