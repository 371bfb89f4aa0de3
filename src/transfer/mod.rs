/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::OwnedMutexGuard;
use tokio_rustls::TlsConnector;

use crate::config::{FtpClientConfig, FtpTlsConfig};
use crate::connection::{BoxFtpStream, FtpConnectionProvider};
use crate::control::{FtpCommand, FtpControlHandle, FtpReply, FtpReplyStream};
use crate::error::{FtpCommandError, FtpDataChannelError, FtpTlsError, FtpTransferError};
use crate::feature::{FtpCommandSupport, FtpServerFeature};

mod active;
pub(crate) mod zmode;

use zmode::{DeflateWriter, InflateReader, DEFAULT_DEFLATE_LEVEL};

/// TLS client context shared by the control upgrade and all data
/// connections. Reusing one `rustls::ClientConfig` lets the client
/// session cache resume the control channel's TLS session on every
/// data socket.
#[derive(Clone)]
pub(crate) struct FtpTlsContext {
    pub(crate) connector: TlsConnector,
    pub(crate) name: ServerName<'static>,
}

impl FtpTlsContext {
    pub(crate) fn build(tls: &FtpTlsConfig, host: &str) -> Result<Self, FtpTlsError> {
        let name = tls.server_name.as_deref().unwrap_or(host);
        let name = ServerName::try_from(name.to_string())
            .map_err(|_| FtpTlsError::InvalidServerName(name.to_string()))?;
        Ok(FtpTlsContext {
            connector: TlsConnector::from(Arc::clone(&tls.client)),
            name,
        })
    }

    pub(crate) async fn wrap(&self, stream: BoxFtpStream) -> Result<BoxFtpStream, FtpTlsError> {
        let tls = self
            .connector
            .connect(self.name.clone(), stream)
            .await
            .map_err(FtpTlsError::HandshakeFailed)?;
        Ok(Box::new(tls))
    }
}

/// Parse a 227 reply body: `... (h1,h2,h3,h4,p1,p2) ...`
pub(crate) fn parse_pasv_reply(text: &str) -> Option<SocketAddr> {
    let bytes = text.as_bytes();
    let start = memchr::memchr(b'(', bytes)?;
    let end = memchr::memchr(b')', &bytes[start..])? + start;
    let fields: Vec<&str> = text[start + 1..end].split(',').collect();
    if fields.len() != 6 {
        return None;
    }
    let h1 = u8::from_str(fields[0].trim()).ok()?;
    let h2 = u8::from_str(fields[1].trim()).ok()?;
    let h3 = u8::from_str(fields[2].trim()).ok()?;
    let h4 = u8::from_str(fields[3].trim()).ok()?;
    let p1 = u8::from_str(fields[4].trim()).ok()?;
    let p2 = u8::from_str(fields[5].trim()).ok()?;
    let ip = IpAddr::V4(Ipv4Addr::new(h1, h2, h3, h4));
    let port = ((p1 as u16) << 8) | (p2 as u16);
    Some(SocketAddr::new(ip, port))
}

/// Parse a 229 reply body: `... (<d><d><d>port<d>) ...` where `<d>` is
/// any single delimiter character; the data IP is the control peer's.
pub(crate) fn parse_epsv_reply(text: &str) -> Option<u16> {
    let bytes = text.as_bytes();
    let start = memchr::memchr(b'(', bytes)?;
    let end = memchr::memchr(b')', &bytes[start..])? + start;
    let inner = &text[start + 1..end];
    let mut chars = inner.chars();
    let d = chars.next()?;
    if chars.next() != Some(d) || chars.next() != Some(d) {
        return None;
    }
    let rest = &inner[3 * d.len_utf8()..];
    let port_str = rest.strip_suffix(d)?;
    if port_str.is_empty() {
        return None;
    }
    u16::from_str(port_str).ok()
}

/// A negotiated but not yet transfer-ready data channel.
pub(crate) enum PendingDataChannel {
    Connected(BoxFtpStream),
    Listening(tokio::net::TcpListener),
}

pub(crate) struct DataBroker<'a> {
    pub(crate) control: &'a FtpControlHandle,
    pub(crate) feature: &'a FtpServerFeature,
    pub(crate) support: &'a StdMutex<FtpCommandSupport>,
    pub(crate) config: &'a FtpClientConfig,
    pub(crate) control_peer: SocketAddr,
    /// Present only when the data channel itself is secured (PROT P).
    pub(crate) tls: Option<&'a FtpTlsContext>,
}

impl DataBroker<'_> {
    fn known_unsupported(&self, verb: &str) -> bool {
        self.support.lock().unwrap().known_unsupported(verb)
    }

    fn mark_unsupported(&self, verb: &'static str) {
        self.support.lock().unwrap().mark_unsupported(verb);
    }

    fn not_implemented(e: &FtpDataChannelError) -> bool {
        matches!(e, FtpDataChannelError::RawCommandError(inner) if inner.is_not_implemented())
    }

    /// Negotiate the data connection, in priority order: EPSV, PASV,
    /// then active EPRT/PORT when an external address is configured.
    /// A 500/502 on one mode records it unsupported and falls through
    /// to the next.
    pub(crate) async fn negotiate(
        &self,
        provider: &mut dyn FtpConnectionProvider,
    ) -> Result<PendingDataChannel, FtpDataChannelError> {
        let peer = self.control_peer;

        let try_epsv = !self.known_unsupported("EPSV")
            && (peer.is_ipv6() || self.feature.support_epsv() || self.feature.is_empty());
        if try_epsv {
            match self.negotiate_epsv(provider).await {
                Ok(pending) => return Ok(pending),
                Err(e) if Self::not_implemented(&e) => self.mark_unsupported("EPSV"),
                Err(e) => return Err(e),
            }
        }

        if peer.is_ipv4() && !self.known_unsupported("PASV") {
            match self.negotiate_pasv(provider).await {
                Ok(pending) => return Ok(pending),
                Err(e) if Self::not_implemented(&e) => self.mark_unsupported("PASV"),
                Err(e) => return Err(e),
            }
        }

        if let Some(external) = self.config.port_address {
            match external {
                IpAddr::V6(_) => {
                    if self.feature.support_eprt() && !self.known_unsupported("EPRT") {
                        match self.negotiate_active(external, true).await {
                            Ok(pending) => return Ok(pending),
                            Err(e) if Self::not_implemented(&e) => self.mark_unsupported("EPRT"),
                            Err(e) => return Err(e),
                        }
                    }
                }
                IpAddr::V4(_) => {
                    if !self.known_unsupported("PORT") {
                        match self.negotiate_active(external, false).await {
                            Ok(pending) => return Ok(pending),
                            Err(e) if Self::not_implemented(&e) => self.mark_unsupported("PORT"),
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }

        Err(FtpDataChannelError::NoUsableMode)
    }

    async fn connect(
        &self,
        provider: &mut dyn FtpConnectionProvider,
        addr: SocketAddr,
    ) -> Result<BoxFtpStream, FtpDataChannelError> {
        match tokio::time::timeout(
            self.config.data_timeout,
            provider.new_data_connection(addr),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(FtpDataChannelError::ConnectFailed(e)),
            Err(_) => Err(FtpDataChannelError::ConnectTimedOut),
        }
    }

    async fn negotiate_epsv(
        &self,
        provider: &mut dyn FtpConnectionProvider,
    ) -> Result<PendingDataChannel, FtpDataChannelError> {
        let reply = self
            .control
            .send(&FtpCommand::Epsv, false)
            .terminating()
            .await?;
        let port =
            parse_epsv_reply(&reply.text).ok_or(FtpDataChannelError::InvalidPassiveReply)?;
        let addr = SocketAddr::new(self.control_peer.ip(), port);
        let stream = self.connect(provider, addr).await?;
        Ok(PendingDataChannel::Connected(stream))
    }

    async fn negotiate_pasv(
        &self,
        provider: &mut dyn FtpConnectionProvider,
    ) -> Result<PendingDataChannel, FtpDataChannelError> {
        let reply = self
            .control
            .send(&FtpCommand::Pasv, false)
            .terminating()
            .await?;
        let advertised =
            parse_pasv_reply(&reply.text).ok_or(FtpDataChannelError::InvalidPassiveReply)?;

        let stream = if advertised.ip() == self.control_peer.ip() {
            self.connect(provider, advertised).await?
        } else {
            // a NAT-misconfigured server may advertise its private
            // address; retry once against the control channel peer
            match self.connect(provider, advertised).await {
                Ok(stream) => stream,
                Err(e) => {
                    crate::log_msg!(
                        "data connect to advertised {} failed ({}), retrying control peer",
                        advertised,
                        e
                    );
                    let fallback = SocketAddr::new(self.control_peer.ip(), advertised.port());
                    match self.connect(provider, fallback).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = self.control.send(&FtpCommand::Abor, true);
                            return Err(e);
                        }
                    }
                }
            }
        };
        Ok(PendingDataChannel::Connected(stream))
    }

    async fn negotiate_active(
        &self,
        external: IpAddr,
        extended: bool,
    ) -> Result<PendingDataChannel, FtpDataChannelError> {
        let (listener, port) = active::bind_listener(
            external,
            self.config.bind_address,
            self.config.port_range,
        )
        .await?;
        let cmd = if extended {
            FtpCommand::Eprt(SocketAddr::new(external, port))
        } else {
            let IpAddr::V4(v4) = external else {
                return Err(FtpDataChannelError::NoUsableMode);
            };
            FtpCommand::Port(v4, port)
        };
        self.control.send(&cmd, false).terminating().await?;
        Ok(PendingDataChannel::Listening(listener))
    }

    /// Finish establishing the channel once the data command has been
    /// accepted: accept the inbound connection in active mode, then wrap
    /// with TLS when the session runs PROT P.
    pub(crate) async fn establish(
        &self,
        pending: PendingDataChannel,
    ) -> Result<BoxFtpStream, FtpDataChannelError> {
        let stream = match pending {
            PendingDataChannel::Connected(stream) => stream,
            PendingDataChannel::Listening(listener) => {
                let stream = active::accept_one(listener, self.config.data_timeout).await?;
                Box::new(stream) as BoxFtpStream
            }
        };
        match self.tls {
            Some(tls) => Ok(tls.wrap(stream).await?),
            None => Ok(stream),
        }
    }
}

enum DataReadStream {
    Plain(BoxFtpStream),
    Inflate(Box<InflateReader<BoxFtpStream>>),
}

impl AsyncRead for DataReadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataReadStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            DataReadStream::Inflate(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

enum DataWriteStream {
    Plain(BoxFtpStream),
    Deflate(Box<DeflateWriter<BoxFtpStream>>),
}

impl AsyncWrite for DataWriteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DataWriteStream::Plain(s) => Pin::new(s).poll_write(cx, data),
            DataWriteStream::Deflate(s) => Pin::new(s.as_mut()).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataWriteStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataWriteStream::Deflate(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataWriteStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataWriteStream::Deflate(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

fn aborted_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "data transfer aborted")
}

pub(crate) struct TransferParts {
    pub(crate) stream: BoxFtpStream,
    pub(crate) replies: FtpReplyStream,
    pub(crate) abort: Arc<AtomicBool>,
    pub(crate) guard: OwnedMutexGuard<()>,
    pub(crate) compressed: bool,
}

/// The readable side of a RETR (or listing) transfer. Dropping it before
/// [`finish`](Self::finish) tears the data socket down and leaves the
/// terminating reply to the dispatcher.
pub struct FtpDataReader {
    stream: Option<DataReadStream>,
    replies: Option<FtpReplyStream>,
    abort: Arc<AtomicBool>,
    control: FtpControlHandle,
    end_wait: Duration,
    compressed: bool,
    guard: Option<OwnedMutexGuard<()>>,
    finished: bool,
}

impl FtpDataReader {
    pub(crate) fn new(parts: TransferParts, control: FtpControlHandle, end_wait: Duration) -> Self {
        let stream = if parts.compressed {
            DataReadStream::Inflate(Box::new(InflateReader::new(parts.stream)))
        } else {
            DataReadStream::Plain(parts.stream)
        };
        FtpDataReader {
            stream: Some(stream),
            replies: Some(parts.replies),
            abort: parts.abort,
            control,
            end_wait,
            compressed: parts.compressed,
            guard: Some(parts.guard),
            finished: false,
        }
    }

    fn cleanup(&mut self) {
        self.control.clear_data_channel();
        if self.compressed {
            let _ = self.control.send(&FtpCommand::Mode('S'), false);
        }
    }

    /// Close the data socket and wait for the terminating reply of the
    /// initiating command. Must be called to observe the transfer result.
    pub async fn finish(mut self) -> Result<(), FtpTransferError> {
        self.finished = true;
        self.stream = None;
        let replies = self.replies.take().expect("already finished");
        let result = tokio::time::timeout(self.end_wait, replies.terminating()).await;
        self.cleanup();
        self.guard = None;
        let aborted = self.abort.load(Ordering::Relaxed);
        match result {
            Err(_) => Err(FtpTransferError::TimeoutToWaitEndReply),
            Ok(_) if aborted => Err(FtpTransferError::Aborted),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

impl AsyncRead for FtpDataReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.abort.load(Ordering::Relaxed) {
            return Poll::Ready(Err(aborted_io_error()));
        }
        match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for FtpDataReader {
    fn drop(&mut self) {
        if !self.finished {
            self.cleanup();
        }
    }
}

/// The writable side of a STOR/APPE transfer.
pub struct FtpDataWriter {
    stream: Option<DataWriteStream>,
    replies: Option<FtpReplyStream>,
    abort: Arc<AtomicBool>,
    control: FtpControlHandle,
    end_wait: Duration,
    compressed: bool,
    guard: Option<OwnedMutexGuard<()>>,
    finished: bool,
}

impl FtpDataWriter {
    pub(crate) fn new(parts: TransferParts, control: FtpControlHandle, end_wait: Duration) -> Self {
        let stream = if parts.compressed {
            DataWriteStream::Deflate(Box::new(DeflateWriter::new(
                parts.stream,
                DEFAULT_DEFLATE_LEVEL,
            )))
        } else {
            DataWriteStream::Plain(parts.stream)
        };
        FtpDataWriter {
            stream: Some(stream),
            replies: Some(parts.replies),
            abort: parts.abort,
            control,
            end_wait,
            compressed: parts.compressed,
            guard: Some(parts.guard),
            finished: false,
        }
    }

    fn cleanup(&mut self) {
        self.control.clear_data_channel();
        if self.compressed {
            let _ = self.control.send(&FtpCommand::Mode('S'), false);
        }
    }

    /// Flush and close the data socket, then wait for the terminating
    /// reply of the initiating command.
    pub async fn finish(mut self) -> Result<(), FtpTransferError> {
        self.finished = true;
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(FtpTransferError::DataIoFailed)?;
        }
        let replies = self.replies.take().expect("already finished");
        let result = tokio::time::timeout(self.end_wait, replies.terminating()).await;
        self.cleanup();
        self.guard = None;
        let aborted = self.abort.load(Ordering::Relaxed);
        match result {
            Err(_) => Err(FtpTransferError::TimeoutToWaitEndReply),
            Ok(_) if aborted => Err(FtpTransferError::Aborted),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

impl AsyncWrite for FtpDataWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.abort.load(Ordering::Relaxed) {
            return Poll::Ready(Err(aborted_io_error()));
        }
        match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, data),
            None => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for FtpDataWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.cleanup();
        }
    }
}

/// Map a transfer-start failure: the preliminary wait races the reply
/// stream, so a timeout is reported against the initiating verb.
pub(crate) async fn wait_preliminary(
    replies: &mut FtpReplyStream,
    verb: &'static str,
    timeout: Duration,
) -> Result<FtpReply, FtpTransferError> {
    let reply = match tokio::time::timeout(timeout, replies.next()).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(FtpTransferError::RawCommandError(
                FtpCommandError::ReplyTimedOut(verb),
            ))
        }
    };
    if reply.is_preliminary() {
        Ok(reply)
    } else {
        Err(FtpTransferError::RawCommandError(
            FtpCommandError::UnexpectedReplyCode(verb, reply.code),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_reply() {
        let sa = parse_pasv_reply("Entering Passive Mode (192,168,1,5,23,133).").unwrap();
        assert_eq!(sa, "192.168.1.5:6021".parse().unwrap());
        assert!(parse_pasv_reply("Entering Passive Mode").is_none());
        assert!(parse_pasv_reply("(1,2,3,4,5)").is_none());
        assert!(parse_pasv_reply("(256,2,3,4,5,6)").is_none());
    }

    #[test]
    fn epsv_reply() {
        assert_eq!(parse_epsv_reply("Entering Extended Passive Mode (|||6446|)"), Some(6446));
        // any repeated single delimiter is accepted
        assert_eq!(parse_epsv_reply("ok (###2121#)"), Some(2121));
        assert!(parse_epsv_reply("(||6446|)").is_none());
        assert!(parse_epsv_reply("(||||)").is_none());
        assert!(parse_epsv_reply("no parens").is_none());
    }
}
