/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait FtpIoStream: AsyncRead + AsyncWrite {}

impl<T> FtpIoStream for T where T: AsyncRead + AsyncWrite {}

pub type BoxFtpStream = Box<dyn FtpIoStream + Send + Unpin>;

/// Source of control and data sockets.
///
/// The default [`TcpConnectionProvider`] dials plain TCP; tests and
/// embedders may inject any byte stream instead.
#[async_trait]
pub trait FtpConnectionProvider: Send {
    /// Open the control connection and report its peer address. The peer
    /// address drives EPSV/PASV family selection and NAT mismatch checks.
    async fn new_control_connection(
        &mut self,
        host: &str,
        port: u16,
    ) -> io::Result<(BoxFtpStream, SocketAddr)>;

    async fn new_data_connection(&mut self, peer: SocketAddr) -> io::Result<BoxFtpStream>;
}

#[derive(Default)]
pub struct TcpConnectionProvider;

#[async_trait]
impl FtpConnectionProvider for TcpConnectionProvider {
    async fn new_control_connection(
        &mut self,
        host: &str,
        port: u16,
    ) -> io::Result<(BoxFtpStream, SocketAddr)> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok((Box::new(stream), peer))
    }

    async fn new_data_connection(&mut self, peer: SocketAddr) -> io::Result<BoxFtpStream> {
        let stream = TcpStream::connect(peer).await?;
        Ok(Box::new(stream))
    }
}
