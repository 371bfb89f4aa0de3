/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const Z_BUF_SIZE: usize = 8 * 1024;

/// MODE Z deflate level, per draft-preston-ftpext-deflate-04.
pub(crate) const DEFAULT_DEFLATE_LEVEL: u32 = 8;

fn invalid_data(e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Inflates a zlib stream read from the data connection.
pub(crate) struct InflateReader<R> {
    inner: R,
    decompress: Decompress,
    in_buf: Box<[u8]>,
    in_start: usize,
    in_end: usize,
    eof: bool,
    stream_end: bool,
}

impl<R: AsyncRead + Unpin> InflateReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        InflateReader {
            inner,
            decompress: Decompress::new(true),
            in_buf: vec![0u8; Z_BUF_SIZE].into_boxed_slice(),
            in_start: 0,
            in_end: 0,
            eof: false,
            stream_end: false,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for InflateReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.stream_end {
                return Poll::Ready(Ok(()));
            }

            if this.in_start < this.in_end || this.eof {
                let out = buf.initialize_unfilled();
                if out.is_empty() {
                    return Poll::Ready(Ok(()));
                }
                let input = &this.in_buf[this.in_start..this.in_end];
                let flush = if this.eof {
                    FlushDecompress::Finish
                } else {
                    FlushDecompress::None
                };
                let before_in = this.decompress.total_in();
                let before_out = this.decompress.total_out();
                let status = this
                    .decompress
                    .decompress(input, out, flush)
                    .map_err(invalid_data)?;
                let consumed = (this.decompress.total_in() - before_in) as usize;
                let produced = (this.decompress.total_out() - before_out) as usize;
                this.in_start += consumed;
                buf.advance(produced);
                if status == Status::StreamEnd {
                    this.stream_end = true;
                }
                if produced > 0 || this.stream_end {
                    return Poll::Ready(Ok(()));
                }
                if this.eof && this.in_start >= this.in_end {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated deflate stream",
                    )));
                }
                if this.in_start < this.in_end {
                    continue;
                }
            }

            // refill, keeping any unconsumed tail
            if this.in_start > 0 {
                this.in_buf.copy_within(this.in_start..this.in_end, 0);
                this.in_end -= this.in_start;
                this.in_start = 0;
            }
            let mut read_buf = ReadBuf::new(&mut this.in_buf[this.in_end..]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
            let n = read_buf.filled().len();
            if n == 0 {
                this.eof = true;
            } else {
                this.in_end += n;
            }
        }
    }
}

/// Deflates writes into a zlib stream on the data connection. The zlib
/// trailer is emitted on shutdown.
pub(crate) struct DeflateWriter<W> {
    inner: W,
    compress: Compress,
    out_buf: Box<[u8]>,
    out_start: usize,
    out_end: usize,
    finished: bool,
}

impl<W: AsyncWrite + Unpin> DeflateWriter<W> {
    pub(crate) fn new(inner: W, level: u32) -> Self {
        DeflateWriter {
            inner,
            compress: Compress::new(Compression::new(level), true),
            out_buf: vec![0u8; Z_BUF_SIZE].into_boxed_slice(),
            out_start: 0,
            out_end: 0,
            finished: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.inner
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.out_start < self.out_end {
            let n = ready!(
                Pin::new(&mut self.inner).poll_write(cx, &self.out_buf[self.out_start..self.out_end])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.out_start += n;
        }
        self.out_start = 0;
        self.out_end = 0;
        Poll::Ready(Ok(()))
    }

    /// Run one compress step with empty input, buffering whatever output
    /// it produces. Returns the produced byte count.
    fn pump(&mut self, flush: FlushCompress) -> io::Result<(usize, Status)> {
        let before_out = self.compress.total_out();
        let status = self
            .compress
            .compress(&[], &mut self.out_buf[self.out_end..], flush)
            .map_err(invalid_data)?;
        let produced = (self.compress.total_out() - before_out) as usize;
        self.out_end += produced;
        Ok((produced, status))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DeflateWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_drain(cx))?;
            let before_in = this.compress.total_in();
            let before_out = this.compress.total_out();
            let status = this
                .compress
                .compress(data, &mut this.out_buf[..], FlushCompress::None)
                .map_err(invalid_data)?;
            debug_assert_ne!(status, Status::StreamEnd);
            let consumed = (this.compress.total_in() - before_in) as usize;
            this.out_start = 0;
            this.out_end = (this.compress.total_out() - before_out) as usize;
            if consumed > 0 || data.is_empty() {
                return Poll::Ready(Ok(consumed));
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_drain(cx))?;
            let (produced, _) = this.pump(FlushCompress::Sync)?;
            if produced == 0 {
                break;
            }
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while !this.finished {
            ready!(this.poll_drain(cx))?;
            let (_, status) = this.pump(FlushCompress::Finish)?;
            if status == Status::StreamEnd {
                this.finished = true;
            }
        }
        ready!(this.poll_drain(cx))?;
        ready!(Pin::new(&mut this.inner).poll_flush(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn deflate_then_inflate() {
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

        let mut writer = DeflateWriter::new(Vec::new(), DEFAULT_DEFLATE_LEVEL);
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
        let compressed = writer.into_inner();
        assert!(compressed.len() < payload.len());

        // cross-check against the plain flate2 decoder
        let mut plain = Vec::new();
        flate2::read::ZlibDecoder::new(&compressed[..])
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, payload);

        let mut reader = InflateReader::new(&compressed[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn inflate_detects_truncation() {
        let mut writer = DeflateWriter::new(Vec::new(), DEFAULT_DEFLATE_LEVEL);
        writer.write_all(b"some data to compress").await.unwrap();
        writer.shutdown().await.unwrap();
        let compressed = writer.into_inner();

        let cut = &compressed[..compressed.len() - 4];
        let mut reader = InflateReader::new(cut);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
