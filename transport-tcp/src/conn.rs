use std::io;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("peer closed the connection")]
    Eof,
    #[error("header bytes are not valid ASCII")]
    NonAscii,
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn map_eof(e: io::Error) -> ConnError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ConnError::Eof
    } else {
        ConnError::Io(e)
    }
}

/// One framed connection. The framing is a text header terminated by a
/// blank line, optionally followed by a body whose length the header
/// declares; parsing the header is the caller's business, this trait only
/// moves bytes.
#[async_trait]
pub trait FrameConn: Send + Sync {
    /// Reads up to and including the blank line that ends a message header.
    ///
    /// Cancel-safe: bytes consumed before a cancellation stay buffered on
    /// the connection and the next call resumes from them.
    async fn read_header(&mut self) -> Result<String, ConnError>;

    /// Reads exactly `len` body bytes. Not cancel-safe; call it only once
    /// a full header has been received.
    async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, ConnError>;

    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), ConnError>;

    /// Half-closes the write side. Errors are swallowed.
    async fn shutdown(&mut self);
}

pub type BoxConn = Box<dyn FrameConn>;

pub struct StreamConn<S> {
    stream: S,
    header_buf: BytesMut,
}

impl<S> StreamConn<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            header_buf: BytesMut::new(),
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send + Sync> FrameConn for StreamConn<S> {
    async fn read_header(&mut self) -> Result<String, ConnError> {
        // Byte-at-a-time so nothing past the terminator is consumed.
        while !self.header_buf.ends_with(b"\n\n") {
            let b = self.stream.read_u8().await.map_err(map_eof)?;
            self.header_buf.put_u8(b);
        }
        let raw = self.header_buf.split();
        if !raw.is_ascii() {
            return Err(ConnError::NonAscii);
        }
        String::from_utf8(raw.to_vec()).map_err(|_| ConnError::NonAscii)
    }

    async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, ConnError> {
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.map_err(map_eof)?;
        Ok(body)
    }

    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), ConnError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!("shutdown error ignored: {e}");
        }
    }
}

pub type TcpConn = StreamConn<TcpStream>;
