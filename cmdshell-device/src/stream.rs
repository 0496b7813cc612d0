//! Link abstraction over a TCP bridge or a serial character device.

use pin_project_lite::pin_project;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

pin_project! {
    /// A byte link that is either a TCP socket or an opened device node.
    #[project = SerialStreamProj]
    pub enum SerialStream {
        Tcp { #[pin] stream: TcpStream },
        Device { #[pin] file: File },
    }
}

impl SerialStream {
    /// Opens a character device for reading and writing.
    ///
    /// Line settings (baud rate, parity) are expected to be configured already.
    pub async fn open_device(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await?;
        Ok(SerialStream::Device { file })
    }

    pub fn is_device(&self) -> bool {
        matches!(self, SerialStream::Device { .. })
    }
}

impl From<TcpStream> for SerialStream {
    fn from(stream: TcpStream) -> Self {
        SerialStream::Tcp { stream }
    }
}

impl AsyncRead for SerialStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            SerialStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
            SerialStreamProj::Device { file } => file.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SerialStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            SerialStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
            SerialStreamProj::Device { file } => file.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            SerialStreamProj::Tcp { stream } => stream.poll_flush(cx),
            SerialStreamProj::Device { file } => file.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            SerialStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
            SerialStreamProj::Device { file } => file.poll_shutdown(cx),
        }
    }
}
