//! Host-side link: a TCP bridge or a serial device node.

use pin_project_lite::pin_project;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Where the device is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Serial-over-TCP bridge or an emulated device.
    Tcp(SocketAddr),
    /// Character device with line settings already configured.
    Device(PathBuf),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Device(path) => write!(f, "{}", path.display()),
        }
    }
}

pin_project! {
    /// A client link that can be either a TCP socket or a device node.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Tcp { #[pin] stream: TcpStream },
        Device { #[pin] file: File },
    }
}

impl ClientStream {
    /// Opens the endpoint, bounding TCP connects by `timeout`.
    pub async fn open(endpoint: &Endpoint, timeout: Duration) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;
                stream.set_nodelay(true).ok();
                Ok(ClientStream::Tcp { stream })
            }
            Endpoint::Device(path) => Self::open_device(path).await,
        }
    }

    async fn open_device(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await?;
        Ok(ClientStream::Device { file })
    }

    /// Returns whether this link is a device node.
    pub fn is_device(&self) -> bool {
        matches!(self, ClientStream::Device { .. })
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Device { file } => file.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Device { file } => file.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Tcp { stream } => stream.poll_flush(cx),
            ClientStreamProj::Device { file } => file.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Device { file } => file.poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::Tcp(listener.local_addr().unwrap());

        let stream = ClientStream::open(&endpoint, Duration::from_secs(1)).await.unwrap();
        assert!(!stream.is_device());
        assert!(endpoint.to_string().starts_with("tcp://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_open_missing_device() {
        let endpoint = Endpoint::Device("/nonexistent/ttyACM7".into());
        assert!(ClientStream::open(&endpoint, Duration::from_secs(1)).await.is_err());
    }
}
