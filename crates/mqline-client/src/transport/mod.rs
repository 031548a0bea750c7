//! Byte-stream transports: TCP, Unix-domain sockets, TLS and WebSocket.

#[cfg(feature = "tls")]
mod tls;
#[cfg(feature = "websocket")]
mod websocket;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(test)]
use tokio::sync::mpsc;

use crate::config::{ClientConfig, TlsConfig, TransportAddress};
use crate::error::{ClientError, Result};

/// One established connection to the broker.
pub(crate) enum Channel {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(feature = "websocket")]
    WebSocket(Box<websocket::WsStream>),
    #[cfg(test)]
    Memory(tokio::io::DuplexStream),
}

macro_rules! delegate {
    ($self:ident, $s:ident => $body:expr) => {
        match $self.get_mut() {
            Channel::Tcp($s) => $body,
            #[cfg(unix)]
            Channel::Unix($s) => $body,
            #[cfg(feature = "tls")]
            Channel::Tls($s) => $body,
            #[cfg(feature = "websocket")]
            Channel::WebSocket($s) => $body,
            #[cfg(test)]
            Channel::Memory($s) => $body,
        }
    };
}

impl AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_read(cx, buf))
    }
}

impl AsyncWrite for Channel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_shutdown(cx))
    }
}

/// Opens channels. Tests substitute in-memory pipes for the network.
pub(crate) enum Dialer {
    Network,
    #[cfg(test)]
    Memory(mpsc::UnboundedReceiver<tokio::io::DuplexStream>),
}

impl Dialer {
    /// Open a channel to the configured broker, bounded by the connect
    /// timeout including any TLS or WebSocket handshake.
    pub async fn dial(&mut self, config: &ClientConfig) -> Result<Channel> {
        let open = async {
            match self {
                Dialer::Network => open(config).await,
                #[cfg(test)]
                Dialer::Memory(pipes) => match pipes.recv().await {
                    Some(pipe) => Ok(Channel::Memory(pipe)),
                    None => Err(io::Error::from(io::ErrorKind::ConnectionRefused).into()),
                },
            }
        };
        tokio::time::timeout(config.connect_timeout, open)
            .await
            .map_err(|_| ClientError::Timeout("connection"))?
    }
}

async fn open(config: &ClientConfig) -> Result<Channel> {
    log::debug!("Dialing {}", config.address);
    match &config.address {
        TransportAddress::Tcp(addr) => {
            let tcp = TcpStream::connect(addr.as_str()).await?;
            tcp.set_nodelay(true)?;
            match &config.tls {
                Some(tls) => secure(tcp, tls, config.address.host()).await,
                None => Ok(Channel::Tcp(tcp)),
            }
        }
        #[cfg(unix)]
        TransportAddress::Unix(path) => Ok(Channel::Unix(UnixStream::connect(path).await?)),
        TransportAddress::WebSocket(url) => {
            #[cfg(feature = "websocket")]
            {
                let ws = websocket::connect(url, config).await?;
                Ok(Channel::WebSocket(Box::new(ws)))
            }
            #[cfg(not(feature = "websocket"))]
            {
                let _ = url;
                Err(ClientError::Unsupported("built without the websocket feature"))
            }
        }
    }
}

#[cfg(feature = "tls")]
async fn secure(tcp: TcpStream, tls: &TlsConfig, host: &str) -> Result<Channel> {
    let stream = tls::connect(tcp, tls, host).await?;
    Ok(Channel::Tls(Box::new(stream)))
}

#[cfg(not(feature = "tls"))]
async fn secure(_tcp: TcpStream, _tls: &TlsConfig, _host: &str) -> Result<Channel> {
    Err(ClientError::Unsupported("built without the tls feature"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_memory_dialer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (mut server, client) = tokio::io::duplex(64);
        tx.send(client).unwrap();

        let config = ClientConfig::new("localhost:1883");
        let mut dialer = Dialer::Memory(rx);
        let mut channel = dialer.dial(&config).await.unwrap();
        channel.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(tx);
        assert!(matches!(dialer.dial(&config).await, Err(ClientError::Io(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_timeout() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let config = ClientConfig::new("localhost:1883").connect_timeout(Duration::from_secs(3));
        let mut dialer = Dialer::Memory(rx);
        assert!(matches!(
            dialer.dial(&config).await,
            Err(ClientError::Timeout("connection"))
        ));
    }

    #[tokio::test]
    async fn test_refused_tcp() {
        // Port 1 on loopback is not listening
        let config = ClientConfig::new("127.0.0.1:1").connect_timeout(Duration::from_secs(5));
        let result = Dialer::Network.dial(&config).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
