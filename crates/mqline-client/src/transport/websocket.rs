//! MQTT over WebSocket.
//!
//! MQTT packets travel as Binary frames under the `mqtt` sub-protocol.
//! [`WsStream`] hides the framing behind AsyncRead/AsyncWrite so the event
//! loop treats it like any other byte stream.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::sink::Sink;
use futures_util::stream::Stream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use super::Channel;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// MQTT WebSocket subprotocol identifier.
const MQTT_SUBPROTOCOL: &str = "mqtt";

/// WebSocket connection carrying MQTT bytes.
pub(crate) struct WsStream {
    ws: WebSocketStream<Channel>,
    /// Unread remainder of the last Binary frame.
    read_buf: Bytes,
}

/// Open the TCP connection, layer TLS for `wss://`, then run the HTTP
/// Upgrade handshake. A refused upgrade reports the HTTP status and body.
pub(crate) async fn connect(url: &str, config: &ClientConfig) -> Result<WsStream> {
    let (secure, authority) = split_url(url)?;
    let default_port = if secure { 443 } else { 80 };
    let addr = if has_port(authority) {
        authority.to_string()
    } else {
        format!("{}:{}", authority, default_port)
    };

    let tcp = TcpStream::connect(addr.as_str()).await?;
    tcp.set_nodelay(true)?;
    let inner = if secure {
        tls_channel(tcp, config).await?
    } else {
        Channel::Tcp(tcp)
    };

    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::Config(format!("Invalid WebSocket URL {}: {}", url, e)))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(MQTT_SUBPROTOCOL),
    );

    let (ws, response) = tokio_tungstenite::client_async(request, inner)
        .await
        .map_err(upgrade_error)?;
    log::debug!("WebSocket upgrade to {} complete ({})", url, response.status());

    Ok(WsStream {
        ws,
        read_buf: Bytes::new(),
    })
}

#[cfg(feature = "tls")]
async fn tls_channel(tcp: TcpStream, config: &ClientConfig) -> Result<Channel> {
    let tls = config.tls.clone().unwrap_or_default();
    let stream = super::tls::connect(tcp, &tls, config.address.host()).await?;
    Ok(Channel::Tls(Box::new(stream)))
}

#[cfg(not(feature = "tls"))]
async fn tls_channel(_tcp: TcpStream, _config: &ClientConfig) -> Result<Channel> {
    Err(ClientError::Unsupported("wss:// needs the tls feature"))
}

fn upgrade_error(err: WsError) -> ClientError {
    match err {
        WsError::Http(response) => ClientError::WebSocket {
            status: response.status().as_u16(),
            body: response
                .body()
                .as_ref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .unwrap_or_default(),
        },
        WsError::Io(e) => e.into(),
        other => io::Error::other(other).into(),
    }
}

/// Returns whether the URL is `wss://` and its authority part.
fn split_url(url: &str) -> Result<(bool, &str)> {
    let (secure, rest) = if let Some(rest) = url.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        (false, rest)
    } else {
        return Err(ClientError::Config(format!("Not a WebSocket URL: {}", url)));
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(ClientError::Config(format!("Missing host in {}", url)));
    }
    Ok((secure, authority))
}

fn has_port(authority: &str) -> bool {
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) && !host.ends_with(':')
        }
        None => false,
    }
}

impl AsyncRead for WsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.read_buf.has_remaining() {
                let n = this.read_buf.len().min(buf.remaining());
                buf.put_slice(&this.read_buf[..n]);
                this.read_buf.advance(n);
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.ws).poll_next(cx)) {
                Some(Ok(Message::Binary(data))) => this.read_buf = Bytes::from(data),
                // Close frame or end of stream reads as EOF
                Some(Ok(Message::Close(_))) | None => return Poll::Ready(Ok(())),
                // Pings are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
            }
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(Pin::new(&mut this.ws).poll_ready(cx)).map_err(io::Error::other)?;
        Pin::new(&mut this.ws)
            .start_send(Message::Binary(buf.to_vec().into()))
            .map_err(io::Error::other)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().ws)
            .poll_flush(cx)
            .map_err(io::Error::other)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().ws)
            .poll_close(cx)
            .map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("ws://broker:8080/mqtt").unwrap(), (false, "broker:8080"));
        assert_eq!(split_url("wss://broker/mqtt").unwrap(), (true, "broker"));
        assert!(split_url("mqtt://broker").is_err());
        assert!(split_url("ws:///mqtt").is_err());
    }

    #[test]
    fn test_has_port() {
        assert!(has_port("broker:8080"));
        assert!(!has_port("broker"));
        assert!(has_port("[::1]:443"));
        assert!(!has_port("[::1]"));
    }

    #[test]
    fn test_upgrade_error_surfaces_status() {
        let response = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(403)
            .body(Some(b"forbidden".to_vec()))
            .unwrap();
        let err = upgrade_error(WsError::Http(response.into()));
        match err {
            ClientError::WebSocket { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
