//! Websocket transport for the pano stream.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use routeview_env::{EnvError, StreamTransport};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected route socket. Text frames carry the JSON messages; control
/// frames are handled by tungstenite and never surface.
pub struct WsTransport {
    write: Mutex<SplitSink<Socket, Message>>,
    read: Mutex<SplitStream<Socket>>,
}

impl WsTransport {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, EnvError> {
        check_url(url)?;
        let (socket, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| EnvError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| EnvError::transport(format!("websocket connect to {}: {}", url, e)))?;
        info!("Connected to {}", url);

        let (write, read) = socket.split();
        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }

    /// Sends a close frame. The server ends the stream in response.
    pub async fn close(&self) -> Result<(), EnvError> {
        self.write
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| EnvError::transport(e.to_string()))
    }
}

fn check_url(url: &str) -> Result<(), EnvError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(EnvError::transport(format!("not a websocket url: {}", url)))
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn recv(&self) -> Option<String> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed the stream: {:?}", frame);
                    return None;
                }
                None => return None,
                Some(Err(e)) => {
                    warn!("Websocket error: {}", e);
                    return None;
                }
                // Ping/pong/binary
                Some(Ok(_)) => {}
            }
        }
    }

    async fn send(&self, text: String) -> Result<(), EnvError> {
        self.write
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed => EnvError::Closed,
                other => EnvError::transport(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_scheme_is_checked() {
        assert!(check_url("ws://localhost:8000/route_sock/3/").is_ok());
        assert!(check_url("wss://example.org/route_sock/3/").is_ok());
        assert!(matches!(
            check_url("http://localhost/route_sock/3/"),
            Err(EnvError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_scheme_before_dialing() {
        let result = WsTransport::connect("ftp://nowhere", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(EnvError::Transport(_))));
    }
}
