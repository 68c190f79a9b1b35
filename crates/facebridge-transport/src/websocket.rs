//! WebSocket message channel

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connector, MessageChannel, TransportError, TransportResult};

/// WebSocket channel over TCP
pub struct WsChannel<S = MaybeTlsStream<TcpStream>> {
    stream: WebSocketStream<S>,
}

impl<S> WsChannel<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        WsChannel { stream }
    }
}

#[async_trait]
impl<S> MessageChannel for WsChannel<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> TransportResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv_text(&mut self) -> TransportResult<String> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| TransportError::Receive(e.to_string()))
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "websocket close");
        }
    }
}

/// Opens `ws://` connections
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> TransportResult<Box<dyn MessageChannel>> {
        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        tracing::debug!(%url, "websocket connected");
        Ok(Box::new(WsChannel::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_websocket_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut channel = WsChannel::new(ws);
            let text = channel.recv_text().await.unwrap();
            channel.send_text(format!("echo:{}", text)).await.unwrap();
            channel.close().await;
        });

        let mut client = WsConnector
            .connect(&format!("ws://{}", addr))
            .await
            .unwrap();
        client.send_text("hello".to_string()).await.unwrap();
        assert_eq!(client.recv_text().await.unwrap(), "echo:hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = WsConnector
            .connect(&format!("ws://127.0.0.1:{}", port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(err.kind(), facebridge_core::ErrorKind::Transport);
    }
}
