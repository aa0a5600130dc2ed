//! WebSocket connector on tokio-tungstenite.

use async_trait::async_trait;
use futures::future::ready;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

use super::channel::{Connection, Connector, Frame};
use crate::core::TransportError;
use crate::core::constants::WEBSOCKET_PATH;

/// Derive the channel endpoint from an event base URL.
///
/// `http` becomes `ws`, `https` becomes `wss`, and `/websocket` is appended.
pub fn websocket_url(base: &Url) -> Result<Url, TransportError> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(base.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| TransportError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .push(WEBSOCKET_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Connects to one event's `/websocket` endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    /// Connector for the event rooted at `base`.
    pub fn new(base: &Url) -> Result<Self, TransportError> {
        Ok(Self {
            url: websocket_url(base)?,
        })
    }

    /// Endpoint in use.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        debug!(url = %self.url, "opening websocket");
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|text: String| ready(Ok::<_, TransportError>(Message::Text(text))));

        let stream = stream.filter_map(|message| {
            ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(bytes)) => {
                    Some(Ok(Frame::Text(String::from_utf8_lossy(&bytes).into_owned())))
                }
                Ok(Message::Close(frame)) => Some(Ok(Frame::Close(
                    frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                ))),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        let base = Url::parse("https://trackers.example.net/tour-2024").unwrap();
        assert_eq!(
            websocket_url(&base).unwrap().as_str(),
            "wss://trackers.example.net/tour-2024/websocket"
        );

        let base = Url::parse("http://localhost:8080/events/x/?a=1").unwrap();
        assert_eq!(
            websocket_url(&base).unwrap().as_str(),
            "ws://localhost:8080/events/x/websocket"
        );
    }

    #[test]
    fn test_websocket_url_rejects_other_schemes() {
        let base = Url::parse("ftp://example.net/x").unwrap();
        assert!(matches!(
            websocket_url(&base),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
