//! Network collaborators.
//!
//! [`HttpBackend`] speaks the REST API with reqwest; [`WsTransport`] carries
//! the live channel as JSON text frames over a WebSocket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use sparkchat_proto::{
    LiveEvent, MatchInfo, ProtocolError, PushAck, PushSubscriptionRequest, SendMessageRequest,
    WireMessage,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, warn};

use crate::backend::{BackendError, ChatBackend, LiveTransport};

/// REST API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend rooted at `base_url` (for example
    /// `http://localhost:5000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client: reqwest::Client::new(), base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute<T: DeserializeOwned>(
        request: RequestBuilder,
        auth_token: &str,
    ) -> Result<T, BackendError> {
        let response = request.bearer_auth(auth_token).send().await.map_err(to_backend_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(BackendError::Http { status: status.as_u16(), reason });
        }

        response.json::<T>().await.map_err(to_backend_error)
    }
}

fn to_backend_error(error: reqwest::Error) -> BackendError {
    if error.is_decode() {
        BackendError::Decode { reason: error.to_string() }
    } else {
        BackendError::Network { reason: error.to_string() }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn fetch_metadata(
        &self,
        conversation_id: &str,
        auth_token: &str,
    ) -> Result<MatchInfo, BackendError> {
        let request = self.client.get(self.url(&format!("/api/matches/{conversation_id}")));
        Self::execute(request, auth_token).await
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
        auth_token: &str,
    ) -> Result<Vec<WireMessage>, BackendError> {
        let request = self.client.get(self.url(&format!("/api/messages/{conversation_id}")));
        Self::execute(request, auth_token).await
    }

    async fn post_message(
        &self,
        request: &SendMessageRequest,
        auth_token: &str,
    ) -> Result<WireMessage, BackendError> {
        let request = self.client.post(self.url("/api/messages")).json(request);
        Self::execute(request, auth_token).await
    }

    async fn register_push(
        &self,
        request: &PushSubscriptionRequest,
        auth_token: &str,
    ) -> Result<PushAck, BackendError> {
        let request = self.client.post(self.url("/api/notifications/subscribe")).json(request);
        Self::execute(request, auth_token).await
    }
}

/// Live transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// WebSocket handshake or I/O failed
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Bearer token cannot be sent as a header
    #[error("invalid auth token")]
    InvalidToken,

    /// Event could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No connection established
    #[error("not connected")]
    NotConnected,
}

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live channel over a WebSocket.
///
/// Connects to `<url>?chatId=<conversation>` with a bearer `Authorization`
/// header.
pub struct WsTransport {
    url: String,
    stream: Option<Stream>,
}

impl WsTransport {
    /// Create a disconnected transport for the live endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), stream: None }
    }
}

impl LiveTransport for WsTransport {
    type Error = TransportError;

    async fn connect(&mut self, conversation_id: &str, auth_token: &str) -> Result<(), Self::Error> {
        self.disconnect().await;

        let url = format!("{}?chatId={conversation_id}", self.url);
        let mut request = url.into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {auth_token}"))
            .map_err(|_| TransportError::InvalidToken)?;
        request.headers_mut().insert("Authorization", bearer);

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        debug!(url = %self.url, "websocket connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, event: LiveEvent) -> Result<(), Self::Error> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let text = event.encode()?;
        stream.send(tungstenite::Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<LiveEvent> {
        let stream = self.stream.as_mut()?;

        loop {
            match stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => match LiveEvent::decode(text.as_str()) {
                    Ok(event) => return Some(event),
                    Err(error) => warn!(%error, "discarding malformed live frame"),
                },
                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                Some(Err(error)) => {
                    warn!(%error, "websocket read failed");
                    break;
                },
                Some(Ok(_)) => {},
            }
        }

        self.stream = None;
        None
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(error) = stream.close(None).await
        {
            debug!(%error, "websocket close failed");
        }
    }
}
