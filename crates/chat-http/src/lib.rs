use std::time::Duration;

use async_trait::async_trait;
use chat_core::{
    ChatBackend, ChatError, ChatErrorCategory, Message, MessageSink, MessageSource, RoomRef,
    Session, StreamHandle, classify_http_status,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use reqwest::{Client, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, info, warn};
use url::Url;

const SESSION_HEADER: &str = "X-Session-ID";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// `http://` or `https://` base the API paths are appended to.
    pub server_url: String,
    pub request_timeout: Duration,
}

impl HttpBackendConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// [`ChatBackend`] over a JSON HTTP API plus one WebSocket per room.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
    stream_base: Url,
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    username: &'a str,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, ChatError> {
        let base = parse_base_url(&config.server_url)?;
        let stream_base = stream_base_url(&base)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(map_client_build_error)?;

        Ok(Self {
            client,
            base,
            stream_base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChatError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| invalid_base_url(self.base.as_str()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    /// WebSocket URL for one room's stream.
    pub fn stream_url(&self, session_id: &str, room_id: &str) -> Url {
        let mut url = self.stream_base.clone();
        url.query_pairs_mut()
            .append_pair("session_id", session_id)
            .append_pair("room_id", room_id);
        url
    }

    async fn post_json<T, B>(
        &self,
        action: &str,
        url: Url,
        session: Option<&Session>,
        body: Option<&B>,
    ) -> Result<T, ChatError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self.client.post(url);
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session.session_id());
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| map_transport_error(action, err))?;
        let response = check_status(action, response).await?;
        response
            .json()
            .await
            .map_err(|err| map_transport_error(action, err))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn create_session(&self, display_name: &str) -> Result<Session, ChatError> {
        let url = self.endpoint(&["sessions"])?;
        let body = CreateSessionRequest {
            username: display_name,
        };
        let session: Session = self
            .post_json("create session", url, None, Some(&body))
            .await
            .map_err(as_auth_error)?;

        info!(username = session.username(), "session issued");
        Ok(session)
    }

    async fn create_room(&self, session: &Session) -> Result<RoomRef, ChatError> {
        let url = self.endpoint(&["rooms"])?;
        self.post_json::<RoomRef, ()>("create room", url, Some(session), None)
            .await
    }

    async fn join_room(&self, session: &Session, room_id: &str) -> Result<(), ChatError> {
        let url = self.endpoint(&["rooms", room_id, "join"])?;
        let response = self
            .client
            .post(url)
            .header(SESSION_HEADER, session.session_id())
            .send()
            .await
            .map_err(|err| map_transport_error("join room", err))?;
        check_status("join room", response).await?;
        debug!(room_id, "joined room");
        Ok(())
    }

    async fn fetch_history(
        &self,
        session: &Session,
        room_id: &str,
        limit: u16,
    ) -> Result<Vec<Message>, ChatError> {
        let url = self.endpoint(&["rooms", room_id, "messages"])?;
        let response = self
            .client
            .get(url)
            .query(&[("limit", limit)])
            .header(SESSION_HEADER, session.session_id())
            .send()
            .await
            .map_err(|err| map_transport_error("fetch messages", err))?;
        let response = check_status("fetch messages", response).await?;
        let messages: Option<Vec<Message>> = response
            .json()
            .await
            .map_err(|err| map_transport_error("fetch messages", err))?;

        Ok(messages.unwrap_or_default())
    }

    async fn open_stream(
        &self,
        session: &Session,
        room_id: &str,
    ) -> Result<StreamHandle, ChatError> {
        let url = self.stream_url(session.session_id(), room_id);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|err| map_handshake_error(room_id, err))?;
        debug!(room_id, "websocket handshake complete");

        let (sink, source) = ws.split();
        Ok(StreamHandle::new(
            WsSink { inner: sink },
            WsSource {
                inner: source,
                room_id: room_id.to_owned(),
            },
        ))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, message: &Message) -> Result<(), ChatError> {
        let text = serde_json::to_string(message).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "encode_error",
                err.to_string(),
            )
        })?;
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|err| ChatError::new(ChatErrorCategory::Write, "write_failed", err.to_string()))
    }

    async fn close(&mut self) {
        if let Err(err) = self.inner.close().await {
            debug!(error = %err, "websocket close failed");
        }
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
    room_id: String,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn next_message(&mut self) -> Result<Message, ChatError> {
        loop {
            let payload = match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                Some(Ok(WsMessage::Binary(bytes))) => bytes,
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.into_owned())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_owned());
                    return Err(ChatError::new(
                        ChatErrorCategory::Read,
                        "stream_closed",
                        reason,
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    return Err(ChatError::new(
                        ChatErrorCategory::Read,
                        "read_failed",
                        err.to_string(),
                    ));
                }
                None => {
                    return Err(ChatError::new(
                        ChatErrorCategory::Read,
                        "stream_closed",
                        "stream ended",
                    ));
                }
            };

            match decode_frame(&payload) {
                Ok(message) => return Ok(message),
                Err(err) => {
                    warn!(room_id = %self.room_id, error = %err, "skipping undecodable frame");
                }
            }
        }
    }
}

/// Decode one stream frame in the message wire shape.
pub fn decode_frame(payload: &[u8]) -> Result<Message, ChatError> {
    serde_json::from_slice(payload).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "decode_error",
            err.to_string(),
        )
    })
}

fn parse_base_url(value: &str) -> Result<Url, ChatError> {
    let url = Url::parse(value.trim()).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Config,
            "invalid_server_url",
            format!("invalid server url '{value}': {err}"),
        )
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid_base_url(value));
    }
    Ok(url)
}

fn stream_base_url(base: &Url) -> Result<Url, ChatError> {
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| invalid_base_url(base.as_str()))?;
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| invalid_base_url(base.as_str()))?
        .pop_if_empty()
        .push("ws");
    Ok(url)
}

fn invalid_base_url(value: &str) -> ChatError {
    ChatError::new(
        ChatErrorCategory::Config,
        "invalid_server_url",
        format!("server url must be an http(s) base url, got '{value}'"),
    )
}

async fn check_status(action: &str, response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(action, status, body.trim()))
}

fn status_error(action: &str, status: StatusCode, body: &str) -> ChatError {
    let message = if body.is_empty() {
        format!("{action} returned {status}")
    } else {
        format!("{action} returned {status}: {body}")
    };
    ChatError::new(classify_http_status(status.as_u16()), "http_status", message)
}

fn as_auth_error(err: ChatError) -> ChatError {
    ChatError::new(ChatErrorCategory::Auth, err.code, err.message)
}

fn map_transport_error(action: &str, err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::new(
            ChatErrorCategory::Timeout,
            "request_timeout",
            format!("{action} timed out: {err}"),
        )
    } else if err.is_decode() {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "decode_error",
            format!("{action} returned an unreadable body: {err}"),
        )
    } else {
        ChatError::new(
            ChatErrorCategory::Backend,
            "transport_error",
            format!("{action} failed: {err}"),
        )
    }
}

fn map_handshake_error(room_id: &str, err: tokio_tungstenite::tungstenite::Error) -> ChatError {
    ChatError::new(
        ChatErrorCategory::Connect,
        "handshake_failed",
        format!("could not open stream for room {room_id}: {err}"),
    )
}

fn map_client_build_error(err: reqwest::Error) -> ChatError {
    ChatError::new(
        ChatErrorCategory::Config,
        "client_build_error",
        err.to_string(),
    )
}
