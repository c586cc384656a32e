//! Chrome DevTools Protocol transport.
//!
//! Commands carry a monotonically increasing `id` and are answered by a
//! message with the same `id`. Anything with a `method` and no `id` is an
//! event; events that arrive while a command is in flight are buffered so a
//! later [`ControlChannel::next_event`] still sees them.

use std::{collections::VecDeque, fmt, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{Message, protocol::WebSocketConfig},
};
use tracing::{debug, trace};

use crate::domain::RenderError;

/// Request/response plus event stream to one page target.
#[async_trait]
pub trait ControlChannel: Send {
    /// Send `method` and wait for its matching response `result`.
    async fn send_command(&mut self, method: &str, params: Value) -> Result<Value, RenderError>;

    /// Wait for the next event called `name` and return its `params`.
    async fn next_event(&mut self, name: &str) -> Result<Value, RenderError>;

    async fn close(&mut self);
}

/// Outcome of one failed connection attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// The renderer is probably still starting up.
    Retryable(String),
    Fatal(RenderError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Retryable(reason) => f.write_str(reason),
            AttemptError::Fatal(err) => write!(f, "{err}"),
        }
    }
}

/// Opens a [`ControlChannel`] to a renderer listening on `host:port`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn ControlChannel>, AttemptError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
}

/// Connector speaking CDP over the renderer's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct CdpConnector {
    client: Client,
}

impl CdpConnector {
    pub fn new(request_timeout: Duration) -> Result<Self, RenderError> {
        let client = Client::builder()
            .user_agent(concat!("pressroom/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|err| RenderError::protocol("discovery", err.to_string()))?;
        Ok(Self { client })
    }

    /// Look up the debugger URL of the first page target.
    pub async fn discover_page(&self, host: &str, port: u16) -> Result<String, AttemptError> {
        let endpoint = format!("http://{host}:{port}/json/list");
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|err| AttemptError::Retryable(format!("GET {endpoint}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Retryable(format!(
                "GET {endpoint}: status {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AttemptError::Retryable(format!("GET {endpoint}: {err}")))?;
        let targets: Vec<TargetInfo> = serde_json::from_slice(&body).map_err(|err| {
            AttemptError::Fatal(RenderError::protocol(
                "discovery",
                format!("malformed target list: {err}"),
            ))
        })?;

        targets
            .into_iter()
            .filter(|target| target.kind == "page")
            .find_map(|target| target.web_socket_debugger_url)
            .ok_or_else(|| AttemptError::Retryable("no page target exposed yet".to_string()))
    }
}

#[async_trait]
impl Connector for CdpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn ControlChannel>, AttemptError> {
        let ws_url = self.discover_page(host, port).await?;
        let channel = CdpChannel::open(&ws_url).await?;
        Ok(Box::new(channel))
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for one inbound message. `Page.printToPDF` returns the whole
/// document base64-encoded in a single frame.
pub const MAX_MESSAGE_BYTES: usize = 512 << 20;

/// Unclaimed events kept for a later `next_event`; the oldest are dropped.
const MAX_BUFFERED_EVENTS: usize = 256;

#[derive(Debug)]
struct Event {
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Fault>,
}

#[derive(Debug, Deserialize)]
struct Fault {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Live WebSocket session with one page.
pub struct CdpChannel {
    socket: Socket,
    next_id: u64,
    events: VecDeque<Event>,
}

impl CdpChannel {
    pub async fn open(ws_url: &str) -> Result<Self, AttemptError> {
        let config = WebSocketConfig::default()
            .max_message_size(Some(MAX_MESSAGE_BYTES))
            .max_frame_size(Some(MAX_MESSAGE_BYTES));
        let (socket, _) = connect_async_with_config(ws_url, Some(config), true)
            .await
            .map_err(|err| match err {
                tokio_tungstenite::tungstenite::Error::Io(io) => {
                    AttemptError::Retryable(format!("websocket {ws_url}: {io}"))
                }
                other => AttemptError::Fatal(RenderError::protocol(
                    "websocket",
                    format!("handshake with {ws_url} failed: {other}"),
                )),
            })?;
        debug!(
            target = "pressroom::infra::cdp",
            url = ws_url,
            "Control channel open"
        );
        Ok(Self {
            socket,
            next_id: 1,
            events: VecDeque::new(),
        })
    }

    fn buffer(&mut self, method: String, params: Value) {
        if self.events.len() >= MAX_BUFFERED_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(Event { method, params });
    }

    async fn read(&mut self, context: &str) -> Result<Inbound, RenderError> {
        loop {
            let message = match self.socket.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(RenderError::protocol(context, err.to_string())),
                None => return Err(RenderError::protocol(context, "control channel closed")),
            };
            match message {
                Message::Text(text) => {
                    trace!(target = "pressroom::infra::cdp", bytes = text.len(), "Received frame");
                    return serde_json::from_str(text.as_str()).map_err(|err| {
                        RenderError::protocol(context, format!("malformed message: {err}"))
                    });
                }
                Message::Close(_) => {
                    return Err(RenderError::protocol(context, "control channel closed"));
                }
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl ControlChannel for CdpChannel {
    async fn send_command(&mut self, method: &str, params: Value) -> Result<Value, RenderError> {
        let id = self.next_id;
        self.next_id += 1;
        let payload = json!({ "id": id, "method": method, "params": params }).to_string();
        debug!(target = "pressroom::infra::cdp", id, method, "Sending command");
        self.socket
            .send(Message::text(payload))
            .await
            .map_err(|err| RenderError::protocol(method, err.to_string()))?;

        loop {
            let inbound = self.read(method).await?;
            match (inbound.id, inbound.method) {
                (Some(reply_id), _) if reply_id == id => {
                    if let Some(fault) = inbound.error {
                        return Err(RenderError::protocol(
                            method,
                            format!("{} (code {})", fault.message, fault.code),
                        ));
                    }
                    return Ok(inbound.result.unwrap_or(Value::Null));
                }
                (Some(stale), _) => {
                    debug!(
                        target = "pressroom::infra::cdp",
                        id = stale,
                        "Ignoring reply to an earlier command"
                    );
                }
                (None, Some(event)) => self.buffer(event, inbound.params),
                (None, None) => {}
            }
        }
    }

    async fn next_event(&mut self, name: &str) -> Result<Value, RenderError> {
        if let Some(index) = self.events.iter().position(|event| event.method == name) {
            if let Some(event) = self.events.remove(index) {
                return Ok(event.params);
            }
        }

        loop {
            let inbound = self.read(name).await?;
            match inbound.method {
                Some(method) if inbound.id.is_none() && method == name => {
                    return Ok(inbound.params);
                }
                Some(method) if inbound.id.is_none() => self.buffer(method, inbound.params),
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.socket.close(None).await {
            debug!(
                target = "pressroom::infra::cdp",
                error = %err,
                "Control channel close failed"
            );
        }
    }
}
