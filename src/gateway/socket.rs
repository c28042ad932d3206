//! Gateway WebSocket: skill listing and typed commands.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ClawPilotConfig;
use crate::error::{ClawPilotError, Result};
use crate::util::with_timeout;

type GatewayWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Command type that asks the gateway for its skills.
pub const SKILLS_LIST: &str = "skills.list";

/// A skill advertised by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `{ws_url}?auth.token=<token>`
pub fn socket_url(ws_url: &str, token: &str) -> Result<Url> {
    let mut url = Url::parse(ws_url)
        .map_err(|err| ClawPilotError::Configuration(format!("invalid WebSocket URL: {err}")))?;
    url.query_pairs_mut().append_pair("auth.token", token);
    Ok(url)
}

/// Merge `type` into the payload object, as the gateway expects.
pub fn build_command(command_type: &str, payload: Value) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    object.insert("type".to_string(), Value::String(command_type.to_string()));
    Value::Object(object)
}

/// Skills carried by a `skills.list` message, if this is one.
pub fn parse_skills_message(text: &str) -> Option<Vec<Skill>> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(Value::as_str) != Some(SKILLS_LIST) {
        return None;
    }
    let skills = value.get("skills").cloned().unwrap_or(Value::Array(Vec::new()));
    match serde_json::from_value(skills) {
        Ok(skills) => Some(skills),
        Err(err) => {
            tracing::warn!(error = %err, "malformed skills list");
            None
        }
    }
}

/// Live connection to the gateway socket.
pub struct GatewaySocket {
    outbound_tx: mpsc::UnboundedSender<Message>,
    skills_rx: watch::Receiver<Vec<Skill>>,
    connected_rx: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl GatewaySocket {
    /// Connect with the configured device token and request the skill list.
    pub async fn connect(config: &ClawPilotConfig) -> Result<Self> {
        let token = config.require_device_token()?;
        let url = socket_url(config.require_ws_url()?, &token)?;
        Self::connect_url(url).await
    }

    pub async fn connect_url(url: Url) -> Result<Self> {
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ClawPilotError::Stream(format!("gateway socket connect failed: {err}")))?;
        tracing::info!(host = url.host_str().unwrap_or_default(), "gateway socket connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (skills_tx, skills_rx) = watch::channel(Vec::new());
        let (connected_tx, connected_rx) = watch::channel(true);

        let request = build_command(SKILLS_LIST, Value::Null).to_string();
        outbound_tx
            .send(Message::Text(request))
            .map_err(|_| ClawPilotError::InvalidState("socket writer closed".into()))?;

        let task = tokio::spawn(run_socket(socket, outbound_rx, skills_tx, connected_tx));
        Ok(Self {
            outbound_tx,
            skills_rx,
            connected_rx,
            task: Some(task),
        })
    }

    /// Send `{type, ...payload}`.
    pub fn send(&self, command_type: &str, payload: Value) -> Result<()> {
        let text = build_command(command_type, payload).to_string();
        self.outbound_tx
            .send(Message::Text(text))
            .map_err(|_| ClawPilotError::InvalidState("gateway socket is closed".into()))
    }

    pub fn skills(&self) -> Vec<Skill> {
        self.skills_rx.borrow().clone()
    }

    pub fn watch_skills(&self) -> watch::Receiver<Vec<Skill>> {
        self.skills_rx.clone()
    }

    /// Wait up to `wait` for the next skills list.
    pub async fn next_skills(&self, wait: Duration) -> Result<Vec<Skill>> {
        let mut skills = self.watch_skills();
        with_timeout(Some(wait), async move {
            skills.changed().await.map_err(|_| {
                ClawPilotError::Stream("gateway socket closed before sending skills".into())
            })?;
            let listed = skills.borrow_and_update().clone();
            Ok(listed)
        })
        .await
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// Close the socket and wait for the reader task to finish.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.outbound_tx.send(Message::Close(None));
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|err| ClawPilotError::Stream(format!("socket task failed: {err}")))?;
        }
        Ok(())
    }
}

impl Drop for GatewaySocket {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    socket: GatewayWebSocket,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    skills_tx: watch::Sender<Vec<Skill>>,
    connected_tx: watch::Sender<bool>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else { break };
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = sink.send(message).await {
                    tracing::warn!(error = %err, "gateway socket send failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(skills) = parse_skills_message(&text) {
                        tracing::debug!(count = skills.len(), "skills updated");
                        let _ = skills_tx.send(skills);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "gateway socket read failed");
                    break;
                }
            }
        }
    }
    let _ = connected_tx.send(false);
    tracing::info!("gateway socket disconnected");
}
