//! Persistent control channel to the gateway
//!
//! Bidirectional WebSocket used for out-of-band command delivery, independent
//! of the voice pipeline. The channel performs a versioned handshake on open
//! and reconnects indefinitely with a fixed delay whenever the transport
//! closes. Received events are retained for external consumption; the voice
//! pipeline does not consume them (reserved for future command execution).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::ControlConfig;
use crate::{Error, Result};

/// Connection lifecycle of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// No transport, no reconnect pending
    Disconnected,
    /// Transport being opened
    Connecting,
    /// Transport open, hello request sent, awaiting the hello response
    HandshakeInFlight,
    /// Handshake acknowledged; channel fully usable
    Connected,
}

/// Outgoing request envelope
#[derive(Serialize)]
struct RequestEnvelope<'a, P: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: String,
    method: &'a str,
    params: P,
}

/// Client identity block declared during the handshake
#[derive(Serialize)]
struct ClientIdentity<'a> {
    id: &'a str,
    version: &'static str,
    platform: &'static str,
    mode: &'a str,
}

#[derive(Serialize)]
struct AuthParams<'a> {
    token: &'a str,
}

/// Handshake parameters: protocol bounds, identity, role, scopes, auth
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams<'a> {
    min_protocol: u32,
    max_protocol: u32,
    client: ClientIdentity<'a>,
    role: &'a str,
    scopes: &'a [String],
    caps: Vec<String>,
    commands: Vec<String>,
    permissions: serde_json::Map<String, Value>,
    auth: AuthParams<'a>,
    locale: &'static str,
    user_agent: String,
}

struct Shared {
    state: Mutex<ControlState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    last_event: Mutex<Option<Value>>,
}

impl Shared {
    fn set_state(&self, state: ControlState) {
        *lock(&self.state) = state;
    }

    fn drop_transport(&self) {
        *lock(&self.outbound) = None;
        self.set_state(ControlState::Disconnected);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Persistent reconnecting connection to the command/control endpoint
pub struct ControlChannel {
    config: ControlConfig,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

struct Supervisor {
    handle: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ControlChannel {
    /// Create a channel in the `Disconnected` state
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(ControlState::Disconnected),
                outbound: Mutex::new(None),
                last_event: Mutex::new(None),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Open the channel. Idempotent; a no-op while a connection loop is live.
    ///
    /// Spawns a supervising task that connects, performs the handshake, and
    /// re-attempts after the configured delay whenever the transport closes,
    /// until [`disconnect`](Self::disconnect) is called.
    pub fn connect(&self) {
        let mut slot = lock(&self.supervisor);
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            run_connection_loop(shared, config, shutdown_rx).await;
        });

        *slot = Some(Supervisor {
            handle,
            shutdown: shutdown_tx,
        });
    }

    /// Close the transport and cancel any pending reconnect
    pub fn disconnect(&self) {
        if let Some(supervisor) = lock(&self.supervisor).take() {
            let _ = supervisor.shutdown.send(true);
        }
        self.shared.drop_transport();
        tracing::debug!("control channel disconnected");
    }

    /// Dispatch a tagged request envelope over the open transport
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the transport is not open
    pub fn send<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let envelope = RequestEnvelope {
            kind: "req",
            id: format!("{method}-{}", uuid::Uuid::new_v4()),
            method,
            params,
        };
        let text = serde_json::to_string(&envelope)?;

        let guard = lock(&self.shared.outbound);
        let sender = guard.as_ref().ok_or(Error::NotConnected)?;
        sender
            .send(WsMessage::Text(text.into()))
            .map_err(|_| Error::NotConnected)
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ControlState {
        *lock(&self.shared.state)
    }

    /// Whether the handshake has completed on the live transport
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ControlState::Connected
    }

    /// Last event received from the server, if any
    #[must_use]
    pub fn last_event(&self) -> Option<Value> {
        lock(&self.shared.last_event).clone()
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if let Some(supervisor) = lock(&self.supervisor).take() {
            let _ = supervisor.shutdown.send(true);
        }
    }
}

/// Connect, handshake, pump messages; repeat after the fixed delay on close
async fn run_connection_loop(
    shared: Arc<Shared>,
    config: ControlConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let delay = Duration::from_millis(config.reconnect_delay_ms);

    loop {
        if *shutdown.borrow() {
            return;
        }

        shared.set_state(ControlState::Connecting);

        match connect_async(&config.url).await {
            Ok((stream, _)) => {
                // disconnect() may have landed while the dial was in flight;
                // never go live on a transport nobody wants
                if *shutdown.borrow() {
                    shared.drop_transport();
                    return;
                }
                tracing::debug!(url = %config.url, "control transport open");
                run_session(&shared, &config, stream, &mut shutdown).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %config.url, "control connect failed");
            }
        }

        shared.drop_transport();

        if *shutdown.borrow() {
            return;
        }

        // Exactly one reconnect scheduled per close
        tracing::debug!(delay_ms = config.reconnect_delay_ms, "scheduling reconnect");
        tokio::select! {
            _ = shutdown.changed() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drive one open transport until it closes or shutdown is requested
async fn run_session(
    shared: &Arc<Shared>,
    config: &ControlConfig,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut source) = stream.split();

    let hello = RequestEnvelope {
        kind: "req",
        id: format!("connect-{}", uuid::Uuid::new_v4()),
        method: "connect",
        params: ConnectParams {
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            client: ClientIdentity {
                id: &config.client_id,
                version: env!("CARGO_PKG_VERSION"),
                platform: std::env::consts::OS,
                mode: &config.role,
            },
            role: &config.role,
            scopes: &config.scopes,
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: serde_json::Map::new(),
            auth: AuthParams {
                token: &config.token,
            },
            locale: "en-US",
            user_agent: format!("{}/{}", config.client_id, env!("CARGO_PKG_VERSION")),
        },
    };

    let Ok(hello_text) = serde_json::to_string(&hello) else {
        return;
    };
    if sink.send(WsMessage::Text(hello_text.into())).await.is_err() {
        return;
    }
    shared.set_state(ControlState::HandshakeInFlight);

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    *lock(&shared.outbound) = Some(tx);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return;
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => handle_event(shared, &text),
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!("control transport closed by server");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "control transport error");
                        return;
                    }
                }
            }
        }
    }
}

/// Parse a server event, promote to `Connected` on a successful hello
fn handle_event(shared: &Arc<Shared>, text: &str) {
    let event: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable control event");
            return;
        }
    };

    let is_hello_ok = event["type"] == "res" && event["payload"]["type"] == "hello-ok";
    if is_hello_ok {
        shared.set_state(ControlState::Connected);
        tracing::info!("control channel connected");
    }

    *lock(&shared.last_event) = Some(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_envelope_shape() {
        let config = ControlConfig::default();
        let params = ConnectParams {
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            client: ClientIdentity {
                id: &config.client_id,
                version: "1.0.0",
                platform: "linux",
                mode: &config.role,
            },
            role: &config.role,
            scopes: &config.scopes,
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: serde_json::Map::new(),
            auth: AuthParams { token: "secret" },
            locale: "en-US",
            user_agent: "chatterbox/1.0.0".to_string(),
        };
        let envelope = RequestEnvelope {
            kind: "req",
            id: "connect-1".to_string(),
            method: "connect",
            params,
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "req");
        assert_eq!(json["method"], "connect");
        assert_eq!(json["params"]["minProtocol"], 3);
        assert_eq!(json["params"]["maxProtocol"], 3);
        assert_eq!(json["params"]["role"], "operator");
        assert_eq!(json["params"]["auth"]["token"], "secret");
        assert_eq!(json["params"]["client"]["id"], "chatterbox");
        assert!(json["params"]["scopes"].as_array().is_some());
    }

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        let channel = ControlChannel::new(ControlConfig::default());
        let err = channel
            .send("ping", serde_json::json!({}))
            .expect_err("send must fail while disconnected");
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(channel.state(), ControlState::Disconnected);
    }
}
