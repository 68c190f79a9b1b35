//! Mock animation peer
//!
//! A real WebSocket server speaking the peer's request/response protocol,
//! with knobs for the failure modes the bridge must survive: token denial,
//! pre-existing parameters, severed sessions and refused connections.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use facebridge_client::wire::{self, Envelope};
use facebridge_client::{API_ERROR_PARAMETER_EXISTS, API_ERROR_USER_DENIED};
use facebridge_transport::{MessageChannel, PeerAnnouncement, TransportError, WsChannel};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// CONFIGURATION AND STATE
// ============================================================================

/// Initial peer behaviour
#[derive(Clone, Debug, Default)]
pub struct MockPeerConfig {
    /// Answer token requests with "user denied"
    pub deny_tokens: bool,
    /// Parameter names that already exist before any client connects
    pub existing_parameters: Vec<String>,
}

/// One request as the peer saw it
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// 1-based connection number
    pub connection: u32,
    pub envelope: Envelope,
}

#[derive(Default)]
struct PeerState {
    valid_tokens: HashSet<String>,
    issued: u32,
    deny_tokens: bool,
    parameters: HashSet<String>,
    refuse: bool,
    connections: u32,
    /// Injections on a connection that never authenticated
    violations: u32,
    requests: Vec<RecordedRequest>,
}

// ============================================================================
// MOCK PEER
// ============================================================================

/// Mock peer listening on a loopback port
pub struct MockPeer {
    addr: SocketAddr,
    state: Arc<Mutex<PeerState>>,
    sessions: Arc<Mutex<CancellationToken>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl MockPeer {
    pub async fn start(config: MockPeerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(Mutex::new(PeerState {
            deny_tokens: config.deny_tokens,
            parameters: config.existing_parameters.into_iter().collect(),
            ..PeerState::default()
        }));
        let sessions = Arc::new(Mutex::new(CancellationToken::new()));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&state),
            Arc::clone(&sessions),
            shutdown.clone(),
        ));

        tracing::debug!(%addr, "mock peer listening");
        Ok(MockPeer {
            addr,
            state,
            sessions,
            shutdown,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Requests of one message type received so far
    pub fn count(&self, message_type: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.envelope.message_type == message_type)
            .count()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn tokens_issued(&self) -> u32 {
        self.state.lock().issued
    }

    pub fn connections(&self) -> u32 {
        self.state.lock().connections
    }

    pub fn violations(&self) -> u32 {
        self.state.lock().violations
    }

    /// Parameter creation requests per parameter name
    pub fn creation_requests_for(&self, name: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.envelope.message_type == wire::PARAMETER_CREATION_REQUEST)
            .filter(|r| r.envelope.data["parameterName"] == name)
            .count()
    }

    /// Injected values for one wire parameter id, oldest first
    pub fn injected_values(&self, id: &str) -> Vec<f64> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.envelope.message_type == wire::INJECT_REQUEST)
            .filter_map(|r| r.envelope.data_as::<wire::InjectParameterData>().ok())
            .flat_map(|d| d.parameter_values)
            .filter(|p| p.id == id)
            .map(|p| p.value)
            .collect()
    }

    /// Close every open session; new connections are still accepted
    pub fn sever(&self) {
        let mut sessions = self.sessions.lock();
        sessions.cancel();
        *sessions = CancellationToken::new();
    }

    /// Drop new connections before the WebSocket handshake
    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    pub fn set_deny_tokens(&self, deny: bool) {
        self.state.lock().deny_tokens = deny;
    }

    /// Broadcast announcements to `target` until `cancel` fires
    pub fn announce(&self, target: SocketAddr, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let announcement = PeerAnnouncement {
            active: true,
            port: self.port(),
            instance_id: "mock-peer".to_string(),
            window_title: "Mock Peer".to_string(),
        };
        tokio::spawn(async move {
            let Ok(socket) = UdpSocket::bind("127.0.0.1:0").await else {
                return;
            };
            let payload = announcement.to_bytes(wire::API_NAME);
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = socket.send_to(&payload, target).await;
                    }
                }
            }
        })
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.sessions.lock().cancel();
        let _ = self.task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<PeerState>>,
    sessions: Arc<Mutex<CancellationToken>>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (tcp, _) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "mock peer accept failed");
                continue;
            }
        };

        let connection = {
            let mut state = state.lock();
            if state.refuse {
                continue;
            }
            state.connections += 1;
            state.connections
        };
        let session = sessions.lock().clone();
        tokio::spawn(serve(tcp, connection, Arc::clone(&state), session));
    }
}

async fn serve(
    tcp: TcpStream,
    connection: u32,
    state: Arc<Mutex<PeerState>>,
    session: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(tcp).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(error = %e, "mock peer handshake failed");
            return;
        }
    };
    let mut channel = WsChannel::new(ws);
    let mut authenticated = false;

    loop {
        let received = tokio::select! {
            _ = session.cancelled() => {
                channel.close().await;
                break;
            }
            received = channel.recv_text() => received,
        };
        let text = match received {
            Ok(text) => text,
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::debug!(error = %e, "mock peer receive failed");
                break;
            }
        };
        let Ok(request) = Envelope::decode(&text) else {
            continue;
        };

        let reply = {
            let mut state = state.lock();
            state.requests.push(RecordedRequest {
                connection,
                envelope: request.clone(),
            });
            respond(&mut state, &request, &mut authenticated)
        };
        if let Some(reply) = reply {
            if channel.send_text(reply.encode()).await.is_err() {
                break;
            }
        }
    }
}

fn respond(state: &mut PeerState, request: &Envelope, authenticated: &mut bool) -> Option<Envelope> {
    let id = request.request_id.as_str();
    let reply = match request.message_type.as_str() {
        wire::API_STATE_REQUEST => Envelope::response(
            id,
            wire::API_STATE_RESPONSE,
            &wire::ApiState {
                active: true,
                version: "1.0.0-mock".to_string(),
                current_session_authenticated: *authenticated,
            },
        ),
        wire::TOKEN_REQUEST if state.deny_tokens => {
            Envelope::api_error(id, API_ERROR_USER_DENIED, "The user has denied API access")
        }
        wire::TOKEN_REQUEST => {
            state.issued += 1;
            let token = format!("mock-token-{}", state.issued);
            state.valid_tokens.insert(token.clone());
            Envelope::response(
                id,
                wire::TOKEN_RESPONSE,
                &wire::TokenIssued {
                    authentication_token: token,
                },
            )
        }
        wire::AUTH_REQUEST => {
            let data: wire::AuthenticationData = request.data_as().ok()?;
            *authenticated = state.valid_tokens.contains(&data.authentication_token);
            Envelope::response(
                id,
                wire::AUTH_RESPONSE,
                &wire::AuthenticationResult {
                    authenticated: *authenticated,
                    reason: if *authenticated {
                        "Token valid".to_string()
                    } else {
                        "Token invalid".to_string()
                    },
                },
            )
        }
        wire::PARAMETER_CREATION_REQUEST => {
            let data: wire::ParameterCreation = request.data_as().ok()?;
            if state.parameters.insert(data.parameter_name.clone()) {
                Envelope::response(
                    id,
                    wire::PARAMETER_CREATION_RESPONSE,
                    &wire::ParameterCreated {
                        parameter_name: data.parameter_name,
                    },
                )
            } else {
                Envelope::api_error(id, API_ERROR_PARAMETER_EXISTS, "Parameter already exists")
            }
        }
        wire::INJECT_REQUEST => {
            if !*authenticated {
                state.violations += 1;
            }
            Envelope::response(id, wire::INJECT_RESPONSE, &serde_json::json!({}))
        }
        _ => Envelope::api_error(id, 1, "Unknown message type"),
    };
    Some(reply)
}
