//! Protocol client state machine

use std::collections::HashSet;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use facebridge_core::{
    ErrorKind, HealthSnapshot, HealthSource, OutputParameter, ParameterDeclaration,
};
use facebridge_transport::{
    Connector, DiscoveryListener, MessageChannel, TransportError, WsConnector, DISCOVERY_PORT,
};
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::wire::{self, Envelope, Request};
use crate::{
    Backoff, BackoffPolicy, ClientError, ClientResult, ConnectionState, FaultReason, TokenStore,
    API_ERROR_PARAMETER_EXISTS, API_ERROR_USER_DENIED,
};

// ============================================================================
// Configuration
// ============================================================================

/// How the peer endpoint is located
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryMode {
    /// Static endpoint only
    #[default]
    Disabled,
    /// Listen for an announcement, fall back to the static endpoint
    Preferred,
    /// Fault when no announcement arrives
    Required,
}

/// Protocol client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Static `ws://` endpoint
    pub endpoint: Option<String>,
    pub discovery: DiscoveryMode,
    pub discovery_addr: SocketAddr,
    pub discovery_timeout: Duration,
    /// Bound on the whole authentication exchange
    pub handshake_timeout: Duration,
    /// Bound on each request/response round trip
    pub request_timeout: Duration,
    /// Prepended to parameter ids on the wire only
    pub parameter_prefix: String,
    pub plugin: wire::PluginInfo,
    pub token_path: PathBuf,
    pub backoff: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: Some("ws://127.0.0.1:8001".to_string()),
            discovery: DiscoveryMode::Disabled,
            discovery_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)),
            discovery_timeout: facebridge_transport::DEFAULT_DISCOVERY_TIMEOUT,
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            parameter_prefix: String::new(),
            plugin: wire::PluginInfo {
                plugin_name: "FaceBridge".to_string(),
                plugin_developer: "FaceBridge Contributors".to_string(),
                plugin_icon: None,
            },
            token_path: PathBuf::from("facebridge-token.txt"),
            backoff: BackoffPolicy::default(),
        }
    }
}

// ============================================================================
// Health monitor
// ============================================================================

/// Most recent fault
#[derive(Clone, Debug, PartialEq)]
pub struct Fault {
    pub reason: FaultReason,
    pub kind: ErrorKind,
    pub message: String,
}

struct MonitorShared {
    state: watch::Sender<ConnectionState>,
    health: RwLock<HealthSnapshot>,
}

/// Read-only view of the client's state and health.
///
/// Cloneable and lock-free with respect to the client itself, so observers
/// never wait on a client that is busy reconnecting.
#[derive(Clone)]
pub struct ClientMonitor {
    shared: Arc<MonitorShared>,
}

impl ClientMonitor {
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

impl HealthSource for ClientMonitor {
    fn component(&self) -> &'static str {
        "client"
    }

    fn health(&self) -> HealthSnapshot {
        self.shared.health.read().clone()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Connection to the animation peer
pub struct ProtocolClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    tokens: TokenStore,
    channel: Option<Box<dyn MessageChannel>>,
    state: ConnectionState,
    last_fault: Option<Fault>,
    backoff: Backoff,
    retry_at: Option<Instant>,
    /// Wire names declared this session
    declared: HashSet<String>,
    started: bool,
    peer: Option<wire::ApiState>,
    next_request: u64,
    frames_sent: u64,
    monitor: ClientMonitor,
    cancel: CancellationToken,
}

impl ProtocolClient {
    /// Client using WebSocket connections
    pub fn new(config: ClientConfig, cancel: CancellationToken) -> Self {
        Self::with_connector(config, Arc::new(WsConnector), cancel)
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let monitor = ClientMonitor {
            shared: Arc::new(MonitorShared {
                state: state_tx,
                health: RwLock::new(HealthSnapshot::healthy()),
            }),
        };

        ProtocolClient {
            tokens: TokenStore::new(config.token_path.clone()),
            backoff: Backoff::new(config.backoff.clone()),
            config,
            connector,
            channel: None,
            state: ConnectionState::Disconnected,
            last_fault: None,
            retry_at: None,
            declared: HashSet::new(),
            started: false,
            peer: None,
            next_request: 0,
            frames_sent: 0,
            monitor,
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    pub fn monitor(&self) -> ClientMonitor {
        self.monitor.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Peer state reported by the last API state request
    pub fn peer_state(&self) -> Option<&wire::ApiState> {
        self.peer.as_ref()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Time left before a faulted client may retry
    pub fn retry_in(&self) -> Option<Duration> {
        self.retry_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// Parameter id as sent on the wire
    pub fn wire_name(&self, id: &str) -> String {
        format!("{}{}", self.config.parameter_prefix, id)
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Bring the session up from `Disconnected` or an expired `Faulted`.
    ///
    /// No-op when already `Ready`. Never retries internally: a failure
    /// leaves the client `Faulted` and the caller decides when to try again.
    pub async fn reinitialize(&mut self, declarations: &[ParameterDeclaration]) -> ClientResult<()> {
        self.started = true;

        match self.state {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Faulted => {
                if let Some(wait) = self.retry_in() {
                    return Err(ClientError::BackoffPending(wait));
                }
                self.transition(ConnectionState::Disconnected);
            }
            ConnectionState::Disconnected => {}
            _ => {
                // Interrupted mid-establishment; start over
                self.channel = None;
                self.transition(ConnectionState::Disconnected);
            }
        }

        tracing::info!(attempt = self.backoff.attempt(), "initializing peer session");
        self.connect().await?;
        self.authenticate().await?;
        self.synchronize_parameters(declarations).await?;
        Ok(())
    }

    /// Locate the peer and open the transport
    pub async fn connect(&mut self) -> ClientResult<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::NotReady(self.state));
        }
        self.started = true;
        self.declared.clear();
        self.peer = None;

        let cancel = self.cancel.clone();
        let result = cancellable(&cancel, self.connect_inner()).await;
        self.settle(result)
    }

    /// Validate the stored token, requesting and persisting a new one if needed
    pub async fn authenticate(&mut self) -> ClientResult<()> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Discovering
        ) || self.channel.is_none()
        {
            return Err(ClientError::NotReady(self.state));
        }
        self.transition(ConnectionState::Authenticating);

        let cancel = self.cancel.clone();
        let timeout = self.config.handshake_timeout;
        let result = cancellable(&cancel, async {
            match tokio::time::timeout(timeout, self.handshake()).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::HandshakeTimeout(timeout)),
            }
        })
        .await;
        self.settle(result)
    }

    /// Declare every parameter the peer has not seen this session.
    ///
    /// "Already exists" counts as declared. Repeated calls with the same
    /// declarations send nothing. Returns the number of new declarations.
    pub async fn synchronize_parameters(
        &mut self,
        declarations: &[ParameterDeclaration],
    ) -> ClientResult<usize> {
        if !matches!(
            self.state,
            ConnectionState::Authenticating
                | ConnectionState::SynchronizingParameters
                | ConnectionState::Ready
        ) {
            return Err(ClientError::NotReady(self.state));
        }
        self.transition(ConnectionState::SynchronizingParameters);

        let cancel = self.cancel.clone();
        let result = cancellable(&cancel, self.declare_all(declarations)).await;
        let created = self.settle(result)?;

        self.backoff.reset();
        self.retry_at = None;
        self.transition(ConnectionState::Ready);
        Ok(created)
    }

    /// Send one frame's outputs. Only valid in `Ready`; a transport failure
    /// faults the client immediately.
    pub async fn send_tracking(
        &mut self,
        outputs: &[OutputParameter],
        face_found: bool,
    ) -> ClientResult<()> {
        if self.state != ConnectionState::Ready {
            return Err(ClientError::NotReady(self.state));
        }

        let request = Request::InjectParameterData(wire::InjectParameterData {
            face_found,
            mode: "set".to_string(),
            parameter_values: outputs
                .iter()
                .map(|o| wire::ParameterValue {
                    id: self.wire_name(&o.id),
                    value: o.value,
                    weight: o.weight,
                })
                .collect(),
        });
        let id = self.next_request_id();
        let text = Envelope::request(&id, &request).encode();

        let cancel = self.cancel.clone();
        let timeout = self.config.request_timeout;
        let result = cancellable(&cancel, async {
            let channel = self
                .channel
                .as_mut()
                .ok_or(ClientError::Transport(TransportError::Closed))?;
            match tokio::time::timeout(timeout, channel.send_text(text)).await {
                Ok(sent) => sent?,
                Err(_) => return Err(TransportError::Timeout(timeout).into()),
            }
            drain_inbound(channel.as_mut())
        })
        .await;
        self.settle(result)?;

        self.frames_sent += 1;
        Ok(())
    }

    /// Close the session without faulting
    pub async fn shutdown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.started = false;
        self.transition(ConnectionState::Disconnected);
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    async fn connect_inner(&mut self) -> ClientResult<()> {
        self.transition(ConnectionState::Connecting);
        let url = self.resolve_endpoint().await?;

        let timeout = self.config.request_timeout;
        let channel = match tokio::time::timeout(timeout, self.connector.connect(&url)).await {
            Ok(channel) => channel?,
            Err(_) => return Err(TransportError::Timeout(timeout).into()),
        };
        self.channel = Some(channel);
        tracing::info!(%url, "connected to peer");
        Ok(())
    }

    async fn resolve_endpoint(&mut self) -> ClientResult<String> {
        let mode = self.config.discovery;
        if mode == DiscoveryMode::Disabled {
            return self.config.endpoint.clone().ok_or(ClientError::NoEndpoint);
        }

        self.transition(ConnectionState::Discovering);
        let fallback = match mode {
            DiscoveryMode::Preferred => self.config.endpoint.clone(),
            _ => None,
        };

        let listener = match DiscoveryListener::bind(self.config.discovery_addr).await {
            Ok(listener) => listener,
            Err(e) => return discovery_fallback(fallback, e),
        };

        match listener
            .listen(self.config.discovery_timeout, &self.cancel)
            .await
        {
            Ok(peer) => Ok(peer.websocket_url()),
            Err(e) => discovery_fallback(fallback, e),
        }
    }

    async fn handshake(&mut self) -> ClientResult<()> {
        let state: wire::ApiState = self
            .request(Request::ApiState)
            .await?
            .expect(wire::API_STATE_RESPONSE)?
            .data_as()?;
        tracing::info!(
            version = %state.version,
            active = state.active,
            "peer API state"
        );
        self.peer = Some(state);

        if let Some(token) = self.tokens.load()? {
            let result = self.validate_token(&token).await?;
            if result.authenticated {
                tracing::info!("authenticated with stored token");
                return Ok(());
            }
            tracing::info!(reason = %result.reason, "stored token rejected; requesting a new one");
        }

        let token = self.request_token().await?;
        self.tokens.save(&token)?;

        let result = self.validate_token(&token).await?;
        if result.authenticated {
            tracing::info!("authenticated with new token");
            Ok(())
        } else {
            Err(ClientError::AuthenticationRejected(result.reason))
        }
    }

    async fn request_token(&mut self) -> ClientResult<String> {
        let reply = self
            .request(Request::AuthenticationToken(self.config.plugin.clone()))
            .await?;
        match reply.expect(wire::TOKEN_RESPONSE) {
            Ok(reply) => Ok(reply.data_as::<wire::TokenIssued>()?.authentication_token),
            Err(ClientError::Api { error_id, .. }) if error_id == API_ERROR_USER_DENIED => {
                Err(ClientError::AuthenticationDenied)
            }
            Err(e) => Err(e),
        }
    }

    async fn validate_token(&mut self, token: &str) -> ClientResult<wire::AuthenticationResult> {
        let request = Request::Authentication(wire::AuthenticationData {
            plugin_name: self.config.plugin.plugin_name.clone(),
            plugin_developer: self.config.plugin.plugin_developer.clone(),
            authentication_token: token.to_string(),
        });
        self.request(request)
            .await?
            .expect(wire::AUTH_RESPONSE)?
            .data_as()
    }

    async fn declare_all(&mut self, declarations: &[ParameterDeclaration]) -> ClientResult<usize> {
        let mut created = 0;
        for decl in declarations {
            let name = self.wire_name(&decl.id);
            if self.declared.contains(&name) {
                continue;
            }

            let request = Request::ParameterCreation(wire::ParameterCreation {
                parameter_name: name.clone(),
                explanation: format!("FaceBridge rule {}", decl.id),
                min: decl.min,
                max: decl.max,
                default_value: decl.default_value,
            });
            match self
                .request(request)
                .await?
                .expect(wire::PARAMETER_CREATION_RESPONSE)
            {
                Ok(_) => {
                    tracing::debug!(parameter = %name, "parameter declared");
                    created += 1;
                }
                Err(ClientError::Api { error_id, .. }) if error_id == API_ERROR_PARAMETER_EXISTS => {
                    tracing::debug!(parameter = %name, "parameter already exists");
                }
                Err(e) => return Err(e),
            }
            self.declared.insert(name);
        }

        if created > 0 {
            tracing::info!(created, total = self.declared.len(), "parameters synchronized");
        }
        Ok(created)
    }

    async fn request(&mut self, request: Request) -> ClientResult<Envelope> {
        let id = self.next_request_id();
        let text = Envelope::request(&id, &request).encode();
        let timeout = self.config.request_timeout;

        let channel = self
            .channel
            .as_mut()
            .ok_or(ClientError::Transport(TransportError::Closed))?;
        channel.send_text(text).await?;

        match tokio::time::timeout(timeout, await_reply(channel.as_mut(), &id)).await {
            Ok(reply) => reply,
            Err(_) => Err(TransportError::Timeout(timeout).into()),
        }
    }

    // ------------------------------------------------------------------------
    // State bookkeeping
    // ------------------------------------------------------------------------

    fn next_request_id(&mut self) -> String {
        self.next_request += 1;
        format!("fb-{}", self.next_request)
    }

    /// Apply the outcome of a stage: cancellation disconnects, any other
    /// error faults.
    fn settle<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(ClientError::Cancelled) => {
                tracing::info!(state = %self.state, "client operation cancelled");
                self.channel = None;
                self.transition(ConnectionState::Disconnected);
                Err(ClientError::Cancelled)
            }
            Err(e) => {
                let reason = self.fault_reason(&e);
                self.fault(reason, &e);
                Err(e)
            }
        }
    }

    fn fault_reason(&self, error: &ClientError) -> FaultReason {
        match error {
            ClientError::DiscoveryTimeout => FaultReason::DiscoveryTimeout,
            ClientError::AuthenticationDenied => FaultReason::AuthenticationDenied,
            ClientError::HandshakeTimeout(_) => FaultReason::HandshakeTimeout,
            ClientError::Malformed(_) | ClientError::UnexpectedResponse { .. } => {
                FaultReason::ProtocolViolation
            }
            _ => match self.state {
                ConnectionState::Connecting | ConnectionState::Discovering => {
                    FaultReason::ConnectFailed
                }
                ConnectionState::Authenticating => FaultReason::AuthenticationFailed,
                ConnectionState::SynchronizingParameters => FaultReason::ParameterSyncFailed,
                _ => FaultReason::SendFailed,
            },
        }
    }

    fn fault(&mut self, reason: FaultReason, error: &ClientError) {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        self.channel = None;
        self.last_fault = Some(Fault {
            reason,
            kind: error.kind(),
            message: error.to_string(),
        });
        tracing::warn!(
            %reason,
            error = %error,
            from = %self.state,
            retry_in = ?delay,
            "client faulted"
        );
        self.transition(ConnectionState::Faulted);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "unexpected state transition");
        }
        tracing::debug!(from = %self.state, to = %next, "client state");
        self.state = next;
        self.monitor.shared.state.send_replace(next);
        self.publish_health();
    }

    fn publish_health(&self) {
        let snapshot = match (self.state, &self.last_fault) {
            (ConnectionState::Faulted, Some(fault)) => HealthSnapshot::unhealthy(
                fault.kind,
                format!("{}: {}", fault.reason, fault.message),
            ),
            (ConnectionState::Disconnected, _) if self.started => {
                HealthSnapshot::unhealthy(ErrorKind::Transport, "disconnected from peer")
            }
            (_, Some(fault)) => {
                let mut snap = HealthSnapshot::healthy();
                snap.last_error_kind = Some(fault.kind);
                snap.last_error_message = Some(fault.message.clone());
                snap
            }
            _ => HealthSnapshot::healthy(),
        };
        *self.monitor.shared.health.write() = snapshot;
    }
}

impl HealthSource for ProtocolClient {
    fn component(&self) -> &'static str {
        "client"
    }

    fn health(&self) -> HealthSnapshot {
        self.monitor.health()
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = fut => result,
    }
}

/// Read until the reply to `id` arrives; unrelated messages are skipped
async fn await_reply(channel: &mut dyn MessageChannel, id: &str) -> ClientResult<Envelope> {
    loop {
        let reply = Envelope::decode(&channel.recv_text().await?)?;
        if reply.request_id == id {
            return Ok(reply);
        }
        tracing::trace!(
            request_id = %reply.request_id,
            message_type = %reply.message_type,
            "skipping unrelated message"
        );
    }
}

/// Consume replies that are already buffered without waiting.
///
/// Inject replies carry nothing we act on, but a closed channel shows up
/// here first.
fn drain_inbound(channel: &mut dyn MessageChannel) -> ClientResult<()> {
    while let Some(received) = channel.recv_text().now_or_never() {
        let text = received?;
        match Envelope::decode(&text) {
            Ok(env) if env.message_type == wire::API_ERROR => {
                tracing::warn!(request_id = %env.request_id, data = %env.data, "peer rejected frame");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "unparsable peer message"),
        }
    }
    Ok(())
}

/// Outcome of a failed discovery: the configured endpoint when there is
/// one, otherwise the failure. Cancellation always wins.
fn discovery_fallback(fallback: Option<String>, err: TransportError) -> ClientResult<String> {
    match (err, fallback) {
        (TransportError::Cancelled, _) => Err(ClientError::Cancelled),
        (TransportError::Timeout(_), Some(url)) => {
            tracing::info!(%url, "no peer announcement; using configured endpoint");
            Ok(url)
        }
        (TransportError::Timeout(_), None) => Err(ClientError::DiscoveryTimeout),
        (e, Some(url)) => {
            tracing::warn!(error = %e, %url, "discovery failed; using configured endpoint");
            Ok(url)
        }
        (e, None) => Err(e.into()),
    }
}
