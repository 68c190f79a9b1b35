//! UDP broadcast discovery
//!
//! The animation peer periodically broadcasts a state announcement on a
//! well-known port. The listener waits a bounded time for an active
//! announcement and reports the peer's WebSocket port.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{TransportError, TransportResult};

/// Well-known broadcast port
pub const DISCOVERY_PORT: u16 = 47779;

/// Announcement message type
pub const ANNOUNCEMENT_TYPE: &str = "VTubeStudioAPIStateBroadcast";

/// Default listen window
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

const MAX_DATAGRAM: usize = 4096;

/// Peer state carried in an announcement
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAnnouncement {
    pub active: bool,
    pub port: u16,
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    #[serde(default)]
    pub window_title: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnouncementEnvelope {
    api_name: String,
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    timestamp: u64,
    message_type: String,
    #[serde(rename = "requestID", default)]
    request_id: String,
    data: PeerAnnouncement,
}

impl PeerAnnouncement {
    /// Parse a broadcast datagram
    pub fn parse(bytes: &[u8]) -> TransportResult<Self> {
        let envelope: AnnouncementEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| TransportError::Announcement(e.to_string()))?;
        if envelope.message_type != ANNOUNCEMENT_TYPE {
            return Err(TransportError::Announcement(format!(
                "unexpected message type '{}'",
                envelope.message_type
            )));
        }
        if envelope.data.port == 0 {
            return Err(TransportError::Announcement("port 0".to_string()));
        }
        Ok(envelope.data)
    }

    /// Encode as a broadcast datagram
    pub fn to_bytes(&self, api_name: &str) -> Vec<u8> {
        let envelope = AnnouncementEnvelope {
            api_name: api_name.to_string(),
            api_version: "1.0".to_string(),
            timestamp: 0,
            message_type: ANNOUNCEMENT_TYPE.to_string(),
            request_id: "discovery".to_string(),
            data: self.clone(),
        };
        serde_json::to_vec(&envelope).unwrap_or_default()
    }
}

/// A discovered peer
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredPeer {
    pub announcement: PeerAnnouncement,
    /// Sender of the announcement
    pub source: SocketAddr,
}

impl DiscoveredPeer {
    /// WebSocket URL for the announced port on the announcing host
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}", self.source.ip(), self.announcement.port)
    }
}

/// Listens for peer announcements
pub struct DiscoveryListener {
    socket: UdpSocket,
}

impl DiscoveryListener {
    /// Bind on all interfaces at the well-known port
    pub async fn bind_default() -> TransportResult<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT))).await
    }

    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(DiscoveryListener { socket })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the first active announcement.
    ///
    /// Malformed and inactive announcements are skipped. Returns `Timeout`
    /// when nothing usable arrives within `timeout`.
    pub async fn listen(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> TransportResult<DiscoveredPeer> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, source) = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = &mut deadline => return Err(TransportError::Timeout(timeout)),
                received = self.socket.recv_from(&mut buf) => received?,
            };

            match PeerAnnouncement::parse(&buf[..len]) {
                Ok(announcement) if announcement.active => {
                    tracing::info!(
                        %source,
                        port = announcement.port,
                        instance = %announcement.instance_id,
                        "peer discovered"
                    );
                    return Ok(DiscoveredPeer {
                        announcement,
                        source,
                    });
                }
                Ok(announcement) => {
                    tracing::debug!(%source, instance = %announcement.instance_id, "inactive peer ignored");
                }
                Err(e) => {
                    tracing::debug!(%source, error = %e, "discovery datagram ignored");
                }
            }
        }
    }
}
