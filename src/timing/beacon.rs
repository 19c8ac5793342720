use super::TimingState;
use crate::config::{BeaconSettings, BEACON_GROUP, BEACON_MAGIC};
use crate::error::Result;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

/// Tempo/transport record broadcast to the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconPacket {
    pub magic: String,
    pub bpm: f64,
    pub beat: f64,
    pub playing: bool,
    pub quantum: u32,
    pub timestamp: f64,
}

impl BeaconPacket {
    pub fn from_state(state: &TimingState, timestamp: f64) -> Self {
        Self {
            magic: BEACON_MAGIC.to_string(),
            bpm: state.bpm,
            beat: state.beat_position,
            playing: state.is_playing,
            quantum: state.quantum,
            timestamp,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Transmit-only UDP beacon. Owned by the timing thread.
pub struct Beacon {
    socket: Option<UdpSocket>,
    target: SocketAddr,
    interval: Duration,
    last_sent: Option<Instant>,
    failing: bool,
    packets_sent: u64,
    send_errors: u64,
}

impl Beacon {
    /// Opens the socket. An unusable configuration leaves the beacon
    /// disabled instead of failing the engine.
    pub fn open(settings: &BeaconSettings) -> Self {
        let group = settings.group.parse().unwrap_or_else(|_| {
            warn!(
                "Invalid beacon group '{}', using {}",
                settings.group, BEACON_GROUP
            );
            Ipv4Addr::new(224, 76, 78, 75)
        });
        let target = SocketAddr::V4(SocketAddrV4::new(group, settings.port));
        let interval = Duration::from_millis(settings.interval_ms);

        let socket = if settings.enabled {
            match Self::bind(settings) {
                Ok(socket) => {
                    info!("Beacon broadcasting to {}", target);
                    Some(socket)
                }
                Err(e) => {
                    error!("Failed to open beacon socket: {}", e);
                    None
                }
            }
        } else {
            info!("Beacon disabled");
            None
        };

        Self {
            socket,
            target,
            interval,
            last_sent: None,
            failing: false,
            packets_sent: 0,
            send_errors: 0,
        }
    }

    fn bind(settings: &BeaconSettings) -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_ttl_v4(settings.ttl)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    pub fn is_active(&self) -> bool {
        self.socket.is_some()
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    /// Sends a packet if the beacon interval has elapsed since the last one.
    /// Returns whether a send was attempted.
    pub fn maybe_send(&mut self, state: &TimingState, now: Instant) -> bool {
        let due = self
            .last_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if !due || self.socket.is_none() {
            return false;
        }
        self.last_sent = Some(now);

        match self.send(state) {
            Ok(()) => {
                self.packets_sent += 1;
                if self.failing {
                    info!("Beacon sends recovered");
                    self.failing = false;
                }
            }
            Err(e) => {
                self.send_errors += 1;
                if self.failing {
                    debug!("Beacon send failed: {}", e);
                } else {
                    error!("Failed to broadcast timing: {}", e);
                    self.failing = true;
                }
            }
        }
        true
    }

    fn send(&self, state: &TimingState) -> Result<()> {
        let packet = BeaconPacket::from_state(state, super::unix_seconds()).encode()?;
        if let Some(socket) = &self.socket {
            socket.send_to(&packet, self.target)?;
        }
        Ok(())
    }
}
