//! Hub and connection configuration

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::{Error, Result};

/// Default time allowed to write one frame to the peer
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed between keepalive acknowledgements from the peer
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default keepalive probe period (9/10 of the peer timeout)
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(54);

/// Default maximum inbound frame size (512KB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024;

/// Default outbound queue capacity per connection, in envelopes
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the hub's broadcast queue
pub const DEFAULT_BROADCAST_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the register/unregister queues
pub const DEFAULT_CONTROL_QUEUE_CAPACITY: usize = 64;

/// Hub configuration
///
/// Timing values apply to every connection attached to the hub. The probe
/// interval must stay below the peer timeout so a healthy peer always gets
/// a chance to answer before it is declared dead.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Deadline for writing a single frame
    pub write_timeout: Duration,

    /// Read deadline, reset every time the peer acknowledges a probe
    pub peer_timeout: Duration,

    /// Keepalive probe period
    pub probe_interval: Duration,

    /// Maximum inbound frame size in bytes
    pub max_frame_size: usize,

    /// Outbound queue capacity per connection
    pub per_client_queue_capacity: usize,

    /// Capacity of the hub's broadcast queue
    pub broadcast_queue_capacity: usize,

    /// Capacity of the register and unregister queues
    pub control_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            per_client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            broadcast_queue_capacity: DEFAULT_BROADCAST_QUEUE_CAPACITY,
            control_queue_capacity: DEFAULT_CONTROL_QUEUE_CAPACITY,
        }
    }
}

impl HubConfig {
    /// Set the write deadline
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the peer liveness timeout
    ///
    /// The probe interval is rescaled to 9/10 of the new timeout; call
    /// [`probe_interval`](Self::probe_interval) afterwards to override it.
    pub fn peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self.probe_interval = timeout * 9 / 10;
        self
    }

    /// Set the keepalive probe period
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the maximum inbound frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the outbound queue capacity per connection
    pub fn per_client_queue_capacity(mut self, capacity: usize) -> Self {
        self.per_client_queue_capacity = capacity;
        self
    }

    /// Set the broadcast queue capacity
    pub fn broadcast_queue_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_queue_capacity = capacity;
        self
    }

    /// Set the register/unregister queue capacity
    pub fn control_queue_capacity(mut self, capacity: usize) -> Self {
        self.control_queue_capacity = capacity;
        self
    }

    /// Check the configuration for values the hub cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval.is_zero() || self.peer_timeout.is_zero() {
            return Err(Error::Config("keepalive durations must be non-zero".into()));
        }
        if self.probe_interval >= self.peer_timeout {
            return Err(Error::Config(format!(
                "probe interval ({:?}) must be shorter than peer timeout ({:?})",
                self.probe_interval, self.peer_timeout
            )));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::Config("write timeout must be non-zero".into()));
        }
        if self.max_frame_size == 0 {
            return Err(Error::Config("max frame size must be non-zero".into()));
        }
        // tokio's mpsc panics on zero capacity
        if self.per_client_queue_capacity == 0
            || self.broadcast_queue_capacity == 0
            || self.control_queue_capacity == 0
        {
            return Err(Error::Config("queue capacities must be non-zero".into()));
        }
        Ok(())
    }

    /// WebSocket protocol settings for the upgrade that produces a connection
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_frame_size))
            .max_frame_size(Some(self.max_frame_size))
    }
}
