use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_frame::{
    ByteOrder, PacketConfig, DEFAULT_MAX_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE,
};
#[cfg(unix)]
use tether_transport::segment_name;

use crate::error::{LinkError, Result};

/// Which carrier a connection runs over, derived from a port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP on this port; 0 asks the OS for an ephemeral port.
    Tcp(u16),
    /// Shared memory keyed by this number.
    SharedMemory(u32),
}

impl Endpoint {
    /// Positive ports select TCP, negative ones select shared memory with
    /// the absolute value as the segment key.
    pub fn from_port(port: i32) -> Result<Self> {
        if port < 0 {
            return Ok(Endpoint::SharedMemory(port.unsigned_abs()));
        }
        u16::try_from(port)
            .map(Endpoint::Tcp)
            .map_err(|_| LinkError::InvalidConfig(format!("port {port} is out of range")))
    }

    /// Name of the shared segment, if this is a shared-memory endpoint.
    #[cfg(unix)]
    pub fn segment_name(&self) -> Option<String> {
        match self {
            Endpoint::Tcp(_) => None,
            Endpoint::SharedMemory(key) => Some(segment_name(*key)),
        }
    }

    pub fn is_shared_memory(&self) -> bool {
        matches!(self, Endpoint::SharedMemory(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(port) => write!(f, "tcp:{port}"),
            Endpoint::SharedMemory(key) => write!(f, "shm:{key}"),
        }
    }
}

/// Connection configuration.
///
/// Durations are stored as milliseconds so the JSON form stays flat:
///
/// ```json
/// { "port": 9000, "max_packet_size": 4096, "read_timeout_ms": 10000 }
/// ```
///
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Positive: TCP port. Negative: shared-memory key. 0: ephemeral TCP port.
    pub port: i32,
    /// Upper bound on one packet (socket) or one chunk (shared memory).
    pub max_packet_size: usize,
    /// Interface the TCP listener binds.
    pub bind_addr: IpAddr,
    /// Bounded wait of one `connect_to_client` call.
    pub accept_timeout_ms: u64,
    /// Per-call socket read/write timeout on an accepted stream.
    pub io_timeout_ms: u64,
    /// Budget for reading one header, and again for its payload.
    pub read_timeout_ms: u64,
    /// Cap on each shared-memory transfer-flag wait.
    pub shm_wait_timeout_ms: u64,
    /// Interval between ready-flag checks while waiting for a shared-memory peer.
    pub shm_connect_poll_ms: u64,
    /// Slice length of an accept wait; a cancel takes effect between slices.
    pub cancel_check_ms: u64,
    /// Order this side writes header words in.
    #[serde(with = "byte_order_name")]
    pub byte_order: ByteOrder,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: 0,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            accept_timeout_ms: 5_000,
            io_timeout_ms: 2_000,
            read_timeout_ms: 10_000,
            shm_wait_timeout_ms: 1_000,
            shm_connect_poll_ms: 1,
            cancel_check_ms: 100,
            byte_order: ByteOrder::native(),
        }
    }
}

impl LinkConfig {
    /// Defaults with the given port.
    pub fn new(port: i32) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| LinkError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout_ms = millis(timeout);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = millis(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = millis(timeout);
        self
    }

    pub fn with_shm_wait_timeout(mut self, timeout: Duration) -> Self {
        self.shm_wait_timeout_ms = millis(timeout);
        self
    }

    pub fn with_shm_connect_poll(mut self, interval: Duration) -> Self {
        self.shm_connect_poll_ms = millis(interval);
        self
    }

    pub fn with_cancel_check(mut self, slice: Duration) -> Self {
        self.cancel_check_ms = millis(slice);
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::from_port(self.port)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shm_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.shm_wait_timeout_ms)
    }

    pub fn shm_connect_poll(&self) -> Duration {
        Duration::from_millis(self.shm_connect_poll_ms)
    }

    pub fn cancel_check(&self) -> Duration {
        Duration::from_millis(self.cancel_check_ms)
    }

    /// Reader/writer configuration for the socket carrier.
    pub fn packet_config(&self) -> PacketConfig {
        PacketConfig {
            max_packet_size: self.max_packet_size,
            read_timeout: self.read_timeout(),
            byte_order: self.byte_order,
        }
    }

    /// Reject values no connection can run with.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            return Err(LinkError::InvalidConfig(format!(
                "max_packet_size {} must be within {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}",
                self.max_packet_size
            )));
        }
        for (name, value) in [
            ("io_timeout_ms", self.io_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("shm_wait_timeout_ms", self.shm_wait_timeout_ms),
            ("shm_connect_poll_ms", self.shm_connect_poll_ms),
            ("cancel_check_ms", self.cancel_check_ms),
        ] {
            if value == 0 {
                return Err(LinkError::InvalidConfig(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod byte_order_name {
    use serde::{Deserialize, Deserializer, Serializer};
    use tether_frame::ByteOrder;

    pub fn serialize<S: Serializer>(order: &ByteOrder, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(order.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ByteOrder, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_sign_selects_carrier() {
        assert_eq!(Endpoint::from_port(9000).unwrap(), Endpoint::Tcp(9000));
        assert_eq!(Endpoint::from_port(0).unwrap(), Endpoint::Tcp(0));
        assert_eq!(
            Endpoint::from_port(-42).unwrap(),
            Endpoint::SharedMemory(42)
        );
        assert_eq!(
            Endpoint::from_port(i32::MIN).unwrap(),
            Endpoint::SharedMemory(2_147_483_648)
        );
        assert!(Endpoint::from_port(70_000).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn endpoint_display_and_segment() {
        let shm = Endpoint::from_port(-7).unwrap();
        assert_eq!(shm.to_string(), "shm:7");
        assert_eq!(shm.segment_name().unwrap(), "/tether_shm_7");
        assert!(Endpoint::Tcp(80).segment_name().is_none());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.accept_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.io_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.read_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.shm_wait_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.shm_connect_poll(), Duration::from_millis(1));
        assert_eq!(cfg.byte_order, ByteOrder::native());
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = LinkConfig::from_json_str(
            r#"{ "port": -12, "max_packet_size": 4096, "byte_order": "big" }"#,
        )
        .unwrap();
        assert_eq!(cfg.endpoint().unwrap(), Endpoint::SharedMemory(12));
        assert_eq!(cfg.max_packet_size, 4096);
        assert_eq!(cfg.byte_order, ByteOrder::Big);
        assert_eq!(cfg.read_timeout_ms, 10_000);
    }

    #[test]
    fn json_round_trips_byte_order_as_name() {
        let cfg = LinkConfig::new(9000).with_byte_order(ByteOrder::Little);
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["byte_order"], "little");
        let back: LinkConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn unknown_fields_rejected() {
        let err = LinkConfig::from_json_str(r#"{ "new_version": true }"#).unwrap_err();
        assert!(matches!(err, LinkError::Json(_)));
    }

    #[test]
    fn validation_rejects_bad_values() {
        for size in [0, 6, MAX_PACKET_SIZE + 1] {
            let err = LinkConfig::default()
                .with_max_packet_size(size)
                .validate()
                .unwrap_err();
            assert!(matches!(err, LinkError::InvalidConfig(_)), "size {size}");
        }
        assert!(LinkConfig::default()
            .with_read_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(LinkConfig::new(65_536).validate().is_err());
    }

    #[test]
    fn missing_file_is_config_read_error() {
        let err = LinkConfig::from_json_file("/nonexistent/tether.json").unwrap_err();
        assert!(matches!(err, LinkError::ConfigRead { .. }));
    }

    #[test]
    fn packet_config_carries_framing_fields() {
        let cfg = LinkConfig::default()
            .with_max_packet_size(4096)
            .with_read_timeout(Duration::from_millis(250))
            .with_byte_order(ByteOrder::Big);
        let packet = cfg.packet_config();
        assert_eq!(packet.max_packet_size, 4096);
        assert_eq!(packet.read_timeout, Duration::from_millis(250));
        assert_eq!(packet.byte_order, ByteOrder::Big);
    }
}
