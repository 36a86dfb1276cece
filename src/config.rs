use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Default port shared by client and server.
pub const DEFAULT_PORT: u16 = 8088;

/// Size of one synthetic payload chunk (and of the server's read buffer).
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Run length used when the caller set neither a duration nor a byte target.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(25);

/// Highest number of concurrent streams a client may open.
pub const MAX_PARALLEL: usize = 5;

/// Lowest port accepted by [`Config::validate`].
pub const MIN_PORT: u16 = 1024;

/// Test mode: client or server.
///
/// Determines whether this instance acts as a sink (listening for connections)
/// or as a traffic generator (connecting and sending payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Server mode - accepts streams and counts received bytes
    Server,
    /// Client mode - opens streams and sends synthetic payload
    Client,
}

/// Display unit for transfer amounts.
///
/// Only affects printed output; the wire protocol is always raw bytes.
///
/// # Examples
///
/// ```
/// use goodput::config::Unit;
///
/// let unit: Unit = "kb".parse().unwrap();
/// assert_eq!(unit, Unit::KB);
/// assert_eq!(unit.bytes(), 1000);
/// assert_eq!(Unit::MB.convert(2_500_000), 2.5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    B,
    KB,
    MB,
}

impl Unit {
    /// Number of bytes in one of this unit (decimal multiples).
    pub fn bytes(self) -> u64 {
        match self {
            Unit::B => 1,
            Unit::KB => 1_000,
            Unit::MB => 1_000_000,
        }
    }

    /// Expresses a byte count in this unit.
    pub fn convert(self, bytes: u64) -> f64 {
        bytes as f64 / self.bytes() as f64
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Unit::B => "B",
            Unit::KB => "KB",
            Unit::MB => "MB",
        };
        f.write_str(name)
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "B" => Ok(Unit::B),
            "KB" => Ok(Unit::KB),
            "MB" => Ok(Unit::MB),
            other => Err(Error::Config(format!(
                "unknown unit '{}', expected B, KB or MB",
                other
            ))),
        }
    }
}

/// Parses a byte target such as `10MB`, `250kb` or `4096B` into bytes.
///
/// # Examples
///
/// ```
/// use goodput::config::parse_byte_target;
///
/// assert_eq!(parse_byte_target("5MB").unwrap(), 5_000_000);
/// assert_eq!(parse_byte_target("12kb").unwrap(), 12_000);
/// assert!(parse_byte_target("MB").is_err());
/// ```
pub fn parse_byte_target(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let invalid = || {
        Error::Config(format!(
            "invalid size '{}', expected <integer><unit> with unit B, KB or MB",
            input
        ))
    };

    if digits.is_empty() || unit.is_empty() {
        return Err(invalid());
    }
    let count: u64 = digits.parse().map_err(|_| invalid())?;
    let unit: Unit = unit.parse().map_err(|_| invalid())?;

    count
        .checked_mul(unit.bytes())
        .ok_or_else(|| Error::Config(format!("size '{}' is too large", input)))
}

/// What ends the streaming phase of a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferLimit {
    /// Send full chunks until this much wall-clock time has elapsed.
    Duration(Duration),
    /// Send exactly this many payload bytes.
    Bytes(u64),
}

/// Session configuration, built once and read-only afterwards.
///
/// # Examples
///
/// ## Duration-bounded client with interval reports
///
/// ```
/// use goodput::config::{Config, TransferLimit};
/// use std::time::Duration;
///
/// let config = Config::client("127.0.0.1".parse().unwrap(), 8088)
///     .with_duration(Duration::from_secs(10))
///     .with_interval(Duration::from_secs(2))
///     .with_parallel(3);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.limit(), TransferLimit::Duration(Duration::from_secs(10)));
/// ```
///
/// ## Server
///
/// ```
/// use goodput::Config;
///
/// let config = Config::server(8088);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode
    pub mode: Mode,

    /// Port to connect to or listen on
    pub port: u16,

    /// Server address (client mode)
    pub server_addr: Option<IpAddr>,

    /// Bind address (server mode); all interfaces when unset
    pub bind_addr: Option<IpAddr>,

    /// Explicitly requested run length
    pub duration: Option<Duration>,

    /// Explicitly requested number of payload bytes per stream
    pub byte_target: Option<u64>,

    /// Interval for periodic reports (duration-bounded streams only)
    pub interval: Option<Duration>,

    /// Number of parallel streams
    pub parallel: usize,

    /// Display unit for transfer amounts
    pub unit: Unit,

    /// Payload chunk size in bytes
    pub chunk_size: usize,

    /// Emit reports as JSON lines
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            port: DEFAULT_PORT,
            server_addr: None,
            bind_addr: None,
            duration: None,
            byte_target: None,
            interval: None,
            parallel: 1,
            unit: Unit::MB,
            chunk_size: DEFAULT_CHUNK_SIZE,
            json: false,
        }
    }
}

impl Config {
    /// Creates a new server configuration listening on `port`.
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    /// Creates a new client configuration targeting `server_addr:port`.
    pub fn client(server_addr: IpAddr, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            port,
            ..Default::default()
        }
    }

    /// Bounds each stream by wall-clock time.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Bounds each stream by an exact number of payload bytes.
    pub fn with_byte_target(mut self, bytes: u64) -> Self {
        self.byte_target = Some(bytes);
        self
    }

    /// Enables periodic interval reports.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the number of concurrent streams.
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Returns the stop condition for client streams.
    ///
    /// Falls back to [`DEFAULT_DURATION`] when neither bound was set.
    pub fn limit(&self) -> TransferLimit {
        match (self.byte_target, self.duration) {
            (Some(bytes), _) => TransferLimit::Bytes(bytes),
            (None, Some(duration)) => TransferLimit::Duration(duration),
            (None, None) => TransferLimit::Duration(DEFAULT_DURATION),
        }
    }

    /// Address the client connects to.
    pub fn server_socket_addr(&self) -> Result<SocketAddr> {
        let ip = self.server_addr.ok_or_else(|| {
            Error::Config("server address is required for client mode".to_string())
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Address the server binds to.
    pub fn bind_socket_addr(&self) -> SocketAddr {
        let ip = self
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }

    /// Checks the configuration before any socket is opened.
    pub fn validate(&self) -> Result<()> {
        if self.port < MIN_PORT {
            return Err(Error::Config(format!(
                "port {} is out of range {}-65535",
                self.port, MIN_PORT
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".to_string()));
        }

        if self.mode == Mode::Server {
            return Ok(());
        }

        if self.server_addr.is_none() {
            return Err(Error::Config(
                "server address is required for client mode".to_string(),
            ));
        }
        if self.duration.is_some() && self.byte_target.is_some() {
            return Err(Error::Config(
                "a duration and a byte target cannot be used together".to_string(),
            ));
        }
        if self.duration == Some(Duration::ZERO) {
            return Err(Error::Config("duration must be positive".to_string()));
        }
        if self.byte_target == Some(0) {
            return Err(Error::Config("byte target must be positive".to_string()));
        }
        if self.interval == Some(Duration::ZERO) {
            return Err(Error::Config("interval must be positive".to_string()));
        }
        if self.parallel == 0 || self.parallel > MAX_PARALLEL {
            return Err(Error::Config(format!(
                "parallel streams must be between 1 and {}",
                MAX_PARALLEL
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn test_parse_byte_target_units() {
        assert_eq!(parse_byte_target("10B").unwrap(), 10);
        assert_eq!(parse_byte_target("10KB").unwrap(), 10_000);
        assert_eq!(parse_byte_target("10MB").unwrap(), 10_000_000);
        assert_eq!(parse_byte_target("7mb").unwrap(), 7_000_000);
        assert_eq!(parse_byte_target("3Kb").unwrap(), 3_000);
        assert_eq!(parse_byte_target(" 1b ").unwrap(), 1);
    }

    #[test]
    fn test_parse_byte_target_rejects_malformed() {
        for input in ["", "MB", "10", "10GB", "-5MB", "1.5MB", "ten MB"] {
            assert!(
                matches!(parse_byte_target(input), Err(Error::Config(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_parse_byte_target_overflow() {
        assert!(parse_byte_target("18446744073709551615MB").is_err());
    }

    #[test]
    fn test_unit_display_round_trip() {
        for unit in [Unit::B, Unit::KB, Unit::MB] {
            assert_eq!(unit.to_string().parse::<Unit>().unwrap(), unit);
        }
        assert!("GB".parse::<Unit>().is_err());
    }

    #[test]
    fn test_default_limit_is_default_duration() {
        let config = Config::client(loopback(), DEFAULT_PORT);
        assert_eq!(config.limit(), TransferLimit::Duration(DEFAULT_DURATION));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_byte_target_limit() {
        let config = Config::client(loopback(), DEFAULT_PORT).with_byte_target(5_000);
        assert_eq!(config.limit(), TransferLimit::Bytes(5_000));
    }

    #[test]
    fn test_duration_and_byte_target_conflict() {
        // The default duration is not "set"; only an explicit one conflicts.
        let config = Config::client(loopback(), DEFAULT_PORT)
            .with_duration(DEFAULT_DURATION)
            .with_byte_target(1_000);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_parallel_range() {
        let base = Config::client(loopback(), DEFAULT_PORT);
        assert!(base.clone().with_parallel(0).validate().is_err());
        assert!(base.clone().with_parallel(1).validate().is_ok());
        assert!(base.clone().with_parallel(MAX_PARALLEL).validate().is_ok());
        assert!(base.with_parallel(MAX_PARALLEL + 1).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let base = Config::client(loopback(), DEFAULT_PORT);
        assert!(base.clone().with_interval(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_duration(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_byte_target(0).validate().is_err());
        assert!(base.with_chunk_size(0).validate().is_err());
    }

    #[test]
    fn test_validate_port_range() {
        assert!(Config::server(80).validate().is_err());
        assert!(Config::server(MIN_PORT).validate().is_ok());
        assert!(Config::server(65535).validate().is_ok());
    }

    #[test]
    fn test_client_requires_server_addr() {
        let config = Config {
            mode: Mode::Client,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(config.server_socket_addr().is_err());
    }

    #[test]
    fn test_bind_socket_addr_defaults_to_all_interfaces() {
        let config = Config::server(9000);
        assert_eq!(config.bind_socket_addr().to_string(), "0.0.0.0:9000");

        let config = Config::server(9000).with_bind_addr(loopback());
        assert_eq!(config.bind_socket_addr().to_string(), "127.0.0.1:9000");
    }
}
