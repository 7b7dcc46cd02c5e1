//! Configuration management for anonode-rs.
//!
//! One versioned [`Config`] record describes everything needed to launch the
//! three supervised services: the blockchain daemon, the onion-routing proxy,
//! and the garlic-routing proxy. Configuration is applied in order:
//! defaults → config file → command-line arguments, with later sources
//! overriding earlier ones.
//!
//! # Structure
//!
//! Per-feature settings live in dedicated sub-configs so the invocation
//! compiler can pattern-match a feature group once instead of testing many
//! independent optional fields:
//!
//! | Sub-config | Presence | Covers |
//! |------------|----------|--------|
//! | [`GeneralConfig`] | always | daemon executable, data dir, log level, concurrency |
//! | [`RpcConfig`] | `Option` (None = RPC disabled) | bind address, auth, TLS, restriction |
//! | [`P2pConfig`] | always | bind/external ports, rate limits, peer lists |
//! | [`OnionConfig`] | `Option` (None = integration disabled) | tor paths, SOCKS port, discovered address |
//! | [`GarlicConfig`] | `Option` (None = integration disabled) | i2pd paths, SAM port, discovered address |
//! | [`ZmqConfig`] | `Option` (None = ZMQ disabled) | ZMQ RPC bind address |
//! | [`BlockchainConfig`] | always | pruning, sync mode, bootstrap, extra args |
//!
//! Ports, rate limits, and similar numeric settings are kept as strings with
//! text-field semantics: a whitespace-only value means "unset" and is omitted
//! from compiled invocations, and a non-numeric value is flagged by
//! [`Config::validate`] without blocking compilation.
//!
//! # Example Configuration File
//!
//! ```toml
//! [general]
//! daemon_executable = "monerod"
//! data_dir = ".anonode/daemon"
//! log_level = "notice"
//!
//! [rpc]
//! bind_ip = "127.0.0.1"
//! bind_port = "18081"
//! restricted = false
//!
//! [p2p]
//! bind_ip = "0.0.0.0"
//! bind_port = "18080"
//!
//! [onion]
//! executable = "tor"
//! torrc = ".anonode/tor/torrc"
//! data_dir = ".anonode/tor"
//! socks_port = "9050"
//! only = false
//!
//! [blockchain]
//! prune = false
//! ```
//!
//! # What This Module Does NOT Do
//!
//! - **Runtime file watching**: changes to the config file require a reload
//! - **Schema migration**: unknown keys are ignored on load, nothing more
//! - **Invocation assembly**: see [`crate::invocation`]

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Default trailing forward port for the onion proxy's anonymous-inbound
/// mapping. Preserved from the original behavior; no protocol semantics are
/// inferred from the literal.
pub const DEFAULT_ONION_FORWARD_PORT: u16 = 2;

/// Default trailing forward port for the garlic proxy's anonymous-inbound
/// mapping. See [`DEFAULT_ONION_FORWARD_PORT`].
pub const DEFAULT_GARLIC_FORWARD_PORT: u16 = 3;

/// Log level for anonode-rs output and the daemon's `--log-level` flag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Low-level debugging information.
    Debug,
    /// Informational messages about normal operation.
    Info,
    /// Notable events that may be of interest.
    #[default]
    Notice,
    /// Warning conditions that don't prevent operation.
    Warn,
    /// Error conditions that may impair functionality.
    Error,
}

impl LogLevel {
    /// Numeric verbosity for the daemon's `--log-level` flag (0..=4).
    pub fn daemon_level(self) -> u8 {
        match self {
            LogLevel::Debug => 4,
            LogLevel::Info => 2,
            LogLevel::Notice => 1,
            LogLevel::Warn | LogLevel::Error => 0,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "NOTICE" => Ok(LogLevel::Notice),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "ERR" => Ok(LogLevel::Error),
            _ => Err(Error::Config(format!("invalid log level: {}", s))),
        }
    }
}

/// An advisory problem found by [`Config::validate`].
///
/// Issues are surfaced to the operator but never block compiling an
/// invocation; the operator may deliberately run with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, e.g. `rpc.bind_port`.
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// RPC login credentials.
///
/// The password is wiped from memory when the login is dropped.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcLogin {
    /// RPC username.
    pub username: String,
    /// RPC password. Zeroized on drop.
    pub password: String,
}

impl Drop for RpcLogin {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl std::fmt::Debug for RpcLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLogin")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// General daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Path to the blockchain daemon executable.
    #[serde(default = "default_daemon_executable")]
    pub daemon_executable: String,
    /// Daemon data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Log level, for the launcher and the daemon's `--log-level` flag.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Worker thread count for the daemon. Empty means daemon default.
    #[serde(default)]
    pub max_concurrency: String,
}

fn default_daemon_executable() -> String {
    "monerod".to_string()
}
fn default_data_dir() -> String {
    ".anonode/daemon".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            daemon_executable: default_daemon_executable(),
            data_dir: default_data_dir(),
            log_level: LogLevel::default(),
            max_concurrency: String::new(),
        }
    }
}

/// RPC server settings. Present only when RPC is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    /// Bind address for the RPC server.
    #[serde(default = "default_loopback")]
    pub bind_ip: String,
    /// Bind port for the RPC server.
    #[serde(default = "default_rpc_port")]
    pub bind_port: String,
    /// Optional login credentials.
    #[serde(default)]
    pub login: Option<RpcLogin>,
    /// Serve RPC over TLS.
    #[serde(default)]
    pub ssl: bool,
    /// TLS certificate path. Required (with the key) when `ssl` is set.
    #[serde(default)]
    pub ssl_certificate: Option<PathBuf>,
    /// TLS private key path.
    #[serde(default)]
    pub ssl_private_key: Option<PathBuf>,
    /// Restrict RPC to view-only safe calls.
    #[serde(default)]
    pub restricted: bool,
}

fn default_loopback() -> String {
    "127.0.0.1".to_string()
}
fn default_rpc_port() -> String {
    "18081".to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_loopback(),
            bind_port: default_rpc_port(),
            login: None,
            ssl: false,
            ssl_certificate: None,
            ssl_private_key: None,
            restricted: false,
        }
    }
}

/// Peer-to-peer network settings. Always present; P2P flags are always
/// emitted for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct P2pConfig {
    /// Bind address for P2P traffic.
    #[serde(default = "default_any_ip")]
    pub bind_ip: String,
    /// Bind port for P2P traffic.
    #[serde(default = "default_p2p_port")]
    pub bind_port: String,
    /// Externally visible port, if different from the bind port.
    #[serde(default)]
    pub external_port: String,
    /// Upload rate limit in kB/s. Emitted only when positive.
    #[serde(default)]
    pub limit_rate_up: String,
    /// Download rate limit in kB/s. Emitted only when positive.
    #[serde(default)]
    pub limit_rate_down: String,
    /// Peers added with `--add-peer`.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Peers added with `--add-priority-node`.
    #[serde(default)]
    pub priority_nodes: Vec<String>,
}

fn default_any_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_p2p_port() -> String {
    "18080".to_string()
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_any_ip(),
            bind_port: default_p2p_port(),
            external_port: String::new(),
            limit_rate_up: String::new(),
            limit_rate_down: String::new(),
            peers: Vec::new(),
            priority_nodes: Vec::new(),
        }
    }
}

/// Onion-routing proxy integration. Present only when enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnionConfig {
    /// Path to the onion proxy executable.
    #[serde(default = "default_onion_executable")]
    pub executable: String,
    /// Control file (torrc) path.
    #[serde(default = "default_torrc")]
    pub torrc: String,
    /// Proxy data directory. The discovered address is read from
    /// `<data_dir>/hostname` once the proxy is running.
    #[serde(default = "default_onion_data_dir")]
    pub data_dir: String,
    /// Proxy log file path.
    #[serde(default = "default_onion_log")]
    pub log_path: String,
    /// SOCKS port the daemon routes through.
    #[serde(default = "default_socks_port")]
    pub socks_port: String,
    /// Proxy level appended to the daemon's `--tx-proxy` value.
    #[serde(default = "default_proxy_level")]
    pub proxy_level: String,
    /// Route exclusively through the onion network.
    #[serde(default)]
    pub only: bool,
    /// Pad transaction relay traffic.
    #[serde(default)]
    pub pad_transactions: bool,
    /// Hidden-service port peers connect to.
    #[serde(default = "default_onion_inbound_port")]
    pub inbound_port: String,
    /// Trailing local forward port in the anonymous-inbound mapping.
    #[serde(default = "default_onion_forward_port")]
    pub inbound_forward_port: u16,
    /// Network-assigned onion address, discovered at runtime. Write-once per
    /// run; cleared when the proxy leaves the Running state. Per-run state,
    /// never persisted.
    #[serde(skip)]
    pub discovered_address: Option<String>,
}

fn default_onion_executable() -> String {
    "tor".to_string()
}
fn default_torrc() -> String {
    ".anonode/tor/torrc".to_string()
}
fn default_onion_data_dir() -> String {
    ".anonode/tor".to_string()
}
fn default_onion_log() -> String {
    ".anonode/tor/tor.log".to_string()
}
fn default_socks_port() -> String {
    "9050".to_string()
}
fn default_proxy_level() -> String {
    "10".to_string()
}
fn default_onion_inbound_port() -> String {
    "18084".to_string()
}
fn default_onion_forward_port() -> u16 {
    DEFAULT_ONION_FORWARD_PORT
}

impl Default for OnionConfig {
    fn default() -> Self {
        Self {
            executable: default_onion_executable(),
            torrc: default_torrc(),
            data_dir: default_onion_data_dir(),
            log_path: default_onion_log(),
            socks_port: default_socks_port(),
            proxy_level: default_proxy_level(),
            only: false,
            pad_transactions: false,
            inbound_port: default_onion_inbound_port(),
            inbound_forward_port: default_onion_forward_port(),
            discovered_address: None,
        }
    }
}

/// Garlic-routing proxy integration. Present only when enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GarlicConfig {
    /// Path to the garlic proxy executable.
    #[serde(default = "default_garlic_executable")]
    pub executable: String,
    /// Proxy data directory. The discovered address is read from
    /// `<data_dir>/b32hostname.txt` once the proxy is running.
    #[serde(default = "default_garlic_data_dir")]
    pub data_dir: String,
    /// Main configuration file path.
    #[serde(default = "default_garlic_conf")]
    pub conf: String,
    /// Tunnel configuration file path.
    #[serde(default = "default_garlic_tunconf")]
    pub tunconf: String,
    /// Proxy log file path.
    #[serde(default = "default_garlic_log")]
    pub log_path: String,
    /// SAM bridge port the daemon routes through.
    #[serde(default = "default_sam_port")]
    pub sam_port: String,
    /// Route exclusively through the garlic network.
    #[serde(default)]
    pub only: bool,
    /// Tunnel port peers connect to.
    #[serde(default = "default_garlic_inbound_port")]
    pub inbound_port: String,
    /// Trailing local forward port in the anonymous-inbound mapping.
    #[serde(default = "default_garlic_forward_port")]
    pub inbound_forward_port: u16,
    /// Network-assigned garlic address, discovered at runtime. Write-once per
    /// run; cleared when the proxy leaves the Running state. Per-run state,
    /// never persisted.
    #[serde(skip)]
    pub discovered_address: Option<String>,
}

fn default_garlic_executable() -> String {
    "i2pd".to_string()
}
fn default_garlic_data_dir() -> String {
    ".anonode/i2pd".to_string()
}
fn default_garlic_conf() -> String {
    ".anonode/i2pd/i2pd.conf".to_string()
}
fn default_garlic_tunconf() -> String {
    ".anonode/i2pd/tunnels.conf".to_string()
}
fn default_garlic_log() -> String {
    ".anonode/i2pd/i2pd.log".to_string()
}
fn default_sam_port() -> String {
    "7656".to_string()
}
fn default_garlic_inbound_port() -> String {
    "18085".to_string()
}
fn default_garlic_forward_port() -> u16 {
    DEFAULT_GARLIC_FORWARD_PORT
}

impl Default for GarlicConfig {
    fn default() -> Self {
        Self {
            executable: default_garlic_executable(),
            data_dir: default_garlic_data_dir(),
            conf: default_garlic_conf(),
            tunconf: default_garlic_tunconf(),
            log_path: default_garlic_log(),
            sam_port: default_sam_port(),
            only: false,
            inbound_port: default_garlic_inbound_port(),
            inbound_forward_port: default_garlic_forward_port(),
            discovered_address: None,
        }
    }
}

/// ZMQ RPC settings. Present only when ZMQ is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZmqConfig {
    /// Bind address for the ZMQ RPC server.
    #[serde(default = "default_loopback")]
    pub bind_ip: String,
    /// Bind port for the ZMQ RPC server.
    #[serde(default = "default_zmq_port")]
    pub bind_port: String,
}

fn default_zmq_port() -> String {
    "18082".to_string()
}

impl Default for ZmqConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_loopback(),
            bind_port: default_zmq_port(),
        }
    }
}

/// Blockchain storage and sync settings. Always present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BlockchainConfig {
    /// Prune the blockchain on disk.
    #[serde(default)]
    pub prune: bool,
    /// Recent blocks kept when pruning. Must be positive when `prune` is set.
    #[serde(default)]
    pub pruning_keep_blocks: String,
    /// Database sync mode, e.g. `fast:async:250000000bytes`.
    #[serde(default)]
    pub db_sync_mode: String,
    /// Bootstrap daemon address used while syncing.
    #[serde(default)]
    pub bootstrap_daemon_address: String,
    /// Free-form extra arguments, split on whitespace and appended verbatim.
    /// User-controlled passthrough: NOT escaped or sanitized.
    #[serde(default)]
    pub extra_args: String,
}

/// Configuration fields a path picker can fill.
///
/// The picker itself is an external collaborator (a file dialog in a GUI); it
/// only ever writes whole path strings into these slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathField {
    /// `general.daemon_executable`
    DaemonExecutable,
    /// `general.data_dir`
    DataDir,
    /// `rpc.ssl_certificate`
    SslCertificate,
    /// `rpc.ssl_private_key`
    SslPrivateKey,
    /// `onion.executable`
    OnionExecutable,
    /// `onion.torrc`
    OnionTorrc,
    /// `onion.data_dir`
    OnionDataDir,
    /// `garlic.executable`
    GarlicExecutable,
    /// `garlic.data_dir`
    GarlicDataDir,
    /// `garlic.conf`
    GarlicConf,
    /// `garlic.tunconf`
    GarlicTunconf,
}

/// A path-choosing collaborator, e.g. a file dialog.
///
/// Returns `None` when the user cancels. Irrelevant to compiler and
/// supervisor correctness; it only fills [`Config`] fields.
pub trait PathPicker {
    /// Ask the collaborator for a path.
    fn choose_path(&self) -> Option<PathBuf>;
}

/// Main configuration record.
///
/// Exclusively owned by the launcher; mutation happens by whole-record
/// replacement (last-writer-wins), so no fine-grained locking is needed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// General daemon settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// RPC settings. `None` disables RPC.
    #[serde(default)]
    pub rpc: Option<RpcConfig>,
    /// P2P settings.
    #[serde(default)]
    pub p2p: P2pConfig,
    /// Onion proxy integration. `None` disables it.
    #[serde(default)]
    pub onion: Option<OnionConfig>,
    /// Garlic proxy integration. `None` disables it.
    #[serde(default)]
    pub garlic: Option<GarlicConfig>,
    /// ZMQ settings. `None` disables ZMQ.
    #[serde(default)]
    pub zmq: Option<ZmqConfig>,
    /// Blockchain storage and sync settings.
    #[serde(default)]
    pub blockchain: BlockchainConfig,
}

/// True when the string holds a value after trimming.
pub(crate) fn is_set(value: &str) -> bool {
    !value.trim().is_empty()
}

/// True when the string parses as a strictly positive integer.
pub(crate) fn is_positive_number(value: &str) -> bool {
    value.trim().parse::<u64>().map(|n| n > 0).unwrap_or(false)
}

fn is_valid_port(value: &str) -> bool {
    value.trim().parse::<u16>().is_ok()
}

pub(crate) fn is_loopback(ip: &str) -> bool {
    ip.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.is_loopback())
        .unwrap_or(false)
}

impl Config {
    /// Configuration with both proxy integrations and RPC enabled at their
    /// defaults. The plain `Default` leaves every optional feature off.
    pub fn with_all_features() -> Self {
        Self {
            rpc: Some(RpcConfig::default()),
            onion: Some(OnionConfig::default()),
            garlic: Some(GarlicConfig::default()),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if the TOML is invalid.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Write the configuration wholesale to `path`.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Check the configuration for structural problems.
    ///
    /// Never fails and never blocks the caller: every finding is advisory and
    /// an invocation can still be compiled while issues are present.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if let Some(rpc) = &self.rpc {
            if is_set(&rpc.bind_port) && !is_valid_port(&rpc.bind_port) {
                issues.push(ValidationIssue::new(
                    "rpc.bind_port",
                    format!("not a valid port number: {:?}", rpc.bind_port),
                ));
            }
            if rpc.ssl && (rpc.ssl_certificate.is_none() || rpc.ssl_private_key.is_none()) {
                issues.push(ValidationIssue::new(
                    "rpc.ssl",
                    "SSL enabled but certificate and private key paths are not both set",
                ));
            }
            if rpc.restricted && rpc.login.is_none() && !is_loopback(&rpc.bind_ip) {
                issues.push(ValidationIssue::new(
                    "rpc.restricted",
                    "restricted RPC bound to a non-loopback address without a login",
                ));
            }
        }

        if is_set(&self.p2p.bind_port) && !is_valid_port(&self.p2p.bind_port) {
            issues.push(ValidationIssue::new(
                "p2p.bind_port",
                format!("not a valid port number: {:?}", self.p2p.bind_port),
            ));
        }
        if is_set(&self.p2p.external_port) && !is_valid_port(&self.p2p.external_port) {
            issues.push(ValidationIssue::new(
                "p2p.external_port",
                format!("not a valid port number: {:?}", self.p2p.external_port),
            ));
        }
        for (field, value) in [
            ("p2p.limit_rate_up", &self.p2p.limit_rate_up),
            ("p2p.limit_rate_down", &self.p2p.limit_rate_down),
        ] {
            if is_set(value) && !is_positive_number(value) {
                issues.push(ValidationIssue::new(
                    field,
                    format!("not a positive number: {:?}", value),
                ));
            }
        }

        if let Some(onion) = &self.onion {
            if !is_set(&onion.executable) {
                issues.push(ValidationIssue::new(
                    "onion.executable",
                    "onion integration enabled but executable path is empty",
                ));
            }
            if is_set(&onion.socks_port) && !is_valid_port(&onion.socks_port) {
                issues.push(ValidationIssue::new(
                    "onion.socks_port",
                    format!("not a valid port number: {:?}", onion.socks_port),
                ));
            }
        }

        if let Some(garlic) = &self.garlic {
            if !is_set(&garlic.executable) {
                issues.push(ValidationIssue::new(
                    "garlic.executable",
                    "garlic integration enabled but executable path is empty",
                ));
            }
            if is_set(&garlic.sam_port) && !is_valid_port(&garlic.sam_port) {
                issues.push(ValidationIssue::new(
                    "garlic.sam_port",
                    format!("not a valid port number: {:?}", garlic.sam_port),
                ));
            }
        }

        if let Some(zmq) = &self.zmq {
            if is_set(&zmq.bind_port) && !is_valid_port(&zmq.bind_port) {
                issues.push(ValidationIssue::new(
                    "zmq.bind_port",
                    format!("not a valid port number: {:?}", zmq.bind_port),
                ));
            }
        }

        if self.blockchain.prune && !is_positive_number(&self.blockchain.pruning_keep_blocks) {
            issues.push(ValidationIssue::new(
                "blockchain.pruning_keep_blocks",
                "pruning enabled without a positive keep-blocks count",
            ));
        }

        issues
    }

    /// Merge `overlay` onto `base`, producing a new configuration without
    /// mutating either input.
    ///
    /// Optional feature groups (`rpc`, `onion`, `garlic`, `zmq`) are replaced
    /// wholesale when the overlay carries them. In always-present groups,
    /// non-empty overlay strings and list fields win per field; booleans and
    /// the log level always take the overlay's value.
    pub fn merge(base: &Config, overlay: &Config) -> Config {
        fn pick(base: &str, overlay: &str) -> String {
            if is_set(overlay) {
                overlay.to_string()
            } else {
                base.to_string()
            }
        }
        fn pick_list(base: &[String], overlay: &[String]) -> Vec<String> {
            if overlay.is_empty() {
                base.to_vec()
            } else {
                overlay.to_vec()
            }
        }

        Config {
            general: GeneralConfig {
                daemon_executable: pick(
                    &base.general.daemon_executable,
                    &overlay.general.daemon_executable,
                ),
                data_dir: pick(&base.general.data_dir, &overlay.general.data_dir),
                log_level: overlay.general.log_level,
                max_concurrency: pick(
                    &base.general.max_concurrency,
                    &overlay.general.max_concurrency,
                ),
            },
            rpc: overlay.rpc.clone().or_else(|| base.rpc.clone()),
            p2p: P2pConfig {
                bind_ip: pick(&base.p2p.bind_ip, &overlay.p2p.bind_ip),
                bind_port: pick(&base.p2p.bind_port, &overlay.p2p.bind_port),
                external_port: pick(&base.p2p.external_port, &overlay.p2p.external_port),
                limit_rate_up: pick(&base.p2p.limit_rate_up, &overlay.p2p.limit_rate_up),
                limit_rate_down: pick(&base.p2p.limit_rate_down, &overlay.p2p.limit_rate_down),
                peers: pick_list(&base.p2p.peers, &overlay.p2p.peers),
                priority_nodes: pick_list(&base.p2p.priority_nodes, &overlay.p2p.priority_nodes),
            },
            onion: overlay.onion.clone().or_else(|| base.onion.clone()),
            garlic: overlay.garlic.clone().or_else(|| base.garlic.clone()),
            zmq: overlay.zmq.clone().or_else(|| base.zmq.clone()),
            blockchain: BlockchainConfig {
                prune: overlay.blockchain.prune,
                pruning_keep_blocks: pick(
                    &base.blockchain.pruning_keep_blocks,
                    &overlay.blockchain.pruning_keep_blocks,
                ),
                db_sync_mode: pick(&base.blockchain.db_sync_mode, &overlay.blockchain.db_sync_mode),
                bootstrap_daemon_address: pick(
                    &base.blockchain.bootstrap_daemon_address,
                    &overlay.blockchain.bootstrap_daemon_address,
                ),
                extra_args: pick(&base.blockchain.extra_args, &overlay.blockchain.extra_args),
            },
        }
    }

    /// Route a picked path into the configuration field it belongs to.
    ///
    /// Picking into a disabled feature group is a no-op; the picker fills
    /// fields, it does not enable features.
    pub fn apply_picked_path(&mut self, field: PathField, path: PathBuf) {
        let value = path.to_string_lossy().into_owned();
        match field {
            PathField::DaemonExecutable => self.general.daemon_executable = value,
            PathField::DataDir => self.general.data_dir = value,
            PathField::SslCertificate => {
                if let Some(rpc) = self.rpc.as_mut() {
                    rpc.ssl_certificate = Some(path);
                }
            }
            PathField::SslPrivateKey => {
                if let Some(rpc) = self.rpc.as_mut() {
                    rpc.ssl_private_key = Some(path);
                }
            }
            PathField::OnionExecutable => {
                if let Some(onion) = self.onion.as_mut() {
                    onion.executable = value;
                }
            }
            PathField::OnionTorrc => {
                if let Some(onion) = self.onion.as_mut() {
                    onion.torrc = value;
                }
            }
            PathField::OnionDataDir => {
                if let Some(onion) = self.onion.as_mut() {
                    onion.data_dir = value;
                }
            }
            PathField::GarlicExecutable => {
                if let Some(garlic) = self.garlic.as_mut() {
                    garlic.executable = value;
                }
            }
            PathField::GarlicDataDir => {
                if let Some(garlic) = self.garlic.as_mut() {
                    garlic.data_dir = value;
                }
            }
            PathField::GarlicConf => {
                if let Some(garlic) = self.garlic.as_mut() {
                    garlic.conf = value;
                }
            }
            PathField::GarlicTunconf => {
                if let Some(garlic) = self.garlic.as_mut() {
                    garlic.tunconf = value;
                }
            }
        }
    }
}

/// Command-line arguments for anonode-rs.
///
/// Arguments override configuration file values; precedence is defaults →
/// config file → environment → CLI.
#[derive(Parser, Debug)]
#[command(name = "anonode-rs")]
#[command(about = "Launch a blockchain daemon behind onion and garlic proxies")]
#[command(version)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(long = "config", env = "ANONODE_CONFIG", default_value = "anonode.conf")]
    pub config_file: PathBuf,

    /// Write a default config (all features enabled) to a file and exit.
    #[arg(long = "generate-config")]
    pub generate_config: Option<PathBuf>,

    /// Compile and print the command line for one service and exit
    /// (daemon, onion or garlic).
    #[arg(long = "print-command")]
    pub print_command: Option<String>,

    /// Log verbosity (DEBUG, INFO, NOTICE, WARN, ERROR).
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Log to file instead of stdout (use ":syslog:" for syslog).
    #[arg(long)]
    pub logfile: Option<String>,

    /// Daemon data directory.
    #[arg(long = "data-dir", env = "ANONODE_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Path to the blockchain daemon executable.
    #[arg(long = "daemon")]
    pub daemon_executable: Option<String>,

    /// Disable the onion proxy integration.
    #[arg(long = "no-onion")]
    pub no_onion: bool,

    /// Disable the garlic proxy integration.
    #[arg(long = "no-garlic")]
    pub no_garlic: bool,

    /// Run a connectivity test after the services come up.
    #[arg(long = "test-connectivity")]
    pub test_connectivity: bool,

    /// Extra raw arguments appended to the daemon command line, unescaped.
    #[arg(long = "extra-args")]
    pub extra_args: Option<String>,
}

impl CliArgs {
    /// Apply CLI arguments to a configuration, overriding values.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ref loglevel) = self.loglevel {
            if let Ok(level) = loglevel.parse() {
                config.general.log_level = level;
            }
        }
        if let Some(ref data_dir) = self.data_dir {
            config.general.data_dir = data_dir.clone();
        }
        if let Some(ref daemon) = self.daemon_executable {
            config.general.daemon_executable = daemon.clone();
        }
        if self.no_onion {
            config.onion = None;
        }
        if self.no_garlic {
            config.garlic = None;
        }
        if let Some(ref extra) = self.extra_args {
            config.blockchain.extra_args = extra.clone();
        }
    }
}

/// Load configuration from file and CLI arguments.
///
/// Starts from [`Config::with_all_features`], applies the config file when it
/// exists, then CLI overrides. Validation issues are advisory and do not fail
/// the load; callers surface them to the operator.
///
/// # Errors
///
/// Returns [`Error::Config`] if the configuration file cannot be parsed.
pub fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = Config::with_all_features();

    if args.config_file.exists() {
        config = Config::from_file(&args.config_file)?;
    }

    args.apply_to(&mut config);
    Ok(config)
}
