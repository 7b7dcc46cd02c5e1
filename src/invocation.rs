//! Configuration-to-invocation compiler.
//!
//! Turns a [`Config`] snapshot into the exact command line for one of the
//! three supervised services. Compilation is a pure function of the snapshot:
//! the same configuration always compiles to a byte-identical [`Invocation`],
//! and there is no hidden state.
//!
//! # Per-service grammar
//!
//! | Service | Style | Shape |
//! |---------|-------|-------|
//! | Daemon | `--flag=value`, bare booleans | conditional feature groups |
//! | Onion proxy | `--Flag value` (two tokens) | fixed order, no branches |
//! | Garlic proxy | `--flag=value` | fixed order, no branches |
//!
//! The onion proxy's `key value` style and the garlic proxy's `key=value`
//! style are deliberately different; both match their respective binaries.
//! Gating of the proxies happens at the caller (a disabled proxy is simply
//! never compiled or started); their own invocations have no conditional
//! branches.
//!
//! # Inclusion rules
//!
//! Each service is described by an ordered table of [`FlagRule`] records
//! rendered by one uniform loop:
//!
//! - booleans emit the bare flag when true and nothing when false;
//! - empty or whitespace-only values mean "unset" and suppress the flag even
//!   where it would otherwise be included;
//! - flags contributed by different feature groups are emitted repeatedly,
//!   never merged — the daemon accepts repeated flags such as
//!   `--anonymous-inbound` from both proxy integrations;
//! - the free-form extra-arguments string is split on whitespace and appended
//!   verbatim as a user-controlled passthrough (documented risk, unescaped).
//!
//! # Errors
//!
//! [`compile`] fails only for structurally invalid configurations — an empty
//! executable path for the requested service. Advisory validation issues
//! never prevent compilation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{is_loopback, is_positive_number, is_set, Config};
use crate::error::{Error, Result};

/// The three supervised service shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    /// The blockchain full-node daemon.
    Daemon,
    /// The onion-routing proxy.
    OnionProxy,
    /// The garlic-routing proxy.
    GarlicProxy,
}

impl ServiceKind {
    /// All service kinds, in supervision order.
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::Daemon,
        ServiceKind::OnionProxy,
        ServiceKind::GarlicProxy,
    ];
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Daemon => write!(f, "daemon"),
            ServiceKind::OnionProxy => write!(f, "onion"),
            ServiceKind::GarlicProxy => write!(f, "garlic"),
        }
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daemon" => Ok(ServiceKind::Daemon),
            "onion" | "onion-proxy" | "tor" => Ok(ServiceKind::OnionProxy),
            "garlic" | "garlic-proxy" | "i2p" => Ok(ServiceKind::GarlicProxy),
            _ => Err(Error::Config(format!("unknown service kind: {}", s))),
        }
    }
}

/// How a flag and its value are rendered into argument tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgStyle {
    /// One token: `--flag=value`.
    Equals,
    /// Two tokens: `--flag value`.
    Space,
    /// The flag name alone.
    Bare,
}

/// One row of a service's declarative flag table.
#[derive(Debug, Clone)]
struct FlagRule {
    flag: &'static str,
    style: ArgStyle,
    value: String,
    include: bool,
}

impl FlagRule {
    fn kv(flag: &'static str, value: impl Into<String>) -> Self {
        Self {
            flag,
            style: ArgStyle::Equals,
            value: value.into(),
            include: true,
        }
    }

    fn kv_if(flag: &'static str, value: impl Into<String>, include: bool) -> Self {
        Self {
            include,
            ..Self::kv(flag, value)
        }
    }

    fn pair(flag: &'static str, value: impl Into<String>) -> Self {
        Self {
            flag,
            style: ArgStyle::Space,
            value: value.into(),
            include: true,
        }
    }

    fn bare(flag: &'static str, include: bool) -> Self {
        Self {
            flag,
            style: ArgStyle::Bare,
            value: String::new(),
            include,
        }
    }
}

/// Render a flag table into argument tokens, applying the inclusion and
/// empty-value rules uniformly.
fn render(rules: &[FlagRule]) -> Vec<String> {
    let mut args = Vec::new();
    for rule in rules {
        if !rule.include {
            continue;
        }
        match rule.style {
            ArgStyle::Bare => args.push(rule.flag.to_string()),
            ArgStyle::Equals => {
                let value = rule.value.trim();
                if !value.is_empty() {
                    args.push(format!("{}={}", rule.flag, value));
                }
            }
            ArgStyle::Space => {
                let value = rule.value.trim();
                if !value.is_empty() {
                    args.push(rule.flag.to_string());
                    args.push(value.to_string());
                }
            }
        }
    }
    args
}

/// A compiled, ready-to-execute command line for one service.
///
/// Has no identity beyond its source configuration snapshot and service kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Which service this invocation launches.
    pub service: ServiceKind,
    /// Resolved executable path.
    pub program: PathBuf,
    /// Ordered argument tokens.
    pub args: Vec<String>,
}

impl Invocation {
    /// Single-string preview: program followed by space-joined tokens.
    ///
    /// Suitable for display, NOT guaranteed shell-safe: the extra-arguments
    /// passthrough is unescaped by design.
    pub fn preview(&self) -> String {
        let mut out = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Compile the invocation for `service` from a configuration snapshot.
///
/// Pure and deterministic; never fails for a structurally valid
/// configuration. Unknown or empty optional fields are omitted rather than
/// emitted as empty flags.
///
/// # Errors
///
/// Returns [`Error::Compile`] when the executable path for the requested
/// service is empty, or when a proxy invocation is requested while that
/// proxy's integration is disabled.
pub fn compile(config: &Config, service: ServiceKind) -> Result<Invocation> {
    match service {
        ServiceKind::Daemon => compile_daemon(config),
        ServiceKind::OnionProxy => compile_onion(config),
        ServiceKind::GarlicProxy => compile_garlic(config),
    }
}

fn executable(path: &str, service: ServiceKind) -> Result<PathBuf> {
    if !is_set(path) {
        return Err(Error::Compile(format!(
            "no executable path configured for the {} service",
            service
        )));
    }
    Ok(PathBuf::from(path.trim()))
}

fn compile_daemon(config: &Config) -> Result<Invocation> {
    let program = executable(&config.general.daemon_executable, ServiceKind::Daemon)?;
    let mut rules = Vec::new();

    rules.push(FlagRule::kv("--data-dir", &config.general.data_dir));
    rules.push(FlagRule::kv(
        "--log-level",
        config.general.log_level.daemon_level().to_string(),
    ));
    rules.push(FlagRule::kv(
        "--max-concurrency",
        &config.general.max_concurrency,
    ));

    if let Some(rpc) = &config.rpc {
        rules.push(FlagRule::kv("--rpc-bind-ip", &rpc.bind_ip));
        rules.push(FlagRule::kv("--rpc-bind-port", &rpc.bind_port));
        if let Some(login) = &rpc.login {
            rules.push(FlagRule::kv(
                "--rpc-login",
                format!("{}:{}", login.username, login.password),
            ));
        }
        rules.push(FlagRule::bare("--restricted-rpc", rpc.restricted));
        rules.push(FlagRule::bare(
            "--confirm-external-bind",
            is_set(&rpc.bind_ip) && !is_loopback(&rpc.bind_ip),
        ));
        if rpc.ssl {
            rules.push(FlagRule::kv("--rpc-ssl", "enabled"));
            if let Some(cert) = &rpc.ssl_certificate {
                rules.push(FlagRule::kv(
                    "--rpc-ssl-certificate",
                    cert.to_string_lossy(),
                ));
            }
            if let Some(key) = &rpc.ssl_private_key {
                rules.push(FlagRule::kv(
                    "--rpc-ssl-private-key",
                    key.to_string_lossy(),
                ));
            }
        }
    }

    rules.push(FlagRule::kv("--p2p-bind-ip", &config.p2p.bind_ip));
    rules.push(FlagRule::kv("--p2p-bind-port", &config.p2p.bind_port));
    rules.push(FlagRule::kv(
        "--p2p-external-port",
        &config.p2p.external_port,
    ));
    rules.push(FlagRule::kv_if(
        "--limit-rate-up",
        &config.p2p.limit_rate_up,
        is_positive_number(&config.p2p.limit_rate_up),
    ));
    rules.push(FlagRule::kv_if(
        "--limit-rate-down",
        &config.p2p.limit_rate_down,
        is_positive_number(&config.p2p.limit_rate_down),
    ));
    for peer in &config.p2p.peers {
        rules.push(FlagRule::kv("--add-peer", peer));
    }
    for node in &config.p2p.priority_nodes {
        rules.push(FlagRule::kv("--add-priority-node", node));
    }

    if let Some(onion) = &config.onion {
        let mut tx_proxy = format!("tor,127.0.0.1:{}", onion.socks_port.trim());
        if is_set(&onion.proxy_level) {
            tx_proxy.push(',');
            tx_proxy.push_str(onion.proxy_level.trim());
        }
        rules.push(FlagRule::kv("--tx-proxy", tx_proxy));
        rules.push(FlagRule::kv(
            "--socks-proxy",
            format!("127.0.0.1:{}", onion.socks_port.trim()),
        ));
        rules.push(FlagRule::bare("--tor-only", onion.only));
        if let Some(address) = onion.discovered_address.as_deref().filter(|a| is_set(a)) {
            rules.push(FlagRule::kv(
                "--anonymous-inbound",
                format!(
                    "{}:{},127.0.0.1:{}",
                    address.trim(),
                    onion.inbound_port.trim(),
                    onion.inbound_forward_port
                ),
            ));
        }
        rules.push(FlagRule::bare("--pad-transactions", onion.pad_transactions));
    }

    if let Some(garlic) = &config.garlic {
        rules.push(FlagRule::kv(
            "--tx-proxy",
            format!("i2p,127.0.0.1:{}", garlic.sam_port.trim()),
        ));
        rules.push(FlagRule::bare("--i2p-only", garlic.only));
        if let Some(address) = garlic.discovered_address.as_deref().filter(|a| is_set(a)) {
            rules.push(FlagRule::kv(
                "--anonymous-inbound",
                format!(
                    "{}:{},127.0.0.1:{}",
                    address.trim(),
                    garlic.inbound_port.trim(),
                    garlic.inbound_forward_port
                ),
            ));
        }
    }

    if let Some(zmq) = &config.zmq {
        rules.push(FlagRule::kv("--zmq-rpc-bind-ip", &zmq.bind_ip));
        rules.push(FlagRule::kv("--zmq-rpc-bind-port", &zmq.bind_port));
    }

    rules.push(FlagRule::bare("--prune-blockchain", config.blockchain.prune));
    rules.push(FlagRule::kv_if(
        "--pruning-keep-blocks",
        &config.blockchain.pruning_keep_blocks,
        config.blockchain.prune,
    ));
    rules.push(FlagRule::kv(
        "--db-sync-mode",
        &config.blockchain.db_sync_mode,
    ));
    rules.push(FlagRule::kv(
        "--bootstrap-daemon-address",
        &config.blockchain.bootstrap_daemon_address,
    ));

    let mut args = render(&rules);
    // User-controlled passthrough, split on whitespace and appended verbatim.
    args.extend(
        config
            .blockchain
            .extra_args
            .split_whitespace()
            .map(str::to_string),
    );

    Ok(Invocation {
        service: ServiceKind::Daemon,
        program,
        args,
    })
}

fn compile_onion(config: &Config) -> Result<Invocation> {
    let onion = config.onion.as_ref().ok_or_else(|| {
        Error::Compile("onion proxy integration is disabled".to_string())
    })?;
    let program = executable(&onion.executable, ServiceKind::OnionProxy)?;

    let rules = [
        FlagRule::pair("--config", &onion.torrc),
        FlagRule::pair("--DataDirectory", &onion.data_dir),
        FlagRule::pair("--Log", format!("notice file {}", onion.log_path.trim())),
    ];

    Ok(Invocation {
        service: ServiceKind::OnionProxy,
        program,
        args: render(&rules),
    })
}

fn compile_garlic(config: &Config) -> Result<Invocation> {
    let garlic = config.garlic.as_ref().ok_or_else(|| {
        Error::Compile("garlic proxy integration is disabled".to_string())
    })?;
    let program = executable(&garlic.executable, ServiceKind::GarlicProxy)?;

    let rules = [
        FlagRule::kv("--datadir", &garlic.data_dir),
        FlagRule::kv("--conf", &garlic.conf),
        FlagRule::kv("--tunconf", &garlic.tunconf),
        FlagRule::kv("--log", &garlic.log_path),
    ];

    Ok(Invocation {
        service: ServiceKind::GarlicProxy,
        program,
        args: render(&rules),
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arbitrary_config() -> impl Strategy<Value = Config> {
        (
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            "[ a-z0-9]{0,12}",
            "[ 0-9]{0,6}",
            any::<bool>(),
        )
            .prop_map(|(rpc, onion, garlic, extra, rate, prune)| {
                let mut config = Config::default();
                if rpc {
                    config.rpc = Some(crate::config::RpcConfig::default());
                }
                if onion {
                    config.onion = Some(crate::config::OnionConfig::default());
                }
                if garlic {
                    config.garlic = Some(crate::config::GarlicConfig::default());
                }
                config.blockchain.extra_args = extra;
                config.blockchain.prune = prune;
                config.p2p.limit_rate_up = rate;
                config
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn compile_twice_is_byte_identical(config in arbitrary_config()) {
            let first = compile(&config, ServiceKind::Daemon).unwrap();
            let second = compile(&config, ServiceKind::Daemon).unwrap();
            prop_assert_eq!(first.preview(), second.preview());
        }

        #[test]
        fn no_empty_or_dangling_tokens(config in arbitrary_config()) {
            let invocation = compile(&config, ServiceKind::Daemon).unwrap();
            for arg in &invocation.args {
                prop_assert!(!arg.trim().is_empty());
                prop_assert!(!arg.ends_with('='));
            }
        }

        #[test]
        fn rpc_flags_track_rpc_presence(config in arbitrary_config()) {
            let has_rpc_flags = compile(&config, ServiceKind::Daemon)
                .unwrap()
                .args
                .iter()
                .any(|a| a.starts_with("--rpc"));
            prop_assert_eq!(has_rpc_flags, config.rpc.is_some());
        }
    }
}
