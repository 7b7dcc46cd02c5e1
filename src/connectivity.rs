//! Connectivity test orchestration.
//!
//! Runs a bounded, sequential battery of probes against the live services
//! and aggregates a [`ConnectivityReport`]: one TCP reachability probe per
//! enabled listener, then an RPC round trip, then a daemon version check.
//! Every probe is individually time-bounded, and one probe failing never
//! aborts the rest; each outcome is recorded independently.
//!
//! The orchestrator refuses to run against a daemon that is not Running and
//! returns an all-untested report with an explanation instead, so the caller
//! always gets a complete report shape back.
//!
//! Network I/O goes through the [`ProbeTransport`] trait;
//! [`TcpProbeTransport`] is the production implementation, tests substitute
//! a scripted one.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::supervisor::ProcessState;

/// Per-probe time bound.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The probes the orchestrator knows how to run, in execution and report
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProbeKind {
    /// TCP reachability of the daemon's P2P listener.
    P2pPort,
    /// TCP reachability of the daemon's RPC listener.
    RpcPort,
    /// TCP reachability of the onion proxy's SOCKS listener.
    OnionSocks,
    /// TCP reachability of the garlic proxy's SAM listener.
    GarlicSam,
    /// JSON-RPC round trip against the daemon.
    RpcRoundTrip,
    /// Daemon version query over JSON-RPC.
    DaemonVersion,
}

impl ProbeKind {
    const ALL: [ProbeKind; 6] = [
        ProbeKind::P2pPort,
        ProbeKind::RpcPort,
        ProbeKind::OnionSocks,
        ProbeKind::GarlicSam,
        ProbeKind::RpcRoundTrip,
        ProbeKind::DaemonVersion,
    ];
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::P2pPort => write!(f, "p2p port"),
            ProbeKind::RpcPort => write!(f, "rpc port"),
            ProbeKind::OnionSocks => write!(f, "onion socks port"),
            ProbeKind::GarlicSam => write!(f, "garlic sam port"),
            ProbeKind::RpcRoundTrip => write!(f, "rpc round trip"),
            ProbeKind::DaemonVersion => write!(f, "daemon version"),
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether the probe actually ran.
    pub tested: bool,
    /// Whether it succeeded. Meaningless unless `tested`.
    pub success: bool,
    /// Human-readable explanation.
    pub detail: String,
}

impl ProbeOutcome {
    fn skipped(detail: impl Into<String>) -> Self {
        Self {
            tested: false,
            success: false,
            detail: detail.into(),
        }
    }

    fn passed(detail: impl Into<String>) -> Self {
        Self {
            tested: true,
            success: true,
            detail: detail.into(),
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            tested: true,
            success: false,
            detail: detail.into(),
        }
    }
}

/// Aggregated result of one connectivity test run.
#[derive(Debug, Clone)]
pub struct ConnectivityReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// One entry per probe kind, in probe order.
    pub entries: BTreeMap<ProbeKind, ProbeOutcome>,
}

impl ConnectivityReport {
    fn untested(reason: &str) -> Self {
        Self {
            started_at: Utc::now(),
            entries: ProbeKind::ALL
                .iter()
                .map(|kind| (*kind, ProbeOutcome::skipped(reason)))
                .collect(),
        }
    }

    /// Whether every probe that ran succeeded (vacuously true when none ran).
    pub fn all_passed(&self) -> bool {
        self.entries
            .values()
            .filter(|outcome| outcome.tested)
            .all(|outcome| outcome.success)
    }

    /// One line per probe, in probe order.
    pub fn summary(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(kind, outcome)| {
                let status = if !outcome.tested {
                    "SKIP"
                } else if outcome.success {
                    "OK"
                } else {
                    "FAIL"
                };
                format!("{}: {} ({})", kind, status, outcome.detail)
            })
            .collect()
    }
}

/// Network side of the probes.
pub trait ProbeTransport: Send + Sync {
    /// Attempt a TCP connection to `host:port` within `timeout`.
    fn check_port(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Issue a JSON-RPC call against the daemon and return the `result`
    /// value.
    fn json_rpc(
        &self,
        host: &str,
        port: u16,
        method: &str,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Value>> + Send;
}

/// Production transport: plain TCP connects and a minimal HTTP/1.1 JSON-RPC
/// client.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbeTransport;

impl ProbeTransport for TcpProbeTransport {
    async fn check_port(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Probe(format!("{}:{} timed out", host, port)))?
            .map_err(|e| Error::Probe(format!("{}:{} unreachable: {}", host, port, e)))?;
        Ok(())
    }

    async fn json_rpc(
        &self,
        host: &str,
        port: u16,
        method: &str,
        timeout: Duration,
    ) -> Result<Value> {
        let response = tokio::time::timeout(timeout, async {
            let mut stream = TcpStream::connect((host, port))
                .await
                .map_err(|e| Error::Probe(format!("{}:{} unreachable: {}", host, port, e)))?;

            let body = json!({
                "jsonrpc": "2.0",
                "id": "0",
                "method": method,
            })
            .to_string();
            let request = format!(
                "POST /json_rpc HTTP/1.1\r\nHost: {}:{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                host,
                port,
                body.len(),
                body
            );
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|e| Error::Probe(format!("rpc write failed: {}", e)))?;

            let mut raw = Vec::new();
            stream
                .read_to_end(&mut raw)
                .await
                .map_err(|e| Error::Probe(format!("rpc read failed: {}", e)))?;
            Ok::<Vec<u8>, Error>(raw)
        })
        .await
        .map_err(|_| Error::Probe(format!("rpc call to {}:{} timed out", host, port)))??;

        let text = String::from_utf8_lossy(&response);
        let body = text
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .unwrap_or(&text);
        let value: Value = serde_json::from_str(body.trim())
            .map_err(|e| Error::Probe(format!("invalid rpc response: {}", e)))?;
        value
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Probe("rpc response carries no result".to_string()))
    }
}

/// Runs the probe battery.
pub struct TestOrchestrator<T: ProbeTransport> {
    transport: T,
    timeout: Duration,
}

impl Default for TestOrchestrator<TcpProbeTransport> {
    fn default() -> Self {
        Self::new(TcpProbeTransport)
    }
}

impl<T: ProbeTransport> TestOrchestrator<T> {
    /// Create an orchestrator with the default per-probe timeout.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the per-probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the battery against a configuration snapshot.
    ///
    /// `daemon_state` is the supervisor's current daemon state; anything
    /// other than Running yields an all-untested report.
    pub async fn run(&self, config: &Config, daemon_state: ProcessState) -> ConnectivityReport {
        if daemon_state != ProcessState::Running {
            return ConnectivityReport::untested("daemon is not running; tests skipped");
        }

        let started_at = Utc::now();
        let mut entries = BTreeMap::new();
        for kind in ProbeKind::ALL {
            debug!("running {} probe", kind);
            entries.insert(kind, self.probe(kind, config).await);
        }
        ConnectivityReport {
            started_at,
            entries,
        }
    }

    async fn probe(&self, kind: ProbeKind, config: &Config) -> ProbeOutcome {
        match kind {
            ProbeKind::P2pPort => {
                let host = probe_host(&config.p2p.bind_ip);
                self.port_probe(&host, &config.p2p.bind_port).await
            }
            ProbeKind::RpcPort => match config.rpc.as_ref() {
                Some(rpc) => {
                    let host = probe_host(&rpc.bind_ip);
                    self.port_probe(&host, &rpc.bind_port).await
                }
                None => ProbeOutcome::skipped("rpc disabled"),
            },
            ProbeKind::OnionSocks => match config.onion.as_ref() {
                Some(onion) => self.port_probe("127.0.0.1", &onion.socks_port).await,
                None => ProbeOutcome::skipped("onion integration disabled"),
            },
            ProbeKind::GarlicSam => match config.garlic.as_ref() {
                Some(garlic) => self.port_probe("127.0.0.1", &garlic.sam_port).await,
                None => ProbeOutcome::skipped("garlic integration disabled"),
            },
            ProbeKind::RpcRoundTrip => self.rpc_probe(config, "get_info", |_| None).await,
            ProbeKind::DaemonVersion => {
                self.rpc_probe(config, "get_version", |result| {
                    result
                        .get("version")
                        .map(|v| format!("daemon version {}", v))
                })
                .await
            }
        }
    }

    async fn port_probe(&self, host: &str, port: &str) -> ProbeOutcome {
        let port = match port.trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => return ProbeOutcome::failed(format!("invalid port '{}'", port.trim())),
        };
        match self.transport.check_port(host, port, self.timeout).await {
            Ok(()) => ProbeOutcome::passed(format!("{}:{} reachable", host, port)),
            Err(e) => ProbeOutcome::failed(e.to_string()),
        }
    }

    async fn rpc_probe(
        &self,
        config: &Config,
        method: &str,
        detail: impl Fn(&Value) -> Option<String>,
    ) -> ProbeOutcome {
        let Some(rpc) = config.rpc.as_ref() else {
            return ProbeOutcome::skipped("rpc disabled");
        };
        let port = match rpc.bind_port.trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                return ProbeOutcome::failed(format!("invalid rpc port '{}'", rpc.bind_port.trim()))
            }
        };
        let host = probe_host(&rpc.bind_ip);
        match self.transport.json_rpc(&host, port, method, self.timeout).await {
            Ok(result) => ProbeOutcome::passed(
                detail(&result).unwrap_or_else(|| format!("{} succeeded", method)),
            ),
            Err(e) => ProbeOutcome::failed(e.to_string()),
        }
    }
}

/// A wildcard bind address is probed over loopback.
fn probe_host(bind_ip: &str) -> String {
    let trimmed = bind_ip.trim();
    if trimmed.is_empty() || trimmed == "0.0.0.0" || trimmed == "::" {
        "127.0.0.1".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted transport: ports listed in `open` connect, everything else
    /// is refused; RPC answers come from a fixed map.
    #[derive(Default)]
    struct MockTransport {
        open: Vec<(String, u16)>,
        rpc: HashMap<String, Value>,
        calls: Mutex<Vec<String>>,
    }

    impl ProbeTransport for MockTransport {
        async fn check_port(&self, host: &str, port: u16, _timeout: Duration) -> Result<()> {
            self.calls.lock().unwrap().push(format!("port {}:{}", host, port));
            if self.open.contains(&(host.to_string(), port)) {
                Ok(())
            } else {
                Err(Error::Probe(format!("{}:{} unreachable", host, port)))
            }
        }

        async fn json_rpc(
            &self,
            _host: &str,
            _port: u16,
            method: &str,
            _timeout: Duration,
        ) -> Result<Value> {
            self.calls.lock().unwrap().push(format!("rpc {}", method));
            self.rpc
                .get(method)
                .cloned()
                .ok_or_else(|| Error::Probe(format!("{} failed", method)))
        }
    }

    fn full_config() -> Config {
        Config::with_all_features()
    }

    #[tokio::test]
    async fn refuses_when_daemon_is_not_running() {
        let orchestrator = TestOrchestrator::new(MockTransport::default());
        let report = orchestrator.run(&full_config(), ProcessState::Stopped).await;

        assert_eq!(report.entries.len(), 6);
        assert!(report.entries.values().all(|outcome| !outcome.tested));
        assert!(report
            .entries
            .values()
            .all(|outcome| outcome.detail.contains("not running")));
        // Nothing ran, so the report vacuously passes.
        assert!(report.all_passed());
    }

    #[tokio::test]
    async fn one_failing_probe_does_not_abort_the_rest() {
        // Only the SOCKS port is open; every other probe fails.
        let transport = MockTransport {
            open: vec![("127.0.0.1".to_string(), 9050)],
            ..Default::default()
        };
        let orchestrator = TestOrchestrator::new(transport);
        let report = orchestrator.run(&full_config(), ProcessState::Running).await;

        assert!(report.entries.values().all(|outcome| outcome.tested));
        assert!(report.entries[&ProbeKind::OnionSocks].success);
        assert!(!report.entries[&ProbeKind::P2pPort].success);
        assert!(!report.entries[&ProbeKind::DaemonVersion].success);
        assert!(!report.all_passed());
        // All six probes actually ran.
        assert_eq!(
            orchestrator.transport.calls.lock().unwrap().len(),
            6
        );
    }

    #[tokio::test]
    async fn version_probe_reports_the_daemon_version() {
        let mut rpc = HashMap::new();
        rpc.insert("get_info".to_string(), json!({"status": "OK"}));
        rpc.insert("get_version".to_string(), json!({"version": 196613}));
        let transport = MockTransport {
            open: vec![
                ("127.0.0.1".to_string(), 18080),
                ("127.0.0.1".to_string(), 18081),
                ("127.0.0.1".to_string(), 9050),
                ("127.0.0.1".to_string(), 7656),
            ],
            rpc,
            ..Default::default()
        };
        let orchestrator = TestOrchestrator::new(transport);
        let report = orchestrator.run(&full_config(), ProcessState::Running).await;

        assert!(report.all_passed());
        assert!(report.entries[&ProbeKind::DaemonVersion]
            .detail
            .contains("196613"));
    }

    #[tokio::test]
    async fn disabled_features_are_skipped_not_failed() {
        let mut config = full_config();
        config.rpc = None;
        config.garlic = None;
        let transport = MockTransport {
            open: vec![
                ("127.0.0.1".to_string(), 18080),
                ("127.0.0.1".to_string(), 9050),
            ],
            ..Default::default()
        };
        let orchestrator = TestOrchestrator::new(transport);
        let report = orchestrator.run(&config, ProcessState::Running).await;

        assert!(report.entries[&ProbeKind::P2pPort].tested);
        assert!(report.entries[&ProbeKind::OnionSocks].tested);
        for kind in [
            ProbeKind::RpcPort,
            ProbeKind::GarlicSam,
            ProbeKind::RpcRoundTrip,
            ProbeKind::DaemonVersion,
        ] {
            assert!(!report.entries[&kind].tested, "{} should be skipped", kind);
        }
        assert!(report.all_passed());
    }

    #[tokio::test]
    async fn wildcard_bind_address_is_probed_over_loopback() {
        let transport = MockTransport::default();
        let orchestrator = TestOrchestrator::new(transport);
        // p2p binds 0.0.0.0 in the default config.
        let _ = orchestrator.run(&full_config(), ProcessState::Running).await;
        let calls = orchestrator.transport.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c == "port 127.0.0.1:18080"));
    }

    #[tokio::test]
    async fn non_numeric_port_fails_its_probe_only() {
        let mut config = full_config();
        config.p2p.bind_port = "p2p-port".to_string();
        let transport = MockTransport {
            open: vec![("127.0.0.1".to_string(), 18081)],
            ..Default::default()
        };
        let orchestrator = TestOrchestrator::new(transport);
        let report = orchestrator.run(&config, ProcessState::Running).await;

        let p2p = &report.entries[&ProbeKind::P2pPort];
        assert!(p2p.tested && !p2p.success);
        assert!(p2p.detail.contains("invalid port"));
        assert!(report.entries[&ProbeKind::RpcPort].success);
    }

    #[test]
    fn summary_has_one_line_per_probe_in_order() {
        let report = ConnectivityReport::untested("daemon is not running; tests skipped");
        let summary = report.summary();
        assert_eq!(summary.len(), 6);
        assert!(summary[0].starts_with("p2p port: SKIP"));
        assert!(summary[5].starts_with("daemon version: SKIP"));
    }
}
