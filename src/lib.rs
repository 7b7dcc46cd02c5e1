//! anonode-rs: launcher and supervisor for an anonymity-enabled blockchain
//! node.
//!
//! Manages three external processes as one unit: a blockchain daemon, an
//! onion-routing proxy, and a garlic-routing proxy. Configuration is a
//! single typed record; a pure compiler turns it into per-service command
//! lines; a supervisor owns the process state machines and log buffers; a
//! watcher publishes the proxies' network-assigned addresses back into the
//! configuration; and a test orchestrator probes the live services on
//! demand.
//!
//! # Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | Configuration record, validation, merge, TOML persistence, CLI args |
//! | [`invocation`] | Configuration → ordered command-line tokens, per service |
//! | [`runner`] | Process spawning boundary ([`ProcessRunner`] / [`ProcessRef`]) |
//! | [`supervisor`] | Per-service lifecycle state machines and log buffers |
//! | [`discovery`] | Onion/garlic address discovery and publication |
//! | [`connectivity`] | On-demand probe battery against the live services |
//! | [`api`] | [`Launcher`] facade tying everything together |
//! | [`error`] | Crate-wide error type |
//! | [`logger`] | Launcher's own log output (stdout / file / syslog) |
//!
//! # Example
//!
//! ```rust,no_run
//! use anonode_rs::{Config, Launcher, ServiceKind};
//!
//! #[tokio::main]
//! async fn main() -> anonode_rs::Result<()> {
//!     let launcher = Launcher::new(Config::with_all_features());
//!     println!("{}", launcher.preview(ServiceKind::Daemon).await?);
//!     launcher.start_service(ServiceKind::Daemon).await?;
//!     launcher.spawn_address_watchers().await;
//!     # Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod connectivity;
pub mod discovery;
pub mod error;
pub mod invocation;
pub mod logger;
pub mod runner;
pub mod supervisor;

pub use api::Launcher;
pub use config::{CliArgs, Config, LogLevel, PathField, PathPicker, ValidationIssue};
pub use connectivity::{
    ConnectivityReport, ProbeKind, ProbeOutcome, ProbeTransport, TcpProbeTransport,
    TestOrchestrator,
};
pub use error::{Error, Result};
pub use invocation::{compile, Invocation, ServiceKind};
pub use runner::{ProcessRef, ProcessRunner, TokioProcessRunner};
pub use supervisor::{HandleSnapshot, ProcessState, Supervisor, SupervisorEvent};
