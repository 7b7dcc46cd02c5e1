//! High-level launcher facade.
//!
//! [`Launcher`] wires the pieces together for a frontend (the CLI binary, or
//! an embedding application): it owns the shared [`Config`] record and the
//! [`Supervisor`], spawns the address discovery watchers, and runs
//! connectivity tests. Configuration updates replace the whole record, last
//! writer wins; there is a single logical owner, the lock only protects
//! against torn reads from watcher tasks.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::{Config, PathField, PathPicker, ValidationIssue};
use crate::connectivity::{ConnectivityReport, ProbeTransport, TestOrchestrator};
use crate::discovery;
use crate::error::{Error, Result};
use crate::invocation::{compile, ServiceKind};
use crate::runner::{ProcessRunner, TokioProcessRunner};
use crate::supervisor::{HandleSnapshot, ProcessState, Supervisor, SupervisorEvent};

/// Combines configuration, supervision, discovery, and connectivity testing
/// behind one object.
pub struct Launcher<R: ProcessRunner> {
    config: Arc<RwLock<Config>>,
    supervisor: Arc<Supervisor<R>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl Launcher<TokioProcessRunner> {
    /// Launcher backed by real OS processes.
    pub fn new(config: Config) -> Self {
        Self::with_runner(config, TokioProcessRunner)
    }
}

impl<R: ProcessRunner> Launcher<R> {
    /// Launcher with an injected process runner.
    pub fn with_runner(config: Config, runner: R) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            supervisor: Arc::new(Supervisor::new(runner)),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Clone of the current configuration record.
    pub async fn config_snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Replace the configuration record wholesale.
    pub async fn update_config(&self, config: Config) {
        *self.config.write().await = config;
    }

    /// Advisory findings for the current configuration.
    pub async fn validate(&self) -> Vec<ValidationIssue> {
        self.config.read().await.validate()
    }

    /// Compile and render the command line one service would be started
    /// with.
    ///
    /// # Errors
    ///
    /// [`Error::Compile`] when the current configuration cannot produce an
    /// invocation for this service.
    pub async fn preview(&self, kind: ServiceKind) -> Result<String> {
        let config = self.config.read().await;
        Ok(compile(&config, kind)?.preview())
    }

    /// Route a picked path into its configuration field.
    ///
    /// Returns `false` when the picker was cancelled.
    pub async fn choose_path_into(&self, picker: &dyn PathPicker, field: PathField) -> bool {
        match picker.choose_path() {
            Some(path) => {
                self.config.write().await.apply_picked_path(field, path);
                true
            }
            None => false,
        }
    }

    /// Start one service from the current configuration.
    pub async fn start_service(&self, kind: ServiceKind) -> Result<bool> {
        let config = self.config_snapshot().await;
        self.supervisor.start(kind, &config).await
    }

    /// Request one service to stop.
    pub fn stop_service(&self, kind: ServiceKind) -> Result<bool> {
        self.supervisor.stop(kind)
    }

    /// Restart the daemon service.
    pub async fn restart_daemon(&self) -> Result<()> {
        let config = self.config_snapshot().await;
        self.supervisor.restart(ServiceKind::Daemon, &config).await
    }

    /// Start the daemon and every proxy whose integration is enabled.
    ///
    /// One service failing to start does not prevent the others; failures
    /// are returned alongside the service they belong to.
    pub async fn start_enabled(&self) -> Vec<(ServiceKind, Error)> {
        let config = self.config_snapshot().await;
        let mut failures = Vec::new();

        let mut kinds = vec![ServiceKind::Daemon];
        if config.onion.is_some() {
            kinds.push(ServiceKind::OnionProxy);
        }
        if config.garlic.is_some() {
            kinds.push(ServiceKind::GarlicProxy);
        }

        for kind in kinds {
            if let Err(e) = self.supervisor.start(kind, &config).await {
                warn!("{} failed to start: {}", kind, e);
                failures.push((kind, e));
            }
        }
        failures
    }

    /// Stop every running service. Watcher tasks stay alive so discovered
    /// addresses are cleared.
    pub fn stop_all(&self) {
        self.supervisor.stop_all();
    }

    /// Spawn one address discovery watcher per enabled proxy.
    ///
    /// Idempotent per launcher: calling it again aborts the previous
    /// watchers first.
    pub async fn spawn_address_watchers(&self) {
        let mut watchers = self.watchers.lock().unwrap();
        for watcher in watchers.drain(..) {
            watcher.abort();
        }

        for kind in [ServiceKind::OnionProxy, ServiceKind::GarlicProxy] {
            watchers.push(tokio::spawn(discovery::run_watcher(
                kind,
                Arc::clone(&self.config),
                Arc::clone(&self.supervisor),
                discovery::DEFAULT_POLL_INTERVAL,
            )));
        }
    }

    /// Run the connectivity test battery with the default TCP transport.
    pub async fn test_connectivity(&self) -> ConnectivityReport {
        self.test_connectivity_with(&TestOrchestrator::default())
            .await
    }

    /// Run the connectivity test battery through a specific orchestrator.
    pub async fn test_connectivity_with<T: ProbeTransport>(
        &self,
        orchestrator: &TestOrchestrator<T>,
    ) -> ConnectivityReport {
        let config = self.config_snapshot().await;
        let daemon_state = self.supervisor.state(ServiceKind::Daemon);
        orchestrator.run(&config, daemon_state).await
    }

    /// Subscribe to supervisor state and log events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }

    /// Current state of one service.
    pub fn state(&self, kind: ServiceKind) -> ProcessState {
        self.supervisor.state(kind)
    }

    /// Snapshot of one service's handle.
    pub fn snapshot(&self, kind: ServiceKind) -> HandleSnapshot {
        self.supervisor.snapshot(kind)
    }

    /// Formatted copy of one service's log buffer.
    pub fn log_lines(&self, kind: ServiceKind) -> Vec<String> {
        self.supervisor.log_lines(kind)
    }

    /// Stop everything and abort the watcher tasks.
    pub fn shutdown(&self) {
        self.stop_all();
        for watcher in self.watchers.lock().unwrap().drain(..) {
            watcher.abort();
        }
    }
}

impl<R: ProcessRunner> Drop for Launcher<R> {
    fn drop(&mut self) {
        for watcher in self.watchers.lock().unwrap().drain(..) {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tokio::sync::mpsc;

    use crate::runner::ProcessRef;

    /// Runner whose processes idle until terminated, exiting with code 0.
    #[derive(Default)]
    struct InertRunner;

    struct InertProc {
        line_tx: Option<mpsc::UnboundedSender<String>>,
        output: Option<mpsc::UnboundedReceiver<String>>,
        exit_code: Option<i32>,
    }

    impl ProcessRef for InertProc {
        fn id(&self) -> Option<u32> {
            Some(7)
        }

        fn terminate(&mut self) -> Result<()> {
            self.exit_code = Some(0);
            self.line_tx = None;
            Ok(())
        }

        fn poll_exit_status(&mut self) -> Result<Option<i32>> {
            Ok(self.exit_code)
        }

        fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
            self.output.take()
        }
    }

    impl ProcessRunner for InertRunner {
        async fn spawn(&self, _program: &Path, _args: &[String]) -> Result<Box<dyn ProcessRef>> {
            let (line_tx, output) = mpsc::unbounded_channel();
            Ok(Box::new(InertProc {
                line_tx: Some(line_tx),
                output: Some(output),
                exit_code: None,
            }))
        }
    }

    struct FixedPicker(Option<PathBuf>);

    impl PathPicker for FixedPicker {
        fn choose_path(&self) -> Option<PathBuf> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn start_enabled_starts_only_enabled_services() {
        let mut config = Config::with_all_features();
        config.garlic = None;
        let launcher = Launcher::with_runner(config, InertRunner);

        let failures = launcher.start_enabled().await;
        assert!(failures.is_empty());
        assert_eq!(launcher.state(ServiceKind::Daemon), ProcessState::Running);
        assert_eq!(launcher.state(ServiceKind::OnionProxy), ProcessState::Running);
        assert_eq!(launcher.state(ServiceKind::GarlicProxy), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn start_enabled_reports_failures_without_aborting() {
        let mut config = Config::with_all_features();
        // Daemon compiles fine; the onion proxy cannot.
        config.onion.as_mut().unwrap().executable = String::new();
        let launcher = Launcher::with_runner(config, InertRunner);

        let failures = launcher.start_enabled().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, ServiceKind::OnionProxy);
        // The daemon and garlic proxy started regardless.
        assert_eq!(launcher.state(ServiceKind::Daemon), ProcessState::Running);
        assert_eq!(launcher.state(ServiceKind::GarlicProxy), ProcessState::Running);
    }

    #[tokio::test]
    async fn update_config_replaces_the_record_wholesale() {
        let launcher = Launcher::with_runner(Config::with_all_features(), InertRunner);
        let mut next = launcher.config_snapshot().await;
        next.garlic = None;
        next.general.data_dir = "/srv/daemon".to_string();
        launcher.update_config(next).await;

        let snapshot = launcher.config_snapshot().await;
        assert!(snapshot.garlic.is_none());
        assert_eq!(snapshot.general.data_dir, "/srv/daemon");
    }

    #[tokio::test]
    async fn preview_follows_the_live_config() {
        let launcher = Launcher::with_runner(Config::with_all_features(), InertRunner);
        let before = launcher.preview(ServiceKind::Daemon).await.unwrap();
        assert!(before.contains("--rpc-bind-port=18081"));

        let mut next = launcher.config_snapshot().await;
        next.rpc = None;
        launcher.update_config(next).await;
        let after = launcher.preview(ServiceKind::Daemon).await.unwrap();
        assert!(!after.contains("--rpc-bind-port"));
    }

    #[tokio::test]
    async fn cancelled_picker_changes_nothing() {
        let launcher = Launcher::with_runner(Config::with_all_features(), InertRunner);
        let before = launcher.config_snapshot().await;

        assert!(!launcher
            .choose_path_into(&FixedPicker(None), PathField::DataDir)
            .await);
        assert_eq!(launcher.config_snapshot().await, before);

        assert!(launcher
            .choose_path_into(&FixedPicker(Some(PathBuf::from("/data"))), PathField::DataDir)
            .await);
        assert_eq!(launcher.config_snapshot().await.general.data_dir, "/data");
    }

    #[tokio::test]
    async fn connectivity_refuses_until_daemon_runs() {
        let launcher = Launcher::with_runner(Config::with_all_features(), InertRunner);
        let report = launcher.test_connectivity().await;
        assert!(report.entries.values().all(|outcome| !outcome.tested));
    }

    #[tokio::test]
    async fn events_flow_through_the_launcher() {
        let launcher = Launcher::with_runner(Config::with_all_features(), InertRunner);
        let mut events = launcher.subscribe();
        launcher.start_service(ServiceKind::Daemon).await.unwrap();

        let mut saw_running = false;
        while let Ok(event) = events.try_recv() {
            if let SupervisorEvent::StateChanged {
                state: ProcessState::Running,
                ..
            } = event
            {
                saw_running = true;
            }
        }
        assert!(saw_running);
    }
}
