//! Address discovery for the anonymity proxies.
//!
//! Both proxies are assigned a network identity only after they have started:
//! the onion proxy writes the hidden-service hostname into its data
//! directory, and the garlic proxy writes the base32 destination of its
//! server tunnel. The watcher polls for that address once the proxy is
//! Running and publishes it into the shared [`Config`], exactly once per run.
//! When the proxy leaves Running (stop or crash) the address is cleared, so
//! a stale identity is never shown beside a dead service.
//!
//! Primary source is the well-known file in the proxy's data directory
//! (`hostname` / `b32hostname.txt`); when the file is not there yet, the
//! proxy's recent log buffer is scanned for a plausible address token.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::invocation::ServiceKind;
use crate::runner::ProcessRunner;
use crate::supervisor::{ProcessState, Supervisor};

/// Default poll interval between discovery attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Hidden-service hostname file inside the onion proxy's data directory.
const ONION_HOSTNAME_FILE: &str = "hostname";

/// Server-tunnel destination file inside the garlic proxy's data directory.
const GARLIC_HOSTNAME_FILE: &str = "b32hostname.txt";

const ONION_SUFFIX: &str = ".onion";
const GARLIC_SUFFIX: &str = ".b32.i2p";

/// Read the onion address from `<data_dir>/hostname`, if present and valid.
pub fn read_onion_address(data_dir: &Path) -> Option<String> {
    read_address_file(&data_dir.join(ONION_HOSTNAME_FILE), ONION_SUFFIX)
}

/// Read the garlic address from `<data_dir>/b32hostname.txt`, if present and
/// valid.
pub fn read_garlic_address(data_dir: &Path) -> Option<String> {
    read_address_file(&data_dir.join(GARLIC_HOSTNAME_FILE), GARLIC_SUFFIX)
}

fn read_address_file(path: &Path, suffix: &str) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let address = contents.trim();
    if address.len() > suffix.len() && address.ends_with(suffix) {
        Some(address.to_string())
    } else {
        None
    }
}

/// Scan recent log lines for a token carrying the given address suffix.
///
/// Tokens are split on whitespace and stripped of surrounding punctuation so
/// that lines like `listening on "abc...xyz.onion:18084"` still match. The
/// newest matching line wins.
pub fn scan_log_for_address(lines: &[String], suffix: &str) -> Option<String> {
    lines.iter().rev().find_map(|line| {
        line.split_whitespace().find_map(|token| {
            let token = token.trim_matches(|c: char| "\"'()[]<>,;".contains(c));
            // Strip a trailing :port if one is attached to the address.
            let token = match token.rfind(suffix) {
                Some(pos) => &token[..pos + suffix.len()],
                None => return None,
            };
            if token.len() > suffix.len()
                && token[..token.len() - suffix.len()]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric())
            {
                Some(token.to_string())
            } else {
                None
            }
        })
    })
}

/// Poll for one proxy's address while it is Running and publish it into the
/// shared configuration.
///
/// Publication is write-once per run, where a run is identified by the
/// handle's start timestamp — a crash-and-restart between two polls is still
/// a run boundary, so the stale address is dropped and the new run gets a
/// fresh read. Runs until cancelled (abort the task handle); the daemon
/// service has no network-assigned address, so a watcher for it returns
/// immediately.
pub async fn run_watcher<R: ProcessRunner>(
    kind: ServiceKind,
    config: Arc<RwLock<Config>>,
    supervisor: Arc<Supervisor<R>>,
    interval: Duration,
) {
    if kind == ServiceKind::Daemon {
        return;
    }

    // Start timestamp of the run the current address was published for.
    let mut published_run: Option<DateTime<Utc>> = None;
    loop {
        tokio::time::sleep(interval).await;

        let snapshot = supervisor.snapshot(kind);
        match (snapshot.state, snapshot.started_at) {
            (ProcessState::Running, Some(started_at)) => {
                if published_run == Some(started_at) {
                    continue;
                }
                // A different run than the one we published for: drop the
                // stale address before reading the new one.
                if published_run.take().is_some() || clear_pending(&config, kind).await {
                    set_discovered(&config, kind, None).await;
                }
                if let Some(address) = discover(kind, &config, &supervisor).await {
                    info!("discovered {} address: {}", kind, address);
                    set_discovered(&config, kind, Some(address)).await;
                    published_run = Some(started_at);
                } else {
                    debug!("{} address not available yet", kind);
                }
            }
            _ => {
                if clear_pending(&config, kind).await {
                    set_discovered(&config, kind, None).await;
                }
                published_run = None;
            }
        }
    }
}

/// One discovery attempt: data-directory file first, log-buffer scan second.
async fn discover<R: ProcessRunner>(
    kind: ServiceKind,
    config: &Arc<RwLock<Config>>,
    supervisor: &Supervisor<R>,
) -> Option<String> {
    let (data_dir, suffix) = {
        let cfg = config.read().await;
        match kind {
            ServiceKind::OnionProxy => (cfg.onion.as_ref()?.data_dir.clone(), ONION_SUFFIX),
            ServiceKind::GarlicProxy => (cfg.garlic.as_ref()?.data_dir.clone(), GARLIC_SUFFIX),
            ServiceKind::Daemon => return None,
        }
    };

    let from_file = match kind {
        ServiceKind::OnionProxy => read_onion_address(Path::new(&data_dir)),
        ServiceKind::GarlicProxy => read_garlic_address(Path::new(&data_dir)),
        ServiceKind::Daemon => None,
    };

    from_file.or_else(|| scan_log_for_address(&supervisor.log_messages(kind), suffix))
}

async fn set_discovered(config: &Arc<RwLock<Config>>, kind: ServiceKind, address: Option<String>) {
    let mut cfg = config.write().await;
    match kind {
        ServiceKind::OnionProxy => {
            if let Some(onion) = cfg.onion.as_mut() {
                onion.discovered_address = address;
            }
        }
        ServiceKind::GarlicProxy => {
            if let Some(garlic) = cfg.garlic.as_mut() {
                garlic.discovered_address = address;
            }
        }
        ServiceKind::Daemon => {}
    }
}

/// Whether a previously published address is still recorded and must be
/// cleared now that the proxy is no longer Running.
async fn clear_pending(config: &Arc<RwLock<Config>>, kind: ServiceKind) -> bool {
    let cfg = config.read().await;
    match kind {
        ServiceKind::OnionProxy => cfg
            .onion
            .as_ref()
            .is_some_and(|o| o.discovered_address.is_some()),
        ServiceKind::GarlicProxy => cfg
            .garlic
            .as_ref()
            .is_some_and(|g| g.discovered_address.is_some()),
        ServiceKind::Daemon => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::error::Result;
    use crate::runner::ProcessRef;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    /// Runner whose processes idle until terminated or killed through the
    /// shared control block.
    struct StubShared {
        line_tx: Option<mpsc::UnboundedSender<String>>,
        exit_code: Option<i32>,
    }

    struct StubProc {
        shared: Arc<Mutex<StubShared>>,
        output: Option<mpsc::UnboundedReceiver<String>>,
    }

    impl ProcessRef for StubProc {
        fn id(&self) -> Option<u32> {
            Some(11)
        }

        fn terminate(&mut self) -> Result<()> {
            let mut shared = self.shared.lock().unwrap();
            if shared.exit_code.is_none() {
                shared.exit_code = Some(0);
            }
            shared.line_tx = None;
            Ok(())
        }

        fn poll_exit_status(&mut self) -> Result<Option<i32>> {
            Ok(self.shared.lock().unwrap().exit_code)
        }

        fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
            self.output.take()
        }
    }

    #[derive(Default)]
    struct StubRunner {
        procs: Arc<Mutex<Vec<Arc<Mutex<StubShared>>>>>,
    }

    impl ProcessRunner for StubRunner {
        async fn spawn(&self, _program: &Path, _args: &[String]) -> Result<Box<dyn ProcessRef>> {
            let (line_tx, output) = mpsc::unbounded_channel();
            let shared = Arc::new(Mutex::new(StubShared {
                line_tx: Some(line_tx),
                exit_code: None,
            }));
            self.procs.lock().unwrap().push(shared.clone());
            Ok(Box::new(StubProc {
                shared,
                output: Some(output),
            }))
        }
    }

    fn onion_config(data_dir: &Path) -> Config {
        let mut config = Config::with_all_features();
        config.onion.as_mut().unwrap().data_dir = data_dir.to_string_lossy().into_owned();
        config
    }

    async fn wait_for_onion_address(config: &Arc<RwLock<Config>>, expected: Option<&str>) {
        for _ in 0..300 {
            let current = config
                .read()
                .await
                .onion
                .as_ref()
                .unwrap()
                .discovered_address
                .clone();
            if current.as_deref() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("onion address never became {:?}", expected);
    }

    #[tokio::test]
    async fn watcher_publishes_once_while_running_and_clears_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(RwLock::new(onion_config(dir.path())));
        let supervisor = Arc::new(Supervisor::new(StubRunner::default()));

        let snapshot = config.read().await.clone();
        assert!(supervisor
            .start(ServiceKind::OnionProxy, &snapshot)
            .await
            .unwrap());
        let watcher = tokio::spawn(run_watcher(
            ServiceKind::OnionProxy,
            Arc::clone(&config),
            Arc::clone(&supervisor),
            Duration::from_millis(20),
        ));

        write_file(dir.path(), "hostname", "firstrun0001.onion\n");
        wait_for_onion_address(&config, Some("firstrun0001.onion")).await;

        // Same run: a changed hostname file must not be re-read.
        write_file(dir.path(), "hostname", "secondread02.onion\n");
        tokio::time::sleep(Duration::from_millis(100)).await;
        wait_for_onion_address(&config, Some("firstrun0001.onion")).await;

        supervisor.stop(ServiceKind::OnionProxy).unwrap();
        wait_for_onion_address(&config, None).await;
        watcher.abort();
    }

    #[tokio::test]
    async fn restart_between_polls_gets_a_fresh_address() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(RwLock::new(onion_config(dir.path())));
        let runner = StubRunner::default();
        let procs = Arc::clone(&runner.procs);
        let supervisor = Arc::new(Supervisor::new(runner));

        let snapshot = config.read().await.clone();
        supervisor
            .start(ServiceKind::OnionProxy, &snapshot)
            .await
            .unwrap();
        let watcher = tokio::spawn(run_watcher(
            ServiceKind::OnionProxy,
            Arc::clone(&config),
            Arc::clone(&supervisor),
            Duration::from_millis(50),
        ));

        write_file(dir.path(), "hostname", "oldrun000001.onion\n");
        wait_for_onion_address(&config, Some("oldrun000001.onion")).await;

        // Kill the proxy and restart it with a new identity; even when both
        // happen between two polls, the new run must get a fresh read.
        write_file(dir.path(), "hostname", "newrun000002.onion\n");
        {
            let shared = procs.lock().unwrap().last().unwrap().clone();
            let mut shared = shared.lock().unwrap();
            shared.exit_code = Some(1);
            shared.line_tx = None;
        }
        for _ in 0..300 {
            if supervisor.state(ServiceKind::OnionProxy) == ProcessState::Crashed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        supervisor
            .start(ServiceKind::OnionProxy, &snapshot)
            .await
            .unwrap();

        wait_for_onion_address(&config, Some("newrun000002.onion")).await;
        watcher.abort();
    }

    #[test]
    fn reads_onion_hostname_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "hostname",
            "vww6ybal4bd7szmgncyruucpgfkqahzddi37ktceo3ah7ngmcopnpyyd.onion\n",
        );
        assert_eq!(
            read_onion_address(dir.path()).unwrap(),
            "vww6ybal4bd7szmgncyruucpgfkqahzddi37ktceo3ah7ngmcopnpyyd.onion"
        );
    }

    #[test]
    fn missing_or_bogus_hostname_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_onion_address(dir.path()).is_none());
        write_file(dir.path(), "hostname", "not an address\n");
        assert!(read_onion_address(dir.path()).is_none());
        write_file(dir.path(), "hostname", ".onion\n");
        assert!(read_onion_address(dir.path()).is_none());
    }

    #[test]
    fn reads_garlic_destination_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "b32hostname.txt",
            "ukeu3k5oycgaauneqgtnvselmt4yemvoilkln7jpvamvfx7dnkdq.b32.i2p\n",
        );
        assert_eq!(
            read_garlic_address(dir.path()).unwrap(),
            "ukeu3k5oycgaauneqgtnvselmt4yemvoilkln7jpvamvfx7dnkdq.b32.i2p"
        );
    }

    #[test]
    fn log_scan_finds_onion_token() {
        let lines = vec![
            "bootstrapping 50%".to_string(),
            "service published at \"abcdefghij.onion:18084\"".to_string(),
        ];
        assert_eq!(
            scan_log_for_address(&lines, ".onion").unwrap(),
            "abcdefghij.onion"
        );
    }

    #[test]
    fn log_scan_prefers_newest_match() {
        let lines = vec![
            "old oldaddr.onion".to_string(),
            "new newaddr.onion".to_string(),
        ];
        assert_eq!(
            scan_log_for_address(&lines, ".onion").unwrap(),
            "newaddr.onion"
        );
    }

    #[tokio::test]
    async fn published_address_is_cleared_exactly_when_recorded() {
        let config = Arc::new(RwLock::new(Config::with_all_features()));

        set_discovered(&config, ServiceKind::OnionProxy, Some("x.onion".to_string())).await;
        assert_eq!(
            config.read().await.onion.as_ref().unwrap().discovered_address,
            Some("x.onion".to_string())
        );
        assert!(clear_pending(&config, ServiceKind::OnionProxy).await);

        set_discovered(&config, ServiceKind::OnionProxy, None).await;
        assert!(!clear_pending(&config, ServiceKind::OnionProxy).await);

        // Writes into a disabled feature group are no-ops.
        config.write().await.garlic = None;
        set_discovered(&config, ServiceKind::GarlicProxy, Some("y.b32.i2p".to_string())).await;
        assert!(!clear_pending(&config, ServiceKind::GarlicProxy).await);
    }

    #[test]
    fn log_scan_rejects_bare_suffix_and_odd_tokens() {
        let lines = vec![
            "mentioning .onion alone".to_string(),
            "path/with/slash.onion".to_string(),
        ];
        assert!(scan_log_for_address(&lines, ".onion").is_none());
        assert!(scan_log_for_address(&[], ".b32.i2p").is_none());
    }
}
