//! Multi-process lifecycle supervision.
//!
//! The supervisor owns one state machine per supervised service and is the
//! only component allowed to transition it. Processes are spawned through the
//! [`ProcessRunner`](crate::runner::ProcessRunner) collaborator with command
//! lines produced by the [invocation compiler](crate::invocation); their
//! merged stdout/stderr is ingested into a bounded per-service log buffer.
//!
//! # State machine
//!
//! ```text
//!             start                spawn confirmed
//!   Stopped ─────────▶ Starting ──────────────────▶ Running
//!      ▲                  │                            │
//!      │             spawn failed          stop        │   unexpected exit
//!      │◀─────────────────┘            ┌───────────────┤
//!      │                               ▼               ▼
//!      │        exit confirmed      Stopping        Crashed
//!      └───────────────────────────────┘               │
//!      ▲                                               │
//!      └────────────────── explicit start ─────────────┘
//! ```
//!
//! - `start` is a no-op (not an error) when the service is already Starting,
//!   Running, or Stopping; in particular, stopping a service that has not yet
//!   reached Running leaves it Starting.
//! - `stop` is a no-op unless the service is Running.
//! - Crashed is terminal until an explicit `start`; there is no auto-restart.
//! - `restart` is defined only for the daemon service: stop, wait for Stopped
//!   (bounded), then start. A failing follow-up start is reported, never
//!   silently retried.
//!
//! Every transition and captured log line is observable through
//! [`Supervisor::subscribe`]. No transition is fatal to the supervisor: a
//! crashed proxy leaves the daemon in whatever state it was in.
//!
//! # Log buffers
//!
//! Each service owns a ring buffer of the most recent
//! [`DEFAULT_LOG_CAPACITY`] lines, oldest evicted first. Line order within
//! one service's buffer preserves emission order; nothing is guaranteed
//! across services. The buffer survives a stop for inspection; only the
//! process-specific fields (pid, start time, process handle) are reset.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::invocation::{compile, ServiceKind};
use crate::runner::{ProcessRef, ProcessRunner};

/// Default bounded log buffer capacity, in lines.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// How long a restart waits for the daemon to reach Stopped.
const RESTART_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for an exit code or a stop to complete.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bounded number of exit-status polls after output EOF.
const EXIT_POLL_ATTEMPTS: u32 = 100;

/// Lifecycle state of one supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not running; the initial and post-stop state.
    Stopped,
    /// A start was requested; the spawn is not yet confirmed.
    Starting,
    /// The process is alive and its output is being ingested.
    Running,
    /// A stop was requested; termination is not yet confirmed.
    Stopping,
    /// The process exited unexpectedly. Terminal until an explicit start.
    Crashed,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Crashed => write!(f, "crashed"),
        }
    }
}

/// One timestamped captured log line.
#[derive(Debug, Clone)]
pub struct LogLine {
    /// Arrival time.
    pub timestamp: DateTime<Utc>,
    /// Line content, without the trailing newline.
    pub message: String,
}

impl LogLine {
    fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// Formats the line for display.
    pub fn format(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Events observable through [`Supervisor::subscribe`].
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A service changed lifecycle state.
    StateChanged {
        /// The service that transitioned.
        service: ServiceKind,
        /// Its new state.
        state: ProcessState,
    },
    /// A line was appended to a service's log buffer.
    LogLine {
        /// The service that produced the line.
        service: ServiceKind,
        /// The line content.
        line: String,
    },
}

/// Point-in-time view of one service's handle.
#[derive(Debug, Clone)]
pub struct HandleSnapshot {
    /// Current lifecycle state.
    pub state: ProcessState,
    /// When the current run started, if one is active.
    pub started_at: Option<DateTime<Utc>>,
    /// Last known exit code, if stopped or crashed.
    pub exit_code: Option<i32>,
    /// OS process id of the current run.
    pub pid: Option<u32>,
}

/// The supervisor's live record for one service.
struct ProcessHandle {
    state: ProcessState,
    log: VecDeque<LogLine>,
    log_capacity: usize,
    started_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    pid: Option<u32>,
    proc: Option<Box<dyn ProcessRef>>,
}

impl ProcessHandle {
    fn new(log_capacity: usize) -> Self {
        Self {
            state: ProcessState::Stopped,
            log: VecDeque::new(),
            log_capacity,
            started_at: None,
            exit_code: None,
            pid: None,
            proc: None,
        }
    }

    fn push_log(&mut self, message: impl Into<String>) {
        self.log.push_back(LogLine::new(message));
        while self.log.len() > self.log_capacity {
            self.log.pop_front();
        }
    }

    /// Reset the process-specific fields after a confirmed stop. The log
    /// buffer is retained for inspection.
    fn clear_run_fields(&mut self) {
        self.proc = None;
        self.pid = None;
        self.started_at = None;
    }

    fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            state: self.state,
            started_at: self.started_at,
            exit_code: self.exit_code,
            pid: self.pid,
        }
    }
}

type Slot = Arc<Mutex<ProcessHandle>>;

/// One slot per supervised service.
struct Slots {
    daemon: Slot,
    onion: Slot,
    garlic: Slot,
}

impl Slots {
    fn new(log_capacity: usize) -> Self {
        let slot = || Arc::new(Mutex::new(ProcessHandle::new(log_capacity)));
        Self {
            daemon: slot(),
            onion: slot(),
            garlic: slot(),
        }
    }

    fn get(&self, kind: ServiceKind) -> &Slot {
        match kind {
            ServiceKind::Daemon => &self.daemon,
            ServiceKind::OnionProxy => &self.onion,
            ServiceKind::GarlicProxy => &self.garlic,
        }
    }
}

/// Owns and drives the three per-service state machines.
///
/// All methods take `&self`; the supervisor is shared behind an `Arc` between
/// the caller, the log-ingestion tasks, and any subscribers.
pub struct Supervisor<R: ProcessRunner> {
    runner: R,
    slots: Slots,
    events: broadcast::Sender<SupervisorEvent>,
}

impl<R: ProcessRunner> Supervisor<R> {
    /// Create a supervisor with the default log buffer capacity.
    pub fn new(runner: R) -> Self {
        Self::with_log_capacity(runner, DEFAULT_LOG_CAPACITY)
    }

    /// Create a supervisor with a custom per-service log buffer capacity.
    pub fn with_log_capacity(runner: R, log_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            runner,
            slots: Slots::new(log_capacity),
            events,
        }
    }

    fn slot(&self, kind: ServiceKind) -> &Slot {
        self.slots.get(kind)
    }

    /// Subscribe to state and log events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Current state of one service.
    pub fn state(&self, kind: ServiceKind) -> ProcessState {
        self.slot(kind).lock().unwrap().state
    }

    /// Snapshot of one service's handle.
    pub fn snapshot(&self, kind: ServiceKind) -> HandleSnapshot {
        self.slot(kind).lock().unwrap().snapshot()
    }

    /// Formatted copy of one service's log buffer, oldest first.
    pub fn log_lines(&self, kind: ServiceKind) -> Vec<String> {
        self.slot(kind)
            .lock()
            .unwrap()
            .log
            .iter()
            .map(LogLine::format)
            .collect()
    }

    /// Raw copy of one service's buffered log messages, oldest first.
    pub fn log_messages(&self, kind: ServiceKind) -> Vec<String> {
        self.slot(kind)
            .lock()
            .unwrap()
            .log
            .iter()
            .map(|l| l.message.clone())
            .collect()
    }

    fn emit_state(&self, kind: ServiceKind, state: ProcessState) {
        let _ = self.events.send(SupervisorEvent::StateChanged {
            service: kind,
            state,
        });
    }

    fn append_log(&self, kind: ServiceKind, message: impl Into<String>) {
        let message = message.into();
        self.slot(kind).lock().unwrap().push_log(message.clone());
        let _ = self.events.send(SupervisorEvent::LogLine {
            service: kind,
            line: message,
        });
    }

    /// Start one service from a configuration snapshot.
    ///
    /// Returns `Ok(false)` without touching anything when the service is
    /// already Starting, Running, or Stopping, and `Ok(true)` once the spawn
    /// is confirmed and the service is Running.
    ///
    /// # Errors
    ///
    /// [`Error::Compile`] when the snapshot cannot produce an invocation for
    /// this service; [`Error::Process`] when the spawn fails. Either way the
    /// service ends Stopped, never in an ambiguous state.
    pub async fn start(&self, kind: ServiceKind, config: &Config) -> Result<bool> {
        {
            let mut handle = self.slot(kind).lock().unwrap();
            match handle.state {
                ProcessState::Starting | ProcessState::Running | ProcessState::Stopping => {
                    return Ok(false);
                }
                ProcessState::Stopped | ProcessState::Crashed => {}
            }
            handle.state = ProcessState::Starting;
            handle.exit_code = None;
        }
        self.emit_state(kind, ProcessState::Starting);
        self.append_log(kind, format!("starting {} service", kind));

        let invocation = match compile(config, kind) {
            Ok(invocation) => invocation,
            Err(e) => {
                self.append_log(kind, format!("cannot start {}: {}", kind, e));
                self.slot(kind).lock().unwrap().state = ProcessState::Stopped;
                self.emit_state(kind, ProcessState::Stopped);
                return Err(e);
            }
        };

        match self.runner.spawn(&invocation.program, &invocation.args).await {
            Ok(mut proc) => {
                let output = proc.take_output();
                let pid = proc.id();
                {
                    let mut handle = self.slot(kind).lock().unwrap();
                    handle.pid = pid;
                    handle.started_at = Some(Utc::now());
                    handle.proc = Some(proc);
                    handle.state = ProcessState::Running;
                }
                self.emit_state(kind, ProcessState::Running);
                self.append_log(
                    kind,
                    format!(
                        "{} running (pid {})",
                        kind,
                        pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
                    ),
                );

                match output {
                    Some(rx) => {
                        let slot = Arc::clone(self.slot(kind));
                        let events = self.events.clone();
                        tokio::spawn(ingest(kind, slot, rx, events));
                    }
                    None => {
                        warn!("no output stream for {}; exit detection disabled", kind);
                    }
                }
                Ok(true)
            }
            Err(e) => {
                let message = format!("failed to start {}: {}", kind, e);
                self.append_log(kind, message.clone());
                self.slot(kind).lock().unwrap().state = ProcessState::Stopped;
                self.emit_state(kind, ProcessState::Stopped);
                Err(Error::Process(message))
            }
        }
    }

    /// Request one service to stop.
    ///
    /// Returns `Ok(false)` when the service is not Running — in particular,
    /// a service still Starting is left Starting. The transition to Stopped
    /// happens once the runner confirms the exit; observe it through
    /// [`subscribe`](Self::subscribe) or [`state`](Self::state).
    ///
    /// # Errors
    ///
    /// [`Error::Process`] when the termination signal cannot be delivered;
    /// the service stays Running in that case.
    pub fn stop(&self, kind: ServiceKind) -> Result<bool> {
        {
            let mut handle = self.slot(kind).lock().unwrap();
            if handle.state != ProcessState::Running {
                return Ok(false);
            }
            handle.state = ProcessState::Stopping;
            if let Some(proc) = handle.proc.as_mut() {
                if let Err(e) = proc.terminate() {
                    handle.state = ProcessState::Running;
                    return Err(Error::Process(format!("failed to stop {}: {}", kind, e)));
                }
            }
        }
        self.emit_state(kind, ProcessState::Stopping);
        self.append_log(kind, format!("stopping {} service", kind));
        Ok(true)
    }

    /// Restart the daemon service: stop, wait for Stopped, start again.
    ///
    /// Defined only for [`ServiceKind::Daemon`]. There is no fixed delay
    /// guarantee beyond "after stop completes"; if the old process holds its
    /// listening ports too long the follow-up start may fail, and that
    /// failure is reported rather than retried.
    ///
    /// # Errors
    ///
    /// [`Error::Process`] for non-daemon services, when the stop does not
    /// complete within a bounded wait, or when the follow-up start fails.
    pub async fn restart(&self, kind: ServiceKind, config: &Config) -> Result<()> {
        if kind != ServiceKind::Daemon {
            return Err(Error::Process(
                "restart is only defined for the daemon service".to_string(),
            ));
        }

        if self.stop(kind)? {
            let mut waited = Duration::ZERO;
            while self.state(kind) != ProcessState::Stopped {
                if waited >= RESTART_STOP_TIMEOUT {
                    return Err(Error::Process(format!(
                        "{} did not stop within {:?}",
                        kind, RESTART_STOP_TIMEOUT
                    )));
                }
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                waited += EXIT_POLL_INTERVAL;
            }
        }

        self.start(kind, config).await?;
        Ok(())
    }

    /// Stop every service that is currently Running.
    pub fn stop_all(&self) {
        for kind in ServiceKind::ALL {
            if let Err(e) = self.stop(kind) {
                warn!("{}", e);
            }
        }
    }
}

/// Consume a service's output stream into its log buffer, then resolve the
/// final state once the stream closes.
async fn ingest(
    kind: ServiceKind,
    slot: Slot,
    mut rx: mpsc::UnboundedReceiver<String>,
    events: broadcast::Sender<SupervisorEvent>,
) {
    while let Some(line) = rx.recv().await {
        slot.lock().unwrap().push_log(line.clone());
        let _ = events.send(SupervisorEvent::LogLine {
            service: kind,
            line,
        });
    }

    // Output EOF: the process is gone either because we asked it to stop or
    // because it died. The exit status may trail the EOF slightly.
    let exit_code = wait_exit_code(&slot).await;

    let final_state = {
        let mut handle = slot.lock().unwrap();
        match handle.state {
            ProcessState::Stopping => {
                handle.exit_code = exit_code;
                handle.push_log(format!("{} service stopped", kind));
                handle.clear_run_fields();
                handle.state = ProcessState::Stopped;
                Some(ProcessState::Stopped)
            }
            ProcessState::Running => {
                handle.exit_code = exit_code;
                handle.push_log(format!(
                    "{} exited unexpectedly (exit code {})",
                    kind,
                    exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                ));
                handle.proc = None;
                handle.pid = None;
                handle.state = ProcessState::Crashed;
                Some(ProcessState::Crashed)
            }
            // Stopped/Starting/Crashed: the slot was already resolved (e.g.
            // an explicit start recovered a crash before we got here).
            _ => None,
        }
    };

    if let Some(state) = final_state {
        let _ = events.send(SupervisorEvent::StateChanged {
            service: kind,
            state,
        });
    }
}

/// Poll the exit status for a bounded time after output EOF.
async fn wait_exit_code(slot: &Slot) -> Option<i32> {
    for _ in 0..EXIT_POLL_ATTEMPTS {
        {
            let mut handle = slot.lock().unwrap();
            match handle.proc.as_mut() {
                Some(proc) => match proc.poll_exit_status() {
                    Ok(Some(code)) => return Some(code),
                    Ok(None) => {}
                    Err(_) => return None,
                },
                None => return None,
            }
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    None
}
