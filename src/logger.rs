//! Logging infrastructure for anonode-rs.
//!
//! Built on the tracing ecosystem with output to stdout, a file, or syslog.
//! The configured [`LogLevel`] maps onto a tracing `EnvFilter`, and `RUST_LOG`
//! can override it.
//!
//! Note that this module is about the launcher's OWN log output. The captured
//! stdout/stderr of the supervised services lives in the per-service bounded
//! buffers owned by the [supervisor](crate::supervisor).
//!
//! # Example
//!
//! ```rust,no_run
//! use anonode_rs::{logger, LogLevel};
//!
//! logger::init(LogLevel::Notice, None).unwrap();
//! logger::plog(LogLevel::Notice, "daemon started");
//! ```

use std::io::Write;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;
use crate::error::{Error, Result};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the logging system.
///
/// Call once at startup; subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum log level to output
/// * `logfile` - `None` for stdout, `Some(":syslog:")` for syslog, or a file
///   path (appended, no ANSI colors)
///
/// # Errors
///
/// Returns [`Error::Io`] if the log file cannot be opened or no syslog socket
/// exists, and [`Error::Config`] if a global subscriber is already set.
pub fn init(level: LogLevel, logfile: Option<&str>) -> Result<()> {
    if LOGGER_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = match level {
        LogLevel::Debug => "debug",
        LogLevel::Info | LogLevel::Notice => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match logfile {
        None => set_subscriber(env_filter, true, std::io::stdout)?,
        Some(":syslog:") => set_subscriber(env_filter, false, syslog_writer()?)?,
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            set_subscriber(env_filter, false, Mutex::new(file))?;
        }
    }

    LOGGER_INITIALIZED.get_or_init(|| ());
    Ok(())
}

/// Install the global subscriber with the crate's shared formatting options.
fn set_subscriber<W>(env_filter: EnvFilter, ansi: bool, writer: W) -> Result<()>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(ansi)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))
}

/// Datagram writer for the system log, tagged with the program name.
///
/// Connected once at init; each formatted record goes out as one datagram.
#[derive(Clone)]
struct SyslogWriter {
    socket: Arc<UnixDatagram>,
}

fn syslog_writer() -> Result<SyslogWriter> {
    let syslog_path = if Path::new("/dev/log").exists() {
        "/dev/log"
    } else if Path::new("/var/run/syslog").exists() {
        "/var/run/syslog"
    } else {
        return Err(Error::Config("no syslog socket found".to_string()));
    };

    let socket = UnixDatagram::unbound()?;
    socket.connect(syslog_path)?;
    Ok(SyslogWriter {
        socket: Arc::new(socket),
    })
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = format!("anonode: {}", String::from_utf8_lossy(buf));
        self.socket.send(msg.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Log a message at the specified level.
///
/// Notice maps to `info!` since tracing has no notice level.
pub fn plog(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!("{}", message),
        LogLevel::Info | LogLevel::Notice => info!("{}", message),
        LogLevel::Warn => warn!("{}", message),
        LogLevel::Error => error!("{}", message),
    }
}

/// Log a formatted message at the specified level.
///
/// # Example
///
/// ```rust
/// use anonode_rs::{plog_fmt, LogLevel};
///
/// plog_fmt!(LogLevel::Notice, "rpc listening on port {}", 18081);
/// ```
#[macro_export]
macro_rules! plog_fmt {
    ($level:expr, $($arg:tt)*) => {
        $crate::logger::plog($level, &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syslog_writer_prefixes_the_program_name() {
        let (ours, theirs) = UnixDatagram::pair().unwrap();
        let mut writer = SyslogWriter {
            socket: Arc::new(ours),
        };
        writer.write_all(b"daemon started").unwrap();

        let mut buf = [0u8; 64];
        let n = theirs.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"anonode: daemon started");
    }

    #[test]
    fn init_is_idempotent() {
        init(LogLevel::Notice, None).unwrap();
        init(LogLevel::Debug, None).unwrap();
    }
}
