//! Process setup done before the loop starts: daemonization, logging and
//! realtime scheduling.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),

    #[error("setsid failed: {0}")]
    Session(#[source] io::Error),

    #[error("failed to detach stdio: {0}")]
    Stdio(#[source] io::Error),

    #[error("SCHED_FIFO priority {priority} unavailable: {source}")]
    Realtime {
        priority: i32,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("logging already initialized: {0}")]
    Logging(String),
}

enum Forked {
    Parent,
    Child,
}

fn fork() -> Result<Forked, StartupError> {
    // SAFETY: called before any thread is spawned, so the child inherits a
    // consistent single-threaded process.
    match unsafe { libc::fork() } {
        -1 => Err(StartupError::Fork(io::Error::last_os_error())),
        0 => Ok(Forked::Child),
        _ => Ok(Forked::Parent),
    }
}

/// Detach from the terminal with the classic double fork.
///
/// Parents exit with success. Must run before logging and before any thread
/// exists. Standard streams are pointed at `/dev/null`.
pub fn daemonize() -> Result<(), StartupError> {
    if let Forked::Parent = fork()? {
        std::process::exit(0);
    }

    // SAFETY: plain syscalls without pointer arguments.
    unsafe {
        libc::umask(0);
    }
    if unsafe { libc::setsid() } < 0 {
        return Err(StartupError::Session(io::Error::last_os_error()));
    }

    if let Forked::Parent = fork()? {
        std::process::exit(0);
    }

    redirect_stdio()
}

fn redirect_stdio() -> Result<(), StartupError> {
    use std::os::fd::AsRawFd;

    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(StartupError::Stdio)?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
            return Err(StartupError::Stdio(io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Request `SCHED_FIFO` at `priority` for the whole process. Threads spawned
/// afterwards (the output pump) inherit it.
pub fn request_realtime_priority(priority: i32) -> Result<(), StartupError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param that outlives the call.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(StartupError::Realtime {
            priority,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Install the global subscriber. `filter` uses `EnvFilter` syntax; an
/// unparsable filter falls back to `info`.
pub fn init_logging(filter: &str, log_file: Option<&Path>) -> Result<(), StartupError> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| StartupError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()
        }
        None => registry.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| StartupError::Logging(e.to_string()))
}
