//! Local sandbox node supervision.
//!
//! A [`SandboxServer`] owns one `near-sandbox` process and its home
//! directory for the length of a test run:
//!
//! ```text
//! Uninitialized --init()--> Initializing --start()--> Running --close()--> Closed
//! ```
//!
//! A server is single use. Once closed, a new one is needed.
//!
//! # Example
//!
//! ```rust,no_run
//! use near_runner::sandbox::{SandboxConfig, SandboxServer};
//!
//! # async fn example() -> Result<(), near_runner::Error> {
//! let config = SandboxConfig::new(std::env::temp_dir().join("my-sandbox"));
//! let mut server = SandboxServer::new(config);
//! server.init().await?;
//! server.start().await?;
//! println!("RPC at {}", server.rpc_url().unwrap_or_default());
//! server.close().await?;
//! # Ok(())
//! # }
//! ```

mod binary;
mod port;

pub use binary::{BIN_PATH_ENV, DEFAULT_SANDBOX_VERSION, ensure_binary};
pub use port::{DEFAULT_PORT_RANGE, PortAllocator};

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::client::{RetryConfig, RpcClient, RpcProvider};
use crate::error::SandboxError;
use crate::types::Finality;

/// Default time allowed for the node to answer its first RPC request.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Time `close()` waits after SIGINT before killing the node.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Options for one sandbox node.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Node home directory (genesis, config, data, keys).
    pub home_dir: PathBuf,
    /// RPC port. Allocated when `None`.
    pub port: Option<u16>,
    /// Run `near-sandbox init`, replacing any existing home dir.
    pub init: bool,
    /// Keep the home dir after `close()`.
    pub keep_data: bool,
    /// Copy this home dir instead of running init (state forking).
    pub ref_dir: Option<PathBuf>,
    /// Binary to run instead of resolving one.
    pub binary_path: Option<PathBuf>,
    /// Release to install when no binary is given.
    pub version: String,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// Let the node write to this process's stdout/stderr.
    pub debug: bool,
}

impl SandboxConfig {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            port: None,
            init: true,
            keep_data: false,
            ref_dir: None,
            binary_path: None,
            version: DEFAULT_SANDBOX_VERSION.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            debug: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_init(mut self, init: bool) -> Self {
        self.init = init;
        self
    }

    pub fn with_keep_data(mut self, keep_data: bool) -> Self {
        self.keep_data = keep_data;
        self
    }

    pub fn with_ref_dir(mut self, ref_dir: impl Into<PathBuf>) -> Self {
        self.ref_dir = Some(ref_dir.into());
        self
    }

    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Lifecycle stage of a [`SandboxServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Uninitialized,
    /// Home dir prepared; the node is not running yet.
    Initializing,
    Running,
    Closed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxState::Uninitialized => write!(f, "uninitialized"),
            SandboxState::Initializing => write!(f, "initializing"),
            SandboxState::Running => write!(f, "running"),
            SandboxState::Closed => write!(f, "closed"),
        }
    }
}

// ============================================================================
// NodeProcess
// ============================================================================

/// A spawned node, waited on by a background task.
///
/// Dropping the handle kills the process.
struct NodeProcess {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<String>>,
}

impl NodeProcess {
    fn watch(mut child: Child, port: u16, ready_to_die: Arc<AtomicBool>) -> Self {
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                // Fires on an explicit kill and when the handle is dropped.
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let status = match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            if ready_to_die.load(Ordering::SeqCst) {
                debug!(port, %status, "Sandbox exited");
            } else {
                warn!(port, %status, "Sandbox exited unexpectedly");
            }
            let _ = exit_tx.send(Some(status));
        });

        Self {
            pid,
            kill: Some(kill_tx),
            exit: exit_rx,
        }
    }

    /// Exit status, if the process has exited.
    fn exit_status(&self) -> Option<String> {
        self.exit.borrow().clone()
    }

    async fn exited(&mut self) -> String {
        match self.exit.wait_for(Option::is_some).await {
            Ok(status) => status.clone().unwrap_or_default(),
            Err(_) => "unknown".to_string(),
        }
    }

    /// Ask the node to shut down.
    #[cfg(unix)]
    fn interrupt(&self) {
        if let Some(pid) = self.pid {
            // SAFETY: plain signal delivery to a child this handle owns.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGINT);
            }
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) {}

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

// ============================================================================
// SandboxServer
// ============================================================================

/// Supervisor for one local sandbox node.
pub struct SandboxServer {
    config: SandboxConfig,
    ports: Arc<PortAllocator>,
    state: SandboxState,
    binary: Option<PathBuf>,
    port: Option<u16>,
    process: Option<NodeProcess>,
    ready_to_die: Arc<AtomicBool>,
}

impl SandboxServer {
    /// A server using the process-wide [`PortAllocator`].
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_port_allocator(config, PortAllocator::shared())
    }

    pub fn with_port_allocator(config: SandboxConfig, ports: Arc<PortAllocator>) -> Self {
        Self {
            config,
            ports,
            state: SandboxState::Uninitialized,
            binary: None,
            port: None,
            process: None,
            ready_to_die: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn home_dir(&self) -> &Path {
        &self.config.home_dir
    }

    /// RPC port, once started.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// RPC endpoint, once started.
    pub fn rpc_url(&self) -> Option<String> {
        self.port.map(|port| format!("http://127.0.0.1:{port}"))
    }

    fn require(&self, expected: SandboxState, operation: &'static str) -> Result<(), SandboxError> {
        if self.state != expected {
            return Err(SandboxError::InvalidState {
                operation,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Prepare the home directory.
    ///
    /// With a `ref_dir` the home dir becomes a copy of it. Otherwise, when
    /// `init` is set, any existing home dir is removed and `near-sandbox
    /// init` writes a fresh genesis and `validator_key.json`.
    pub async fn init(&mut self) -> Result<(), SandboxError> {
        self.require(SandboxState::Uninitialized, "init")?;
        self.state = SandboxState::Initializing;

        let binary =
            ensure_binary(self.config.binary_path.as_deref(), &self.config.version).await?;
        let home = self.config.home_dir.clone();

        if let Some(ref_dir) = &self.config.ref_dir {
            remove_dir_if_exists(&home).await?;
            copy_dir(ref_dir, &home).await?;
            debug!(from = %ref_dir.display(), to = %home.display(), "Forked sandbox home");
        } else if self.config.init {
            remove_dir_if_exists(&home).await?;
            run_init(&binary, &home).await?;
        }

        self.binary = Some(binary);
        Ok(())
    }

    /// Spawn the node and wait until it answers RPC requests.
    pub async fn start(&mut self) -> Result<(), SandboxError> {
        self.require(SandboxState::Initializing, "start")?;
        let binary = self
            .binary
            .clone()
            .ok_or_else(|| SandboxError::InvalidState {
                operation: "start",
                state: "without a binary".to_string(),
            })?;

        let port = match self.config.port {
            Some(port) => port,
            None => self.ports.next_port()?,
        };
        let network_port = self.ports.next_port()?;

        let mut command = Command::new(&binary);
        command
            .arg("--home")
            .arg(&self.config.home_dir)
            .arg("run")
            .arg("--rpc-addr")
            .arg(format!("0.0.0.0:{port}"))
            .arg("--network-addr")
            .arg(format!("0.0.0.0:{network_port}"))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.config.debug {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let started = Instant::now();
        let child = command.spawn().map_err(|source| SandboxError::Spawn {
            command: format!("{} run", binary.display()),
            source,
        })?;
        debug!(port, network_port, pid = ?child.id(), "Spawned sandbox");

        self.ready_to_die.store(false, Ordering::SeqCst);
        self.process = Some(NodeProcess::watch(child, port, self.ready_to_die.clone()));
        self.port = Some(port);
        self.state = SandboxState::Running;

        if let Err(e) = self.wait_until_ready(port).await {
            if let Err(close_err) = self.close().await {
                warn!(port, error = %close_err, "Failed to clean up sandbox after startup failure");
            }
            return Err(e);
        }

        info!(
            port,
            home = %self.config.home_dir.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox started"
        );
        Ok(())
    }

    /// Poll the latest block until it is served, the node exits, or the
    /// startup timeout passes.
    async fn wait_until_ready(&self, port: u16) -> Result<(), SandboxError> {
        let rpc = RpcClient::with_retry_config(format!("http://127.0.0.1:{port}"), RetryConfig::none());
        let timeout = self.config.startup_timeout;
        let check_timeout = self.config.poll_interval.max(Duration::from_secs(1));
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(status) = self.process.as_ref().and_then(NodeProcess::exit_status) {
                return Err(SandboxError::ExitedDuringStartup { port, status });
            }
            if let Ok(Ok(_)) = tokio::time::timeout(check_timeout, rpc.block(Finality::Final)).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SandboxError::StartupTimeout { port, timeout });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Stop the node and, unless `keep_data` is set, delete the home dir.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), SandboxError> {
        if self.state == SandboxState::Closed {
            return Ok(());
        }
        self.ready_to_die.store(true, Ordering::SeqCst);

        if let Some(mut process) = self.process.take() {
            process.interrupt();
            let status = match tokio::time::timeout(SHUTDOWN_GRACE, process.exited()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(port = ?self.port, "Sandbox ignored SIGINT, killing it");
                    process.kill();
                    process.exited().await
                }
            };
            debug!(port = ?self.port, %status, "Sandbox stopped");
        }

        let was = self.state;
        self.state = SandboxState::Closed;
        if !self.config.keep_data && was != SandboxState::Uninitialized {
            remove_dir_if_exists(&self.config.home_dir).await?;
        }
        info!(port = ?self.port, home = %self.config.home_dir.display(), "Sandbox closed");
        Ok(())
    }
}

impl Drop for SandboxServer {
    fn drop(&mut self) {
        if self.process.is_some() {
            self.ready_to_die.store(true, Ordering::SeqCst);
            debug!(port = ?self.port, "Killing sandbox on drop");
        }
        // Dropping the process handle signals the watcher to kill the node.
        self.process.take();
    }
}

impl fmt::Debug for SandboxServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxServer")
            .field("home_dir", &self.config.home_dir)
            .field("state", &self.state)
            .field("port", &self.port)
            .finish()
    }
}

// ============================================================================
// Filesystem helpers
// ============================================================================

async fn run_init(binary: &Path, home: &Path) -> Result<(), SandboxError> {
    let output = Command::new(binary)
        .arg("--home")
        .arg(home)
        .arg("init")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| SandboxError::Spawn {
            command: format!("{} init", binary.display()),
            source,
        })?;

    if !output.status.success() {
        return Err(SandboxError::InitFailed {
            home_dir: home.to_path_buf(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    debug!(home = %home.display(), "Initialized sandbox home");
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), SandboxError> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Recursively copy `from` into a new directory `to`.
async fn copy_dir(from: &Path, to: &Path) -> Result<(), SandboxError> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}
