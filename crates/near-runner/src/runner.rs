//! Test orchestration.
//!
//! A [`Runner`] prepares accounts once with an init closure and then hands a
//! fresh [`Workspace`] to every test body passed to [`Runner::run`].
//!
//! On a sandbox the init closure runs once against a parent node. Each run
//! starts a child node from a copy of the parent's home dir, so every test
//! sees the post-init state and nothing else. On testnet there is no state to
//! fork: init runs before every test and the accounts it creates are deleted
//! afterwards.
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use near_runner::*;
//!
//! # async fn example(wasm: Vec<u8>) -> Result<(), Error> {
//! let runner = Runner::builder()
//!     .config(Config::from_env()?)
//!     .init(move |ws| {
//!         let wasm = wasm.clone();
//!         async move {
//!             let contract = ws
//!                 .root()
//!                 .create_and_deploy("counter", wasm, Default::default(), Default::default())
//!                 .await?;
//!             let alice = ws.root().create_sub_account("alice", Default::default()).await?;
//!             Ok(BTreeMap::from([
//!                 ("contract".to_string(), contract),
//!                 ("alice".to_string(), alice),
//!             ]))
//!         }
//!     })
//!     .build();
//!
//! runner
//!     .run(|ws| async move {
//!         let contract = ws.account("contract").unwrap();
//!         ws.account("alice").unwrap().call(contract.account_id(), "increment").await?;
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use tracing::{Instrument, info, info_span, warn};

use crate::account::Account;
use crate::client::{RpcClient, RpcProvider};
use crate::config::Config;
use crate::error::Error;
use crate::manager::{AccountManager, SandboxBackend, TestnetBackend};
use crate::sandbox::SandboxServer;
use crate::types::{AccountId, Network};

/// Named accounts produced by an init closure.
pub type Accounts = BTreeMap<String, Account>;

type InitFn = Arc<dyn Fn(Workspace) -> BoxFuture<'static, Result<Accounts, Error>> + Send + Sync>;

// ============================================================================
// RunCounter
// ============================================================================

/// Numbers runs, starting at 1.
#[derive(Debug, Default)]
pub struct RunCounter(AtomicU64);

impl RunCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Claim the next run number.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of runs claimed so far.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// What a test body gets: the root account and the named accounts from init,
/// all bound to the manager of the current run.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: Account,
    accounts: Accounts,
    run: u64,
}

impl Workspace {
    pub fn root(&self) -> &Account {
        &self.root
    }

    /// A named account from init.
    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn manager(&self) -> &Arc<AccountManager> {
        self.root.manager()
    }

    pub fn network(&self) -> Network {
        self.manager().network()
    }

    /// Number of this run, 0 during init on a sandbox.
    pub fn run_number(&self) -> u64 {
        self.run
    }
}

// ============================================================================
// RunnerBuilder
// ============================================================================

/// Builder for [`Runner`].
#[derive(Default)]
pub struct RunnerBuilder {
    config: Option<Config>,
    init: Option<InitFn>,
    counter: Option<Arc<RunCounter>>,
    rpc: Option<Arc<dyn RpcProvider>>,
}

impl RunnerBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Account setup shared by every run.
    pub fn init<F, Fut>(mut self, init: F) -> Self
    where
        F: Fn(Workspace) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Accounts, Error>> + Send + 'static,
    {
        self.init = Some(Arc::new(
            move |ws| -> BoxFuture<'static, Result<Accounts, Error>> { Box::pin(init(ws)) },
        ));
        self
    }

    /// Share run numbering with other runners.
    pub fn counter(mut self, counter: Arc<RunCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// RPC provider for testnet runs instead of `config.rpc_url`.
    pub fn rpc(mut self, rpc: Arc<dyn RpcProvider>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn build(self) -> Runner {
        let init = self.init.unwrap_or_else(|| {
            Arc::new(|_| -> BoxFuture<'static, Result<Accounts, Error>> {
                Box::pin(async { Ok(Accounts::new()) })
            })
        });
        Runner {
            config: self.config.unwrap_or_default(),
            init,
            counter: self.counter.unwrap_or_default(),
            rpc: self.rpc,
            tag: format!("{}-{:08x}", std::process::id(), rand::random::<u32>()),
            parent: OnceCell::new(),
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// State left behind by the parent sandbox.
#[derive(Debug)]
struct ParentState {
    home_dir: PathBuf,
    accounts: BTreeMap<String, AccountId>,
}

/// Runs test bodies against prepared accounts.
pub struct Runner {
    config: Config,
    init: InitFn,
    counter: Arc<RunCounter>,
    rpc: Option<Arc<dyn RpcProvider>>,
    /// Prefix for this runner's sandbox home dirs.
    tag: String,
    parent: OnceCell<ParentState>,
}

impl Runner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn counter(&self) -> &Arc<RunCounter> {
        &self.counter
    }

    /// Run `body` with a fresh workspace.
    ///
    /// The body's error wins over teardown errors, which are logged.
    pub async fn run<F, Fut, T>(&self, body: F) -> Result<T, Error>
    where
        F: FnOnce(Workspace) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let run = self.counter.next();
        let span = info_span!("run", run, network = %self.config.network);
        match self.config.network {
            Network::Sandbox => self.run_sandboxed(run, body).instrument(span).await,
            Network::Testnet => self.run_on_testnet(run, body).instrument(span).await,
        }
    }

    /// Like [`run`](Self::run), but only on a sandbox. Returns `None` on
    /// other networks without calling `body`.
    pub async fn run_sandbox<F, Fut, T>(&self, body: F) -> Option<Result<T, Error>>
    where
        F: FnOnce(Workspace) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if !self.config.network.is_sandbox() {
            return None;
        }
        Some(self.run(body).await)
    }

    async fn run_sandboxed<F, Fut, T>(&self, run: u64, body: F) -> Result<T, Error>
    where
        F: FnOnce(Workspace) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let parent = self
            .parent
            .get_or_try_init(|| self.init_parent())
            .await?;

        let config = self
            .config
            .sandbox_config(&format!("{}-{run}", self.tag))
            .with_ref_dir(&parent.home_dir);
        let mut server = SandboxServer::with_port_allocator(config, self.config.ports.clone());
        launch(&mut server).await?;

        let result = async {
            let manager = self.connect_sandbox(&server).await?;
            let accounts = parent
                .accounts
                .iter()
                .map(|(name, id)| (name.clone(), manager.get_account(id.clone())))
                .collect();
            let ws = Workspace {
                root: manager.root(),
                accounts,
                run,
            };
            body(ws).await
        }
        .await;

        if let Err(e) = server.close().await {
            warn!(error = %e, "Failed to close sandbox");
        }
        result
    }

    /// Start the parent sandbox, run init against it, and stop it with its
    /// home dir kept for forking.
    async fn init_parent(&self) -> Result<ParentState, Error> {
        let config = self
            .config
            .sandbox_config(&format!("{}-parent", self.tag))
            .with_keep_data(true);
        let mut server = SandboxServer::with_port_allocator(config, self.config.ports.clone());
        launch(&mut server).await?;

        let init = async {
            let manager = self.connect_sandbox(&server).await?;
            let ws = Workspace {
                root: manager.root(),
                accounts: Accounts::new(),
                run: 0,
            };
            (self.init)(ws).await
        }
        .instrument(info_span!("init", network = %Network::Sandbox))
        .await;

        server.close().await?;
        let accounts = init?
            .into_iter()
            .map(|(name, account)| (name, account.account_id().clone()))
            .collect::<BTreeMap<_, _>>();

        info!(home = %server.home_dir().display(), accounts = accounts.len(), "Parent sandbox ready");
        Ok(ParentState {
            home_dir: server.home_dir().to_path_buf(),
            accounts,
        })
    }

    async fn connect_sandbox(&self, server: &SandboxServer) -> Result<Arc<AccountManager>, Error> {
        let url = server.rpc_url().ok_or_else(|| {
            Error::Config("sandbox has no RPC address; it was not started".to_string())
        })?;
        let manager = SandboxBackend::connect(
            Arc::new(RpcClient::new(url)),
            server.home_dir(),
            self.config.key_store.clone(),
        )
        .await?;
        Ok(Arc::new(manager))
    }

    async fn run_on_testnet<F, Fut, T>(&self, run: u64, body: F) -> Result<T, Error>
    where
        F: FnOnce(Workspace) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let rpc = self
            .rpc
            .clone()
            .unwrap_or_else(|| Arc::new(RpcClient::new(self.config.rpc_url.clone())));
        let manager = Arc::new(
            TestnetBackend::connect(
                rpc,
                self.config.key_store.clone(),
                self.config.master_account.clone(),
                &self.config.helper_url,
            )
            .await?,
        );

        let result = async {
            let accounts = (self.init)(Workspace {
                root: manager.root(),
                accounts: Accounts::new(),
                run,
            })
            .await?;
            body(Workspace {
                root: manager.root(),
                accounts,
                run,
            })
            .await
        }
        .await;

        let report = manager.cleanup().await;
        if !report.is_clean() {
            warn!(failed = report.failed.len(), "Some testnet accounts were not deleted");
        }
        result
    }
}

/// Init and start `server`, closing it again if either step fails.
async fn launch(server: &mut SandboxServer) -> Result<(), Error> {
    let started = match server.init().await {
        Ok(()) => server.start().await,
        Err(e) => Err(e),
    };
    if let Err(e) = started {
        if let Err(close_err) = server.close().await {
            warn!(error = %close_err, "Failed to clean up sandbox");
        }
        return Err(e.into());
    }
    Ok(())
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.config.keep_data {
            return;
        }
        if let Some(parent) = self.parent.get() {
            if let Err(e) = std::fs::remove_dir_all(&parent.home_dir) {
                warn!(home = %parent.home_dir.display(), error = %e, "Failed to remove parent sandbox home");
            }
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("network", &self.config.network)
            .field("tag", &self.tag)
            .field("runs", &self.counter.current())
            .finish()
    }
}
