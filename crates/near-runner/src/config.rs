//! Run configuration.
//!
//! A [`Config`] picks the network and carries the options for it. Build one
//! explicitly or read it from the environment:
//!
//! ```bash
//! export NEAR_RUNNER_NETWORK=testnet
//! export TESTNET_MASTER_ACCOUNT_ID=my-master.testnet
//! export NEAR_RUNNER_DEBUG=1
//! ```
//!
//! ```rust,no_run
//! # use near_runner::Config;
//! # fn example() -> Result<(), near_runner::Error> {
//! let config = Config::from_env()?.with_keep_data(true);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{KeyStore, TESTNET_RPC_URL};
use crate::error::Error;
use crate::manager::TESTNET_HELPER_URL;
use crate::sandbox::{
    BIN_PATH_ENV, DEFAULT_POLL_INTERVAL, DEFAULT_SANDBOX_VERSION, DEFAULT_STARTUP_TIMEOUT,
    PortAllocator, SandboxConfig,
};
use crate::types::{AccountId, Network};

/// Selects `sandbox` or `testnet`.
pub const NETWORK_ENV: &str = "NEAR_RUNNER_NETWORK";

/// Any value other than empty, `0` or `false` turns on debug output.
pub const DEBUG_ENV: &str = "NEAR_RUNNER_DEBUG";

/// Master account for testnet runs.
pub const MASTER_ACCOUNT_ENV: &str = "TESTNET_MASTER_ACCOUNT_ID";

/// Options for a [`Runner`](crate::Runner).
#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,

    // ─── Sandbox ───
    /// Directory the sandbox home dirs are created in.
    pub home_root: PathBuf,
    /// Fixed RPC port. Only sensible with a single sandbox.
    pub port: Option<u16>,
    pub init: bool,
    /// Keep sandbox home dirs after the run.
    pub keep_data: bool,
    /// Start the first sandbox from a copy of this home dir.
    pub ref_dir: Option<PathBuf>,
    pub binary_path: Option<PathBuf>,
    pub version: String,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub debug: bool,
    pub ports: Arc<PortAllocator>,

    // ─── Testnet ───
    /// Generated when `None`.
    pub master_account: Option<AccountId>,
    pub helper_url: String,
    pub rpc_url: String,

    /// Key store to use instead of the network default.
    pub key_store: Option<Arc<dyn KeyStore>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::sandbox()
    }
}

impl Config {
    /// Defaults for local sandbox runs.
    pub fn sandbox() -> Self {
        Self {
            network: Network::Sandbox,
            home_root: std::env::temp_dir().join("near-runner"),
            port: None,
            init: true,
            keep_data: false,
            ref_dir: None,
            binary_path: None,
            version: DEFAULT_SANDBOX_VERSION.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            debug: false,
            ports: PortAllocator::shared(),
            master_account: None,
            helper_url: TESTNET_HELPER_URL.to_string(),
            rpc_url: TESTNET_RPC_URL.to_string(),
            key_store: None,
        }
    }

    /// Defaults for testnet runs.
    pub fn testnet() -> Self {
        Self::sandbox().with_network(Network::Testnet)
    }

    /// Defaults overridden by `NEAR_RUNNER_NETWORK`, `NEAR_RUNNER_DEBUG`,
    /// `TESTNET_MASTER_ACCOUNT_ID` and `NEAR_SANDBOX_BIN_PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown network and
    /// [`Error::ParseAccountId`] for an invalid master account.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::sandbox();
        if let Some(network) = lookup(NETWORK_ENV).filter(|v| !v.is_empty()) {
            config.network = network.parse()?;
        }
        if let Some(debug) = lookup(DEBUG_ENV) {
            config.debug = !matches!(debug.trim(), "" | "0" | "false");
        }
        if let Some(master) = lookup(MASTER_ACCOUNT_ENV).filter(|v| !v.is_empty()) {
            config.master_account = Some(master.parse()?);
        }
        if let Some(path) = lookup(BIN_PATH_ENV).filter(|v| !v.is_empty()) {
            config.binary_path = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_home_root(mut self, home_root: impl Into<PathBuf>) -> Self {
        self.home_root = home_root.into();
        self
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

    pub fn with_port_allocator(mut self, ports: Arc<PortAllocator>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_master_account(mut self, account_id: AccountId) -> Self {
        self.master_account = Some(account_id);
        self
    }

    pub fn with_helper_url(mut self, url: impl Into<String>) -> Self {
        self.helper_url = url.into();
        self
    }

    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = url.into();
        self
    }

    pub fn with_key_store(mut self, key_store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(key_store);
        self
    }

    /// Sandbox options for a node whose home is `<home_root>/<name>`.
    pub fn sandbox_config(&self, name: &str) -> SandboxConfig {
        let mut config = SandboxConfig::new(self.home_root.join(name))
            .with_init(self.init)
            .with_keep_data(self.keep_data)
            .with_version(self.version.clone())
            .with_startup_timeout(self.startup_timeout)
            .with_poll_interval(self.poll_interval)
            .with_debug(self.debug);
        config.port = self.port;
        config.ref_dir = self.ref_dir.clone();
        config.binary_path = self.binary_path.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_to_sandbox() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.network, Network::Sandbox);
        assert!(!config.debug);
        assert!(config.master_account.is_none());
        assert!(config.binary_path.is_none());
    }

    #[test]
    fn test_reads_all_variables() {
        let config = Config::from_lookup(lookup(&[
            (NETWORK_ENV, "testnet"),
            (DEBUG_ENV, "1"),
            (MASTER_ACCOUNT_ENV, "master.testnet"),
            (BIN_PATH_ENV, "/opt/near-sandbox"),
        ]))
        .unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert!(config.debug);
        assert_eq!(config.master_account.unwrap().as_str(), "master.testnet");
        assert_eq!(config.binary_path.unwrap(), PathBuf::from("/opt/near-sandbox"));
    }

    #[test]
    fn test_debug_values() {
        for (value, expected) in [("", false), ("0", false), ("false", false), ("true", true), ("yes", true)] {
            let config = Config::from_lookup(lookup(&[(DEBUG_ENV, value)])).unwrap();
            assert_eq!(config.debug, expected, "{value:?}");
        }
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[(NETWORK_ENV, "mainnet")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_lookup(lookup(&[(MASTER_ACCOUNT_ENV, "Not Valid")])).unwrap_err();
        assert!(matches!(err, Error::ParseAccountId(_)));
    }

    #[test]
    fn test_sandbox_config() {
        let config = Config::sandbox()
            .with_home_root("/tmp/runs")
            .with_keep_data(true)
            .with_ref_dir("/tmp/parent")
            .with_debug(true);
        let sandbox = config.sandbox_config("run-1");
        assert_eq!(sandbox.home_dir, PathBuf::from("/tmp/runs/run-1"));
        assert!(sandbox.keep_data);
        assert!(sandbox.debug);
        assert_eq!(sandbox.ref_dir, Some(PathBuf::from("/tmp/parent")));
    }
}
