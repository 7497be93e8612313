//! The networks a test run can target.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The network a [`Runner`](crate::Runner) drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// A locally spawned, disposable sandbox node.
    #[default]
    Sandbox,
    /// The shared NEAR testnet.
    Testnet,
}

impl Network {
    /// Returns true if this is testnet.
    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Testnet)
    }

    /// Returns true if this is a sandbox network.
    pub fn is_sandbox(&self) -> bool {
        matches!(self, Network::Sandbox)
    }

    /// Returns the network identifier string, also used as the keystore
    /// namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Testnet => "testnet",
            Network::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(Network::Sandbox),
            "testnet" => Ok(Network::Testnet),
            other => Err(Error::Config(format!(
                "unknown network '{other}'; use 'testnet' or 'sandbox'"
            ))),
        }
    }
}
