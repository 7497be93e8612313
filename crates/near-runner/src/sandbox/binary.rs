//! Locating the `near-sandbox` binary.
//!
//! An explicit path always wins. Everything else (the `NEAR_SANDBOX_BIN_PATH`
//! override, the install cache, the first-use download and its lock) is left
//! to the `near-sandbox` crate.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SandboxError;

/// Environment variable pointing at a prebuilt sandbox binary.
pub const BIN_PATH_ENV: &str = "NEAR_SANDBOX_BIN_PATH";

/// Sandbox release installed when no binary is supplied.
pub use near_sandbox::DEFAULT_NEAR_SANDBOX_VERSION as DEFAULT_SANDBOX_VERSION;

/// Resolve the binary to run, installing `version` on first use.
///
/// `explicit` must point at an existing file. Without it, the binary comes
/// from `near-sandbox`, which downloads the release at most once per machine.
pub async fn ensure_binary(
    explicit: Option<&Path>,
    version: &str,
) -> Result<PathBuf, SandboxError> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }

    let requested = version.to_string();
    // The installer blocks on the download and on its install lock.
    let path = tokio::task::spawn_blocking(move || {
        near_sandbox::ensure_sandbox_bin_with_version(&requested).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| SandboxError::Install(e.to_string()))?
    .map_err(|message| SandboxError::Install(format!("near-sandbox {version}: {message}")))?;

    debug!(path = %path.display(), version, "Resolved sandbox binary");
    existing(path)
}

fn existing(path: PathBuf) -> Result<PathBuf, SandboxError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(SandboxError::BinaryNotFound(path))
    }
}
