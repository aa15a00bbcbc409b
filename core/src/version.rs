//! Version negotiation between clients and the rendezvous server.
//!
//! Only the major component has to match; minor and patch skew is fine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::error::TransferError;

/// Version parse errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Malformed version string: {0}")]
    Malformed(String),
}

/// A `major.minor.patch` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version of this build.
    pub fn current() -> Self {
        Self::new(
            env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        )
    }

    /// Two versions can talk to each other iff their majors agree.
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        // Pre-release / build suffixes are ignored
        let core = trimmed
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or_default();

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::Malformed(s.to_string()));
        }

        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| VersionError::Malformed(s.to_string()))
        };

        Ok(Version::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

/// Fetch the rendezvous server's version from `GET /version`.
pub async fn fetch_rendezvous_version(
    rendezvous_addr: &str,
    timeout: Duration,
) -> Result<Version, TransferError> {
    let url = format!("http://{}/version", rendezvous_addr);

    // ureq is blocking; keep it off the runtime threads
    let body = tokio::task::spawn_blocking(move || -> Result<String, TransferError> {
        let response = ureq::get(&url)
            .timeout(timeout)
            .call()
            .map_err(|e| TransferError::Transport(e.to_string()))?;
        response.into_string().map_err(TransferError::Io)
    })
    .await
    .map_err(|e| TransferError::Transport(e.to_string()))??;

    Ok(serde_json::from_str(&body)?)
}

/// Fail with `VersionMismatch` unless `client` may talk to the rendezvous.
pub async fn ensure_compatible(
    rendezvous_addr: &str,
    client: Version,
    timeout: Duration,
) -> Result<(), TransferError> {
    let server = fetch_rendezvous_version(rendezvous_addr, timeout).await?;
    if !client.is_compatible_with(&server) {
        return Err(TransferError::VersionMismatch { client, server });
    }
    tracing::debug!("Rendezvous version {} compatible with {}", server, client);
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
