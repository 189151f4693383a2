//! Environmental checks run before any mutating step.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use nix::sys::statvfs::statvfs;
use nix::unistd::Uid;

use crate::io::config::PreflightSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Host facts the preflight depends on.
pub trait HostProbe {
    fn is_root(&self) -> bool;
    fn free_disk_mb(&self, path: &Path) -> Result<u64>;
    fn connect(&self, addr: &str, timeout: Duration) -> Result<()>;
}

/// Probe for the machine the orchestrator runs on.
pub struct SystemHost;

impl HostProbe for SystemHost {
    fn is_root(&self) -> bool {
        Uid::effective().is_root()
    }

    fn free_disk_mb(&self, path: &Path) -> Result<u64> {
        let stat = statvfs(path).with_context(|| format!("statvfs {}", path.display()))?;
        let bytes = u64::from(stat.blocks_available()).saturating_mul(u64::from(stat.fragment_size()));
        Ok(bytes / (1024 * 1024))
    }

    fn connect(&self, addr: &str, timeout: Duration) -> Result<()> {
        let mut last_err = None;
        for candidate in addr
            .to_socket_addrs()
            .with_context(|| format!("resolve {addr}"))?
        {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(_) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => Err(err).with_context(|| format!("connect {addr}")),
            None => Err(anyhow!("{addr} resolved to no addresses")),
        }
    }
}

/// One or more environmental checks failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightError {
    pub failures: Vec<String>,
}

impl fmt::Display for PreflightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "preflight failed: {}", self.failures.join("; "))
    }
}

impl std::error::Error for PreflightError {}

/// Run every configured check and report all failures together.
pub fn run_preflight<H: HostProbe>(
    settings: &PreflightSettings,
    host: &H,
) -> Result<(), PreflightError> {
    let mut failures = Vec::new();

    if settings.require_root && !host.is_root() {
        failures.push("must run as root".to_string());
    }

    if settings.min_free_disk_mb > 0 {
        match host.free_disk_mb(&settings.disk_path) {
            Ok(free) if free < settings.min_free_disk_mb => failures.push(format!(
                "insufficient disk space on {}: {free} MiB free, {} MiB required",
                settings.disk_path.display(),
                settings.min_free_disk_mb
            )),
            Ok(_) => {}
            Err(err) => failures.push(format!("{err:#}")),
        }
    }

    if let Some(addr) = &settings.network_probe
        && let Err(err) = host.connect(addr, CONNECT_TIMEOUT)
    {
        failures.push(format!("network unreachable: {err:#}"));
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(PreflightError { failures })
    }
}
