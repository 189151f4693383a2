//! Orchestrator settings and working-directory layout.
//!
//! Both live in the plan file (`[settings]`, `[layout]`). Missing fields default
//! to values suitable for a root-run provisioning of a Debian host. The layout
//! is then overridden from the process environment once, at load time.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Orchestrator settings (`[settings]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Durable, append-only run log.
    pub log_path: PathBuf,

    /// Exclusive lock held for the duration of a run.
    pub lock_path: PathBuf,

    /// Directory for captured secrets (created `0700`).
    pub secret_dir: PathBuf,

    /// Optional JSON report of the run's step outcomes.
    pub report_path: Option<PathBuf>,

    /// Default per-command timeout in seconds; `0` disables timeouts.
    pub command_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Account that owns captured secret files.
    pub service_user: Option<String>,

    pub preflight: PreflightSettings,
}

/// Environmental checks run before any mutating step (`[settings.preflight]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightSettings {
    /// Refuse to run unless the effective user is root.
    pub require_root: bool,

    /// Minimum free space on `disk_path` in MiB; `0` skips the check.
    pub min_free_disk_mb: u64,

    pub disk_path: PathBuf,

    /// `host:port` that must accept a TCP connection (e.g. a package mirror).
    pub network_probe: Option<String>,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            require_root: true,
            min_free_disk_mb: 0,
            disk_path: PathBuf::from("/"),
            network_probe: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/log/provision/provision.log"),
            lock_path: PathBuf::from("/run/lock/provision.lock"),
            secret_dir: PathBuf::from("/run/provision/secrets"),
            report_path: None,
            command_timeout_secs: 3 * 60 * 60,
            output_limit_bytes: 1_000_000,
            service_user: None,
            preflight: PreflightSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        for (name, path) in [
            ("log_path", &self.log_path),
            ("lock_path", &self.lock_path),
            ("secret_dir", &self.secret_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        if let Some(user) = &self.service_user
            && user.trim().is_empty()
        {
            return Err(anyhow!("service_user must not be blank"));
        }
        if let Some(probe) = &self.preflight.network_probe
            && !probe.contains(':')
        {
            return Err(anyhow!(
                "preflight.network_probe must be host:port, got '{probe}'"
            ));
        }
        Ok(())
    }
}

/// Working-directory layout (`[layout]`), shared by every step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    /// Prefix the built components install under.
    pub install_prefix: PathBuf,
    /// Downloaded archives and extracted sources.
    pub source_dir: PathBuf,
    /// Out-of-tree build directories.
    pub build_dir: PathBuf,
    /// Staging root for `make install DESTDIR=...` style installs.
    pub install_dir: PathBuf,
    /// Keyring used for signature verification.
    pub gnupg_home: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            install_prefix: PathBuf::from("/usr/local"),
            source_dir: PathBuf::from("/var/tmp/provision/source"),
            build_dir: PathBuf::from("/var/tmp/provision/build"),
            install_dir: PathBuf::from("/var/tmp/provision/install"),
            gnupg_home: PathBuf::from("/var/tmp/provision/gnupg"),
        }
    }
}

impl Layout {
    /// Environment variables that override layout fields.
    pub const ENV_OVERRIDES: [&'static str; 5] = [
        "INSTALL_PREFIX",
        "SOURCE_DIR",
        "BUILD_DIR",
        "INSTALL_DIR",
        "GNUPGHOME",
    ];

    /// Apply environment overrides; blank values are ignored.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in Self::ENV_OVERRIDES {
            let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            let slot = match key {
                "INSTALL_PREFIX" => &mut self.install_prefix,
                "SOURCE_DIR" => &mut self.source_dir,
                "BUILD_DIR" => &mut self.build_dir,
                "INSTALL_DIR" => &mut self.install_dir,
                _ => &mut self.gnupg_home,
            };
            *slot = PathBuf::from(value);
        }
        self
    }
}

/// Immutable configuration for one run, built once from the plan and the
/// environment and passed by reference to everything that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub settings: Settings,
    pub layout: Layout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().expect("valid");
    }

    #[test]
    fn rejects_zero_output_limit() {
        let settings = Settings {
            output_limit_bytes: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_probe_without_port() {
        let mut settings = Settings::default();
        settings.preflight.network_probe = Some("deb.debian.org".to_string());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("host:port"));
    }

    #[test]
    fn env_overrides_layout_fields() {
        let layout = Layout::default().with_env(|key| match key {
            "SOURCE_DIR" => Some("/srv/src".to_string()),
            "GNUPGHOME" => Some("/srv/gpg".to_string()),
            "BUILD_DIR" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(layout.source_dir, PathBuf::from("/srv/src"));
        assert_eq!(layout.gnupg_home, PathBuf::from("/srv/gpg"));
        assert_eq!(layout.build_dir, Layout::default().build_dir);
        assert_eq!(layout.install_prefix, PathBuf::from("/usr/local"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let settings: Settings = toml::from_str("command_timeout_secs = 5\n").expect("parse");
        assert_eq!(settings.command_timeout_secs, 5);
        assert_eq!(settings.output_limit_bytes, Settings::default().output_limit_bytes);
        assert!(settings.preflight.require_root);
    }
}
