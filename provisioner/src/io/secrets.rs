//! Install-time credential capture.
//!
//! A captured secret is written to an owner-only file created with its final
//! mode (no create-then-chmod window), optionally handed to the service
//! account, disclosed once in the final summary and removed during cleanup.
//! Secret values never reach the run log.

use std::fmt;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use nix::unistd::{User, chown};
use regex::Regex;
use tracing::debug;

const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;

/// A secret ready to be shown to the operator.
#[derive(Clone, PartialEq, Eq)]
pub struct DisclosedSecret {
    pub label: String,
    pub value: String,
}

impl fmt::Debug for DisclosedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisclosedSecret")
            .field("label", &self.label)
            .field("value", &"<redacted>")
            .finish()
    }
}

struct Captured {
    step: String,
    secret: DisclosedSecret,
    path: PathBuf,
}

/// Extract the first capture group of `pattern` from `output`.
///
/// Returns `None` when the pattern does not match or the group is blank.
pub fn extract(pattern: &str, output: &str) -> Result<Option<String>> {
    let re = Regex::new(pattern).with_context(|| format!("compile capture pattern /{pattern}/"))?;
    Ok(re
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty()))
}

/// Secrets captured during one run.
///
/// The directory is created owner-only on first use. A directory that already
/// exists is used only when it is owner-only, and its mode and owner are left
/// as they are.
pub struct SecretStore {
    dir: PathBuf,
    owner: Option<String>,
    dir_state: DirState,
    captured: Vec<Captured>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DirState {
    Unchecked,
    Existing,
    Created,
}

impl SecretStore {
    pub fn new(dir: impl Into<PathBuf>, owner: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            owner,
            dir_state: DirState::Unchecked,
            captured: Vec::new(),
        }
    }

    /// Persist a captured secret and return its file path.
    pub fn store(&mut self, step: &str, label: &str, value: &str) -> Result<PathBuf> {
        self.prepare_dir()?;

        let path = self.dir.join(format!("{}.secret", file_stem(step)));
        if let Some(other) = self.captured.iter().find(|c| c.path == path) {
            bail!(
                "secret file {} already holds the capture of step '{}'",
                path.display(),
                other.step
            );
        }
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale secret file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("remove stale {}", path.display()));
            }
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(FILE_MODE)
            .open(&path)
            .with_context(|| format!("create secret file {}", path.display()))?;
        file.write_all(format!("{value}\n").as_bytes())
            .with_context(|| format!("write secret file {}", path.display()))?;

        // Recorded before the hand-over so a chown failure still discloses
        // and removes the secret at finalization.
        self.captured.push(Captured {
            step: step.to_string(),
            secret: DisclosedSecret {
                label: label.to_string(),
                value: value.to_string(),
            },
            path: path.clone(),
        });
        if let Some(owner) = &self.owner {
            let dir = (self.dir_state == DirState::Created).then_some(self.dir.as_path());
            hand_over(owner, dir, &path)?;
        }
        Ok(path)
    }

    /// Files still on disk for captured secrets.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.captured.iter().map(|c| c.path.clone()).collect()
    }

    /// Hand out every captured secret. A second call returns nothing.
    pub fn disclose(&mut self) -> Vec<DisclosedSecret> {
        self.captured.drain(..).map(|c| c.secret).collect()
    }

    fn prepare_dir(&mut self) -> Result<()> {
        if self.dir_state != DirState::Unchecked {
            return Ok(());
        }
        match fs::symlink_metadata(&self.dir) {
            Ok(meta) => {
                if !meta.is_dir() {
                    bail!("secret dir {} is not a directory", self.dir.display());
                }
                let mode = meta.permissions().mode() & 0o7777;
                if mode & 0o077 != 0 {
                    bail!(
                        "secret dir {} is not owner-only (mode {mode:o})",
                        self.dir.display()
                    );
                }
                self.dir_state = DirState::Existing;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if let Some(parent) = self.dir.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
                DirBuilder::new()
                    .mode(DIR_MODE)
                    .create(&self.dir)
                    .with_context(|| format!("create secret dir {}", self.dir.display()))?;
                // The creation mode is filtered by the umask.
                fs::set_permissions(&self.dir, fs::Permissions::from_mode(DIR_MODE))
                    .with_context(|| format!("chmod {}", self.dir.display()))?;
                self.dir_state = DirState::Created;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("inspect secret dir {}", self.dir.display()));
            }
        }
        Ok(())
    }
}

/// Chown the secret file, and the directory when this store created it.
fn hand_over(owner: &str, dir: Option<&Path>, path: &Path) -> Result<()> {
    let user = User::from_name(owner)
        .with_context(|| format!("look up service user {owner}"))?
        .ok_or_else(|| anyhow!("service user {owner} does not exist"))?;
    for target in dir.into_iter().chain([path]) {
        chown(target, Some(user.uid), Some(user.gid))
            .with_context(|| format!("chown {} to {owner}", target.display()))?;
    }
    Ok(())
}

fn file_stem(step: &str) -> String {
    step.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
