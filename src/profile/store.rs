//! Profile persistence
//!
//! Profiles live under `~/.benchlink/profiles/<name>/` (override the
//! root with `BENCHLINK_HOME`). Writes are atomic: serialize to a temp
//! file in the same directory, fsync, then rename over the target, with
//! the previous version kept as a timestamped backup. Everything is
//! owner-readable only.
//!
//! A cooperative lock file serializes executions per profile. Holding
//! the lock is a prerequisite for any mutation of the profile directory
//! beyond the initial save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::schema::{self, ProfileDocument};
use crate::error::SetupError;

pub const DEFAULT_PROFILE: &str = "default";

/// A lock outliving this many seconds is presumed abandoned. Twice the
/// polling budget, so a live run can never look stale.
const LOCK_TTL_SECS: i64 = 1800;

/// Handle to the profile directory tree.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Root from `BENCHLINK_HOME`, falling back to `~/.benchlink`.
    pub fn open_default() -> Result<Self, SetupError> {
        let root = match std::env::var_os("BENCHLINK_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| SetupError::storage("~", "cannot determine home directory"))?
                .join(".benchlink"),
        };
        Ok(Self { root })
    }

    /// Store rooted at an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.root.join("profiles").join(profile)
    }

    pub fn profile_path(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join("profile.json")
    }

    pub fn marker_path(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join("marker.json")
    }

    fn lock_path(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join("profile.lock")
    }

    fn backups_dir(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join("backups")
    }

    /// Load and validate a profile. `Ok(None)` when none exists yet; a
    /// file that cannot be parsed or fails the schema is a hard error
    /// so stale configuration is never silently dropped.
    pub fn load(&self, profile: &str) -> Result<Option<ProfileDocument>, SetupError> {
        validate_profile_name(profile)?;
        let path = self.profile_path(profile);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SetupError::storage_io(&path, "failed to read profile", e)),
        };

        let document: ProfileDocument =
            serde_json::from_str(&raw).map_err(|e| SetupError::CorruptProfile {
                profile: profile.to_string(),
                path: path.clone(),
                detail: e.to_string(),
            })?;

        let violations = schema::validate(&document);
        if !violations.is_empty() {
            let detail = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SetupError::CorruptProfile {
                profile: profile.to_string(),
                path,
                detail,
            });
        }

        Ok(Some(document))
    }

    /// Validate and atomically persist a profile, keeping the previous
    /// version as a timestamped backup. Nothing touches disk unless the
    /// document passes the schema.
    pub fn save(&self, profile: &str, document: &ProfileDocument) -> Result<PathBuf, SetupError> {
        validate_profile_name(profile)?;
        let violations = schema::validate(document);
        if !violations.is_empty() {
            return Err(SetupError::validation(violations));
        }

        let dir = self.profile_dir(profile);
        fs::create_dir_all(&dir)
            .map_err(|e| SetupError::storage_io(&dir, "failed to create profile directory", e))?;
        restrict_permissions(&dir, 0o700)
            .map_err(|e| SetupError::storage_io(&dir, "failed to restrict directory", e))?;

        let body = serde_json::to_vec_pretty(document)
            .map_err(|e| SetupError::storage(&dir, format!("failed to serialize profile: {e}")))?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| SetupError::storage_io(&dir, "failed to create temp file", e))?;
        temp.write_all(&body)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| SetupError::storage_io(temp.path(), "failed to write profile", e))?;
        restrict_permissions(temp.path(), 0o600)
            .map_err(|e| SetupError::storage_io(temp.path(), "failed to restrict profile", e))?;

        let target = self.profile_path(profile);
        if target.exists() {
            self.back_up(profile, &target)?;
        }

        temp.persist(&target)
            .map_err(|e| SetupError::storage_io(&target, "failed to replace profile", e.error))?;
        debug!("Persisted profile '{profile}' to {}", target.display());
        Ok(target)
    }

    fn back_up(&self, profile: &str, current: &Path) -> Result<(), SetupError> {
        let backups = self.backups_dir(profile);
        fs::create_dir_all(&backups)
            .map_err(|e| SetupError::storage_io(&backups, "failed to create backups dir", e))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let backup = backups.join(format!("profile-{stamp}.json"));
        fs::copy(current, &backup)
            .map_err(|e| SetupError::storage_io(&backup, "failed to back up profile", e))?;
        Ok(())
    }

    /// Take the per-profile execution lock. Fails fast on contention;
    /// a lock older than its TTL is presumed abandoned and replaced.
    pub fn acquire_lock(&self, profile: &str) -> Result<ProfileLock, SetupError> {
        validate_profile_name(profile)?;
        let dir = self.profile_dir(profile);
        fs::create_dir_all(&dir)
            .map_err(|e| SetupError::storage_io(&dir, "failed to create profile directory", e))?;
        let path = self.lock_path(profile);

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let record = LockRecord {
                        holder: format!("pid-{}", std::process::id()),
                        acquired_at: Utc::now(),
                        ttl_secs: LOCK_TTL_SECS,
                        token: Uuid::new_v4(),
                    };
                    let body = serde_json::to_vec(&record).map_err(|e| {
                        SetupError::storage(&path, format!("failed to serialize lock: {e}"))
                    })?;
                    file.write_all(&body)
                        .map_err(|e| SetupError::storage_io(&path, "failed to write lock", e))?;
                    restrict_permissions(&path, 0o600)
                        .map_err(|e| SetupError::storage_io(&path, "failed to restrict lock", e))?;
                    debug!("Acquired lock for profile '{profile}'");
                    return Ok(ProfileLock {
                        path,
                        token: record.token,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let existing = fs::read_to_string(&path)
                        .ok()
                        .and_then(|raw| serde_json::from_str::<LockRecord>(&raw).ok());
                    match existing {
                        Some(record) if record.is_expired() => {
                            warn!(
                                "Replacing stale lock held by {} since {}",
                                record.holder, record.acquired_at
                            );
                            let _ = fs::remove_file(&path);
                            continue;
                        }
                        Some(record) => {
                            return Err(SetupError::conflict(
                                profile,
                                format!(
                                    "another execution ({}) holds the lock since {}; \
                                     wait for it to finish or inspect the in-flight operation",
                                    record.holder, record.acquired_at
                                ),
                            ));
                        }
                        None => {
                            return Err(SetupError::conflict(
                                profile,
                                format!(
                                    "unreadable lock file at {}; remove it if no other run is active",
                                    path.display()
                                ),
                            ));
                        }
                    }
                }
                Err(e) => {
                    return Err(SetupError::storage_io(&path, "failed to create lock", e));
                }
            }
        }

        Err(SetupError::conflict(
            profile,
            "lost the race for the profile lock twice; another execution is active",
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    holder: String,
    acquired_at: DateTime<Utc>,
    ttl_secs: i64,
    token: Uuid,
}

impl LockRecord {
    fn is_expired(&self) -> bool {
        Utc::now() - self.acquired_at > chrono::Duration::seconds(self.ttl_secs)
    }
}

/// Held for the duration of an execution; releases the lock file on
/// drop if it still belongs to this guard.
#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
    token: Uuid,
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        let ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<LockRecord>(&raw).ok())
            .map(|record| record.token == self.token)
            .unwrap_or(false);
        if ours {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn validate_profile_name(profile: &str) -> Result<(), SetupError> {
    let ok = !profile.is_empty()
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SetupError::invalid_field(
            "profile",
            format!("'{profile}' is not a valid profile name (letters, digits, hyphens, underscores)"),
        ))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
