//! Resumability markers
//!
//! Before the engine issues a long-running operation it records a
//! marker next to the profile: the operation handle plus the steps
//! still owed after that operation completes. A timed-out or
//! interrupted run leaves the marker in place so a later `benchlink
//! resume` can re-attach to the same operation instead of issuing a
//! duplicate. The marker is cleared only on full success or on a
//! confirmed terminal failure.
//!
//! Secret material never appears here; a pending secret write is
//! recorded only as the reference it will be stored under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use tracing::debug;

use crate::error::SetupError;
use crate::profile::ProfileStore;
use crate::provider::OperationHandle;

/// A step the engine still owes once the in-flight operation settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PendingStep {
    SetParameter {
        stack_name: String,
        key: String,
        value: String,
    },
    DeployStack {
        stack_name: String,
        parameters: BTreeMap<String, String>,
    },
    /// The secret itself is never persisted; only where it will live.
    PutSecret { reference_hint: String },
}

impl PendingStep {
    /// Steps that need fresh secret material piped into the resuming
    /// process.
    pub fn needs_secret(&self) -> bool {
        matches!(self, PendingStep::PutSecret { .. })
    }
}

/// On-disk record of an interrupted execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumabilityMarker {
    pub profile: String,
    /// The operation a resume re-attaches to.
    pub handle: OperationHandle,
    pub started_at: DateTime<Utc>,
    /// Last status observed before the run stopped, when any.
    pub last_status: Option<String>,
    /// Steps not yet issued, in execution order.
    pub pending: Vec<PendingStep>,
}

impl ResumabilityMarker {
    pub fn new(profile: impl Into<String>, handle: OperationHandle) -> Self {
        Self {
            profile: profile.into(),
            handle,
            started_at: Utc::now(),
            last_status: None,
            pending: Vec::new(),
        }
    }

    pub fn with_pending(mut self, pending: Vec<PendingStep>) -> Self {
        self.pending = pending;
        self
    }

    pub fn needs_secret(&self) -> bool {
        self.pending.iter().any(PendingStep::needs_secret)
    }
}

/// Atomically write the marker for a profile.
pub fn write(
    store: &ProfileStore,
    profile: &str,
    marker: &ResumabilityMarker,
) -> Result<(), SetupError> {
    let path = store.marker_path(profile);
    let dir = path
        .parent()
        .ok_or_else(|| SetupError::storage(&path, "marker path has no parent directory"))?
        .to_path_buf();
    fs::create_dir_all(&dir)
        .map_err(|e| SetupError::storage_io(&dir, "failed to create profile directory", e))?;

    let body = serde_json::to_vec_pretty(marker)
        .map_err(|e| SetupError::storage(&path, format!("failed to serialize marker: {e}")))?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| SetupError::storage_io(&dir, "failed to create temp file", e))?;
    temp.write_all(&body)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| SetupError::storage_io(temp.path(), "failed to write marker", e))?;
    restrict_permissions(temp.path())
        .map_err(|e| SetupError::storage_io(temp.path(), "failed to restrict marker", e))?;
    temp.persist(&path)
        .map_err(|e| SetupError::storage_io(&path, "failed to replace marker", e.error))?;
    debug!(
        "Recorded resumability marker for operation {} on profile '{profile}'",
        marker.handle.operation_id
    );
    Ok(())
}

/// Load the marker for a profile, if one exists. A marker that cannot
/// be parsed blocks execution rather than being discarded: it may
/// describe an operation that is still mutating infrastructure.
pub fn load(store: &ProfileStore, profile: &str) -> Result<Option<ResumabilityMarker>, SetupError> {
    let path = store.marker_path(profile);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SetupError::storage_io(&path, "failed to read marker", e)),
    };
    let marker: ResumabilityMarker = serde_json::from_str(&raw).map_err(|e| {
        SetupError::conflict(
            profile,
            format!(
                "unreadable resumability marker at {} ({e}); verify no operation is \
                 still in flight, then remove the file to proceed",
                path.display()
            ),
        )
    })?;
    Ok(Some(marker))
}

/// Remove the marker after a confirmed terminal outcome.
pub fn clear(store: &ProfileStore, profile: &str) -> Result<(), SetupError> {
    let path = store.marker_path(profile);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!("Cleared resumability marker for profile '{profile}'");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SetupError::storage_io(&path, "failed to clear marker", e)),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OperationKind;
    use tempfile::TempDir;

    fn sample_handle() -> OperationHandle {
        OperationHandle {
            operation_id: "op-1234".to_string(),
            kind: OperationKind::ParameterUpdate,
            stack_name: "quilt-prod".to_string(),
        }
    }

    #[test]
    fn write_load_clear_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path());
        let marker = ResumabilityMarker::new("default", sample_handle()).with_pending(vec![
            PendingStep::PutSecret {
                reference_hint: "quilt-prod-benchling-secret".to_string(),
            },
        ]);

        write(&store, "default", &marker).unwrap();
        let loaded = load(&store, "default").unwrap().unwrap();
        assert_eq!(loaded, marker);
        assert!(loaded.needs_secret());

        clear(&store, "default").unwrap();
        assert!(load(&store, "default").unwrap().is_none());
    }

    #[test]
    fn missing_marker_is_none() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path());
        assert!(load(&store, "default").unwrap().is_none());
        // Clearing an absent marker is not an error.
        clear(&store, "default").unwrap();
    }

    #[test]
    fn corrupt_marker_blocks_instead_of_vanishing() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path());
        let path = store.marker_path("default");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ half a marker").unwrap();

        let err = load(&store, "default").unwrap_err();
        assert!(matches!(err, SetupError::Conflict { .. }));
        assert!(path.exists());
    }

    #[test]
    fn marker_never_contains_secret_material() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path());
        let marker = ResumabilityMarker::new("default", sample_handle()).with_pending(vec![
            PendingStep::SetParameter {
                stack_name: "quilt-prod".to_string(),
                key: "BenchlingIntegration".to_string(),
                value: "Enabled".to_string(),
            },
            PendingStep::PutSecret {
                reference_hint: "quilt-prod-benchling-secret".to_string(),
            },
        ]);
        write(&store, "default", &marker).unwrap();

        let raw = fs::read_to_string(store.marker_path("default")).unwrap();
        assert!(raw.contains("reference_hint"));
        assert!(!raw.to_lowercase().contains("client_secret"));
    }

    #[cfg(unix)]
    #[test]
    fn marker_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path());
        let marker = ResumabilityMarker::new("default", sample_handle());
        write(&store, "default", &marker).unwrap();
        let mode = fs::metadata(store.marker_path("default"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
