//! Durable checkpoint records for a migration run.
//!
//! A run for one (environment, tenant, artifact kind) keeps two files in its
//! run directory `<export-root>/<environment>/<tenant-dir>/`:
//!
//! - `migration-<kind>-export-metadata.yaml`: the page currently being
//!   exported, the offset it was fetched at, and who ran it for which tenant.
//! - `last-succeeded-<kind>.log`: the identity key of the last artifact whose
//!   archive was fully written.
//!
//! Exported archives live next to them in `<run-dir>/<kind-subdir>/`.
//!
//! The store assumes a single writer. Two invocations against the same run
//! directory will corrupt each other's state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::{ArtifactKind, IdentityKey};

/// Directory name used when no tenant domain is given.
pub const DEFAULT_TENANT_DIR_NAME: &str = "tenant-default";
/// Substitute for `.` in tenant directory names.
pub const TENANT_DOT_SENTINEL: &str = "-dot-";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("malformed checkpoint file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("failed to clean previous export state: {}", describe_failures(.failures))]
    Cleanup { failures: Vec<(PathBuf, io::Error)> },
}

fn describe_failures(failures: &[(PathBuf, io::Error)]) -> String {
    failures
        .iter()
        .map(|(path, err)| format!("{}: {err}", path.display()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Filesystem-safe directory name for a tenant domain.
pub fn tenant_dir_name(tenant_domain: &str) -> String {
    if tenant_domain.is_empty() {
        DEFAULT_TENANT_DIR_NAME.to_string()
    } else {
        tenant_domain.replace('.', TENANT_DOT_SENTINEL)
    }
}

/// Where a run's files live, partitioned by environment then tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationLayout {
    pub export_root: PathBuf,
    pub environment: String,
    pub tenant_domain: String,
}

impl MigrationLayout {
    pub fn new(
        export_root: impl Into<PathBuf>,
        environment: impl Into<String>,
        tenant_domain: impl Into<String>,
    ) -> Self {
        Self {
            export_root: export_root.into(),
            environment: environment.into(),
            tenant_domain: tenant_domain.into(),
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.export_root
            .join(&self.environment)
            .join(tenant_dir_name(&self.tenant_domain))
    }

    pub fn archive_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.run_dir().join(kind.archive_subdir())
    }
}

/// The metadata record: the page being exported and the run's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationMetadata<T> {
    pub items_to_export: Vec<T>,
    pub list_offset: usize,
    pub user: String,
    pub on_tenant: String,
}

/// Reads and writes the checkpoint records of one run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: MigrationLayout,
    kind: ArtifactKind,
}

impl CheckpointStore {
    pub fn new(layout: MigrationLayout, kind: ArtifactKind) -> Self {
        Self { layout, kind }
    }

    pub fn layout(&self) -> &MigrationLayout {
        &self.layout
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.layout.run_dir().join(self.kind.metadata_file_name())
    }

    pub fn marker_path(&self) -> PathBuf {
        self.layout.run_dir().join(self.kind.marker_file_name())
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.layout.archive_dir(self.kind)
    }

    /// Creates the run directory and the archive directory under it.
    pub fn ensure_dirs(&self) -> Result<PathBuf, CheckpointError> {
        let archive_dir = self.archive_dir();
        fs::create_dir_all(&archive_dir).map_err(|source| CheckpointError::CreateDir {
            path: archive_dir.clone(),
            source,
        })?;
        Ok(archive_dir)
    }

    /// Replaces the metadata record with `items` as the current page.
    pub fn write_metadata<T: Serialize>(
        &self,
        items: &[T],
        offset: usize,
        tenant: &str,
        user: &str,
    ) -> Result<(), CheckpointError> {
        #[derive(Serialize)]
        struct MetadataRef<'a, T> {
            items_to_export: &'a [T],
            list_offset: usize,
            user: &'a str,
            on_tenant: &'a str,
        }

        let path = self.metadata_path();
        let yaml = serde_yaml::to_string(&MetadataRef {
            items_to_export: items,
            list_offset: offset,
            user,
            on_tenant: tenant,
        })
        .map_err(|e| CheckpointError::Write {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        write_atomically(&path, yaml.as_bytes())?;
        debug!(
            path = %path.display(),
            items = items.len(),
            offset,
            "Wrote migration metadata"
        );
        Ok(())
    }

    /// Reads the metadata record, `None` when no run has been recorded.
    pub fn read_metadata<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<MigrationMetadata<T>>, CheckpointError> {
        let path = self.metadata_path();
        let Some(content) = read_if_exists(&path)? else {
            return Ok(None);
        };
        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|e| CheckpointError::Malformed {
                path,
                reason: e.to_string(),
            })
    }

    /// Records `key` as the last fully exported artifact.
    ///
    /// Callers must only do this after the artifact's archive is on disk.
    pub fn write_marker(&self, key: &IdentityKey) -> Result<(), CheckpointError> {
        let path = self.marker_path();
        write_atomically(&path, key.to_marker_line().as_bytes())?;
        debug!(path = %path.display(), marker = %key, "Advanced last-succeeded marker");
        Ok(())
    }

    /// Reads the last-succeeded marker, `None` when absent.
    pub fn read_marker(&self) -> Result<Option<IdentityKey>, CheckpointError> {
        let path = self.marker_path();
        let Some(content) = read_if_exists(&path)? else {
            return Ok(None);
        };
        IdentityKey::parse_marker_line(&content, self.kind.identity_arity())
            .map(Some)
            .ok_or_else(|| CheckpointError::Malformed {
                path,
                reason: format!(
                    "expected {} tab-delimited fields",
                    self.kind.identity_arity()
                ),
            })
    }

    /// Removes the metadata record, the marker, and every archive exported so
    /// far for this run. Every removal is attempted; all failures are reported.
    pub fn clear_all(&self) -> Result<(), CheckpointError> {
        info!(
            run_dir = %self.layout.run_dir().display(),
            kind = %self.kind,
            "Cleaning previous export state"
        );
        let mut failures = Vec::new();

        let archive_dir = self.archive_dir();
        if let Err(e) = remove_dir_if_exists(&archive_dir) {
            failures.push((archive_dir, e));
        }
        for path in [self.metadata_path(), self.marker_path()] {
            if let Err(e) = remove_file_if_exists(&path) {
                failures.push((path, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CheckpointError::Cleanup { failures })
        }
    }
}

fn read_if_exists(path: &Path) -> Result<Option<String>, CheckpointError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CheckpointError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes via a sibling temp file and a rename, so readers only ever see the
/// old or the new content.
fn write_atomically(path: &Path, content: &[u8]) -> Result<(), CheckpointError> {
    let write_err = |source: io::Error| CheckpointError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| CheckpointError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(content).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
