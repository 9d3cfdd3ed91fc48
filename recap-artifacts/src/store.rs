//! Artifact store for the recipe-learning pipeline.
//!
//! Artifacts are persisted to disk so a pipeline can resume safely. This
//! module enforces:
//!
//! - Atomic writes (exclusive-create temp file + fsync + rename)
//! - Private permissions (0700 dirs, 0600 files) on POSIX
//! - Safe paths (validated components, no symlink-following reads)
//! - `schema_hash` verification on read; mismatch is fatal, never migrated
//!
//! A single store may be shared across concurrent pipeline runs as long as
//! each run owns a distinct `task_id`; atomic rename makes reads see either
//! the previous or the next version, never a torn one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::Artifact;

const SAFE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$";

fn safe_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SAFE_NAME_PATTERN).expect("valid regex"))
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error("invalid {label} {name:?}, expected {SAFE_NAME_PATTERN}")]
    InvalidComponent { label: &'static str, name: String },

    #[error("refusing to follow symlink for artifact path: {0}")]
    SymlinkRefused(PathBuf),

    #[error("expected a private directory at {0}")]
    NotADirectory(PathBuf),

    #[error(
        "artifact schema_hash mismatch, resume is unsafe: path={path} expected={expected} found={found}"
    )]
    SchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("artifact decode failed at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactStoreError>;

/// Filesystem store writing one JSON file per (task, artifact) pair.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_id: &str) -> Result<PathBuf> {
        validate_component(task_id, "task_id")?;
        Ok(self.root.join(task_id))
    }

    pub fn artifact_path(&self, task_id: &str, artifact_name: &str) -> Result<PathBuf> {
        validate_component(artifact_name, "artifact_name")?;
        Ok(self.task_dir(task_id)?.join(format!("{artifact_name}.json")))
    }

    /// Persist an artifact atomically, returning the final path.
    pub fn write<T: Artifact>(
        &self,
        task_id: &str,
        artifact_name: &str,
        artifact: &T,
    ) -> Result<PathBuf> {
        ensure_private_dir(&self.root)?;
        let task_dir = self.task_dir(task_id)?;
        ensure_private_dir(&task_dir)?;

        let path = self.artifact_path(task_id, artifact_name)?;
        let value = serde_json::to_value(artifact).map_err(ArtifactStoreError::Encode)?;
        let mut payload = to_canonical_json(&value);
        payload.push('\n');
        atomic_write_bytes(&path, payload.as_bytes())?;
        tracing::debug!(task_id, artifact_name, path = %path.display(), "artifact.written");
        Ok(path)
    }

    /// Read an artifact back, refusing symlinks and stale schemas.
    pub fn read<T: Artifact>(&self, task_id: &str, artifact_name: &str) -> Result<T> {
        let path = self.artifact_path(task_id, artifact_name)?;
        let raw = read_bytes_nofollow(&path)?;
        let artifact: T = serde_json::from_slice(&raw).map_err(|source| {
            ArtifactStoreError::Decode {
                path: path.clone(),
                source,
            }
        })?;

        let expected = T::computed_schema_hash();
        let found = artifact.stored_schema_hash();
        if found != expected {
            return Err(ArtifactStoreError::SchemaMismatch {
                path,
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(artifact)
    }

    pub fn exists(&self, task_id: &str, artifact_name: &str) -> Result<bool> {
        Ok(self.artifact_path(task_id, artifact_name)?.exists())
    }
}

fn validate_component(name: &str, label: &'static str) -> Result<()> {
    if safe_name_re().is_match(name) {
        Ok(())
    } else {
        Err(ArtifactStoreError::InvalidComponent {
            label,
            name: name.to_string(),
        })
    }
}

fn ensure_private_dir(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
            set_dir_permissions(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                return Err(ArtifactStoreError::SymlinkRefused(path.to_path_buf()));
            }
            if !meta.is_dir() {
                return Err(ArtifactStoreError::NotADirectory(path.to_path_buf()));
            }
            set_dir_permissions(path)
        }
    }
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn atomic_write_bytes(path: &Path, payload: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ArtifactStoreError::NotADirectory(path.to_path_buf()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp_path = parent.join(format!(".{}.tmp.{}", file_name, std::process::id()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = (|| -> Result<()> {
        let mut file = options.open(&tmp_path)?;
        file.write_all(payload)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn read_bytes_nofollow(path: &Path) -> Result<Vec<u8>> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Err(ArtifactStoreError::SymlinkRefused(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

/// Pretty-print a JSON value with sorted keys and ASCII escaping.
///
/// serde_json maps already iterate in sorted key order; non-ASCII characters
/// are escaped afterwards so artifacts are byte-stable across locales.
pub fn to_canonical_json(value: &Value) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    if pretty.is_ascii() {
        return pretty;
    }
    let mut out = String::with_capacity(pretty.len());
    for c in pretty.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}
