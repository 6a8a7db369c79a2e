//! Persisted code artifacts.
//!
//! Layout: `{root}/{session_id}/code_{timestamp}.{ext}`. Files are created,
//! never overwritten, and never removed by the gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use codechat_common::error::ResultExt;
use codechat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Attempts before giving up on finding a free filename.
const MAX_NAME_ATTEMPTS: usize = 32;

/// Source of the current time for filename stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Retrieval descriptor for a saved artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub filename: String,
    /// Extension without the leading dot
    pub language: String,
    /// Size of the UTF-8 encoding in bytes
    pub size: u64,
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}

/// Session-scoped artifact directory tree.
pub struct ArtifactStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    // Last stamp handed out, in epoch milliseconds
    last_stamp: AtomicI64,
}

impl ArtifactStore {
    /// Create a store rooted at `root` using the wall clock.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    /// Create a store with an explicit clock.
    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            last_stamp: AtomicI64::new(i64::MIN),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `code` as a new file for `session_id`.
    ///
    /// `extension` carries its leading dot (".py").
    pub async fn save(&self, session_id: &str, code: &str, extension: &str) -> Result<CodeArtifact> {
        if !is_safe_segment(session_id) {
            return Err(Error::InvalidInput(format!(
                "Session id is not usable as a directory name: {session_id:?}"
            )));
        }
        let language = extension.trim_start_matches('.');
        if language.is_empty() || !is_safe_segment(language) {
            return Err(Error::InvalidInput(format!("Unusable file extension: {extension:?}")));
        }

        let dir = self.root.join(session_id);
        fs::create_dir_all(&dir)
            .await
            .context(format!("Failed to create artifact directory {}", dir.display()))?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = format!("code_{}.{}", self.next_stamp()?, language);
            let path = dir.join(&filename);

            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(Error::from(e)
                        .with_context(format!("Failed to create {}", path.display())))
                }
            };

            file.write_all(code.as_bytes())
                .await
                .context(format!("Failed to write {}", path.display()))?;
            file.flush()
                .await
                .context(format!("Failed to flush {}", path.display()))?;

            return Ok(CodeArtifact {
                download_url: format!("/download/{session_id}/{filename}"),
                filename,
                language: language.to_string(),
                size: code.len() as u64,
            });
        }

        Err(Error::Internal(format!(
            "No free artifact filename in {} after {MAX_NAME_ATTEMPTS} attempts",
            dir.display()
        )))
    }

    /// Read a previously saved artifact.
    pub async fn read(&self, session_id: &str, filename: &str) -> Result<Vec<u8>> {
        if !is_safe_segment(session_id) || !is_safe_segment(filename) {
            return Err(Error::NotFound(format!("{session_id}/{filename}")));
        }

        let path = self.root.join(session_id).join(filename);
        fs::read(&path)
            .await
            .context(format!("Failed to read artifact {session_id}/{filename}"))
    }

    /// Filesystem-safe stamp, strictly increasing per store.
    fn next_stamp(&self) -> Result<String> {
        let now = self.clock.now().timestamp_millis();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        let millis = now.max(previous.saturating_add(1));

        let instant = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| Error::Internal(format!("Timestamp out of range: {millis}")))?;

        Ok(instant
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-"))
    }
}

/// A single path component with no traversal.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && !segment.contains("..")
        && !segment.contains(['/', '\\', '\0'])
}
