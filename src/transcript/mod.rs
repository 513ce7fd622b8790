//! Append-only wire transcript of every proxied exchange.
//!
//! One session per process run. Each request or response is rendered into a
//! complete block first and then written with a single `write_all` while the
//! session lock is held, so blocks from concurrent exchanges never interleave.

use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::exchange::{CapturedRequest, CapturedResponse};
use crate::identity::ClientIdentity;

pub mod dump;
pub mod summary;

pub use summary::{parse_transcript, ExchangeSummary};

const FILE_NAME_FORMAT: &str = "airprint-debug-%Y-%m-%d-%H-%M-%S.log";

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("Failed to create transcript {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Transcript write failed: {0}")]
    Write(#[from] io::Error),

    #[error("Transcript is closed")]
    Closed,
}

/// Transcript file name for a session started at `at`.
pub fn file_name(at: DateTime<Local>) -> String {
    at.format(FILE_NAME_FORMAT).to_string()
}

#[derive(Debug)]
pub struct TranscriptSession {
    created_at: DateTime<Local>,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl TranscriptSession {
    /// A session that accepts and discards every block.
    pub fn disabled() -> Self {
        Self {
            created_at: Local::now(),
            path: None,
            file: Mutex::new(None),
        }
    }

    /// Create a new transcript file inside `dir`.
    pub async fn create(dir: &Path) -> Result<Self, TranscriptError> {
        let created_at = Local::now();
        let path = dir.join(file_name(created_at));
        let create_err = |source: io::Error| TranscriptError::Create {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(dir).await.map_err(create_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(create_err)?;

        Ok(Self {
            created_at,
            path: Some(path),
            file: Mutex::new(Some(file)),
        })
    }

    /// Open a session when `enabled`. A file that cannot be created is
    /// reported and the session runs disabled.
    pub async fn open(dir: &Path, enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }

        match Self::create(dir).await {
            Ok(session) => {
                if let Some(path) = session.path() {
                    tracing::info!("Debug logging enabled. Writing to: {}", path.display());
                }
                session
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transcript unavailable, continuing without it");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn is_closed(&self) -> bool {
        self.is_enabled() && self.file.lock().await.is_none()
    }

    /// Append a request block headed by the client identity.
    pub async fn log_request(
        &self,
        request: &CapturedRequest,
        identity: &ClientIdentity,
    ) -> Result<(), TranscriptError> {
        self.write_with(|at| dump::request_block(request, identity, at))
            .await
    }

    pub async fn log_response(&self, response: &CapturedResponse) -> Result<(), TranscriptError> {
        self.write_with(|at| dump::response_block(response, at))
            .await
    }

    /// Append raw bytes as one block.
    pub async fn append_block(&self, block: &[u8]) -> Result<(), TranscriptError> {
        self.write_with(|_| block.to_vec()).await
    }

    // The timestamp is taken under the lock so file order matches time order.
    async fn write_with<F>(&self, render: F) -> Result<(), TranscriptError>
    where
        F: FnOnce(DateTime<Local>) -> Vec<u8>,
    {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(TranscriptError::Closed)?;

        let block = render(Local::now());
        file.write_all(&block).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Flush and release the file. Later writes fail with
    /// [`TranscriptError::Closed`]. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), TranscriptError> {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await?;
            file.sync_all().await?;
            tracing::debug!("Transcript closed");
        }
        Ok(())
    }
}
