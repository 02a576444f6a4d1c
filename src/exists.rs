//! Duplicate-name check for the upload target.
//!
//! The probe answers "is `File:<name>` already taken?" while the user edits
//! the target name. Answers are applied last-request-wins, the same way
//! search responses are.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::error::ApiResult;
use crate::traits::FileLookup;

/// Latest known answer for the current name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// No name entered, or the last check failed.
    Unknown,
    Checking(String),
    Exists(String),
    Available(String),
}

/// What happened to a `check` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Cleared,
    Answered { exists: bool },
    Superseded,
}

pub struct FileExistsProbe<L: FileLookup> {
    lookup: L,
    generation: Mutex<u64>,
    status: watch::Sender<FileStatus>,
}

impl<L: FileLookup> FileExistsProbe<L> {
    pub fn new(lookup: L) -> Self {
        let (status, _) = watch::channel(FileStatus::Unknown);
        Self {
            lookup,
            generation: Mutex::new(0),
            status,
        }
    }

    /// Check `filename`. An empty name clears the status without a request.
    pub async fn check(&self, filename: &str) -> ApiResult<ProbeOutcome> {
        let name = filename.trim();
        let generation = {
            let mut current = self.lock();
            *current += 1;
            if name.is_empty() {
                self.status.send_replace(FileStatus::Unknown);
                return Ok(ProbeOutcome::Cleared);
            }
            self.status.send_replace(FileStatus::Checking(name.to_string()));
            *current
        };

        let answer = self.lookup.file_exists(name).await;

        let current = self.lock();
        if *current != generation {
            debug!(name, generation, "discarding stale exists answer");
            return Ok(ProbeOutcome::Superseded);
        }
        match answer {
            Ok(exists) => {
                let status = if exists {
                    FileStatus::Exists(name.to_string())
                } else {
                    FileStatus::Available(name.to_string())
                };
                self.status.send_replace(status);
                Ok(ProbeOutcome::Answered { exists })
            }
            Err(err) => {
                self.status.send_replace(FileStatus::Unknown);
                Err(err)
            }
        }
    }

    pub fn current(&self) -> FileStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FileStatus> {
        self.status.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
