//! Durable snapshot storage.
//!
//! The scheduler serializes its non-volatile state (task id counter, all
//! scheduled tasks, cron job configurations, framework id) and hands the
//! bytes to a `PersistenceLayer`. Snapshot failures are logged by the caller
//! and never fail the triggering operation; recovery degrades to the last
//! snapshot that stuck.

use std::fs;
use std::path::PathBuf;

use crate::error::{Result, SchedulerError};

pub trait PersistenceLayer: Send + Sync {
    fn persist(&self, snapshot: &[u8]) -> Result<()>;
    fn fetch(&self) -> Result<Option<Vec<u8>>>;
}

/// Drops snapshots and restores nothing. For tests and ephemeral schedulers.
#[derive(Debug, Default)]
pub struct NoPersistence;

impl PersistenceLayer for NoPersistence {
    fn persist(&self, _snapshot: &[u8]) -> Result<()> {
        Ok(())
    }

    fn fetch(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Snapshots to a single file, written via a temp file and rename so a crash
/// mid-write leaves the previous snapshot intact.
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PersistenceLayer for FilePersistence {
    fn persist(&self, snapshot: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, snapshot)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| SchedulerError::Persistence(e.to_string()))
    }

    fn fetch(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SchedulerError::Persistence(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_persistence_restores_nothing() {
        let layer = NoPersistence;
        layer.persist(b"state").unwrap();
        assert_eq!(layer.fetch().unwrap(), None);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layer = FilePersistence::new(dir.path().join("snapshot.json"));

        assert_eq!(layer.fetch().unwrap(), None);

        layer.persist(b"first").unwrap();
        assert_eq!(layer.fetch().unwrap(), Some(b"first".to_vec()));

        layer.persist(b"second").unwrap();
        assert_eq!(layer.fetch().unwrap(), Some(b"second".to_vec()));
    }
}
