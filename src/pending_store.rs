//! `PendingStore`: persist `{original MIC, pending filename}` keyed by
//! Message-ID for asynchronous MDN reconciliation.

use std::path::{Path, PathBuf};

use crate::message::Mic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub message_id: String,
    pub original_mic: Mic,
    pub pending_file_path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PendingStoreError {
    #[error("no pending record for message {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Turn a Message-ID (which is typically `<...@host>` and may contain
/// characters unsafe in a filename) into a filesystem-safe name.
pub fn safe_filename(message_id: &str) -> String {
    message_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Filesystem-directory-backed store. Writes are atomic (write-temp +
/// rename) so a concurrent `get` never observes a torn record.
pub struct PendingStore {
    dir: PathBuf,
}

impl PendingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PendingStore { dir: dir.into() }
    }

    fn path_for(&self, message_id: &str) -> PathBuf {
        self.dir.join(safe_filename(message_id))
    }

    pub fn put(&self, record: &PendingRecord) -> Result<(), PendingStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let final_path = self.path_for(&record.message_id);
        let tmp_path = final_path.with_extension("tmp");

        // Every byte written here is ASCII (base64 + algorithm name + a
        // filesystem path), so plain UTF-8 bytes are safe as-is.
        let contents = format!("{}\n{}\n", record.original_mic.to_wire_string(), record.pending_file_path);
        std::fs::write(&tmp_path, contents.as_bytes())?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn get(&self, message_id: &str) -> Result<PendingRecord, PendingStoreError> {
        let path = self.path_for(message_id);
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| PendingStoreError::NotFound(message_id.to_string()))?;
        let mut lines = contents.lines();
        let mic_line = lines.next().ok_or_else(|| PendingStoreError::NotFound(message_id.to_string()))?;
        let pending_file_path =
            lines.next().ok_or_else(|| PendingStoreError::NotFound(message_id.to_string()))?;
        let original_mic =
            Mic::parse(mic_line).ok_or_else(|| PendingStoreError::NotFound(message_id.to_string()))?;
        Ok(PendingRecord {
            message_id: message_id.to_string(),
            original_mic,
            pending_file_path: pending_file_path.to_string(),
        })
    }

    pub fn delete(&self, message_id: &str) -> Result<(), PendingStoreError> {
        let path = self.path_for(message_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(test)]
    fn dir(&self) -> &Path {
        &self.dir
    }
}
