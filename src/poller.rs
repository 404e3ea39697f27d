//! `DirectoryPoller`: outbox scanning, file-size stability, and
//! sent/error/pending routing.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::message::{Message, MessageStatus, Partnership};
use crate::mime::MimeContainer;
use crate::sender::Sender;

/// What to do when the post-success move to the sent directory fails.
/// Silently swallowing this is not an option; an operator needs to know
/// one way or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSentMovePolicy {
    /// Log and leave the file in the outbox. The file WILL be re-sent on
    /// the next stable-size detection — accept duplicate delivery in
    /// exchange for never losing a file an operator didn't get to look at.
    LogAndContinue,
    /// Surface the failure so the caller (and an operator) must intervene.
    /// No further poll cycles proceed past this file until it's resolved.
    Raise,
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("failed to move sent file {path}: {source}")]
    SentMoveFailed { path: PathBuf, #[source] source: std::io::Error },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct DirectoryPollerConfig {
    pub outbox_dir: PathBuf,
    pub error_dir: PathBuf,
    pub sent_dir: Option<PathBuf>,
    pub pending_dir: Option<PathBuf>,
    pub mime_type: String,
    pub send_filename: bool,
    pub missing_sent_move_policy: MissingSentMovePolicy,
}

impl Default for DirectoryPollerConfig {
    fn default() -> Self {
        DirectoryPollerConfig {
            outbox_dir: PathBuf::new(),
            error_dir: PathBuf::new(),
            sent_dir: None,
            pending_dir: None,
            mime_type: "application/octet-stream".to_string(),
            send_filename: false,
            missing_sent_move_policy: MissingSentMovePolicy::LogAndContinue,
        }
    }
}

pub struct DirectoryPoller {
    config: DirectoryPollerConfig,
    partnership: Arc<Partnership>,
    /// Owned by a single poller thread, never shared.
    tracked: HashMap<PathBuf, u64>,
}

impl DirectoryPoller {
    pub fn new(config: DirectoryPollerConfig, partnership: Arc<Partnership>) -> Self {
        DirectoryPoller { config, partnership, tracked: HashMap::new() }
    }

    /// True if the file cannot currently be opened for writing, e.g. an
    /// upstream process still has it open for append.
    fn is_write_locked(path: &Path) -> bool {
        OpenOptions::new().append(true).open(path).is_err()
    }

    /// One poll cycle: scan, update tracking, return the paths that just
    /// became stable.
    fn scan_stable(&mut self) -> std::io::Result<Vec<PathBuf>> {
        let mut current = HashMap::new();
        let entries = match std::fs::read_dir(&self.config.outbox_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() || Self::is_write_locked(&path) {
                continue;
            }
            current.insert(path, metadata.len());
        }

        let mut stable = Vec::new();
        let mut next_tracked = HashMap::new();
        for (path, size) in current {
            match self.tracked.get(&path) {
                Some(&prev_size) if prev_size == size => {
                    stable.push(path);
                }
                _ => {
                    next_tracked.insert(path, size);
                }
            }
        }
        self.tracked = next_tracked;
        Ok(stable)
    }

    /// Run one full poll cycle against `sender`, building, submitting and
    /// routing each newly-stable file.
    pub async fn poll(&mut self, sender: &Sender<'_>) -> std::io::Result<Vec<PollOutcome>> {
        let stable = self.scan_stable()?;
        let mut outcomes = Vec::with_capacity(stable.len());
        for path in stable {
            let outcome = self.process_one(&path, sender).await;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn process_one(&self, path: &Path, sender: &Sender<'_>) -> PollOutcome {
        match self.build_and_send(path, sender).await {
            Ok(status) => match self.route_success(path, status) {
                Ok(()) => PollOutcome::Sent(path.to_path_buf()),
                Err(e) => PollOutcome::RoutingFailed(path.to_path_buf(), e.to_string()),
            },
            Err(e) => {
                let message_text = e.to_string();
                if let Err(route_err) = self.route_error(path) {
                    tracing::error!(path = %path.display(), error = %route_err, "failed to route file to error directory");
                }
                PollOutcome::Failed(path.to_path_buf(), message_text)
            }
        }
    }

    async fn build_and_send(&self, path: &Path, sender: &Sender<'_>) -> Result<MessageStatus, crate::error::As2Error> {
        let bytes = std::fs::read(path)?;
        let content_type = self.config.mime_type.clone();
        let cte = self.partnership.content_transfer_encoding.clone();
        let mut body = MimeContainer::single_part(content_type.clone(), &cte, &bytes);

        if self.config.send_filename {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                body.set_header("Content-Disposition", format!("attachment; filename={name}"));
            }
        }

        let message_id = format!("<{}@as2send>", Uuid::new_v4());
        let subject = format!(
            "AS2 message from {} to {}",
            self.partnership.sender_as2_id, self.partnership.receiver_as2_id
        );
        let mut message = Message::new(
            message_id,
            subject,
            format!("{}@as2send.local", self.partnership.sender_as2_id),
            content_type,
            body,
            self.partnership.clone(),
        );

        if let Some(pending_dir) = &self.config.pending_dir {
            let pending_path = pending_dir.join(path.file_name().unwrap_or_default());
            message.attributes.pending_file_path = Some(pending_path.to_string_lossy().into_owned());
        }

        sender.send(&mut message).await?;
        Ok(message.attributes.status)
    }

    fn route_success(&self, path: &Path, status: MessageStatus) -> Result<(), PollError> {
        if status == MessageStatus::Pending {
            if let Some(pending_dir) = &self.config.pending_dir {
                std::fs::create_dir_all(pending_dir)?;
                let dest = pending_dir.join(path.file_name().unwrap_or_default());
                std::fs::copy(path, &dest)?;
            }
        }

        match &self.config.sent_dir {
            Some(sent_dir) => {
                std::fs::create_dir_all(sent_dir)?;
                let dest = sent_dir.join(path.file_name().unwrap_or_default());
                if let Err(source) = std::fs::rename(path, &dest) {
                    return match self.config.missing_sent_move_policy {
                        MissingSentMovePolicy::LogAndContinue => {
                            tracing::warn!(
                                path = %path.display(), error = %source,
                                "failed to move sent file; leaving in outbox, may be re-sent"
                            );
                            Ok(())
                        }
                        MissingSentMovePolicy::Raise => {
                            Err(PollError::SentMoveFailed { path: path.to_path_buf(), source })
                        }
                    };
                }
                Ok(())
            }
            None => {
                std::fs::remove_file(path)?;
                Ok(())
            }
        }
    }

    fn route_error(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config.error_dir)?;
        let file_name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let mut suffix = 0u32;
        loop {
            let candidate = self.config.error_dir.join(format!("{file_name}.err-{suffix:03}"));
            if !candidate.exists() {
                std::fs::rename(path, &candidate)?;
                return Ok(());
            }
            suffix += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Sent(PathBuf),
    Failed(PathBuf, String),
    RoutingFailed(PathBuf, String),
}

/// Split a poller filename into attributes per a delimiter-separated
/// `format` template. Intentionally a
/// small helper, not a templating engine — e.g. `format = "partner.date.seq"`,
/// `delimiters = "."` turns `acme.20260101.7.edi` into
/// `{"partner": "acme", "date": "20260101", "seq": "7"}` (trailing
/// extension beyond the named fields is ignored).
pub fn parse_filename_attributes(
    filename: &str,
    format: &str,
    delimiters: &str,
) -> HashMap<String, String> {
    let delim = delimiters.chars().next().unwrap_or('.');
    let fields: Vec<&str> = format.split(delim).collect();
    let values: Vec<&str> = filename.split(delim).collect();
    fields
        .into_iter()
        .zip(values)
        .map(|(f, v)| (f.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filename_attributes() {
        let attrs = parse_filename_attributes("acme.20260101.7.edi", "partner.date.seq", ".");
        assert_eq!(attrs.get("partner").unwrap(), "acme");
        assert_eq!(attrs.get("date").unwrap(), "20260101");
        assert_eq!(attrs.get("seq").unwrap(), "7");
    }

    #[test]
    fn scan_stable_requires_two_equal_size_polls() {
        let tmp = tempfile::tempdir().unwrap();
        let outbox = tmp.path().join("outbox");
        std::fs::create_dir_all(&outbox).unwrap();
        let file_path = outbox.join("file.edi");
        std::fs::write(&file_path, b"hello").unwrap();

        let partnership = Arc::new(test_partnership());
        let config = DirectoryPollerConfig {
            outbox_dir: outbox.clone(),
            error_dir: tmp.path().join("error"),
            sent_dir: Some(tmp.path().join("sent")),
            pending_dir: None,
            mime_type: "application/octet-stream".to_string(),
            send_filename: false,
            missing_sent_move_policy: MissingSentMovePolicy::LogAndContinue,
        };
        let mut poller = DirectoryPoller::new(config, partnership);

        let first = poller.scan_stable().unwrap();
        assert!(first.is_empty(), "a freshly-seen file must not be stable yet");

        let second = poller.scan_stable().unwrap();
        assert_eq!(second, vec![file_path]);
    }

    fn test_partnership() -> Partnership {
        Partnership {
            sender_as2_id: "Sender".into(),
            receiver_as2_id: "Receiver".into(),
            as2_url: "https://partner.example/as2".into(),
            sign_algorithm: None,
            encrypt_algorithm: None,
            compression: None,
            compress_before_sign: false,
            mdn_mode: crate::message::MdnMode::None,
            mdn_options: None,
            disposition_notification_to: None,
            content_transfer_encoding: "binary".into(),
            sender_key_alias: None,
            receiver_cert_alias: None,
            include_certificate_in_signed_content: false,
            use_rfc3851_mic_names: false,
            quote_header_values: false,
            retry_count: 0,
        }
    }
}
