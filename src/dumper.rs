//! `Dumper`: optional tee of the outgoing request and incoming response to
//! disk, one file per message.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;

pub trait Dumper: Send + Sync {
    fn dump_outgoing(&self, message_id: &str, headers: &HashMap<String, String>, body: &Bytes);
    fn dump_incoming(&self, message_id: &str, headers: &HashMap<String, String>, body: &Bytes);
}

/// Writes `<message-id>.outgoing.dump` / `<message-id>.incoming.dump` into a
/// directory. Deliberately an explicit constructor argument on `Sender`,
/// not a global keyed off a system property — an environment variable read
/// by the outer binary (`src/bin/as2send.rs`) builds this as a convenience
/// default, never the core itself.
pub struct FileDumper {
    dir: PathBuf,
}

impl FileDumper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileDumper { dir: dir.into() }
    }

    fn write(&self, message_id: &str, suffix: &str, headers: &HashMap<String, String>, body: &Bytes) {
        let safe_id = crate::pending_store::safe_filename(message_id);
        let path = self.dir.join(format!("{safe_id}.{suffix}.dump"));
        let mut contents = String::new();
        for (name, value) in headers {
            contents.push_str(name);
            contents.push_str(": ");
            contents.push_str(value);
            contents.push_str("\r\n");
        }
        contents.push_str("\r\n");
        let mut bytes = contents.into_bytes();
        bytes.extend_from_slice(body);
        if let Err(e) = std::fs::write(&path, &bytes) {
            tracing::warn!(message_id, path = %path.display(), error = %e, "failed to write dump file");
        }
    }
}

impl Dumper for FileDumper {
    fn dump_outgoing(&self, message_id: &str, headers: &HashMap<String, String>, body: &Bytes) {
        self.write(message_id, "outgoing", headers, body);
    }

    fn dump_incoming(&self, message_id: &str, headers: &HashMap<String, String>, body: &Bytes) {
        self.write(message_id, "incoming", headers, body);
    }
}
