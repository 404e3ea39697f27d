//! Error taxonomy for the send/receive-MDN state machine.
//!
//! Each variant carries enough context to let the caller route the
//! offending file (sent / error / pending) without re-deriving it from a
//! chained source error.

use thiserror::Error;

/// Disposition category extracted from an MDN, per RFC 3798.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionCategory {
    Processed,
    Warning,
    Error,
}

#[derive(Debug, Error)]
pub enum As2Error {
    #[error("missing required field `{field}` for message {message_id}")]
    InvalidParameter { field: &'static str, message_id: String },

    #[error("configuration error for message {message_id}: {reason}")]
    Config { message_id: String, reason: String },

    #[error("crypto operation failed for message {message_id}: {source}")]
    Crypto {
        message_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP {code} from {url}: {reason}")]
    HttpResponse { url: String, code: u16, reason: String },

    #[error("MDN disposition {category:?} ({disposition}) for message {message_id}")]
    Disposition {
        message_id: String,
        disposition: String,
        category: DispositionCategory,
    },

    #[error("MDN verification failed for message {message_id}: {reason}")]
    MdnVerify { message_id: String, reason: String },
}

impl As2Error {
    /// Whether `Sender` should retry transmission for this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            As2Error::HttpResponse { .. } => true,
            As2Error::Io(_) => true,
            As2Error::Disposition { category, .. } => *category == DispositionCategory::Warning,
            As2Error::InvalidParameter { .. }
            | As2Error::Config { .. }
            | As2Error::Crypto { .. }
            | As2Error::MdnVerify { .. } => false,
        }
    }

    /// Whether this error is terminal for the message (route to error dir),
    /// as opposed to a warning that is treated as a successful send.
    pub fn is_fatal(&self) -> bool {
        match self {
            As2Error::Disposition { category, .. } => *category == DispositionCategory::Error,
            As2Error::MdnVerify { .. } => false,
            _ => true,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            As2Error::InvalidParameter { message_id, .. }
            | As2Error::Config { message_id, .. }
            | As2Error::Crypto { message_id, .. }
            | As2Error::Disposition { message_id, .. }
            | As2Error::MdnVerify { message_id, .. } => Some(message_id),
            As2Error::HttpResponse { .. } | As2Error::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, As2Error>;
