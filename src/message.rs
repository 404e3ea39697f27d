//! Message, partnership and MIC data carrier types.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{prelude::BASE64_STANDARD, Engine};

use crate::mdn::Mdn;
use crate::mime::MimeContainer;

/// How (if at all) the partner should send back a Message Disposition Notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdnMode {
    None,
    Sync,
    /// Carries the receipt-delivery URL the async MDN will be POSTed back to.
    Async { receipt_delivery_url: String },
}

/// Whether compression runs before or after signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressOrder {
    BeforeSign,
    AfterSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignAlgorithm {
    /// The MIC algorithm identifier as it appears on the wire, per the
    /// RFC 3851 vs RFC 5751 naming flag.
    pub fn wire_name(&self, use_rfc3851_names: bool) -> &'static str {
        match (self, use_rfc3851_names) {
            (SignAlgorithm::Sha1, true) => "sha1",
            (SignAlgorithm::Sha1, false) => "sha-1",
            (SignAlgorithm::Sha256, true) => "sha256",
            (SignAlgorithm::Sha256, false) => "sha-256",
            (SignAlgorithm::Sha384, true) => "sha384",
            (SignAlgorithm::Sha384, false) => "sha-384",
            (SignAlgorithm::Sha512, true) => "sha512",
            (SignAlgorithm::Sha512, false) => "sha-512",
        }
    }

    pub fn openssl_digest(&self) -> openssl::hash::MessageDigest {
        match self {
            SignAlgorithm::Sha1 => openssl::hash::MessageDigest::sha1(),
            SignAlgorithm::Sha256 => openssl::hash::MessageDigest::sha256(),
            SignAlgorithm::Sha384 => openssl::hash::MessageDigest::sha384(),
            SignAlgorithm::Sha512 => openssl::hash::MessageDigest::sha512(),
        }
    }

    /// Parse a partnership-configured algorithm name. Returns `None` for an
    /// unrecognized identifier; the caller substitutes the default and logs
    /// a warning.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Some(SignAlgorithm::Sha1),
            "sha256" => Some(SignAlgorithm::Sha256),
            "sha384" => Some(SignAlgorithm::Sha384),
            "sha512" => Some(SignAlgorithm::Sha512),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptAlgorithm {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    TripleDesCbc,
}

impl EncryptAlgorithm {
    pub fn openssl_cipher(&self) -> openssl::symm::Cipher {
        match self {
            EncryptAlgorithm::Aes128Cbc => openssl::symm::Cipher::aes_128_cbc(),
            EncryptAlgorithm::Aes192Cbc => openssl::symm::Cipher::aes_192_cbc(),
            EncryptAlgorithm::Aes256Cbc => openssl::symm::Cipher::aes_256_cbc(),
            EncryptAlgorithm::TripleDesCbc => openssl::symm::Cipher::des_ede3_cbc(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "aes128" | "aes128cbc" => Some(EncryptAlgorithm::Aes128Cbc),
            "aes192" | "aes192cbc" => Some(EncryptAlgorithm::Aes192Cbc),
            "aes256" | "aes256cbc" => Some(EncryptAlgorithm::Aes256Cbc),
            "3des" | "tripledes" | "des3" => Some(EncryptAlgorithm::TripleDesCbc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Zlib,
}

/// Read-only configuration snapshot for one trading-partner relationship.
#[derive(Debug, Clone)]
pub struct Partnership {
    pub sender_as2_id: String,
    pub receiver_as2_id: String,
    pub as2_url: String,
    pub sign_algorithm: Option<SignAlgorithm>,
    pub encrypt_algorithm: Option<EncryptAlgorithm>,
    pub compression: Option<CompressionType>,
    pub compress_before_sign: bool,
    pub mdn_mode: MdnMode,
    pub mdn_options: Option<String>,
    pub disposition_notification_to: Option<String>,
    pub content_transfer_encoding: String,
    /// Certificate-store alias for the sender's signing key/cert.
    pub sender_key_alias: Option<String>,
    /// Certificate-store alias for the receiver's encryption cert.
    pub receiver_cert_alias: Option<String>,
    pub include_certificate_in_signed_content: bool,
    pub use_rfc3851_mic_names: bool,
    pub quote_header_values: bool,
    pub retry_count: u32,
}

impl Partnership {
    /// Structural invariants checked eagerly so a broken partnership fails
    /// before any network or crypto work is attempted.
    pub fn validate(&self) -> Result<(), String> {
        if let MdnMode::Async { receipt_delivery_url } = &self.mdn_mode {
            if receipt_delivery_url.is_empty() {
                return Err("async MDN mode requires a non-empty receipt-delivery URL".into());
            }
        }
        if self.sign_algorithm.is_some() && self.sender_key_alias.is_none() {
            return Err("signing algorithm set but no sender key alias configured".into());
        }
        if self.encrypt_algorithm.is_some() && self.receiver_cert_alias.is_none() {
            return Err("encryption algorithm set but no receiver cert alias configured".into());
        }
        Ok(())
    }

    pub fn compress_order(&self) -> CompressOrder {
        if self.compress_before_sign {
            CompressOrder::BeforeSign
        } else {
            CompressOrder::AfterSign
        }
    }
}

/// A `{digest, algorithm}` pair. Equality is byte-wise on the
/// digest AND identical (case-sensitive) algorithm identifier.
#[derive(Debug, Clone)]
pub struct Mic {
    pub digest: Vec<u8>,
    pub algorithm: String,
}

impl PartialEq for Mic {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.algorithm == other.algorithm
    }
}
impl Eq for Mic {}

impl Mic {
    /// The AS2 wire form: `base64(digest), algorithm-id`.
    pub fn to_wire_string(&self) -> String {
        format!("{}, {}", BASE64_STANDARD.encode(&self.digest), self.algorithm)
    }

    /// Parse a MIC off the wire, e.g. from an MDN's `Original-Message-ID`
    /// disposition field: `"<base64>, sha-256"`.
    pub fn parse(wire: &str) -> Option<Self> {
        let (b64, algo) = wire.split_once(',')?;
        let digest = BASE64_STANDARD.decode(b64.trim()).ok()?;
        Some(Mic { digest, algorithm: algo.trim().to_string() })
    }
}

/// Transient, per-message state.
#[derive(Debug, Clone, Default)]
pub struct MessageAttributes {
    pub destination_ip: Option<String>,
    pub destination_port: Option<u16>,
    /// Filesystem path the poller copies the source file to when MDN
    /// reconciliation is deferred (async mode).
    pub pending_file_path: Option<String>,
    pub status: MessageStatus,
    /// Original MIC computed before transmission, stashed for later
    /// comparison against the MDN's reported MIC.
    pub original_mic: Option<Mic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStatus {
    #[default]
    New,
    Sent,
    Pending,
    Error,
}

/// The data carrier passed through the whole send path.
///
/// Invariant: `body` is populated from the moment the source file is read
/// until the message is discarded; nothing in this crate constructs a
/// `Message` without one.
pub struct Message {
    pub message_id: String,
    pub subject: String,
    pub content_type: String,
    pub body: MimeContainer<'static>,
    pub attributes: MessageAttributes,
    pub headers: HashMap<String, String>,
    pub partnership: Arc<Partnership>,
    pub mdn: Option<Mdn>,
    pub sender_email: String,
}

impl Message {
    pub fn new(
        message_id: String,
        subject: String,
        sender_email: String,
        content_type: String,
        body: MimeContainer<'static>,
        partnership: Arc<Partnership>,
    ) -> Self {
        Message {
            message_id,
            subject,
            content_type,
            body,
            attributes: MessageAttributes::default(),
            headers: HashMap::new(),
            partnership,
            mdn: None,
            sender_email,
        }
    }
}
