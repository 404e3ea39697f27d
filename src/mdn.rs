//! `MdnReceiver`: consume a synchronous MDN response.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use openssl::x509::X509;

use crate::certs::CertificateProvider;
use crate::crypto::CryptoProvider;
use crate::error::{As2Error, DispositionCategory};
use crate::message::{Message, Mic};
use crate::mime::MimeContainer;

#[derive(Debug, Clone)]
pub struct Mdn {
    pub headers: HashMap<String, String>,
    pub disposition: String,
    pub mic: Option<Mic>,
    pub explanation: Option<String>,
}

/// Receives the MIC-match / MIC-mismatch notification. `returned` is
/// `None` in `on_mic_mismatch` when the MDN omitted `Received-Content-MIC`
/// entirely — still a mismatch, not a silent no-op.
pub trait MicHandler: Send + Sync {
    fn on_mic_match(&self, message_id: &str, returned: &Mic);
    fn on_mic_mismatch(&self, message_id: &str, original: &Mic, returned: Option<&Mic>);
}

/// Invoked with whichever certificate actually verified the MDN's
/// signature.
pub trait VerificationCertConsumer: Send + Sync {
    fn on_verified(&self, message_id: &str, cert: &X509);
}

/// Optional persistence hook for a received MDN. Absence is not an error.
pub trait MdnStorage: Send + Sync {
    fn store_mdn(&self, message_id: &str, mdn: &Mdn);
}

pub struct MdnReceiver<'a> {
    crypto: &'a dyn CryptoProvider,
    certs: &'a dyn CertificateProvider,
    mic_handler: &'a dyn MicHandler,
    verification_consumer: Option<&'a dyn VerificationCertConsumer>,
    storage: Option<&'a dyn MdnStorage>,
}

impl<'a> MdnReceiver<'a> {
    pub fn new(
        crypto: &'a dyn CryptoProvider,
        certs: &'a dyn CertificateProvider,
        mic_handler: &'a dyn MicHandler,
    ) -> Self {
        MdnReceiver { crypto, certs, mic_handler, verification_consumer: None, storage: None }
    }

    pub fn with_verification_consumer(mut self, consumer: &'a dyn VerificationCertConsumer) -> Self {
        self.verification_consumer = Some(consumer);
        self
    }

    pub fn with_storage(mut self, storage: &'a dyn MdnStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// `response_headers`/`response_body` have already been read off the
    /// wire (and dumped, if a dumper is configured) by `HttpTransport`.
    /// Parses the MDN body, verifies its signature if present, extracts
    /// the disposition and reported MIC, and classifies the outcome.
    pub fn receive(
        &self,
        message: &Message,
        response_headers: HashMap<String, String>,
        response_body: Bytes,
    ) -> Result<Mdn, As2Error> {
        let message_id = message.message_id.as_str();

        let body_text = String::from_utf8_lossy(&response_body).into_owned();
        let header_lines: Vec<(Cow<str>, Cow<str>)> = response_headers
            .iter()
            .map(|(k, v)| (Cow::Owned(k.clone()), Cow::Owned(v.clone())))
            .collect();
        let (_, container) = MimeContainer::parse_mime_container_data(&body_text, header_lines)
            .map_err(|e| As2Error::MdnVerify {
                message_id: message_id.to_string(),
                reason: format!("failed to parse MDN body as MIME: {e}"),
            })?;

        let content_type = container.find_header_value("Content-Type").unwrap_or_default();
        let is_signed = content_type.to_ascii_lowercase().starts_with("multipart/signed");

        let report_container = if is_signed {
            let signed_part = container.parts.first().ok_or_else(|| As2Error::MdnVerify {
                message_id: message_id.to_string(),
                reason: "multipart/signed MDN carries no content part".to_string(),
            })?;
            let signature_part = container.parts.get(1).ok_or_else(|| As2Error::MdnVerify {
                message_id: message_id.to_string(),
                reason: "multipart/signed MDN carries no signature part".to_string(),
            })?;
            let signature_der = decode_base64_body(&signature_part.body).map_err(|e| As2Error::MdnVerify {
                message_id: message_id.to_string(),
                reason: format!("failed to decode MDN signature: {e}"),
            })?;

            let trusted = self.resolve_verification_cert(message)?;
            let signed_content = signed_part.to_entity_bytes();
            let verifying_cert = self
                .crypto
                .verify(&signature_der, Some(&signed_content), std::slice::from_ref(&trusted))
                .map_err(|e| As2Error::MdnVerify {
                    message_id: message_id.to_string(),
                    reason: e.to_string(),
                })?;
            if let Some(consumer) = self.verification_consumer {
                consumer.on_verified(message_id, &verifying_cert);
            }
            signed_part.clone()
        } else {
            container.clone()
        };

        let (disposition, mic) = extract_disposition_notification(&report_container).ok_or_else(|| {
            As2Error::MdnVerify {
                message_id: message_id.to_string(),
                reason: "MDN carries no message/disposition-notification part".to_string(),
            }
        })?;
        let explanation = extract_human_explanation(&report_container);

        let mdn = Mdn { headers: response_headers, disposition: disposition.clone(), mic: mic.clone(), explanation };

        if let Some(storage) = self.storage {
            storage.store_mdn(message_id, &mdn);
        }

        if let Some(original) = &message.attributes.original_mic {
            match &mic {
                Some(returned) if original == returned => {
                    self.mic_handler.on_mic_match(message_id, returned);
                }
                Some(returned) => {
                    self.mic_handler.on_mic_mismatch(message_id, original, Some(returned));
                }
                None => {
                    self.mic_handler.on_mic_mismatch(message_id, original, None);
                }
            }
        }

        let category = disposition_category(&disposition);
        match category {
            DispositionCategory::Error => {
                return Err(As2Error::Disposition {
                    message_id: message_id.to_string(),
                    disposition,
                    category,
                })
            }
            DispositionCategory::Warning => {
                tracing::warn!(message_id, %disposition, "MDN reported a warning disposition");
            }
            DispositionCategory::Processed => {}
        }

        Ok(mdn)
    }

    fn resolve_verification_cert(&self, message: &Message) -> Result<X509, As2Error> {
        // The MDN's signer is verified against the certificate we'd
        // otherwise use to encrypt *to* the receiver, since in this crate's
        // lean certificate model one alias per partner covers both roles
        // (see DESIGN.md).
        let alias = message.partnership.receiver_cert_alias.as_deref().ok_or_else(|| {
            As2Error::Config {
                message_id: message.message_id.clone(),
                reason: "MDN signature verification requires a receiver cert alias".to_string(),
            }
        })?;
        self.certs.cert(alias).map_err(|e| As2Error::Config {
            message_id: message.message_id.clone(),
            reason: format!("failed to resolve MDN verification cert `{alias}`: {e}"),
        })
    }
}

fn decode_base64_body(body: &str) -> anyhow::Result<Vec<u8>> {
    use base64::{prelude::BASE64_STANDARD, Engine};
    let stripped: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64_STANDARD.decode(stripped).map_err(|e| anyhow::anyhow!("{e}"))
}

/// Find the `message/disposition-notification` part and pull out the
/// `Disposition:` and `Received-Content-MIC:` fields (RFC 3798 §3).
fn extract_disposition_notification(container: &MimeContainer) -> Option<(String, Option<Mic>)> {
    if let Some(ct) = container.find_header_value("Content-Type") {
        if ct.to_ascii_lowercase().starts_with("message/disposition-notification") {
            return parse_disposition_fields(&container.body);
        }
    }
    for part in &container.parts {
        if let Some(result) = extract_disposition_notification(part) {
            return Some(result);
        }
    }
    None
}

fn parse_disposition_fields(body: &str) -> Option<(String, Option<Mic>)> {
    let mut disposition = None;
    let mut mic = None;
    for line in body.lines() {
        let line = line.trim();
        if let Some(value) = strip_field(line, "Disposition:") {
            disposition = Some(value.to_string());
        } else if let Some(value) = strip_field(line, "Received-Content-MIC:") {
            mic = Mic::parse(value);
        }
    }
    disposition.map(|d| (d, mic))
}

fn strip_field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(line[prefix.len()..].trim())
    } else {
        None
    }
}

/// The human-readable `text/plain` part of a `multipart/report`, if present.
fn extract_human_explanation(container: &MimeContainer) -> Option<String> {
    if let Some(ct) = container.find_header_value("Content-Type") {
        if ct.to_ascii_lowercase().starts_with("text/plain") && !container.body.trim().is_empty() {
            return Some(container.body.trim().to_string());
        }
    }
    for part in &container.parts {
        if let Some(text) = extract_human_explanation(part) {
            return Some(text);
        }
    }
    None
}

/// Classify a disposition string into processed/warning/error (RFC 3798).
pub fn disposition_category(disposition: &str) -> DispositionCategory {
    let modifier = disposition.split(';').nth(1).unwrap_or("").trim().to_ascii_lowercase();
    if modifier.starts_with("failed") || modifier.contains("error") {
        DispositionCategory::Error
    } else if modifier.contains("warning") {
        DispositionCategory::Warning
    } else {
        DispositionCategory::Processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_disposition_is_processed() {
        let d = "automatic-action/MDN-sent-automatically; processed";
        assert_eq!(disposition_category(d), DispositionCategory::Processed);
    }

    #[test]
    fn failed_disposition_is_error() {
        let d = "automatic-action/MDN-sent-automatically; failed/failure: decryption-failed";
        assert_eq!(disposition_category(d), DispositionCategory::Error);
    }

    #[test]
    fn warning_disposition_is_warning() {
        let d = "automatic-action/MDN-sent-automatically; processed/warning: some warning text";
        assert_eq!(disposition_category(d), DispositionCategory::Warning);
    }

    #[test]
    fn parses_disposition_and_mic_fields() {
        let body = "Reporting-UA: partner-as2\r\nDisposition: automatic-action/MDN-sent-automatically; processed\r\nReceived-Content-MIC: YmFzZTY0ZGlnZXN0, sha-256\r\n";
        let (disposition, mic) = parse_disposition_fields(body).unwrap();
        assert_eq!(disposition, "automatic-action/MDN-sent-automatically; processed");
        let mic = mic.unwrap();
        assert_eq!(mic.algorithm, "sha-256");
    }
}
