//! `Sender`: top-level orchestrator.

use std::time::Duration;

use bytes::Bytes;

use crate::certs::CertificateProvider;
use crate::crypto::CryptoProvider;
use crate::dumper::Dumper;
use crate::error::As2Error;
use crate::headers::HeaderBuilder;
use crate::mdn::{MdnReceiver, MicHandler, VerificationCertConsumer};
use crate::message::{MdnMode, Message, MessageStatus, Mic};
use crate::pending_store::{PendingRecord, PendingStore};
use crate::pipeline::SecurityPipeline;
use crate::transport::{is_success_status, HttpTransport};

/// Timeouts and retry defaults shared by every outbound connection.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub default_retry_count: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            connect_timeout: Duration::from_millis(60_000),
            read_timeout: Duration::from_millis(60_000),
            default_retry_count: 0,
        }
    }
}

impl SenderConfig {
    /// Thin convenience loader for `key=value` lines (one per line, `#`
    /// comments, blank lines ignored) — not a general config-file format,
    /// just enough to keep `connecttimeout`/`readtimeout`/`retrycount` out
    /// of `main()`. The real partnership/config store is out of scope.
    pub fn from_key_value(text: &str) -> Self {
        let mut config = SenderConfig::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else { continue };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "connecttimeout" => {
                    if let Ok(ms) = value.parse() {
                        config.connect_timeout = Duration::from_millis(ms);
                    }
                }
                "readtimeout" => {
                    if let Ok(ms) = value.parse() {
                        config.read_timeout = Duration::from_millis(ms);
                    }
                }
                "retrycount" => {
                    if let Ok(n) = value.parse() {
                        config.default_retry_count = n;
                    }
                }
                _ => {}
            }
        }
        config
    }
}

/// Notified exactly once per message when `Sender::send` fails terminally.
pub trait TerminateHook: Send + Sync {
    fn terminate(&self, message_id: &str, error: &As2Error);
}

pub struct Sender<'a> {
    transport: HttpTransport,
    crypto: &'a dyn CryptoProvider,
    certs: &'a dyn CertificateProvider,
    mic_handler: &'a dyn MicHandler,
    pending_store: Option<&'a PendingStore>,
    dumper: Option<&'a dyn Dumper>,
    terminate_hook: Option<&'a dyn TerminateHook>,
    verification_consumer: Option<&'a dyn VerificationCertConsumer>,
    header_builder: HeaderBuilder,
}

impl<'a> Sender<'a> {
    pub fn new(
        transport: HttpTransport,
        crypto: &'a dyn CryptoProvider,
        certs: &'a dyn CertificateProvider,
        mic_handler: &'a dyn MicHandler,
    ) -> Self {
        Sender {
            transport,
            crypto,
            certs,
            mic_handler,
            pending_store: None,
            dumper: None,
            terminate_hook: None,
            verification_consumer: None,
            header_builder: HeaderBuilder::default(),
        }
    }

    pub fn with_pending_store(mut self, store: &'a PendingStore) -> Self {
        self.pending_store = Some(store);
        self
    }

    pub fn with_dumper(mut self, dumper: &'a dyn Dumper) -> Self {
        self.dumper = Some(dumper);
        self
    }

    pub fn with_terminate_hook(mut self, hook: &'a dyn TerminateHook) -> Self {
        self.terminate_hook = Some(hook);
        self
    }

    pub fn with_verification_consumer(mut self, consumer: &'a dyn VerificationCertConsumer) -> Self {
        self.verification_consumer = Some(consumer);
        self
    }

    /// Validate, secure, transmit and (for sync MDN) reconcile one message.
    /// Retries immediately on a retryable failure, for exactly
    /// `min(failures, retry_count + 1)` HTTP attempts total.
    pub async fn send(&self, message: &mut Message) -> Result<(), As2Error> {
        let result = self.send_inner(message).await;
        if let Err(error) = &result {
            if error.is_fatal() {
                if let Some(hook) = self.terminate_hook {
                    hook.terminate(&message.message_id, error);
                }
            }
        }
        result
    }

    async fn send_inner(&self, message: &mut Message) -> Result<(), As2Error> {
        self.check_required(message)?;

        let mic_source_algorithm = message
            .partnership
            .sign_algorithm
            .unwrap_or(crate::message::SignAlgorithm::Sha256);
        let use_rfc3851 = message.partnership.use_rfc3851_mic_names;

        let mdn_requested = !matches!(message.partnership.mdn_mode, MdnMode::None);
        // Headers are folded into the MIC only when the content actually
        // went through one of the three transforms; a plain send's MIC
        // covers the body alone (RFC 4130 §7.3.1).
        let include_headers_in_mic = message.partnership.sign_algorithm.is_some()
            || message.partnership.encrypt_algorithm.is_some()
            || message.partnership.compression.is_some();
        let mut mic_holder: Option<Vec<u8>> = None;
        {
            let crypto = self.crypto;
            let holder = &mut mic_holder;
            let pipeline = SecurityPipeline::new(self.crypto, self.certs);
            let mic_source: crate::pipeline::MicSourceCallback = if mdn_requested {
                Box::new(move |part| {
                    let input = part.mic_digest_input(include_headers_in_mic);
                    if let Ok(digest) = crypto.calculate_mic(&input, mic_source_algorithm) {
                        *holder = Some(digest);
                    }
                })
            } else {
                Box::new(|_part| {})
            };
            pipeline.secure(message, mic_source)?;
        }

        if mdn_requested {
            let algorithm_name = mic_source_algorithm.wire_name(use_rfc3851);
            if let Some(digest) = mic_holder {
                let mic = Mic { digest, algorithm: algorithm_name.to_string() };
                message.attributes.original_mic = Some(mic.clone());

                if let MdnMode::Async { .. } = &message.partnership.mdn_mode {
                    if let Some(store) = self.pending_store {
                        let pending_path = message
                            .attributes
                            .pending_file_path
                            .clone()
                            .unwrap_or_default();
                        store
                            .put(&PendingRecord {
                                message_id: message.message_id.clone(),
                                original_mic: mic,
                                pending_file_path: pending_path,
                            })
                            .map_err(|e| {
                                As2Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                            })?;
                    }
                    message.attributes.status = MessageStatus::Pending;
                }
            }
        }

        let headers = self.header_builder.build(message);
        // The container's own top-level header block (Content-Type,
        // Content-Transfer-Encoding, ...) is redundant with the real HTTP
        // headers just built above; only nested parts of a multipart body
        // carry headers the wire body actually needs.
        let body = Bytes::from(message.body.to_wire_body().into_bytes());

        let retry_count = if message.partnership.retry_count > 0 {
            message.partnership.retry_count
        } else {
            0
        };

        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            let result = self
                .transport
                .post(&message.partnership.as2_url, &headers, body.clone(), self.dumper, &message.message_id)
                .await
                .and_then(|resp| {
                    if is_success_status(resp.status) {
                        Ok(resp)
                    } else {
                        Err(As2Error::HttpResponse {
                            url: message.partnership.as2_url.clone(),
                            code: resp.status,
                            reason: String::from_utf8_lossy(&resp.body).into_owned(),
                        })
                    }
                });

            match result {
                Ok(resp) => break resp,
                Err(e) if e.is_retryable() && attempt <= retry_count => {
                    tracing::warn!(message_id = %message.message_id, attempt, %e, "transmission failed, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        if !mdn_requested {
            message.attributes.status = MessageStatus::Sent;
            return Ok(());
        }

        match &message.partnership.mdn_mode {
            MdnMode::Sync => {
                let receiver = MdnReceiver::new(self.crypto, self.certs, self.mic_handler);
                let receiver = if let Some(consumer) = self.verification_consumer {
                    receiver.with_verification_consumer(consumer)
                } else {
                    receiver
                };
                let mdn = receiver.receive(message, response.headers, response.body)?;
                message.mdn = Some(mdn);
                message.attributes.status = MessageStatus::Sent;
            }
            MdnMode::Async { .. } => {
                // Reconciliation happens later via the (out-of-scope)
                // inbound path; the pending record is already written.
            }
            MdnMode::None => unreachable!("mdn_requested implies mode != None"),
        }

        Ok(())
    }

    fn check_required(&self, message: &Message) -> Result<(), As2Error> {
        let message_id = message.message_id.clone();
        let fail = |field: &'static str| As2Error::InvalidParameter { field, message_id: message_id.clone() };

        if message.content_type.is_empty() {
            return Err(fail("content_type"));
        }
        if message.partnership.as2_url.is_empty() {
            return Err(fail("partnership.as2_url"));
        }
        if message.partnership.sender_as2_id.is_empty() {
            return Err(fail("partnership.sender_as2_id"));
        }
        if message.partnership.receiver_as2_id.is_empty() {
            return Err(fail("partnership.receiver_as2_id"));
        }
        if message.subject.is_empty() {
            return Err(fail("subject"));
        }
        if message.sender_email.is_empty() {
            return Err(fail("sender_email"));
        }
        if message.body.body.is_empty() && message.body.parts.is_empty() {
            return Err(fail("body"));
        }
        Ok(())
    }
}
