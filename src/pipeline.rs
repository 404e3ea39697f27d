//! `SecurityPipeline`: apply compress/sign/encrypt to a MIME body part in
//! protocol-correct order.

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use crate::certs::CertificateProvider;
use crate::crypto::CryptoProvider;
use crate::error::As2Error;
use crate::message::{CompressOrder, Message, SignAlgorithm};
use crate::mime::MimeContainer;

/// Invoked at the moment the bytes that will be signed (or, absent
/// signing, the source bytes) are fixed — the MIC input. A single-use
/// closure, not embedded in `Message`, to avoid spooky action at a
/// distance.
pub type MicSourceCallback<'cb> = Box<dyn FnOnce(&MimeContainer<'static>) + 'cb>;

pub struct SecurityPipeline<'a> {
    crypto: &'a dyn CryptoProvider,
    certs: &'a dyn CertificateProvider,
}

impl<'a> SecurityPipeline<'a> {
    pub fn new(crypto: &'a dyn CryptoProvider, certs: &'a dyn CertificateProvider) -> Self {
        SecurityPipeline { crypto, certs }
    }

    /// Run the compress/sign/encrypt pipeline over `message.body`, calling
    /// `on_mic_source` exactly once with whichever body the MIC must be
    /// computed over, and update `message`'s
    /// Content-Type/CTE headers as the final step produces them.
    pub fn secure(
        &self,
        message: &mut Message,
        mic_source: MicSourceCallback<'_>,
    ) -> Result<(), As2Error> {
        let message_id = message.message_id.clone();
        let partnership = message.partnership.clone();

        let mut current = message.body.clone();
        let mut mic_source = Some(mic_source);
        let mut fire_mic_callback = |part: &MimeContainer<'static>| {
            if let Some(cb) = mic_source.take() {
                cb(part);
            }
        };

        // Step 1: compress-before-sign.
        if let (Some(_), CompressOrder::BeforeSign) =
            (partnership.compression, partnership.compress_order())
        {
            current = self.compress(&current, &message_id)?;
        }

        let signed = partnership.sign_algorithm.is_some();
        let encrypted = partnership.encrypt_algorithm.is_some();
        let compressed = partnership.compression.is_some();

        // Step 2: sign.
        if let Some(algorithm) = partnership.sign_algorithm {
            // The MIC is computed over exactly what gets signed.
            fire_mic_callback(&current);

            let (signer_cert, signer_key) = self.resolve_signing_identity(&message_id, &partnership)?;
            current = self.sign(&current, &signer_cert, &signer_key, algorithm, &partnership, &message_id)?;
        } else {
            // Not signing: the MIC covers the source body untouched by
            // compression unless compress-before-sign already
            // happened, in which case that *is* the source-equivalent body
            // for MIC purposes once compressed-before-sign is in play.
            fire_mic_callback(&current);
        }

        // Step 3: compress-after-sign.
        if let (Some(_), CompressOrder::AfterSign) =
            (partnership.compression, partnership.compress_order())
        {
            current = self.compress(&current, &message_id)?;
        }

        // Step 4: encrypt.
        if let Some(cipher) = partnership.encrypt_algorithm {
            let recipient_cert = self.resolve_recipient_cert(&message_id, &partnership)?;
            let der = self
                .crypto
                .encrypt(&current.to_entity_bytes(), &[recipient_cert], cipher)
                .map_err(|source| As2Error::Crypto { message_id: message_id.clone(), source })?;
            current = MimeContainer::enveloped_data(&der);
        }

        // Side effects on the header map.
        message.headers.insert(
            "Content-Transfer-Encoding".to_string(),
            partnership.content_transfer_encoding.clone(),
        );
        if compressed && !signed && !encrypted {
            message.content_type = "application/octet-stream".to_string();
            message.headers.insert("Content-Type".to_string(), message.content_type.clone());
        } else {
            let content_type = current
                .find_header_value("Content-Type")
                .map(|v| v.into_owned())
                .unwrap_or_else(|| message.content_type.clone());
            message.content_type = content_type.clone();
            message.headers.insert("Content-Type".to_string(), content_type);
        }

        message.body = current;
        Ok(())
    }

    fn resolve_signing_identity(
        &self,
        message_id: &str,
        partnership: &crate::message::Partnership,
    ) -> Result<(X509, PKey<Private>), As2Error> {
        let alias = partnership.sender_key_alias.as_deref().ok_or_else(|| As2Error::Config {
            message_id: message_id.to_string(),
            reason: "signing requested but no sender key alias configured".to_string(),
        })?;
        self.certs.signing_identity(alias).map_err(|e| As2Error::Config {
            message_id: message_id.to_string(),
            reason: format!("failed to resolve signing identity `{alias}`: {e}"),
        })
    }

    fn resolve_recipient_cert(
        &self,
        message_id: &str,
        partnership: &crate::message::Partnership,
    ) -> Result<X509, As2Error> {
        let alias = partnership.receiver_cert_alias.as_deref().ok_or_else(|| As2Error::Config {
            message_id: message_id.to_string(),
            reason: "encryption requested but no receiver cert alias configured".to_string(),
        })?;
        self.certs.cert(alias).map_err(|e| As2Error::Config {
            message_id: message_id.to_string(),
            reason: format!("failed to resolve recipient certificate `{alias}`: {e}"),
        })
    }

    fn compress(&self, part: &MimeContainer<'static>, message_id: &str) -> Result<MimeContainer<'static>, As2Error> {
        let compressed = self
            .crypto
            .compress(&part.to_entity_bytes())
            .map_err(|source| As2Error::Crypto { message_id: message_id.to_string(), source })?;
        let mut container = MimeContainer::single_part(
            "application/pkcs7-mime; smime-type=compressed-data".to_string(),
            "base64",
            &compressed,
        );
        container.set_header("Content-Disposition", "attachment; filename=smime.p7z".to_string());
        Ok(container)
    }

    fn sign(
        &self,
        part: &MimeContainer<'static>,
        signer_cert: &X509,
        signer_key: &PKey<Private>,
        algorithm: SignAlgorithm,
        partnership: &crate::message::Partnership,
        message_id: &str,
    ) -> Result<MimeContainer<'static>, As2Error> {
        let content = part.to_entity_bytes();
        let signature = self
            .crypto
            .sign(&content, signer_cert, signer_key, partnership.include_certificate_in_signed_content)
            .map_err(|source| As2Error::Crypto { message_id: message_id.to_string(), source })?;
        let micalg = algorithm.wire_name(partnership.use_rfc3851_mic_names);
        Ok(MimeContainer::multipart_signed(part.clone(), &signature, micalg))
    }
}
