//! `CryptoProvider`: compute MIC; sign, encrypt, compress a MIME body part.
//!
//! Pure; no I/O. Certificate and key material is resolved by
//! the caller (see [`crate::certs::CertificateProvider`]) and handed in
//! already-loaded — this module never touches the filesystem.

use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::hash::hash;
use openssl::pkey::{PKeyRef, Private};
use openssl::stack::Stack;
use openssl::x509::X509;

use crate::message::{EncryptAlgorithm, SignAlgorithm};

/// Stateless, thread-safe crypto operations behind the security pipeline.
///
/// Implementations must not hold per-call mutable state; the same instance
/// is shared across concurrently-sending messages.
pub trait CryptoProvider: Send + Sync {
    /// Raw digest bytes over `content`, per the named algorithm.
    fn calculate_mic(&self, content: &[u8], algorithm: SignAlgorithm) -> anyhow::Result<Vec<u8>>;

    /// Produce a DER-encoded CMS `SignedData` (S/MIME multipart/signed
    /// detached signature) over `content`.
    fn sign(
        &self,
        content: &[u8],
        signer_cert: &X509,
        signer_key: &PKeyRef<Private>,
        include_cert: bool,
    ) -> anyhow::Result<Vec<u8>>;

    /// Produce a DER-encoded CMS `EnvelopedData` for the given recipients.
    fn encrypt(
        &self,
        content: &[u8],
        recipients: &[X509],
        cipher: EncryptAlgorithm,
    ) -> anyhow::Result<Vec<u8>>;

    /// RFC 5402 zlib compression of `content`.
    fn compress(&self, content: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Inverse of [`CryptoProvider::compress`]; used by partners
    /// decompressing our own output and by tests.
    fn decompress(&self, content: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Verify a CMS `SignedData` detached-or-attached signature, returning
    /// the certificate that actually verified it.
    fn verify(
        &self,
        signed_der: &[u8],
        content: Option<&[u8]>,
        trusted: &[X509],
    ) -> anyhow::Result<X509>;

    /// Decrypt a CMS `EnvelopedData` blob with the recipient's private key.
    fn decrypt(
        &self,
        enveloped_der: &[u8],
        recipient_cert: &X509,
        recipient_key: &PKeyRef<Private>,
    ) -> anyhow::Result<Vec<u8>>;
}

/// `openssl`-backed implementation; generalizes the original
/// `smime::encrypt_data` helper to cover sign/verify/MIC/compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSslCryptoProvider;

impl CryptoProvider for OpenSslCryptoProvider {
    fn calculate_mic(&self, content: &[u8], algorithm: SignAlgorithm) -> anyhow::Result<Vec<u8>> {
        let digest = hash(algorithm.openssl_digest(), content)?;
        Ok(digest.to_vec())
    }

    fn sign(
        &self,
        content: &[u8],
        signer_cert: &X509,
        signer_key: &PKeyRef<Private>,
        include_cert: bool,
    ) -> anyhow::Result<Vec<u8>> {
        let mut flags = CMSOptions::DETACHED | CMSOptions::BINARY;
        if !include_cert {
            flags |= CMSOptions::NOCERTS;
        }
        let cms = CmsContentInfo::sign(
            Some(signer_cert),
            Some(signer_key),
            None,
            Some(content),
            flags,
        )
        .map_err(|e| anyhow::anyhow!("CMS sign failed: {e}"))?;
        Ok(cms.to_der()?)
    }

    fn encrypt(
        &self,
        content: &[u8],
        recipients: &[X509],
        cipher: EncryptAlgorithm,
    ) -> anyhow::Result<Vec<u8>> {
        let mut stack = Stack::new()?;
        for cert in recipients {
            stack.push(cert.clone())?;
        }
        let cms = CmsContentInfo::encrypt(&stack, content, cipher.openssl_cipher(), CMSOptions::BINARY)
            .map_err(|e| anyhow::anyhow!("CMS encrypt failed: {e}"))?;
        Ok(cms.to_der()?)
    }

    fn compress(&self, content: &[u8]) -> anyhow::Result<Vec<u8>> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, content: &[u8]) -> anyhow::Result<Vec<u8>> {
        use flate2::read::ZlibDecoder;
        use std::io::Read;
        let mut decoder = ZlibDecoder::new(content);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn verify(
        &self,
        signed_der: &[u8],
        content: Option<&[u8]>,
        trusted: &[X509],
    ) -> anyhow::Result<X509> {
        let mut cms = CmsContentInfo::from_der(signed_der)?;
        let mut store_builder = openssl::x509::store::X509StoreBuilder::new()?;
        for cert in trusted {
            store_builder.add_cert(cert.clone())?;
        }
        let store = store_builder.build();

        let mut extra = Stack::new()?;
        for cert in trusted {
            extra.push(cert.clone())?;
        }

        let mut out = Vec::new();
        cms.verify(
            Some(&extra),
            Some(&store),
            content,
            Some(&mut out),
            CMSOptions::BINARY | CMSOptions::NO_SIGNER_CERT_VERIFY,
        )
        .map_err(|e| anyhow::anyhow!("CMS signature verification failed: {e}"))?;

        let signers = cms.signers()?;
        signers
            .iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("CMS SignedData carries no signer certificate"))
    }

    fn decrypt(
        &self,
        enveloped_der: &[u8],
        recipient_cert: &X509,
        recipient_key: &PKeyRef<Private>,
    ) -> anyhow::Result<Vec<u8>> {
        let cms = CmsContentInfo::from_der(enveloped_der)?;
        let mut out = Vec::new();
        cms.decrypt(recipient_key, recipient_cert, &mut out)
            .map_err(|e| anyhow::anyhow!("CMS decrypt failed: {e}"))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mic_is_stable_per_algorithm() {
        let provider = OpenSslCryptoProvider;
        let content = b"hello world";
        for algo in [
            SignAlgorithm::Sha1,
            SignAlgorithm::Sha256,
            SignAlgorithm::Sha384,
            SignAlgorithm::Sha512,
        ] {
            let a = provider.calculate_mic(content, algo).unwrap();
            let b = provider.calculate_mic(content, algo).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn compress_round_trips() {
        let provider = OpenSslCryptoProvider;
        let content = b"some payload that compresses reasonably well well well well";
        let compressed = provider.compress(content).unwrap();
        let restored = provider.decompress(&compressed).unwrap();
        assert_eq!(restored, content);
    }
}
