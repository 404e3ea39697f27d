//! Certificate-store provider. [`CryptoProvider`](crate::crypto::CryptoProvider) never touches
//! the filesystem; something has to turn a partnership's configured alias
//! into loaded key/cert material, and that is this trait.
//!
//! [`FileCertificateProvider`] is the minimal directory-backed
//! implementation this crate ships, reading one DER certificate and PEM
//! private key per alias out of a flat directory. A production deployment
//! swapping in a PKCS#12 keystore, an HSM, or a partnership database only
//! needs to implement this trait; nothing downstream depends on the file
//! layout.

use std::path::{Path, PathBuf};

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

pub trait CertificateProvider: Send + Sync {
    /// Resolve a recipient/verification certificate by alias.
    fn cert(&self, alias: &str) -> anyhow::Result<X509>;

    /// Resolve a signer's certificate + private key by alias.
    fn signing_identity(&self, alias: &str) -> anyhow::Result<(X509, PKey<Private>)>;
}

/// Loads `<alias>.p7s` (DER certificate) and `<alias>.key.pem` (PEM private
/// key) from a flat directory. Alias values must already be filesystem-safe
/// (the partnership layer is responsible for that, same as for the pending
/// store — see `pending_store::safe_filename`).
pub struct FileCertificateProvider {
    cert_dir: PathBuf,
}

impl FileCertificateProvider {
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        FileCertificateProvider { cert_dir: cert_dir.into() }
    }

    fn cert_path(&self, alias: &str) -> PathBuf {
        self.cert_dir.join(format!("{alias}.p7s"))
    }

    fn key_path(&self, alias: &str) -> PathBuf {
        self.cert_dir.join(format!("{alias}.key.pem"))
    }

    fn load_cert_from(path: &Path, alias: &str) -> anyhow::Result<X509> {
        let der = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read certificate for {alias}: {e}"))?;
        X509::from_der(&der)
            .map_err(|e| anyhow::anyhow!("failed to parse DER certificate for {alias}: {e}"))
    }
}

impl CertificateProvider for FileCertificateProvider {
    fn cert(&self, alias: &str) -> anyhow::Result<X509> {
        Self::load_cert_from(&self.cert_path(alias), alias)
    }

    fn signing_identity(&self, alias: &str) -> anyhow::Result<(X509, PKey<Private>)> {
        let cert = Self::load_cert_from(&self.cert_path(alias), alias)?;
        let key_pem = std::fs::read(self.key_path(alias))
            .map_err(|e| anyhow::anyhow!("failed to read private key for {alias}: {e}"))?;
        let key = PKey::private_key_from_pem(&key_pem)
            .map_err(|e| anyhow::anyhow!("failed to parse private key for {alias}: {e}"))?;
        Ok((cert, key))
    }
}
