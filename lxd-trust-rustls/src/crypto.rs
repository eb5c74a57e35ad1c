use crate::error::{Error, Result};
use std::sync::{Arc, OnceLock};

/// Ensures a rustls crypto provider is installed as the process default.
///
/// Idempotent. If the application already installed a provider, that one wins.
pub(crate) fn ensure_crypto_provider_installed() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        // Already installed by the application: keep theirs.
        let _ = crypto_provider().install_default();
    });
}

/// Returns the process default provider after making sure one is installed.
pub(crate) fn default_provider() -> Result<Arc<rustls::crypto::CryptoProvider>> {
    ensure_crypto_provider_installed();
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .ok_or(Error::NoCryptoProvider)
}

#[cfg(feature = "ring")]
fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(feature = "aws-lc-rs")]
fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}
