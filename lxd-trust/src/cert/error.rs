//! Error types for peer certificate parsing and fingerprints.

use tokio_rustls::rustls::pki_types::pem;
use x509_parser::error::X509Error;

/// An error that may arise parsing a certificate advertised by a peer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CertificateError {
    /// The input holds no PEM `CERTIFICATE` block, or the block is malformed.
    #[error("failed decoding PEM certificate")]
    Pem(#[source] pem::Error),

    /// The PEM block decoded, but its contents are not an X.509 certificate.
    #[error("failed parsing X.509 certificate")]
    ParseX509Certificate(#[from] X509Error),

    /// A fingerprint string is not 32 hex-encoded bytes.
    #[error("invalid certificate fingerprint: {0:?}")]
    InvalidFingerprint(String),
}
