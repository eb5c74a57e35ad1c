/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `lxd-trust-rustls`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// PEM input could not be read or decoded.
    #[error("failed reading PEM {what}")]
    Pem {
        /// Which piece of material was being read.
        what: &'static str,
        /// The underlying PEM error.
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    /// The client certificate PEM contained no certificate.
    #[error("client certificate PEM contains no certificate")]
    NoClientCertificate,

    /// None of the server CA certificates could be used as a trust anchor.
    #[error("no server CA certificate was accepted as a trust anchor")]
    NoTrustAnchor,

    /// The rustls crypto provider is not installed.
    #[error("rustls crypto provider is not installed")]
    NoCryptoProvider,

    /// A rustls error occurred.
    #[error("rustls error")]
    Rustls(#[from] rustls::Error),
}
