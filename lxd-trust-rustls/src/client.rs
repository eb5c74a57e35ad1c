use crate::error::{Error, Result};
use crate::material::{roots_from_certs, ClientMaterial};
use crate::verifier::PinnedCaVerifier;
use rustls::ClientConfig;
use std::sync::Arc;

/// Builds a [`rustls::ClientConfig`] for an LXD cluster API.
///
/// The resulting client configuration:
///
/// * presents the client certificate from [`ClientMaterial`]
/// * validates the server chain against the pinned server CA
/// * accepts a server presenting exactly one of the pinned certificates
/// * skips server-name verification
///
/// # Examples
///
/// ```no_run
/// use lxd_trust_rustls::{mtls_client, ClientMaterial};
///
/// # fn example(cert: &[u8], key: &[u8], ca: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
/// let config = mtls_client(ClientMaterial::from_pem(cert, key, ca)?)
///     .with_alpn_protocols([b"http/1.1"])
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientConfigBuilder {
    material: ClientMaterial,
    alpn_protocols: Vec<Vec<u8>>,
}

impl std::fmt::Debug for ClientConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfigBuilder")
            .field("material", &self.material)
            .field("alpn_protocols", &self.alpn_protocols)
            .finish()
    }
}

impl ClientConfigBuilder {
    /// Creates a new builder for the given material. No ALPN protocols are advertised by default.
    pub fn new(material: ClientMaterial) -> Self {
        Self {
            material,
            alpn_protocols: Vec::new(),
        }
    }

    /// Sets the ALPN protocols, most preferred first.
    #[must_use]
    pub fn with_alpn_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        self.alpn_protocols = protocols.into_iter().map(|p| p.as_ref().to_vec()).collect();
        self
    }

    /// Builds the `rustls::ClientConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    ///
    /// * no rustls crypto provider can be installed
    /// * none of the server CA certificates is usable as a trust anchor
    /// * the client certificate and key do not form a usable signing identity
    pub fn build(self) -> Result<ClientConfig> {
        let provider = crate::crypto::default_provider()?;
        let (cert_chain, key, server_ca) = self.material.into_parts();

        let roots = roots_from_certs(&server_ca)?;
        let verifier = Arc::new(PinnedCaVerifier::new(
            roots,
            server_ca,
            provider.signature_verification_algorithms,
        ));

        let mut cfg = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(cert_chain, key)
            .map_err(Error::from)?;

        cfg.alpn_protocols = self.alpn_protocols;
        Ok(cfg)
    }
}
