use crate::error::{Error, Result};
use crate::prelude::{debug, warn};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use std::path::Path;
use std::sync::Arc;

/// Client certificate, private key and pinned server CA for one cluster.
///
/// The private key may be PKCS#8, PKCS#1 (RSA) or SEC1 (EC); LXD emits all
/// three depending on how the client certificate was generated.
pub struct ClientMaterial {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    server_ca: Vec<CertificateDer<'static>>,
}

impl ClientMaterial {
    /// Decodes the material from in-memory PEM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pem`] if any input is not valid PEM, or
    /// [`Error::NoClientCertificate`] if the client certificate PEM holds no certificate.
    pub fn from_pem(client_cert: &[u8], client_key: &[u8], server_ca: &[u8]) -> Result<Self> {
        let cert_chain = CertificateDer::pem_slice_iter(client_cert)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(pem_err("client certificate"))?;
        let key = PrivateKeyDer::from_pem_slice(client_key).map_err(pem_err("client key"))?;
        let server_ca = CertificateDer::pem_slice_iter(server_ca)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(pem_err("server CA"))?;

        Self::new(cert_chain, key, server_ca)
    }

    /// Reads and decodes the material from PEM files.
    ///
    /// # Errors
    ///
    /// Same as [`ClientMaterial::from_pem`], plus I/O failures reported as [`Error::Pem`].
    pub fn from_pem_files(
        client_cert: impl AsRef<Path>,
        client_key: impl AsRef<Path>,
        server_ca: impl AsRef<Path>,
    ) -> Result<Self> {
        let cert_chain = CertificateDer::pem_file_iter(client_cert)
            .map_err(pem_err("client certificate"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(pem_err("client certificate"))?;
        let key = PrivateKeyDer::from_pem_file(client_key).map_err(pem_err("client key"))?;
        let server_ca = CertificateDer::pem_file_iter(server_ca)
            .map_err(pem_err("server CA"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(pem_err("server CA"))?;

        Self::new(cert_chain, key, server_ca)
    }

    fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        server_ca: Vec<CertificateDer<'static>>,
    ) -> Result<Self> {
        if cert_chain.is_empty() {
            return Err(Error::NoClientCertificate);
        }
        Ok(Self {
            cert_chain,
            key,
            server_ca,
        })
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Vec<CertificateDer<'static>>,
        PrivateKeyDer<'static>,
        Vec<CertificateDer<'static>>,
    ) {
        (self.cert_chain, self.key, self.server_ca)
    }
}

impl std::fmt::Debug for ClientMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMaterial")
            .field("cert_chain_len", &self.cert_chain.len())
            .field("key", &"<redacted>")
            .field("server_ca_len", &self.server_ca.len())
            .finish()
    }
}

/// Builds a `RootCertStore` from the pinned server CA certificates.
///
/// ## Errors
///
/// Returns [`Error::NoTrustAnchor`] if no certificate is accepted into the store.
pub(crate) fn roots_from_certs(certs: &[CertificateDer<'static>]) -> Result<Arc<RootCertStore>> {
    let mut store = RootCertStore::empty();

    let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
    debug!("loaded {added} server CA root(s)");
    if ignored > 0 {
        warn!("ignored {ignored} server CA certificate(s) that are not usable as trust anchors");
    }

    if store.is_empty() {
        return Err(Error::NoTrustAnchor);
    }

    Ok(Arc::new(store))
}

fn pem_err(what: &'static str) -> impl Fn(rustls::pki_types::pem::Error) -> Error {
    move |source| Error::Pem { what, source }
}
