//! Resolution of the cluster credential.
//!
//! The privileged lookup command is tried first. When the unit has no access
//! to it, or it returns an incomplete document, the static configuration
//! options are used instead.

use crate::prelude::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

mod lookup;

pub use lookup::{CredentialLookup, LookupCommand, LookupError};

/// Endpoint and TLS material for one LXD cluster.
///
/// Invariant: every field is non-empty. The whole value is zeroized on drop
/// and `Debug` never prints the private key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ClusterCredential {
    endpoint: String,
    client_cert: String,
    client_key: String,
    server_ca: String,
}

impl ClusterCredential {
    /// Returns `None` unless all four fields are non-blank.
    pub fn new(
        endpoint: impl Into<String>,
        client_cert: impl Into<String>,
        client_key: impl Into<String>,
        server_ca: impl Into<String>,
    ) -> Option<Self> {
        let credential = Self {
            endpoint: endpoint.into(),
            client_cert: client_cert.into(),
            client_key: client_key.into(),
            server_ca: server_ca.into(),
        };

        let complete = [
            &credential.endpoint,
            &credential.client_cert,
            &credential.client_key,
            &credential.server_ca,
        ]
        .iter()
        .all(|field| !field.trim().is_empty());

        complete.then_some(credential)
    }

    /// Returns the cluster API endpoint as configured.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the PEM client certificate.
    pub fn client_cert(&self) -> &str {
        &self.client_cert
    }

    /// Returns the PEM client private key.
    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    /// Returns the PEM server CA certificate.
    pub fn server_ca(&self) -> &str {
        &self.server_ca
    }
}

impl fmt::Debug for ClusterCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredential")
            .field("endpoint", &self.endpoint)
            .field("client_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Static configuration options, used when the lookup is unavailable.
///
/// Missing keys deserialize as empty strings.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticConfig {
    /// Cluster API endpoint, e.g. `https://10.0.0.1:8443`.
    pub lxd_endpoint: String,
    /// PEM client certificate.
    pub lxd_client_cert: String,
    /// PEM client private key.
    pub lxd_client_key: String,
    /// PEM server CA certificate.
    pub lxd_server_cert: String,
}

impl StaticConfig {
    /// Returns the credential if all four options are set.
    pub fn credential(&self) -> Option<ClusterCredential> {
        ClusterCredential::new(
            self.lxd_endpoint.as_str(),
            self.lxd_client_cert.as_str(),
            self.lxd_client_key.as_str(),
            self.lxd_server_cert.as_str(),
        )
    }
}

impl fmt::Debug for StaticConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticConfig")
            .field("lxd_endpoint", &self.lxd_endpoint)
            .field("lxd_client_cert_set", &!self.lxd_client_cert.is_empty())
            .field("lxd_client_key", &"<redacted>")
            .field("lxd_server_cert_set", &!self.lxd_server_cert.is_empty())
            .finish()
    }
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    credential: Option<LookupCredential>,
}

#[derive(Deserialize)]
struct LookupCredential {
    #[serde(default)]
    attrs: Option<LookupAttrs>,
}

#[derive(Deserialize)]
struct LookupAttrs {
    #[serde(rename = "client-cert", default)]
    client_cert: Option<String>,
    #[serde(rename = "client-key", default)]
    client_key: Option<String>,
    #[serde(rename = "server-cert", default)]
    server_cert: Option<String>,
}

impl LookupResponse {
    fn credential(&self) -> Option<ClusterCredential> {
        let attrs = self.credential.as_ref()?.attrs.as_ref()?;
        ClusterCredential::new(
            self.endpoint.as_deref()?,
            attrs.client_cert.as_deref()?,
            attrs.client_key.as_deref()?,
            attrs.server_cert.as_deref()?,
        )
    }
}

/// Resolves the cluster credential.
///
/// Returns `Ok(None)` when neither source provides all four fields.
///
/// # Errors
///
/// Returns the [`LookupError`] when the lookup fails for any reason other than
/// the program being absent or access being denied.
pub async fn resolve<L>(
    lookup: &L,
    config: &StaticConfig,
) -> Result<Option<ClusterCredential>, LookupError>
where
    L: CredentialLookup,
{
    match lookup.lookup().await {
        Ok(raw) => {
            let raw = Zeroizing::new(raw);
            match serde_json::from_slice::<LookupResponse>(&raw) {
                Ok(response) => {
                    if let Some(credential) = response.credential() {
                        debug!("using credentials from lookup");
                        return Ok(Some(credential));
                    }
                    debug!("lookup returned incomplete credentials; trying configuration");
                }
                Err(e) => warn!("failed to parse JSON from credential lookup: {e}"),
            }
        }
        Err(e) if e.is_expected() => {
            debug!("credential lookup unavailable ({e}); trying configuration");
        }
        Err(e) => return Err(e),
    }

    let credential = config.credential();
    if credential.is_some() {
        debug!("using credentials from configuration");
    }
    Ok(credential)
}
