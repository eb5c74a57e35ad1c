//! Mutually authenticated client for the LXD cluster API.
//!
//! [`LxdConnector`] turns a [`ClusterCredential`] into an [`LxdClient`]. The
//! credential is staged to disk only while the TLS configuration is built.
//! Every request then opens its own TCP and TLS connection and speaks
//! HTTP/1.1 over it, bounded by one timeout.

use crate::cert::{Fingerprint, PeerCertificate};
use crate::credential::ClusterCredential;
use crate::prelude::debug;
use crate::staging::StagedCredentials;
use crate::sync::{RegisterOutcome, TrustApi, UnregisterOutcome};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use lxd_trust_rustls::{mtls_client, ClientMaterial};
use serde::{Deserialize, Serialize};
use std::future::{ready, Future};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

mod endpoint;
mod error;

pub use endpoint::{Endpoint, EndpointError, DEFAULT_PORT};
pub use error::ClientError;
pub(crate) use error::describe;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const STAGING_DIR_ENV: &str = "JUJU_CHARM_DIR";

const SERVER_PATH: &str = "/1.0";
const CERTIFICATES_PATH: &str = "/1.0/certificates";
const TRUSTED: &str = "trusted";
const ALREADY_TRUSTED: &str = "Certificate already in trust store";

/// Options shared by every client a connector creates.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    timeout: Duration,
    staging_dir: PathBuf,
}

impl Default for ClientOptions {
    /// 5 second timeout; credentials staged in `$JUJU_CHARM_DIR`, or the
    /// system temporary directory when that is unset.
    fn default() -> Self {
        let staging_dir = std::env::var_os(STAGING_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map_or_else(std::env::temp_dir, PathBuf::from);

        Self {
            timeout: DEFAULT_TIMEOUT,
            staging_dir,
        }
    }
}

impl ClientOptions {
    /// Sets the bound on each request, covering connect, handshake, request
    /// and response body.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the directory credential files are staged in.
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the staging directory.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}

/// Facts reported by a cluster that trusts the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// `environment.server_name` of the answering cluster member.
    pub server_name: String,
}

/// The cluster API as used by the integrator.
pub trait ClusterApi: TrustApi {
    /// Checks that the cluster trusts the client certificate.
    ///
    /// Fails with [`ClientError::Untrusted`] when it does not.
    fn probe_trust(&self) -> impl Future<Output = Result<ServerInfo, ClientError>> + Send;
}

/// Creates API clients from credentials.
pub trait ClusterConnector {
    /// The client type produced.
    type Api: ClusterApi;

    /// Builds a client for the credential's cluster. No request is sent.
    fn connect(
        &self,
        credential: &ClusterCredential,
    ) -> impl Future<Output = Result<Self::Api, ClientError>> + Send;
}

/// Connector for real LXD clusters.
#[derive(Debug, Clone, Default)]
pub struct LxdConnector {
    options: ClientOptions,
}

impl LxdConnector {
    /// Creates a connector with the given options.
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    /// Returns the connector options.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Builds a client for the credential's cluster.
    ///
    /// The credential files exist on disk only for the duration of this call.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Endpoint`] if the endpoint does not parse.
    /// - [`ClientError::Staging`] if the credential cannot be written.
    /// - [`ClientError::Tls`] if the PEM material is unusable.
    pub fn client(&self, credential: &ClusterCredential) -> Result<LxdClient, ClientError> {
        let endpoint = Endpoint::parse(credential.endpoint())?;

        let material = {
            let staged = StagedCredentials::stage(self.options.staging_dir(), credential)?;
            ClientMaterial::from_pem_files(
                staged.client_cert(),
                staged.client_key(),
                staged.server_cert(),
            )?
        };

        let config = mtls_client(material)
            .with_alpn_protocols([b"http/1.1"])
            .build()?;

        debug!("built client for {}", endpoint.authority());
        Ok(LxdClient {
            endpoint,
            tls: TlsConnector::from(Arc::new(config)),
            timeout: self.options.timeout(),
        })
    }
}

impl ClusterConnector for LxdConnector {
    type Api = LxdClient;

    fn connect(
        &self,
        credential: &ClusterCredential,
    ) -> impl Future<Output = Result<LxdClient, ClientError>> + Send {
        ready(self.client(credential))
    }
}

/// Client for one LXD cluster.
#[derive(Clone)]
pub struct LxdClient {
    endpoint: Endpoint,
    tls: TlsConnector,
    timeout: Duration,
}

impl std::fmt::Debug for LxdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LxdClient")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    metadata: T,
}

#[derive(Deserialize)]
struct ServerMetadata {
    auth: String,
    #[serde(default)]
    environment: Option<ServerEnvironment>,
}

#[derive(Deserialize)]
struct ServerEnvironment {
    #[serde(default)]
    server_name: String,
}

#[derive(Serialize)]
struct CertificatesPost<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    certificate: &'a str,
    name: &'a str,
}

impl LxdClient {
    /// Returns the cluster endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `GET /1.0`.
    ///
    /// # Errors
    ///
    /// Transport and decoding errors, a non-2xx status, or
    /// [`ClientError::Untrusted`] when `metadata.auth` is not `"trusted"`.
    pub async fn server(&self) -> Result<ServerInfo, ClientError> {
        let (status, body) = self.send(Method::GET, SERVER_PATH, None).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let response: ApiResponse<ServerMetadata> = serde_json::from_slice(&body)?;
        let metadata = response.metadata;
        if metadata.auth != TRUSTED {
            return Err(ClientError::Untrusted {
                auth: metadata.auth,
            });
        }

        Ok(ServerInfo {
            server_name: metadata
                .environment
                .map(|env| env.server_name)
                .unwrap_or_default(),
        })
    }

    /// `POST /1.0/certificates` with the certificate as a client certificate.
    pub async fn add_certificate(&self, cert: &PeerCertificate) -> RegisterOutcome {
        let payload = CertificatesPost {
            kind: "client",
            certificate: cert.base64_body(),
            name: cert.name(),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => return RegisterOutcome::Failed(describe(&e)),
        };

        match self.send(Method::POST, CERTIFICATES_PATH, Some(body)).await {
            Ok((status, _)) if status.is_success() => RegisterOutcome::Created,
            Ok((status, body)) => {
                let text = String::from_utf8_lossy(&body);
                if text.contains(ALREADY_TRUSTED) {
                    RegisterOutcome::AlreadyTrusted
                } else {
                    RegisterOutcome::Failed(describe(&status_error(status, &body)))
                }
            }
            Err(e) => RegisterOutcome::Failed(describe(&e)),
        }
    }

    /// `DELETE /1.0/certificates/<fingerprint>`.
    pub async fn delete_certificate(&self, fp: &Fingerprint) -> UnregisterOutcome {
        let path = format!("{CERTIFICATES_PATH}/{fp}");
        match self.send(Method::DELETE, &path, None).await {
            Ok((status, _)) if status.is_success() => UnregisterOutcome::Accepted,
            Ok((status, body)) => UnregisterOutcome::Failed(describe(&status_error(status, &body))),
            Err(e) => UnregisterOutcome::Failed(describe(&e)),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        debug!("{method} {path} on {}", self.endpoint.authority());
        tokio::time::timeout(self.timeout, self.exchange(method, path, body))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    async fn exchange(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        let authority = self.endpoint.authority();

        let tcp = TcpStream::connect((self.endpoint.host(), self.endpoint.port()))
            .await
            .map_err(|source| ClientError::Connect {
                authority: authority.clone(),
                source,
            })?;
        let tls = self
            .tls
            .connect(self.endpoint.server_name().clone(), tcp)
            .await
            .map_err(|source| ClientError::Handshake {
                authority: authority.clone(),
                source,
            })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("connection closed with error: {e}");
            }
        });

        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, authority);
        if body.is_some() {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        let request = request.body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        Ok((status, body))
    }
}

impl TrustApi for LxdClient {
    fn register(&self, cert: &PeerCertificate) -> impl Future<Output = RegisterOutcome> + Send {
        self.add_certificate(cert)
    }

    fn unregister(&self, fp: &Fingerprint) -> impl Future<Output = UnregisterOutcome> + Send {
        self.delete_certificate(fp)
    }
}

impl ClusterApi for LxdClient {
    fn probe_trust(&self) -> impl Future<Output = Result<ServerInfo, ClientError>> + Send {
        self.server()
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> ClientError {
    ClientError::Status {
        status,
        body: String::from_utf8_lossy(body).trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = ClientOptions::default()
            .with_timeout(Duration::from_millis(250))
            .with_staging_dir("/run/lxd-trust");
        assert_eq!(options.timeout(), Duration::from_millis(250));
        assert_eq!(options.staging_dir(), Path::new("/run/lxd-trust"));
    }

    #[test]
    fn test_default_timeout_is_five_seconds() {
        assert_eq!(ClientOptions::default().timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_register_payload_shape() {
        let payload = CertificatesPost {
            kind: "client",
            certificate: "MIIB",
            name: "juju-client-0",
        };
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "client", "certificate": "MIIB", "name": "juju-client-0"})
        );
    }

    #[test]
    fn test_client_rejects_bad_endpoint_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        let connector = LxdConnector::new(ClientOptions::default().with_staging_dir(dir.path()));
        let credential = ClusterCredential::new("ftp://10.0.0.1", "c", "k", "s").unwrap();

        let err = connector.client(&credential).unwrap_err();
        assert!(matches!(err, ClientError::Endpoint(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_client_removes_staged_files_on_bad_pem() {
        let dir = tempfile::tempdir().unwrap();
        let connector = LxdConnector::new(ClientOptions::default().with_staging_dir(dir.path()));
        let credential =
            ClusterCredential::new("https://10.0.0.1", "not pem", "not pem", "not pem").unwrap();

        let err = connector.client(&credential).unwrap_err();
        assert!(matches!(err, ClientError::Tls(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
