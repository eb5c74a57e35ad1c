use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lxd_trust::cert::Fingerprint;
use lxd_trust::client::{ClientError, ClientOptions, ClusterApi, LxdConnector};
use lxd_trust::{ClusterCredential, PeerCertificate, RegisterOutcome, UnregisterOutcome};
use rcgen::{BasicConstraints, Certificate, CertificateParams, IsCa, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const CLIENT_PEM: &str = include_str!("testdata/client.pem");
const CLIENT_FP: &str = "33848a3e65b7e17dcc83ae83f39e9b45d244f6a110d26670eea0b6f526c41904";

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn issue(&self, name: &str) -> (Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![name.to_string()])
            .unwrap()
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();
        (cert, key)
    }
}

/// A minimal LXD API: `/1.0` and the certificates collection.
#[derive(Default)]
struct FakeLxd {
    auth: &'static str,
    trusted: Mutex<BTreeSet<String>>,
    deletable: BTreeSet<String>,
    posts: Mutex<Vec<Value>>,
}

impl FakeLxd {
    fn trusting() -> Self {
        Self {
            auth: "trusted",
            ..Self::default()
        }
    }
}

struct Cluster {
    addr: SocketAddr,
    server_ca: Authority,
    client_ca: Authority,
}

impl Cluster {
    async fn start(lxd: Arc<FakeLxd>) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let server_ca = Authority::new();
        let client_ca = Authority::new();
        let (server_cert, server_key) = server_ca.issue("lxd.invalid");

        let mut client_roots = RootCertStore::empty();
        client_roots.add(client_ca.cert.der().clone()).unwrap();
        let verifier = WebPkiClientVerifier::builder(Arc::new(client_roots))
            .build()
            .unwrap();
        let tls = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(
                vec![server_cert.der().clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server_key.serialize_der())),
            )
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(tls));

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let lxd = Arc::clone(&lxd);
                tokio::spawn(async move {
                    let Ok(tls) = acceptor.accept(tcp).await else {
                        return;
                    };
                    let service = service_fn(move |req| respond(Arc::clone(&lxd), req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(tls), service)
                        .await;
                });
            }
        });

        Self {
            addr,
            server_ca,
            client_ca,
        }
    }

    fn credential(&self) -> ClusterCredential {
        let (cert, key) = self.client_ca.issue("juju-client-0");
        ClusterCredential::new(
            format!("https://{}", self.addr),
            cert.pem(),
            key.serialize_pem(),
            self.server_ca.cert.pem(),
        )
        .unwrap()
    }
}

async fn respond(
    lxd: Arc<FakeLxd>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let body = req
        .into_body()
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();

    let (status, reply) = match (method, path.as_str()) {
        (Method::GET, "/1.0") => (
            StatusCode::OK,
            json!({"type": "sync", "metadata": {
                "auth": lxd.auth,
                "environment": {"server_name": "lxd0"},
            }}),
        ),
        (Method::POST, "/1.0/certificates") => {
            let payload: Value = serde_json::from_slice(&body).unwrap_or_default();
            let certificate = payload["certificate"].as_str().unwrap_or_default().to_owned();
            lxd.posts.lock().unwrap().push(payload);
            if lxd.trusted.lock().unwrap().insert(certificate) {
                (StatusCode::CREATED, json!({"type": "sync", "metadata": {}}))
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    json!({"type": "error", "error": "Certificate already in trust store"}),
                )
            }
        }
        (Method::DELETE, path) => match path.strip_prefix("/1.0/certificates/") {
            Some(fp) if lxd.deletable.contains(fp) => {
                (StatusCode::ACCEPTED, json!({"type": "async", "metadata": {}}))
            }
            _ => (
                StatusCode::NOT_FOUND,
                json!({"type": "error", "error": "Certificate not found"}),
            ),
        },
        _ => (StatusCode::NOT_FOUND, json!({"type": "error", "error": "not found"})),
    };

    let response = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(reply.to_string())))
        .unwrap();
    Ok(response)
}

fn connector(staging: &tempfile::TempDir) -> LxdConnector {
    LxdConnector::new(
        ClientOptions::default()
            .with_staging_dir(staging.path())
            .with_timeout(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn probe_reports_server_name_and_leaves_no_files() {
    let cluster = Cluster::start(Arc::new(FakeLxd::trusting())).await;
    let staging = tempfile::tempdir().unwrap();

    let client = connector(&staging).client(&cluster.credential()).unwrap();
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

    let server = client.probe_trust().await.unwrap();
    assert_eq!(server.server_name, "lxd0");
}

#[tokio::test]
async fn probe_rejects_untrusted_client() {
    let lxd = FakeLxd {
        auth: "untrusted",
        ..FakeLxd::default()
    };
    let cluster = Cluster::start(Arc::new(lxd)).await;
    let staging = tempfile::tempdir().unwrap();

    let client = connector(&staging).client(&cluster.credential()).unwrap();
    let err = client.probe_trust().await.unwrap_err();
    assert!(matches!(err, ClientError::Untrusted { auth } if auth == "untrusted"));
}

#[tokio::test]
async fn probe_fails_against_server_from_other_authority() {
    let cluster = Cluster::start(Arc::new(FakeLxd::trusting())).await;
    let staging = tempfile::tempdir().unwrap();

    let (cert, key) = cluster.client_ca.issue("juju-client-0");
    let impostor_ca = Authority::new();
    let credential = ClusterCredential::new(
        format!("https://{}", cluster.addr),
        cert.pem(),
        key.serialize_pem(),
        impostor_ca.cert.pem(),
    )
    .unwrap();

    let client = connector(&staging).client(&credential).unwrap();
    let err = client.probe_trust().await.unwrap_err();
    assert!(matches!(err, ClientError::Handshake { .. }), "{err:?}");
}

#[tokio::test]
async fn register_posts_client_certificate_then_reports_already_trusted() {
    let lxd = Arc::new(FakeLxd::trusting());
    let cluster = Cluster::start(Arc::clone(&lxd)).await;
    let staging = tempfile::tempdir().unwrap();
    let client = connector(&staging).client(&cluster.credential()).unwrap();

    let cert = PeerCertificate::from_pem(CLIENT_PEM).unwrap();
    assert_eq!(cert.fingerprint().as_str(), CLIENT_FP);

    assert_eq!(client.add_certificate(&cert).await, RegisterOutcome::Created);
    assert_eq!(
        client.add_certificate(&cert).await,
        RegisterOutcome::AlreadyTrusted
    );

    let posts = lxd.posts.lock().unwrap();
    assert_eq!(
        posts[0],
        json!({
            "type": "client",
            "certificate": cert.base64_body(),
            "name": "juju-client-0",
        })
    );
}

#[tokio::test]
async fn unregister_reports_acceptance_and_failure() {
    let lxd = FakeLxd {
        deletable: [CLIENT_FP.to_owned()].into(),
        ..FakeLxd::trusting()
    };
    let cluster = Cluster::start(Arc::new(lxd)).await;
    let staging = tempfile::tempdir().unwrap();
    let client = connector(&staging).client(&cluster.credential()).unwrap();

    let known: Fingerprint = CLIENT_FP.parse().unwrap();
    assert_eq!(
        client.delete_certificate(&known).await,
        UnregisterOutcome::Accepted
    );

    let unknown = Fingerprint::of_der(b"unknown");
    let outcome = client.delete_certificate(&unknown).await;
    assert!(
        matches!(&outcome, UnregisterOutcome::Failed(reason) if reason.contains("404")),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn request_times_out_when_server_stalls() {
    let cluster = Cluster::start(Arc::new(FakeLxd::trusting())).await;
    let credential = cluster.credential();

    let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = stalled.local_addr().unwrap();
    tokio::spawn(async move {
        let (_tcp, _) = stalled.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let credential = ClusterCredential::new(
        format!("https://{addr}"),
        credential.client_cert(),
        credential.client_key(),
        credential.server_ca(),
    )
    .unwrap();

    let staging = tempfile::tempdir().unwrap();
    let client = LxdConnector::new(
        ClientOptions::default()
            .with_staging_dir(staging.path())
            .with_timeout(Duration::from_millis(200)),
    )
    .client(&credential)
    .unwrap();

    let err = client.probe_trust().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "{err:?}");
}
