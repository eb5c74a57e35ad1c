//! Errors for the cluster API client.

use crate::client::endpoint::EndpointError;
use crate::staging::StagingError;
use hyper::StatusCode;
use std::io;
use std::time::Duration;

/// An error that may arise connecting to or querying the cluster API.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The credential's endpoint is not usable.
    #[error("invalid cluster endpoint")]
    Endpoint(#[from] EndpointError),

    /// The credential could not be staged on disk.
    #[error("failed staging credentials")]
    Staging(#[from] StagingError),

    /// The TLS material is unusable.
    #[error("invalid TLS credentials")]
    Tls(#[from] lxd_trust_rustls::Error),

    /// The TCP connection could not be established.
    #[error("failed connecting to {authority}")]
    Connect {
        /// Host and port that were dialed.
        authority: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed.
    #[error("TLS handshake with {authority} failed")]
    Handshake {
        /// Host and port that were dialed.
        authority: String,
        /// The underlying I/O error, wrapping the rustls error.
        #[source]
        source: io::Error,
    },

    /// HTTP protocol error.
    #[error("HTTP error")]
    Http(#[from] hyper::Error),

    /// The request could not be built.
    #[error("invalid HTTP request")]
    Request(#[from] hyper::http::Error),

    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The API answered with an unexpected status.
    #[error("unexpected response status {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The response body is not the expected JSON.
    #[error("failed decoding API response")]
    Decode(#[from] serde_json::Error),

    /// The cluster does not trust the client certificate.
    #[error("client certificate is not trusted by the cluster (auth: {auth:?})")]
    Untrusted {
        /// The `auth` value reported by the cluster.
        auth: String,
    },
}

/// Renders an error and its sources on one line.
pub(crate) fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
