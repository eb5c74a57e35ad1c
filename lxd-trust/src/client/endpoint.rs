//! Cluster endpoint parsing.

use tokio_rustls::rustls::pki_types::ServerName;
use url::{Host, Url};

/// Port of the LXD API when the endpoint names none.
pub const DEFAULT_PORT: u16 = 8443;

const HTTPS_SCHEME: &str = "https";
const HTTP_SCHEME: &str = "http";

// Parsing under a scheme with no default port keeps an explicit `:443`.
const OPAQUE_SCHEME: &str = "lxd";

/// Errors returned by [`Endpoint::parse`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EndpointError {
    /// The input could not be parsed as a URL.
    #[error("cluster endpoint is not a valid URL")]
    Parse(#[from] url::ParseError),

    /// The URL scheme is neither `https` nor `http`.
    #[error("cluster endpoint scheme must be https: got {0:?}")]
    UnsupportedScheme(String),

    /// The URL has no host.
    #[error("cluster endpoint must include a host")]
    MissingHost,

    /// The host is neither a valid DNS name nor an IP address.
    #[error("cluster endpoint host is not a valid DNS name or IP address")]
    InvalidHost,

    /// The URL carries user info, a query, a fragment, or a non-root path.
    #[error("cluster endpoint must be scheme, host and port only")]
    UnexpectedComponent,
}

/// Where the cluster API listens.
///
/// The API is always reached over TLS. A `http://` prefix is tolerated and
/// treated like `https://`, and a bare `host:port` is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
}

impl Endpoint {
    /// Parses an endpoint such as `https://10.0.0.1:8443`, `10.0.0.1` or
    /// `https://[fd42::1]`.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointError`] if the input is not a URL with a host, uses
    /// another scheme, or carries more than scheme, host and port.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let input = input.trim();
        let (scheme, rest) = input.split_once("://").unwrap_or((HTTPS_SCHEME, input));
        if !scheme.eq_ignore_ascii_case(HTTPS_SCHEME) && !scheme.eq_ignore_ascii_case(HTTP_SCHEME) {
            return Err(EndpointError::UnsupportedScheme(scheme.to_owned()));
        }

        let url = Url::parse(&format!("{OPAQUE_SCHEME}://{rest}"))?;

        if !url.username().is_empty()
            || url.password().is_some()
            || url.query().is_some()
            || url.fragment().is_some()
            || !matches!(url.path(), "" | "/")
        {
            return Err(EndpointError::UnexpectedComponent);
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(EndpointError::MissingHost),
        };

        let server_name =
            ServerName::try_from(host.clone()).map_err(|_| EndpointError::InvalidHost)?;

        Ok(Self {
            port: url.port().unwrap_or(DEFAULT_PORT),
            host,
            server_name,
        })
    }

    /// Host name or IP address, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Name handed to rustls. Only used for SNI; it is never verified.
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// Value of the HTTP `Host` header.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Endpoint, EndpointError};

    #[test]
    fn parse_https_with_port() {
        let ep = Endpoint::parse("https://10.0.0.1:9443").unwrap();
        assert_eq!(ep.host(), "10.0.0.1");
        assert_eq!(ep.port(), 9443);
        assert_eq!(ep.authority(), "10.0.0.1:9443");
    }

    #[test]
    fn parse_defaults_to_lxd_port() {
        let ep = Endpoint::parse("https://lxd.example.com").unwrap();
        assert_eq!(ep.port(), 8443);
        assert_eq!(ep.authority(), "lxd.example.com:8443");
    }

    #[test]
    fn parse_keeps_explicit_443() {
        let ep = Endpoint::parse("https://10.0.0.1:443").unwrap();
        assert_eq!(ep.port(), 443);
    }

    #[test]
    fn parse_bare_host_port() {
        let ep = Endpoint::parse("192.0.2.7:8443").unwrap();
        assert_eq!(ep.host(), "192.0.2.7");
        assert_eq!(ep.port(), 8443);
    }

    #[test]
    fn parse_http_prefix_is_tolerated() {
        let ep = Endpoint::parse("http://192.0.2.7:8443/").unwrap();
        assert_eq!(ep.port(), 8443);
    }

    #[test]
    fn parse_ipv6() {
        let ep = Endpoint::parse("https://[fd42::1]:8443").unwrap();
        assert_eq!(ep.host(), "fd42::1");
        assert_eq!(ep.authority(), "[fd42::1]:8443");
    }

    #[test]
    fn parse_rejects_other_schemes() {
        assert_eq!(
            Endpoint::parse("unix:///var/snap/lxd/common/lxd/unix.socket"),
            Err(EndpointError::UnsupportedScheme("unix".into()))
        );
    }

    #[test]
    fn parse_rejects_paths_and_queries() {
        for input in ["https://10.0.0.1:8443/1.0", "https://10.0.0.1?x=1"] {
            assert_eq!(
                Endpoint::parse(input),
                Err(EndpointError::UnexpectedComponent),
                "{input}"
            );
        }
    }

    #[test]
    fn parse_rejects_invalid_dns_name() {
        assert_eq!(
            Endpoint::parse("https://lxd_host!:8443"),
            Err(EndpointError::InvalidHost)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Endpoint::parse("https://"),
            Err(EndpointError::Parse(_) | EndpointError::MissingHost)
        ));
    }
}
