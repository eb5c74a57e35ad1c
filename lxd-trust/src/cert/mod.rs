//! Peer certificates and their SHA-256 fingerprints.
//!
//! A [`Fingerprint`] depends only on the DER content of a certificate, so the
//! same certificate re-wrapped, indented, or sent with CRLF line endings always
//! maps to the same trust-store key.

use crate::cert::error::CertificateError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::CertificateDer;
use x509_parser::error::X509Error;
use x509_parser::nom::Err;

pub mod error;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const FINGERPRINT_LEN: usize = 64;

/// SHA-256 digest of a DER certificate, lower-case hex without separators.
///
/// This is the identifier LXD uses for entries in its trust store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of DER-encoded certificate bytes.
    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Returns the fingerprint as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts upper or lower case, with or without `:` separators
/// (`AB:CD:...` as printed by `openssl x509 -fingerprint`).
impl FromStr for Fingerprint {
    type Err = CertificateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if normalized.len() != FINGERPRINT_LEN || !normalized.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(CertificateError::InvalidFingerprint(s.to_owned()));
        }

        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = CertificateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A client certificate advertised by a peer, parsed once.
///
/// Invariant: `der` is a parseable X.509 certificate and `fingerprint` is its
/// SHA-256 digest.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    der: CertificateDer<'static>,
    fingerprint: Fingerprint,
    common_name: Option<String>,
    body: String,
}

impl PeerCertificate {
    /// Parses the first `CERTIFICATE` block of a PEM string.
    ///
    /// Surrounding whitespace on every line is ignored, which covers CRLF line
    /// endings and certificates pasted with indentation.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::Pem`] if no well-formed PEM certificate block is found.
    /// - [`CertificateError::ParseX509Certificate`] if the block is not X.509.
    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        let lines: Vec<&str> = pem.lines().map(str::trim).collect();

        let der = CertificateDer::from_pem_slice(lines.join("\n").as_bytes())
            .map_err(CertificateError::Pem)?;

        let common_name = subject_common_name(der.as_ref())?;

        Ok(Self {
            fingerprint: Fingerprint::of_der(der.as_ref()),
            body: base64_body(&lines),
            der,
            common_name,
        })
    }

    /// Returns the DER-encoded certificate.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// Returns the SHA-256 fingerprint.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Returns the subject common name, if any.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Name under which the certificate is registered: the subject CN, or the
    /// fingerprint when the subject has none.
    pub fn name(&self) -> &str {
        self.common_name
            .as_deref()
            .filter(|cn| !cn.is_empty())
            .unwrap_or(self.fingerprint.as_str())
    }

    /// Base64 text between the PEM markers with line breaks removed, as the
    /// LXD certificates API expects it.
    pub fn base64_body(&self) -> &str {
        &self.body
    }
}

impl fmt::Debug for PeerCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerCertificate")
            .field("fingerprint", &self.fingerprint)
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}

fn subject_common_name(der: &[u8]) -> Result<Option<String>, CertificateError> {
    let (_, x509) = x509_parser::parse_x509_certificate(der).map_err(|e| match e {
        Err::Incomplete(_) => CertificateError::ParseX509Certificate(X509Error::InvalidCertificate),
        Err::Error(err) | Err::Failure(err) => CertificateError::ParseX509Certificate(err),
    })?;

    let common_name = x509
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned);
    Ok(common_name)
}

fn base64_body(lines: &[&str]) -> String {
    lines
        .iter()
        .skip_while(|line| !line.starts_with(PEM_BEGIN))
        .skip(1)
        .take_while(|line| !line.starts_with(PEM_END))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(cn: Option<&str>) -> (String, Vec<u8>) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = rcgen::DistinguishedName::new();
        if let Some(cn) = cn {
            params
                .distinguished_name
                .push(rcgen::DnType::CommonName, cn);
        }
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), cert.der().to_vec())
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex_sha256() {
        let fp = Fingerprint::of_der(b"");
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_parse_fingerprint_normalizes_case_and_colons() {
        let colons = "E3:B0:C4:42:98:FC:1C:14:9A:FB:F4:C8:99:6F:B9:24:\
                      27:AE:41:E4:64:9B:93:4C:A4:95:99:1B:78:52:B8:55";
        let fp: Fingerprint = colons.parse().unwrap();
        assert_eq!(fp, Fingerprint::of_der(b""));
    }

    #[test]
    fn test_parse_fingerprint_rejects_short_or_non_hex() {
        assert!("abcd".parse::<Fingerprint>().is_err());
        let not_hex = "z".repeat(64);
        assert!(matches!(
            not_hex.parse::<Fingerprint>(),
            Err(CertificateError::InvalidFingerprint(_))
        ));
    }

    #[test]
    fn test_fingerprint_serde_as_plain_string() {
        let fp = Fingerprint::of_der(b"");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{fp}\""));

        let upper = json.to_uppercase();
        let back: Fingerprint = serde_json::from_str(&upper).unwrap();
        assert_eq!(back, fp);

        assert!(serde_json::from_str::<Fingerprint>("\"nope\"").is_err());
    }

    #[test]
    fn test_from_pem_matches_der_digest() {
        let (pem, der) = generate(Some("juju-client"));
        let cert = PeerCertificate::from_pem(&pem).unwrap();

        assert_eq!(cert.fingerprint(), &Fingerprint::of_der(&der));
        assert_eq!(cert.der().as_ref(), der.as_slice());
        assert_eq!(cert.common_name(), Some("juju-client"));
        assert_eq!(cert.name(), "juju-client");
    }

    #[test]
    fn test_from_pem_ignores_line_endings_and_indentation() {
        let (pem, _) = generate(Some("juju-client"));
        let reference = PeerCertificate::from_pem(&pem).unwrap();

        let crlf = pem.replace('\n', "\r\n");
        let indented: String = pem.lines().map(|l| format!("    {l}  \n")).collect();

        for variant in [crlf, indented] {
            let cert = PeerCertificate::from_pem(&variant).unwrap();
            assert_eq!(cert.fingerprint(), reference.fingerprint());
            assert_eq!(cert.base64_body(), reference.base64_body());
        }
    }

    #[test]
    fn test_base64_body_strips_markers_and_newlines() {
        let (pem, _) = generate(Some("juju-client"));
        let cert = PeerCertificate::from_pem(&pem).unwrap();

        let body = cert.base64_body();
        assert!(!body.contains('\n'));
        assert!(!body.contains("-----"));
        let expected: String = pem.lines().filter(|l| !l.starts_with("-----")).collect();
        assert_eq!(body, expected);
    }

    #[test]
    fn test_name_falls_back_to_fingerprint() {
        let (pem, _) = generate(None);
        let cert = PeerCertificate::from_pem(&pem).unwrap();

        assert_eq!(cert.common_name(), None);
        assert_eq!(cert.name(), cert.fingerprint().as_str());
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        assert!(matches!(
            PeerCertificate::from_pem("not a certificate"),
            Err(CertificateError::Pem(_))
        ));
    }
}
