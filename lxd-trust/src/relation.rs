//! Relation data exchanged with the peer application.
//!
//! Both sides of the relation expose a string-to-string databag. This unit
//! publishes:
//!
//! - `nodes`: JSON array holding one `{endpoint, name, trusted_certs_fp}` entry
//! - `version`: `"1.0"`
//!
//! and reads from each remote unit:
//!
//! - `client_certificates`: PEM certificates the peer wants trusted
//! - `trusted_certs_fp`: fingerprints the peer believes are trusted
//!
//! List-valued fields are accepted either as a JSON array or as a JSON string
//! that itself encodes an array, since older peers double-encode.

use crate::cert::Fingerprint;
use crate::prelude::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One side's relation data.
pub type Databag = BTreeMap<String, String>;

/// Local key holding the node list.
pub const NODES_KEY: &str = "nodes";
/// Local key holding the protocol version.
pub const VERSION_KEY: &str = "version";
/// Remote key holding the advertised PEM certificates.
pub const CLIENT_CERTIFICATES_KEY: &str = "client_certificates";
/// Key holding trusted fingerprints, remote side and inside node entries.
pub const TRUSTED_CERTS_FP_KEY: &str = "trusted_certs_fp";
/// Value published under [`VERSION_KEY`].
pub const PROTOCOL_VERSION: &str = "1.0";

/// Errors that may arise reading or writing relation fields.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RelationError {
    /// A field does not hold the expected JSON.
    #[error("malformed relation field {key:?}")]
    Malformed {
        /// The offending key.
        key: &'static str,
        /// The decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// A field could not be encoded.
    #[error("failed encoding relation field {key:?}")]
    Encode {
        /// The key being written.
        key: &'static str,
        /// The encoding error.
        #[source]
        source: serde_json::Error,
    },
}

/// The relation as seen by this unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relation {
    /// This unit's databag, writable.
    pub local: Databag,
    /// Remote units' databags keyed by unit name, read-only.
    pub remote: BTreeMap<String, Databag>,
}

/// The cluster entry published under [`NODES_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Cluster API endpoint, as configured.
    pub endpoint: String,
    /// `server_name` reported by the cluster.
    #[serde(default)]
    pub name: String,
    /// Fingerprints registered in the cluster trust store. Serialized sorted.
    #[serde(default, deserialize_with = "deserialize_fingerprints")]
    pub trusted_certs_fp: BTreeSet<Fingerprint>,
}

impl NodeEntry {
    /// Creates an entry with no trusted fingerprints.
    pub fn new(endpoint: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            name: name.into(),
            trusted_certs_fp: BTreeSet::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrEncoded {
    List(Vec<String>),
    Encoded(String),
}

fn decode_list(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    match serde_json::from_str(raw)? {
        ListOrEncoded::List(items) => Ok(items),
        ListOrEncoded::Encoded(inner) => serde_json::from_str(&inner),
    }
}

fn deserialize_fingerprints<'de, D>(deserializer: D) -> Result<BTreeSet<Fingerprint>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match ListOrEncoded::deserialize(deserializer)? {
        ListOrEncoded::List(items) => items,
        ListOrEncoded::Encoded(inner) => {
            serde_json::from_str(&inner).map_err(serde::de::Error::custom)?
        }
    };
    Ok(collect_fingerprints(items))
}

fn collect_fingerprints(items: Vec<String>) -> BTreeSet<Fingerprint> {
    items
        .into_iter()
        .filter_map(|item| match item.parse() {
            Ok(fp) => Some(fp),
            Err(e) => {
                warn!("ignoring recorded fingerprint: {e}");
                None
            }
        })
        .collect()
}

/// Reads the node list. An absent key is an empty list.
///
/// # Errors
///
/// Returns [`RelationError::Malformed`] if the value is not a JSON array of
/// node entries.
pub fn read_nodes(bag: &Databag) -> Result<Vec<NodeEntry>, RelationError> {
    let Some(raw) = bag.get(NODES_KEY) else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw).map_err(|source| RelationError::Malformed {
        key: NODES_KEY,
        source,
    })
}

/// Replaces the node list.
///
/// # Errors
///
/// Returns [`RelationError::Encode`] if the entries cannot be encoded.
pub fn write_nodes(bag: &mut Databag, nodes: &[NodeEntry]) -> Result<(), RelationError> {
    let raw = serde_json::to_string(nodes).map_err(|source| RelationError::Encode {
        key: NODES_KEY,
        source,
    })?;
    bag.insert(NODES_KEY.to_owned(), raw);
    Ok(())
}

/// Returns the local entry for `endpoint`, if one was published.
///
/// A malformed node list is logged and treated as empty.
pub fn current_node(bag: &Databag, endpoint: &str) -> Option<NodeEntry> {
    match read_nodes(bag) {
        Ok(nodes) => nodes.into_iter().find(|node| node.endpoint == endpoint),
        Err(e) => {
            warn!("{e}; treating as empty");
            None
        }
    }
}

/// Publishes the entry for this cluster along with the protocol version.
///
/// Fingerprints already recorded for the same endpoint are carried over, so a
/// re-delivered join, or a join from another remote unit, keeps recorded trust.
///
/// # Errors
///
/// Returns [`RelationError::Encode`] if the entry cannot be encoded.
pub fn publish_node(
    bag: &mut Databag,
    endpoint: &str,
    name: &str,
) -> Result<NodeEntry, RelationError> {
    let mut node = NodeEntry::new(endpoint, name);
    if let Some(existing) = current_node(bag, endpoint) {
        node.trusted_certs_fp = existing.trusted_certs_fp;
    }

    write_nodes(bag, std::slice::from_ref(&node))?;
    bag.insert(VERSION_KEY.to_owned(), PROTOCOL_VERSION.to_owned());
    Ok(node)
}

/// What a remote unit has published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerView {
    /// Fingerprints the peer believes are trusted. Empty if absent or malformed.
    pub trusted_certs_fp: BTreeSet<Fingerprint>,
    /// PEM certificates to trust. `None` until the peer publishes the field.
    pub client_certificates: Option<Vec<String>>,
}

impl PeerView {
    /// Decodes a remote databag. Malformed fields are logged and dropped.
    ///
    /// A malformed `client_certificates` reads as absent rather than empty,
    /// so a garbled update never unregisters everything.
    pub fn from_databag(bag: &Databag) -> Self {
        let trusted_certs_fp = read_list(bag, TRUSTED_CERTS_FP_KEY)
            .map(collect_fingerprints)
            .unwrap_or_default();

        Self {
            trusted_certs_fp,
            client_certificates: read_list(bag, CLIENT_CERTIFICATES_KEY),
        }
    }
}

fn read_list(bag: &Databag, key: &'static str) -> Option<Vec<String>> {
    let raw = bag.get(key)?;
    match decode_list(raw) {
        Ok(items) => Some(items),
        Err(source) => {
            warn!("{}", RelationError::Malformed { key, source });
            None
        }
    }
}
