#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Keeps an LXD cluster's trust store in step with the client certificates a
//! related application advertises.
//!
//! A unit of this integrator holds credentials for one LXD cluster. Remote
//! units publish the PEM certificates they want trusted in the relation's
//! `client_certificates` field; the integrator registers new ones, removes
//! the ones that disappeared, and publishes the resulting set of SHA-256
//! fingerprints back in its own `nodes` entry.
//!
//! The host framework drives everything through [`Integrator::handle`]:
//!
//! ```no_run
//! use lxd_trust::{
//!     Event, Integrator, LookupCommand, LxdConnector, Outcome, Relation, StaticConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut integrator = Integrator::new(
//!     LookupCommand::default(),
//!     LxdConnector::default(),
//!     StaticConfig::default(),
//! );
//!
//! integrator.handle(Event::Install).await?;
//!
//! let mut relation = Relation::default();
//! if integrator.handle(Event::RelationJoined(&mut relation)).await? == Outcome::Deferred {
//!     // ask the host to redeliver the event later
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`ring`** (default) / **`aws-lc-rs`**: rustls crypto provider, exactly one.
//! - **`logging`** (default): emit diagnostics through the `log` crate.
//! - **`tracing`**: emit diagnostics through `tracing` instead.

mod observability;
mod prelude;

pub mod cert;
pub mod client;
pub mod credential;
pub mod error;
pub mod integrator;
pub mod relation;
pub mod staging;
pub mod sync;

// -----------------------
// Re-exports
// -----------------------

pub use crate::{
    cert::{Fingerprint, PeerCertificate},
    client::{ClientError, ClientOptions, ClusterApi, ClusterConnector, LxdClient, LxdConnector},
    credential::{ClusterCredential, CredentialLookup, LookupCommand, LookupError, StaticConfig},
    error::Error,
    integrator::{Event, Integrator, Outcome, Status},
    relation::{Databag, NodeEntry, Relation},
    sync::{RegisterOutcome, SyncReport, TrustApi, UnregisterOutcome},
};
