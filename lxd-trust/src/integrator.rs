//! Event dispatch and operator-facing status.
//!
//! The host delivers one [`Event`] at a time to [`Integrator::handle`]. Events
//! that cannot be processed yet return [`Outcome::Deferred`]; the host is
//! expected to deliver them again later. Nothing is retried internally, and
//! every relation pass re-derives its state from the databags.

use crate::client::{describe, ClientError, ClusterApi, ClusterConnector};
use crate::credential::{self, CredentialLookup, StaticConfig};
use crate::error::Error;
use crate::prelude::{debug, info, warn};
use crate::relation::{self, Databag, PeerView, Relation};
use crate::sync::{self, SyncReport};
use std::fmt;

/// Status text when no credential source is usable.
pub const MISSING_CREDENTIALS: &str = "Missing credentials access; grant with: juju trust";
/// Status text when the cluster does not trust the client certificate.
pub const NOT_TRUSTED: &str = "Credentials not trusted by LXD cluster";
/// Prefix of the status text when the cluster cannot be reached.
pub const UNREACHABLE_PREFIX: &str = "Unable to connect to LXD cluster";
/// Status text while the peer has not advertised certificates.
pub const WAITING_FOR_PEER: &str = "Waiting for peer client certificates";

const STARTING: &str = "Checking LXD credentials";

/// Something the host asks the integrator to handle.
#[derive(Debug)]
pub enum Event<'a> {
    /// The unit was installed.
    Install,
    /// Static configuration changed; call [`Integrator::set_config`] first.
    ConfigChanged,
    /// A remote application joined the relation.
    RelationJoined(&'a mut Relation),
    /// A remote unit updated its relation data.
    RelationChanged {
        /// The relation, with this unit's databag writable.
        relation: &'a mut Relation,
        /// Name of the remote unit whose data changed.
        unit: &'a str,
    },
}

/// How an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event was consumed.
    Done,
    /// The event could not be processed yet and must be redelivered.
    Deferred,
}

/// Unit status shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// No event handled yet.
    Maintenance(String),
    /// Connected to a cluster that trusts this unit.
    Active,
    /// Operator action is required.
    Blocked(String),
    /// Waiting on the related application.
    Waiting(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maintenance(msg) => write!(f, "maintenance: {msg}"),
            Self::Active => f.write_str("active"),
            Self::Blocked(msg) => write!(f, "blocked: {msg}"),
            Self::Waiting(msg) => write!(f, "waiting: {msg}"),
        }
    }
}

struct Session<A> {
    api: A,
    endpoint: String,
    server_name: String,
}

/// Reconciles one LXD cluster's trust store with a relation.
pub struct Integrator<L, C: ClusterConnector> {
    lookup: L,
    connector: C,
    config: StaticConfig,
    session: Option<Session<C::Api>>,
    status: Status,
    last_report: Option<SyncReport>,
}

impl<L, C: ClusterConnector> fmt::Debug for Integrator<L, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integrator")
            .field("config", &self.config)
            .field(
                "endpoint",
                &self.session.as_ref().map(|s| s.endpoint.as_str()),
            )
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<L, C> Integrator<L, C>
where
    L: CredentialLookup,
    C: ClusterConnector,
{
    /// Creates an integrator with no cluster session.
    pub fn new(lookup: L, connector: C, config: StaticConfig) -> Self {
        Self {
            lookup,
            connector,
            config,
            session: None,
            status: Status::Maintenance(STARTING.to_owned()),
            last_report: None,
        }
    }

    /// Replaces the static configuration. Takes effect on the next
    /// [`Event::Install`] or [`Event::ConfigChanged`].
    pub fn set_config(&mut self, config: StaticConfig) {
        self.config = config;
    }

    /// Returns the current status.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Returns `true` while a trusted cluster session is established.
    pub fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    /// Endpoint of the established session.
    pub fn endpoint(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.endpoint.as_str())
    }

    /// `server_name` reported by the cluster for the established session.
    pub fn server_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.server_name.as_str())
    }

    /// Summary of the most recent reconciliation pass.
    pub fn last_report(&self) -> Option<&SyncReport> {
        self.last_report.as_ref()
    }

    /// Handles one event to completion.
    ///
    /// # Errors
    ///
    /// - [`Error::Lookup`] if the credential lookup fails unexpectedly.
    /// - [`Error::Relation`] if local relation data cannot be written.
    ///
    /// Everything else is reported through [`Integrator::status`] or
    /// [`Outcome::Deferred`].
    pub async fn handle(&mut self, event: Event<'_>) -> Result<Outcome, Error> {
        match event {
            Event::Install | Event::ConfigChanged => self.check_credentials().await,
            Event::RelationJoined(relation) => self.on_relation_joined(relation),
            Event::RelationChanged { relation, unit } => {
                self.on_relation_changed(relation, unit).await
            }
        }
    }

    async fn check_credentials(&mut self) -> Result<Outcome, Error> {
        self.session = None;

        let Some(credential) = credential::resolve(&self.lookup, &self.config).await? else {
            self.set_status(Status::Blocked(MISSING_CREDENTIALS.to_owned()));
            return Ok(Outcome::Done);
        };

        let api = match self.connector.connect(&credential).await {
            Ok(api) => api,
            Err(e) => {
                self.set_unreachable(&e);
                return Ok(Outcome::Done);
            }
        };

        match api.probe_trust().await {
            Ok(server) => {
                info!("credentials configured for {}", server.server_name);
                self.session = Some(Session {
                    api,
                    endpoint: credential.endpoint().to_owned(),
                    server_name: server.server_name,
                });
                self.set_status(Status::Active);
            }
            Err(ClientError::Untrusted { auth }) => {
                warn!("cluster reports auth {auth:?} for this unit");
                self.set_status(Status::Blocked(NOT_TRUSTED.to_owned()));
            }
            Err(e) => self.set_unreachable(&e),
        }

        Ok(Outcome::Done)
    }

    fn on_relation_joined(&mut self, relation: &mut Relation) -> Result<Outcome, Error> {
        let Some(session) = &self.session else {
            debug!("deferring relation join: credentials not configured");
            return Ok(Outcome::Deferred);
        };

        relation::publish_node(&mut relation.local, &session.endpoint, &session.server_name)?;
        Ok(Outcome::Done)
    }

    async fn on_relation_changed(
        &mut self,
        relation: &mut Relation,
        unit: &str,
    ) -> Result<Outcome, Error> {
        let Some(session) = &self.session else {
            debug!("deferring relation change: credentials not configured");
            return Ok(Outcome::Deferred);
        };
        let Some(mut node) = relation::current_node(&relation.local, &session.endpoint) else {
            debug!("deferring relation change: node entry not published yet");
            return Ok(Outcome::Deferred);
        };

        let empty = Databag::new();
        let peer = PeerView::from_databag(relation.remote.get(unit).unwrap_or(&empty));
        let Some(pems) = peer.client_certificates else {
            self.set_status(Status::Waiting(WAITING_FOR_PEER.to_owned()));
            return Ok(Outcome::Done);
        };

        let desired = sync::desired_certificates(&pems);

        // Removals follow the unit's own list; the node entry spans every
        // remote unit and only prevents registering a certificate twice.
        let mut recorded = peer.trusted_certs_fp;
        recorded.extend(
            desired
                .keys()
                .filter(|fp| node.trusted_certs_fp.contains(*fp))
                .cloned(),
        );

        let report = sync::reconcile(&session.api, &recorded, &desired).await;
        node.trusted_certs_fp.retain(|fp| !report.removed.contains(fp));
        node.trusted_certs_fp.extend(report.trusted.iter().cloned());
        relation::write_nodes(&mut relation.local, std::slice::from_ref(&node))?;

        self.last_report = Some(report);
        self.set_status(Status::Active);
        Ok(Outcome::Done)
    }

    fn set_unreachable(&mut self, err: &ClientError) {
        let reason = describe(err);
        warn!("unable to use LXD cluster: {reason}");
        self.set_status(Status::Blocked(format!("{UNREACHABLE_PREFIX}: {reason}")));
    }

    fn set_status(&mut self, status: Status) {
        if status != self.status {
            info!("status: {status}");
        }
        self.status = status;
    }
}
