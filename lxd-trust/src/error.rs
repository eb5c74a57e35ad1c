//! Errors surfaced to the host from [`Integrator::handle`](crate::Integrator::handle).
//!
//! Most failure modes never reach this type: missing inputs become a
//! [`Status`](crate::Status) or an [`Outcome::Deferred`](crate::Outcome::Deferred),
//! and per-certificate API failures are logged and retried on the next pass.

use crate::credential::LookupError;
use crate::relation::RelationError;
use thiserror::Error;

/// Errors that abort the handling of an event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The credential lookup failed for a reason other than missing access.
    #[error("credential lookup failed")]
    Lookup(#[from] LookupError),

    /// The local relation data could not be written.
    #[error("failed publishing relation data")]
    Relation(#[from] RelationError),
}
