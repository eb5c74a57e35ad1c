//! Trust-store reconciliation.
//!
//! A pass compares the fingerprints already recorded as trusted (`R`) with the
//! certificates the peer currently advertises (`D`), unregisters `R - D`, then
//! registers `D - R`. Certificates in `R ∩ D` are never touched, which makes a
//! repeated pass over unchanged input free of API calls.

use crate::cert::{Fingerprint, PeerCertificate};
use crate::prelude::{error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

/// Result of asking the cluster to trust a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The certificate was added to the trust store.
    Created,
    /// The trust store already held the certificate.
    AlreadyTrusted,
    /// The request failed; the reason is kept for logging.
    Failed(String),
}

impl RegisterOutcome {
    /// Returns `true` if the certificate is trusted after the call.
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Created | Self::AlreadyTrusted)
    }
}

/// Result of asking the cluster to forget a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// The cluster accepted the removal.
    Accepted,
    /// The request failed; the reason is kept for logging.
    Failed(String),
}

/// Trust-store operations a reconciliation pass needs.
///
/// Neither operation returns an error: failures are outcomes, logged by the
/// pass and retried on the next one.
pub trait TrustApi {
    /// Adds `cert` to the trust store.
    fn register(&self, cert: &PeerCertificate) -> impl Future<Output = RegisterOutcome> + Send;

    /// Removes the certificate with fingerprint `fp` from the trust store.
    fn unregister(&self, fp: &Fingerprint) -> impl Future<Output = UnregisterOutcome> + Send;
}

/// What a pass will do, computed without I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Recorded but no longer advertised: `R - D`.
    pub remove: BTreeSet<Fingerprint>,
    /// Advertised but not yet recorded: `D - R`.
    pub add: BTreeSet<Fingerprint>,
    /// Recorded and still advertised: `R ∩ D`.
    pub keep: BTreeSet<Fingerprint>,
}

impl Plan {
    /// Returns `true` if the pass makes no API calls.
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Splits recorded and desired fingerprints into removals, additions, and
/// untouched entries.
pub fn plan<'a, D>(recorded: &BTreeSet<Fingerprint>, desired: D) -> Plan
where
    D: IntoIterator<Item = &'a Fingerprint>,
{
    let desired: BTreeSet<&Fingerprint> = desired.into_iter().collect();

    let mut plan = Plan::default();
    for fp in recorded {
        if desired.contains(fp) {
            plan.keep.insert(fp.clone());
        } else {
            plan.remove.insert(fp.clone());
        }
    }
    plan.add = desired
        .into_iter()
        .filter(|fp| !recorded.contains(*fp))
        .cloned()
        .collect();

    plan
}

/// Parses the peer's PEM certificates, keyed by fingerprint.
///
/// Entries that do not parse are logged and skipped. Re-encodings of the same
/// certificate collapse into one entry.
pub fn desired_certificates<S>(pems: &[S]) -> BTreeMap<Fingerprint, PeerCertificate>
where
    S: AsRef<str>,
{
    let mut desired = BTreeMap::new();
    for (index, pem) in pems.iter().enumerate() {
        match PeerCertificate::from_pem(pem.as_ref()) {
            Ok(cert) => {
                desired.insert(cert.fingerprint().clone(), cert);
            }
            Err(e) => warn!("skipping peer certificate #{index}: {e}"),
        }
    }
    desired
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Fingerprints dropped from the record, whatever the API answered.
    pub removed: BTreeSet<Fingerprint>,
    /// Fingerprints newly recorded as trusted.
    pub added: BTreeSet<Fingerprint>,
    /// Removals the cluster did not acknowledge.
    pub failed_removals: BTreeSet<Fingerprint>,
    /// Additions that failed and stay unrecorded until a later pass.
    pub failed_additions: BTreeSet<Fingerprint>,
    /// The updated record to publish.
    pub trusted: BTreeSet<Fingerprint>,
}

impl SyncReport {
    /// Returns `true` if every API call of the pass succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed_removals.is_empty() && self.failed_additions.is_empty()
    }
}

/// Runs one pass against `api`.
///
/// All removals run before all additions, each group in fingerprint order. A
/// failing call never stops the pass.
pub async fn reconcile<A>(
    api: &A,
    recorded: &BTreeSet<Fingerprint>,
    desired: &BTreeMap<Fingerprint, PeerCertificate>,
) -> SyncReport
where
    A: TrustApi,
{
    let plan = plan(recorded, desired.keys());
    let mut report = SyncReport {
        trusted: plan.keep.clone(),
        ..SyncReport::default()
    };

    for fp in &plan.remove {
        info!("removing certificate {fp} from trust store");
        if let UnregisterOutcome::Failed(reason) = api.unregister(fp).await {
            error!("failed removing certificate {fp}: {reason}");
            report.failed_removals.insert(fp.clone());
        }
        report.removed.insert(fp.clone());
    }

    for (fp, cert) in desired.iter().filter(|(fp, _)| plan.add.contains(*fp)) {
        info!("adding certificate {fp} to trust store");
        match api.register(cert).await {
            RegisterOutcome::Created => {}
            RegisterOutcome::AlreadyTrusted => {
                warn!("certificate {fp} already provisioned; skipping");
            }
            RegisterOutcome::Failed(reason) => {
                error!("failed adding certificate {fp}: {reason}");
                report.failed_additions.insert(fp.clone());
                continue;
            }
        }
        report.added.insert(fp.clone());
        report.trusted.insert(fp.clone());
    }

    info!(
        "trust store reconciled: {} added, {} removed, {} failed, {} trusted",
        report.added.len(),
        report.removed.len(),
        report.failed_removals.len() + report.failed_additions.len(),
        report.trusted.len()
    );
    report
}
