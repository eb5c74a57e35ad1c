#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # lxd-trust-rustls
//!
//! `lxd-trust-rustls` builds [`rustls::ClientConfig`] values for talking to an
//! LXD cluster API over mutual TLS.
//!
//! The resulting configuration:
//!
//! * presents a client certificate and private key loaded from PEM material
//! * validates the server certificate chain against a **pinned** server CA
//! * does **not** match the server certificate against the dialed hostname
//!
//! LXD servers commonly mint their certificate with a loopback or host-identity
//! common name that is unrelated to the address they are reached at. Identity is
//! established by pinning the CA, not by the hostname.
//!
//! ## Feature flags
//!
//! Exactly **one** `rustls` crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`
//!
//! Enabling more than one provider results in a compile-time error.

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

mod crypto;
mod error;
mod material;

mod observability;
mod prelude;

mod client;
mod verifier;

// Public re-exports
pub use client::ClientConfigBuilder;
pub use error::{Error, Result};
pub use material::ClientMaterial;

/// Constructor for the mTLS client builder.
///
/// # Examples
///
/// ```no_run
/// use lxd_trust_rustls::{mtls_client, ClientMaterial};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let material = ClientMaterial::from_pem_files("client.crt", "client.key", "server.crt")?;
/// let client_config = mtls_client(material).build()?;
/// # Ok(())
/// # }
/// ```
pub fn mtls_client(material: ClientMaterial) -> ClientConfigBuilder {
    ClientConfigBuilder::new(material)
}
