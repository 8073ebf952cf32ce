//! Identity, access and certificate management core for edge nodes.
//!
//! The crate is organised around four subsystems:
//!
//! - [`certhandler`]: certificate lifecycle, as a registry of per-type
//!   certificate modules on top of a [`certhandler::Hsm`] implementation.
//! - [`pkcs11`]: the token-backed HSM implementation driven through a
//!   Cryptoki-style [`pkcs11::Driver`] contract.
//! - [`provision`]: orchestration of initial provisioning and deprovisioning
//!   across all registered certificate types.
//! - [`permissions`]: per-workload capability grants bound to unforgeable
//!   secrets.
//!
//! [`nodemanager`] keeps the authoritative node inventory in sync with its
//! persistent storage, and [`crypto`] carries the X.509/ASN.1 provider the
//! certificate modules build CSRs and certificates with.

pub mod certhandler;
pub mod crypto;
pub mod errors;
pub mod nodemanager;
pub mod permissions;
pub mod pkcs11;
pub mod provision;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod test_helpers;

pub use errors::{Error, ErrorKind, Result};
pub use types::CertInfo;
