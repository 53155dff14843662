//! URL handling for Roamer
//!
//! Normalization, host keys, fingerprints and the allowed-domain scope filter.

mod domain;
mod fingerprint;
mod matcher;
mod normalize;

pub use domain::{bare_host, host_key};
pub use fingerprint::{fingerprint, Fingerprint};
pub use matcher::{in_scope, DomainPattern};
pub use normalize::{normalize_url, resolve_and_normalize};
