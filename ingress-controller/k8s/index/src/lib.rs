//! MultiClusterIngress configuration synthesis
//!
//! The index caches the cluster resources that routing depends on and turns
//! the set of `MultiClusterIngress` resources into a complete data plane
//! [`Configuration`](mci_ingress_controller_core::Configuration). It watches:
//!
//! - `MultiClusterIngress` resources, whose annotations are parsed into a
//!   policy bundle as they are listed;
//! - `Service` and `Endpoints` resources, which back the derived services that
//!   resources route to;
//! - `Secret` resources, referenced by authentication policy. Secrets holding
//!   a `tls.crt` are also loaded as certificates.
//!
//! A synthesis pass runs in stages, each owning its maps for the duration of
//! the pass:
//!
//! ```text
//! [ upstreams ] -> [ servers ] -> [ locations ] -> [ canary merge ] -> [ assembly ]
//! ```
//!
//! Lookup failures never fail a pass. The affected value is substituted and a
//! [`Diagnostic`] is recorded on the result.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
mod canary;
pub mod certificates;
mod configuration;
pub mod diagnostics;
mod locations;
pub mod metrics;
mod servers;
pub mod store;
pub mod tls;
mod upstreams;

#[cfg(test)]
mod tests;

pub use self::{
    annotations::Extractor,
    configuration::{removed_ingresses, Synthesized, Synthesizer},
    diagnostics::{Diagnostic, Diagnostics, Resolved},
    metrics::StoreMetrics,
    store::{SharedStore, Store, StoreConfig},
};
