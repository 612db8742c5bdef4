#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mci_ingress_controller_core as core;
pub use mci_ingress_controller_k8s_api as k8s;
pub use mci_ingress_controller_k8s_index as index;

mod admission;
mod args;
mod checker;
mod metrics;
mod render;
mod validation;
mod validator;

pub use self::{
    admission::Admission,
    args::Args,
    checker::{CommandChecker, JsonChecker},
    metrics::AdmissionMetrics,
    render::JsonRenderer,
    validation::PolicyError,
    validator::{CheckError, Validator, ValidatorConfig},
};
