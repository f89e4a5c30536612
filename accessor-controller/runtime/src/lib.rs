#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use storage_accessor_controller_core as core;
pub use storage_accessor_controller_k8s_api as k8s;

mod admission;
mod args;
mod metrics;
mod store;

pub use self::{
    admission::Admission,
    args::Args,
    metrics::AdmissionMetrics,
    store::KubeScope,
};
