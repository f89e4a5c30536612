#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod accessor;
pub mod fields;
pub mod labels;
pub mod scope;
pub mod selector;
pub mod workspace;

pub use self::{
    accessor::{Accessor, AccessorSpec},
    fields::{Field, FieldRules, Fields},
    labels::{LabelRules, Labels},
    scope::Scope,
    selector::{Operator, ScopeSelector},
    workspace::{Workspace, WorkspaceSpec, WorkspaceStatus},
};
pub use k8s_openapi::api::{
    self,
    core::v1::{Namespace, NamespaceStatus, PersistentVolumeClaim, PersistentVolumeClaimSpec},
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
pub use kube::ResourceExt;
