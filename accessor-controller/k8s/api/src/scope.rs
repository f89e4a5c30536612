use crate::{fields::Fields, labels::Labels, workspace::Workspace};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;

/// The attributes of a namespace or workspace that selectors are evaluated against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub phase: Option<String>,
    pub labels: Labels,
}

// === impl Scope ===

impl Scope {
    pub fn fields(&self) -> Fields<'_> {
        Fields {
            name: &self.name,
            status: self.phase.as_deref(),
        }
    }
}

impl From<&Namespace> for Scope {
    fn from(ns: &Namespace) -> Self {
        Self {
            name: ns.name_any(),
            phase: ns.status.as_ref().and_then(|status| status.phase.clone()),
            labels: ns.labels().clone().into(),
        }
    }
}

impl From<&Workspace> for Scope {
    fn from(ws: &Workspace) -> Self {
        Self {
            name: ws.name_any(),
            phase: ws.status.as_ref().and_then(|status| status.phase.clone()),
            labels: ws.labels().clone().into(),
        }
    }
}
