use crate::selector::ScopeSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Authorizes namespaces, and the workspaces they belong to, to create claims against a storage
/// class.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "storage.kubesphere.io", version = "v1alpha1", kind = "Accessor")]
#[serde(rename_all = "camelCase")]
pub struct AccessorSpec {
    /// An accessor without a storage class governs nothing.
    #[serde(default)]
    pub storage_class_name: String,

    #[serde(default)]
    pub namespace_selector: ScopeSelector,

    #[serde(default)]
    pub workspace_selector: ScopeSelector,
}

impl AccessorSpec {
    pub fn governs(&self, storage_class: &str) -> bool {
        !self.storage_class_name.is_empty() && self.storage_class_name == storage_class
    }

    /// Lists the parts of the accessor that can never affect a decision.
    pub fn inert_expressions(&self) -> Vec<String> {
        let class = self
            .storage_class_name
            .is_empty()
            .then(|| "storageClassName: missing".to_string());
        let ns = self.namespace_selector.inert_expressions().into_iter();
        let ws = self.workspace_selector.inert_expressions().into_iter();
        class
            .into_iter()
            .chain(ns.map(|e| format!("namespaceSelector.{e}")))
            .chain(ws.map(|e| format!("workspaceSelector.{e}")))
            .collect()
    }
}
