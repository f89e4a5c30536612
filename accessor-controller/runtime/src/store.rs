use anyhow::Result;
use kube::api::{Api, ListParams};
use storage_accessor_controller_core::DiscoverScope;
use storage_accessor_controller_k8s_api::{Accessor, Namespace, Workspace};

/// Reads namespaces, workspaces, and accessors directly from the Kubernetes API.
#[derive(Clone)]
pub struct KubeScope {
    namespaces: Api<Namespace>,
    workspaces: Api<Workspace>,
    accessors: Api<Accessor>,
}

impl KubeScope {
    pub fn new(client: kube::Client) -> Self {
        Self {
            namespaces: Api::all(client.clone()),
            workspaces: Api::all(client.clone()),
            accessors: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl DiscoverScope for KubeScope {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        Ok(self.namespaces.get(name).await?)
    }

    async fn get_workspace(&self, name: &str) -> Result<Workspace> {
        Ok(self.workspaces.get(name).await?)
    }

    async fn list_accessors(&self) -> Result<Vec<Accessor>> {
        let accessors = self.accessors.list(&ListParams::default()).await?;
        Ok(accessors.items)
    }
}
