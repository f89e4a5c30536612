#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod authorize;
mod claim;
mod resolve;


pub use self::{
    authorize::{AuthorizeError, Denial, Validator},
    claim::ClaimRequest,
    resolve::{ResolveError, Resolver},
};
use anyhow::Result;
use storage_accessor_controller_k8s_api::{Accessor, Namespace, Workspace};

/// Reads the cluster state that admission decisions depend on.
///
/// Implementations are shared by all in-flight reviews and must not cache: every decision
/// observes the current namespaces, workspaces, and accessors.
#[async_trait::async_trait]
pub trait DiscoverScope: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    async fn get_workspace(&self, name: &str) -> Result<Workspace>;

    async fn list_accessors(&self) -> Result<Vec<Accessor>>;
}
