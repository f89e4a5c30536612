use crate::{
    resolve::{ResolveError, Resolver},
    ClaimRequest, DiscoverScope,
};
use std::sync::Arc;
use storage_accessor_controller_k8s_api::{Accessor, ResourceExt, Scope};
use thiserror::Error;
use tracing::{debug, trace};

/// Decides whether claims may be created against a storage class.
#[derive(Clone, Debug)]
pub struct Validator<D> {
    resolver: Resolver<D>,
    workspace_label: Arc<str>,
}

/// Explains why an accessor rejected a claim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Denial {
    #[error(
        "{claim} is not permitted: namespace {namespace:?} does not satisfy the namespaceSelector \
         of accessor {accessor:?} for storage class {storage_class:?}"
    )]
    Namespace {
        claim: String,
        namespace: String,
        accessor: String,
        storage_class: String,
    },

    #[error(
        "{claim} is not permitted: workspace {workspace:?} does not satisfy the workspaceSelector \
         of accessor {accessor:?} for storage class {storage_class:?}"
    )]
    Workspace {
        claim: String,
        workspace: String,
        accessor: String,
        storage_class: String,
    },
}

#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error(transparent)]
    Denied(#[from] Denial),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

// === impl Validator ===

impl<D: DiscoverScope> Validator<D> {
    pub fn new(discover: D, workspace_label: impl Into<Arc<str>>) -> Self {
        Self {
            resolver: Resolver::new(discover),
            workspace_label: workspace_label.into(),
        }
    }

    /// Authorizes a claim against every accessor that governs its storage class.
    ///
    /// A storage class without accessors is unrestricted. Otherwise every accessor must authorize
    /// the claim, and the first one that does not determines the error. The claim's namespace is
    /// read once, and its workspace at most once, per decision.
    pub async fn admit(&self, claim: &ClaimRequest) -> Result<(), AuthorizeError> {
        let accessors = self.resolver.accessors_for(&claim.storage_class).await?;
        if accessors.is_empty() {
            debug!(storage_class = %claim.storage_class, "No accessors govern storage class");
            return Ok(());
        }

        let ns = self.resolver.namespace(&claim.namespace).await?;
        let workspace = ns.labels.get(&self.workspace_label);
        let mut ws = None;
        for accessor in &accessors {
            authorize_namespace(claim, accessor, &ns)?;

            let workspace = match workspace {
                Some(workspace) => workspace,
                None => {
                    trace!(ns = %ns.name, "Namespace does not belong to a workspace");
                    continue;
                }
            };
            if ws.is_none() {
                ws = Some(self.resolver.workspace(workspace).await?);
            }
            if let Some(ws) = &ws {
                authorize_workspace(claim, accessor, ws)?;
            }

            trace!(accessor = %accessor.name_any(), %claim, "Authorized");
        }

        Ok(())
    }
}

fn authorize_namespace(
    claim: &ClaimRequest,
    accessor: &Accessor,
    ns: &Scope,
) -> Result<(), Denial> {
    if accessor.spec.namespace_selector.matches(ns) {
        return Ok(());
    }
    Err(Denial::Namespace {
        claim: claim.to_string(),
        namespace: ns.name.clone(),
        accessor: accessor.name_any(),
        storage_class: accessor.spec.storage_class_name.clone(),
    })
}

fn authorize_workspace(
    claim: &ClaimRequest,
    accessor: &Accessor,
    ws: &Scope,
) -> Result<(), Denial> {
    if accessor.spec.workspace_selector.matches(ws) {
        return Ok(());
    }
    Err(Denial::Workspace {
        claim: claim.to_string(),
        workspace: ws.name.clone(),
        accessor: accessor.name_any(),
        storage_class: accessor.spec.storage_class_name.clone(),
    })
}
