use crate::DiscoverScope;
use storage_accessor_controller_k8s_api::{Accessor, Scope};
use thiserror::Error;
use tracing::trace;

/// Looks up the accessors and scopes an admission decision depends on.
#[derive(Clone, Debug)]
pub struct Resolver<D> {
    discover: D,
}

/// Indicates that the state needed to authorize a claim could not be read.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to list accessors for storage class {storage_class:?}: {error}")]
    Accessors {
        storage_class: String,
        error: anyhow::Error,
    },

    #[error("failed to get namespace {name:?}: {error}")]
    Namespace { name: String, error: anyhow::Error },

    #[error("failed to get workspace {name:?}: {error}")]
    Workspace { name: String, error: anyhow::Error },
}

// === impl Resolver ===

impl<D: DiscoverScope> Resolver<D> {
    pub fn new(discover: D) -> Self {
        Self { discover }
    }

    /// Returns the accessors that govern `storage_class`, in the order the store lists them.
    pub async fn accessors_for(&self, storage_class: &str) -> Result<Vec<Accessor>, ResolveError> {
        let accessors =
            self.discover
                .list_accessors()
                .await
                .map_err(|error| ResolveError::Accessors {
                    storage_class: storage_class.to_string(),
                    error,
                })?;

        let accessors = accessors
            .into_iter()
            .filter(|accessor| accessor.spec.governs(storage_class))
            .collect::<Vec<_>>();
        trace!(%storage_class, accessors = accessors.len(), "Resolved accessors");
        Ok(accessors)
    }

    pub async fn namespace(&self, name: &str) -> Result<Scope, ResolveError> {
        let ns = self
            .discover
            .get_namespace(name)
            .await
            .map_err(|error| ResolveError::Namespace {
                name: name.to_string(),
                error,
            })?;
        Ok(Scope::from(&ns))
    }

    pub async fn workspace(&self, name: &str) -> Result<Scope, ResolveError> {
        let ws = self
            .discover
            .get_workspace(name)
            .await
            .map_err(|error| ResolveError::Workspace {
                name: name.to_string(),
                error,
            })?;
        Ok(Scope::from(&ws))
    }
}
