use crate::{admission::Admission, metrics::AdmissionMetrics, store::KubeScope};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use storage_accessor_controller_k8s_api::labels;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "storage-accessor",
    about = "Restricts which namespaces and workspaces may claim storage from a storage class"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "storage_accessor=info,warn",
        env = "STORAGE_ACCESSOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Configures the admission webhook's listener and its TLS credentials.
    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace label that names the workspace a namespace belongs to.
    #[clap(long, default_value = labels::WORKSPACE)]
    workspace_label: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            workspace_label,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(Some(server))
            .build()
            .await?;

        // Every review reads the cluster directly; nothing is cached between decisions.
        let scope = KubeScope::new(runtime.client());
        let workspace_label: Arc<str> = workspace_label.into();
        info!(%workspace_label, "Serving storage accessor admission reviews");
        let runtime = runtime.spawn_server(move || {
            Admission::new(scope.clone(), workspace_label.clone(), metrics.clone())
        });

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
