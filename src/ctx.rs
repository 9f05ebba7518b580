//! Shared reconcile context: parsed args, a live `kube::Client`, the warm
//! cluster cache, the AWS gateway, and the leader-election flag the queue
//! checks before doing anything AWS-facing (spec §5: "only the leader writes").

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;

use crate::args::ReconcilerArgs;
use crate::aws::{AwsGateway, RealAwsGateway};
use crate::cluster::ClusterIndex;

#[derive(Clone)]
pub struct Context {
    pub args: ReconcilerArgs,
    pub client: kube::Client,
    pub cluster_index: ClusterIndex,
    pub aws_gateway: Arc<dyn AwsGateway>,
    pub is_leader: Arc<AtomicBool>,
    pub hostname: String,
}

impl Context {
    /// Parses CLI/env args, connects to the in-cluster API server, warms the
    /// cluster cache and builds the real AWS gateway. `tasks` is the reflector
    /// watcher `JoinSet` the caller selects over alongside the controller and
    /// lease-renewal loops.
    pub async fn new() -> anyhow::Result<(Self, tokio::task::JoinSet<()>)> {
        let args = ReconcilerArgs::parse();
        let client = kube::Client::try_default().await?;
        let (cluster_index, tasks) = ClusterIndex::spawn(client.clone()).await?;
        let aws_gateway: Arc<dyn AwsGateway> = Arc::new(
            RealAwsGateway::new(
                &args.aws_region,
                std::time::Duration::from_secs(args.aws_call_timeout_seconds),
            )
            .await?,
        );
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "alb-ingress-reconciler".to_string());

        Ok((
            Context {
                args,
                client,
                cluster_index,
                aws_gateway,
                is_leader: Arc::new(AtomicBool::new(false)),
                hostname,
            },
            tasks,
        ))
    }
}
