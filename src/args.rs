#[derive(clap::Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
/// AWS Application Load Balancer ingress reconciler.
///
/// Converges Ingress/TargetGroupBinding declarative intent onto AWS
/// ELBv2/EC2/ACM/Route53/WAF resources.
pub struct ReconcilerArgs {
    /// Cluster identifier embedded in every owned AWS resource's tags and name hash.
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: String,

    /// IngressClass controller string this instance reconciles (`spec.controller`).
    #[arg(
        long,
        env = "INGRESS_CLASS_CONTROLLER",
        default_value = "ingress.k8s.aws/alb"
    )]
    pub ingress_class_controller: String,

    /// Forbid the legacy `kubernetes.io/ingress.class` annotation as a class selector.
    #[arg(long, env = "INGRESS_CLASS_ANNOTATION_DISABLED", default_value_t = false)]
    pub ingress_class_annotation_disabled: bool,

    /// Default VPC id used when an IngressClassParams does not override it.
    #[arg(long, env = "DEFAULT_VPC_ID")]
    pub default_vpc_id: Option<String>,

    /// AWS region the controller's own client defaults to.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,

    /// Number of per-group reconcile workers running concurrently (spec §5).
    #[arg(long, env = "RECONCILE_WORKERS", default_value_t = 3)]
    pub reconcile_workers: usize,

    /// Periodic full resync interval per group, seconds (spec §4.10).
    #[arg(long, env = "RESYNC_INTERVAL_SECONDS", default_value_t = crate::consts::DEFAULT_RESYNC_SECS)]
    pub resync_interval_seconds: u64,

    /// Per-reconcile cancellation deadline, seconds (spec §5).
    #[arg(long, env = "RECONCILE_TIMEOUT_SECONDS", default_value_t = 600)]
    pub reconcile_timeout_seconds: u64,

    /// Per-AWS-call timeout, seconds (spec §4.1).
    #[arg(long, env = "AWS_CALL_TIMEOUT_SECONDS", default_value_t = 30)]
    pub aws_call_timeout_seconds: u64,

    /// Whether Route53 alias record reconciliation is enabled (spec §4.5).
    #[arg(long, env = "ENABLE_ROUTE53", default_value_t = false)]
    pub enable_route53: bool,

    /// Log level for the reconciler.
    #[arg(long, env = "LOG_LEVEL", default_value_t = tracing::level_filters::LevelFilter::INFO)]
    pub log_level: tracing::level_filters::LevelFilter,

    /// Address the `/healthz` and `/metrics` HTTP server binds to.
    #[arg(long, env = "HTTP_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub http_bind_addr: String,

    /// Name of the coordination.k8s.io Lease used for leader election.
    #[arg(long, env = "LEASE_NAME", default_value = "alb-ingress-reconciler-lock")]
    pub lease_name: String,
}
