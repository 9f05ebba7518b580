//! Annotation keys, tag keys and other string constants shared across the crate.

/// Annotation namespace every recognized configuration key lives under.
pub const ANNOTATION_PREFIX: &str = "alb.ingress.kubernetes.io";

/// Legacy ingress-class annotation, optionally forbidden by `--ingress-class-annotation-disabled`.
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

// --- traffic shaping ---
pub const SCHEME: &str = "scheme";
pub const IP_ADDRESS_TYPE: &str = "ip-address-type";
pub const SUBNETS: &str = "subnets";
pub const SECURITY_GROUPS: &str = "security-groups";
pub const INBOUND_CIDRS: &str = "inbound-cidrs";
pub const LOAD_BALANCER_ATTRIBUTES: &str = "load-balancer-attributes";
pub const LISTEN_PORTS: &str = "listen-ports";
pub const LISTENER_ATTRIBUTES: &str = "listener-attributes";
pub const SSL_POLICY: &str = "ssl-policy";
pub const CERTIFICATE_ARN: &str = "certificate-arn";
pub const MUTUAL_AUTHENTICATION: &str = "mutual-authentication";

/// Value that opts a load balancer into a controller-managed security group.
pub const SECURITY_GROUPS_MANAGED: &str = "managed";

// --- routing ---
pub const ACTIONS_PREFIX: &str = "actions.";
pub const CONDITIONS_PREFIX: &str = "conditions.";
pub const GROUP_NAME: &str = "group.name";
pub const GROUP_ORDER: &str = "group.order";

// --- target groups ---
pub const TARGET_TYPE: &str = "target-type";
pub const TARGET_GROUP_ATTRIBUTES: &str = "target-group-attributes";
pub const HEALTHCHECK_PROTOCOL: &str = "healthcheck-protocol";
pub const HEALTHCHECK_PORT: &str = "healthcheck-port";
pub const HEALTHCHECK_PATH: &str = "healthcheck-path";
pub const HEALTHCHECK_INTERVAL_SECONDS: &str = "healthcheck-interval-seconds";
pub const HEALTHCHECK_TIMEOUT_SECONDS: &str = "healthcheck-timeout-seconds";
pub const HEALTHY_THRESHOLD_COUNT: &str = "healthy-threshold-count";
pub const UNHEALTHY_THRESHOLD_COUNT: &str = "unhealthy-threshold-count";
pub const SUCCESS_CODES: &str = "success-codes";
pub const BACKEND_PROTOCOL: &str = "backend-protocol";
pub const BACKEND_PROTOCOL_VERSION: &str = "backend-protocol-version";
pub const TARGET_NODE_LABELS: &str = "target-node-labels";

// --- auth ---
pub const AUTH_TYPE: &str = "auth-type";
pub const AUTH_IDP_COGNITO: &str = "auth-idp-cognito";
pub const AUTH_IDP_OIDC: &str = "auth-idp-oidc";
pub const AUTH_SCOPE: &str = "auth-scope";
pub const AUTH_SESSION_COOKIE: &str = "auth-session-cookie";
pub const AUTH_SESSION_TIMEOUT: &str = "auth-session-timeout";
pub const AUTH_ON_UNAUTHENTICATED_REQUEST: &str = "auth-on-unauthenticated-request";

// --- ops ---
pub const TAGS: &str = "tags";
pub const WAF_ACL_ID: &str = "waf-acl-id";
pub const WAFV2_ACL_ARN: &str = "wafv2-acl-arn";
pub const SHIELD_ADVANCED_PROTECTION: &str = "shield-advanced-protection";
pub const IPAM_POOL: &str = "ipam-pool";
/// Hosted zone alias records are upserted into when `--enable-route53` is set.
pub const ROUTE53_HOSTED_ZONE_ID: &str = "route53-hosted-zone-id";

/// Extended-condition matcher annotation prefixes (ordered by trailing `/<weight>`),
/// e.g. `alb.ingress.kubernetes.io/conditions.my-rule/headers/1: env=prod`.
pub const HEADER_FILTERS_PREFIX: &str = "headers/";
pub const QUERY_FILTERS_PREFIX: &str = "query-params/";

/// Tag carried on every AWS resource this controller owns.
pub const TAG_CLUSTER: &str = "elbv2.k8s.aws/cluster";
/// Tag identifying the purpose/kind of a controller-owned resource.
pub const TAG_RESOURCE: &str = "ingress.k8s.aws/resource";
/// Tag carried on target groups identifying their originating ingress.
pub const TAG_INGRESS: &str = "ingress.k8s.aws/ingress";
/// Tag carried on target groups identifying their originating service.
pub const TAG_SERVICE: &str = "ingress.k8s.aws/service";
/// Tag carried on target groups identifying the service port they serve.
pub const TAG_SERVICE_PORT: &str = "ingress.k8s.aws/port";

pub const FIELD_MANAGER: &str = "alb-ingress-reconciler";

/// Default resync interval for a group absent explicit churn (spec §4.10).
pub const DEFAULT_RESYNC_SECS: u64 = 600;
/// Ceiling on the work-queue's exponential backoff (spec §4.10 / §5).
pub const MAX_REQUEUE_BACKOFF_SECS: u64 = 960;
/// Floor on the work-queue's per-key retry rate (spec §5).
pub const MIN_REQUEUE_BACKOFF_SECS: u64 = 1;
