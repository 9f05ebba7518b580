//! Annotation/Config Resolver: turns one IngressGroup's raw annotations into a
//! typed, conflict-checked [`ResolvedGroupConfig`] plus one [`ResolvedRuleConfig`]
//! per admitted Ingress, following precedence Ingress annotation >
//! IngressClassParams default > hardcoded default.
//!
//! Parsing follows the teacher's annotation-driven style (string values, with
//! `actions.*`/`conditions.*` carrying a JSON payload the way the upstream ALB
//! controller's own annotation convention does) rather than inventing a new shape.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

use crate::cluster::ClusterIndex;
use crate::consts;
use crate::crds::ingress_class_params::IngressClassParamsSpec;
use crate::err::{ReconcileError, Result};
use crate::model::*;

fn ann(ingress: &Ingress, key: &str) -> Option<String> {
    ingress
        .annotations()
        .get(&format!("{}/{key}", consts::ANNOTATION_PREFIX))
        .cloned()
}

fn parse_csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn parse_kv_map(value: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for pair in value.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((k, v)) = pair.split_once('=') {
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    out
}

/// Fields that must be load-balancer-wide: every Ingress in a group that sets
/// one must agree, or the group fails with [`ReconcileError::ConfigConflict`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGroupConfig {
    pub scheme: Scheme,
    pub ip_address_type: IpAddressType,
    pub subnets: Vec<String>,
    pub security_groups: SecurityGroupSource,
    pub inbound_cidrs: Vec<String>,
    pub load_balancer_attributes: BTreeMap<String, String>,
    pub listener_attributes: BTreeMap<String, String>,
    pub ssl_policy: Option<String>,
    pub certificate_arns: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub waf_acl_arn: Option<String>,
    pub shield_advanced_protection: bool,
    pub ipam_pool_id: Option<String>,
    pub minimum_capacity: Option<u32>,
    pub idle_timeout_seconds: Option<u32>,
    pub listen_ports: Vec<(Protocol, u16)>,
    pub route53_hosted_zone_id: Option<String>,
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::InternetFacing
    }
}

impl Default for IpAddressType {
    fn default() -> Self {
        IpAddressType::Ipv4
    }
}

impl Default for SecurityGroupSource {
    fn default() -> Self {
        SecurityGroupSource::Managed
    }
}

/// Fields that stay local to the Ingress/rule that declared them.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRuleConfig {
    pub target_type: Option<TargetType>,
    pub backend_protocol: Option<Protocol>,
    pub backend_protocol_version: Option<ProtocolVersion>,
    pub health_check: HealthCheckConfig,
    pub target_group_attributes: BTreeMap<String, String>,
    pub target_node_labels: BTreeMap<String, String>,
    pub success_codes: Option<String>,
    /// Extra conditions keyed by the rule-name fragment out of `conditions.<name>`.
    pub named_conditions: BTreeMap<String, Vec<RuleCondition>>,
    /// Extra actions keyed by the action-name fragment out of `actions.<name>`.
    pub named_actions: BTreeMap<String, RuleAction>,
    /// Non-terminal authenticate action resolved from `auth-*` (spec §4.4),
    /// prepended ahead of every rule's terminal action when present.
    pub auth_action: Option<RuleAction>,
}

/// Merges one LB-scoped field across every Ingress in the group: all non-`None`
/// settings must agree, else the group is rejected (spec §4.4 "conflicting
/// LB-scoped annotation values across a group's members fails the whole group").
fn merge_scalar<T: PartialEq + Clone>(
    group: &str,
    field: &str,
    values: impl Iterator<Item = (String, T)>,
) -> Result<Option<T>> {
    let mut result: Option<(String, T)> = None;
    for (owner, v) in values {
        match &result {
            None => result = Some((owner, v)),
            Some((_, existing)) if existing == &v => {}
            Some((first_owner, _)) => {
                return Err(ReconcileError::ConfigConflict {
                    group: group.to_string(),
                    detail: format!("{field}: {first_owner} and {owner} disagree"),
                });
            }
        }
    }
    Ok(result.map(|(_, v)| v))
}

/// Resolves the load-balancer-scoped configuration shared by an entire group,
/// checking cross-member agreement and falling back to `class_params`, then to
/// hardcoded defaults (spec §4.4).
pub fn resolve_group_config(
    group_name: &str,
    ingresses: &[Ingress],
    class_params: Option<&IngressClassParamsSpec>,
) -> Result<ResolvedGroupConfig> {
    let mut scheme_votes = Vec::new();
    for i in ingresses {
        if let Some(v) = ann(i, consts::SCHEME) {
            scheme_votes.push((i.name_any(), parse_scheme(&v)?));
        }
    }
    let scheme = merge_scalar(group_name, consts::SCHEME, scheme_votes.into_iter())?
        .or_else(|| class_params.and_then(|p| p.scheme.as_deref()).map(parse_scheme).transpose().ok().flatten())
        .unwrap_or_default();

    let mut ip_address_type_votes = Vec::new();
    for i in ingresses {
        if let Some(v) = ann(i, consts::IP_ADDRESS_TYPE) {
            ip_address_type_votes.push((i.name_any(), parse_ip_address_type(&v)?));
        }
    }
    let ip_address_type = merge_scalar(group_name, consts::IP_ADDRESS_TYPE, ip_address_type_votes.into_iter())?
        .or_else(|| {
            class_params
                .and_then(|p| p.ip_address_type.as_deref())
                .map(parse_ip_address_type)
                .transpose()
                .ok()
                .flatten()
        })
        .unwrap_or_default();

    let subnets = merge_scalar(
        group_name,
        consts::SUBNETS,
        ingresses.iter().filter_map(|i| ann(i, consts::SUBNETS).map(|v| (i.name_any(), parse_csv(&v)))),
    )?
    .or_else(|| class_params.and_then(|p| p.subnets.as_ref()).and_then(|s| s.ids.clone()))
    .unwrap_or_default();

    let security_groups = merge_scalar(
        group_name,
        consts::SECURITY_GROUPS,
        ingresses.iter().filter_map(|i| {
            ann(i, consts::SECURITY_GROUPS).map(|v| (i.name_any(), parse_security_groups(&v)))
        }),
    )?
    .unwrap_or_default();

    let mut inbound_cidrs_votes = Vec::new();
    for i in ingresses {
        if let Some(v) = ann(i, consts::INBOUND_CIDRS) {
            let cidrs = parse_csv(&v);
            for cidr in &cidrs {
                validate_cidr(cidr)?;
            }
            inbound_cidrs_votes.push((i.name_any(), cidrs));
        }
    }
    let inbound_cidrs = merge_scalar(group_name, consts::INBOUND_CIDRS, inbound_cidrs_votes.into_iter())?
        .or_else(|| class_params.map(|p| p.inbound_cidrs.clone()))
        .unwrap_or_default();

    let load_balancer_attributes = merge_scalar(
        group_name,
        consts::LOAD_BALANCER_ATTRIBUTES,
        ingresses.iter().filter_map(|i| {
            ann(i, consts::LOAD_BALANCER_ATTRIBUTES).map(|v| (i.name_any(), parse_kv_map(&v)))
        }),
    )?
    .unwrap_or_else(|| class_params.map(|p| p.load_balancer_attributes.clone()).unwrap_or_default());

    let listener_attributes = merge_scalar(
        group_name,
        consts::LISTENER_ATTRIBUTES,
        ingresses.iter().filter_map(|i| {
            ann(i, consts::LISTENER_ATTRIBUTES).map(|v| (i.name_any(), parse_kv_map(&v)))
        }),
    )?
    .unwrap_or_else(|| class_params.map(|p| p.listener_attributes.clone()).unwrap_or_default());

    let ssl_policy = merge_scalar(
        group_name,
        consts::SSL_POLICY,
        ingresses.iter().filter_map(|i| ann(i, consts::SSL_POLICY).map(|v| (i.name_any(), v))),
    )?
    .or_else(|| class_params.and_then(|p| p.ssl_policy.clone()));

    let certificate_arns: Vec<String> = ingresses
        .iter()
        .filter_map(|i| ann(i, consts::CERTIFICATE_ARN))
        .flat_map(|v| parse_csv(&v))
        .chain(class_params.and_then(|p| p.default_certificate_arn.clone()))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut tags = class_params.map(|p| p.tags.clone()).unwrap_or_default();
    for i in ingresses {
        if let Some(v) = ann(i, consts::TAGS) {
            tags.extend(parse_kv_map(&v));
        }
    }

    let waf_acl_arn = merge_scalar(
        group_name,
        consts::WAFV2_ACL_ARN,
        ingresses.iter().filter_map(|i| ann(i, consts::WAFV2_ACL_ARN).map(|v| (i.name_any(), v))),
    )?;

    let shield_advanced_protection = ingresses
        .iter()
        .any(|i| ann(i, consts::SHIELD_ADVANCED_PROTECTION).as_deref() == Some("true"));

    let ipam_pool_id = merge_scalar(
        group_name,
        consts::IPAM_POOL,
        ingresses.iter().filter_map(|i| ann(i, consts::IPAM_POOL).map(|v| (i.name_any(), v))),
    )?
    .or_else(|| class_params.and_then(|p| p.ipam_pool_id.clone()));

    let minimum_capacity = class_params
        .and_then(|p| p.minimum_load_balancer_capacity.as_ref())
        .map(|c| c.capacity_units as u32);

    let idle_timeout_seconds = load_balancer_attributes
        .get("idle_timeout.timeout_seconds")
        .and_then(|v| v.parse().ok());

    let mut listen_ports: std::collections::BTreeSet<(Protocol, u16)> = std::collections::BTreeSet::new();
    for i in ingresses {
        if let Some(v) = ann(i, consts::LISTEN_PORTS) {
            for (protocol, port) in parse_listen_ports(&v)? {
                listen_ports.insert((protocol, port));
            }
        }
    }
    if listen_ports.is_empty() {
        listen_ports.insert((Protocol::Http, 80));
    }

    let route53_hosted_zone_id = merge_scalar(
        group_name,
        consts::ROUTE53_HOSTED_ZONE_ID,
        ingresses
            .iter()
            .filter_map(|i| ann(i, consts::ROUTE53_HOSTED_ZONE_ID).map(|v| (i.name_any(), v))),
    )?;

    Ok(ResolvedGroupConfig {
        scheme,
        ip_address_type,
        subnets,
        security_groups,
        inbound_cidrs,
        load_balancer_attributes,
        listener_attributes,
        ssl_policy,
        certificate_arns,
        tags,
        waf_acl_arn,
        shield_advanced_protection,
        ipam_pool_id,
        minimum_capacity,
        idle_timeout_seconds,
        listen_ports: listen_ports.into_iter().collect(),
        route53_hosted_zone_id,
    })
}

fn parse_scheme(v: &str) -> Result<Scheme> {
    match v {
        "internal" => Ok(Scheme::Internal),
        "internet-facing" => Ok(Scheme::InternetFacing),
        other => Err(ReconcileError::Validation(format!("invalid scheme {other:?}"))),
    }
}

fn parse_ip_address_type(v: &str) -> Result<IpAddressType> {
    match v {
        "ipv4" => Ok(IpAddressType::Ipv4),
        "dualstack" => Ok(IpAddressType::Dualstack),
        "dualstack-without-public-ipv4" => Ok(IpAddressType::DualstackWithoutPublicIpv4),
        other => Err(ReconcileError::Validation(format!("invalid ip-address-type {other:?}"))),
    }
}

/// `inbound-cidrs` entries must be the canonical CIDR form `address/prefix`
/// (spec §8 Boundary: bare IPs and hostnames are rejected with guidance).
fn validate_cidr(v: &str) -> Result<()> {
    let Some((addr, prefix)) = v.split_once('/') else {
        let suggestion = match v.parse::<std::net::IpAddr>() {
            Ok(std::net::IpAddr::V4(_)) => format!("{v}/32"),
            Ok(std::net::IpAddr::V6(_)) => format!("{v}/64"),
            Err(_) => {
                return Err(ReconcileError::Validation(format!(
                    "invalid inbound-cidrs entry {v:?}: not a CIDR or IP address"
                )));
            }
        };
        return Err(ReconcileError::Validation(format!(
            "invalid inbound-cidrs entry {v:?}: bare IP address, did you mean {suggestion:?}?"
        )));
    };
    let ip: std::net::IpAddr = addr
        .parse()
        .map_err(|_| ReconcileError::Validation(format!("invalid inbound-cidrs entry {v:?}: not a valid address")))?;
    let max_prefix = match ip {
        std::net::IpAddr::V4(_) => 32,
        std::net::IpAddr::V6(_) => 128,
    };
    let prefix_len: u8 = prefix
        .parse()
        .map_err(|_| ReconcileError::Validation(format!("invalid inbound-cidrs entry {v:?}: invalid prefix length")))?;
    if prefix_len > max_prefix {
        return Err(ReconcileError::Validation(format!(
            "invalid inbound-cidrs entry {v:?}: prefix length exceeds {max_prefix}"
        )));
    }
    Ok(())
}

fn parse_security_groups(v: &str) -> SecurityGroupSource {
    if v.trim() == consts::SECURITY_GROUPS_MANAGED {
        SecurityGroupSource::Managed
    } else {
        SecurityGroupSource::Explicit(parse_csv(v))
    }
}

/// `listen-ports` annotation value is a JSON array like `[{"HTTP": 80}, {"HTTPS": 443}]`.
fn parse_listen_ports(v: &str) -> Result<Vec<(Protocol, u16)>> {
    let entries: Vec<BTreeMap<String, u16>> = serde_json::from_str(v)?;
    let mut out = Vec::new();
    for entry in entries {
        for (proto, port) in entry {
            let protocol = match proto.to_uppercase().as_str() {
                "HTTP" => Protocol::Http,
                "HTTPS" => Protocol::Https,
                other => return Err(ReconcileError::Validation(format!("unknown listen-ports protocol {other:?}"))),
            };
            out.push((protocol, port));
        }
    }
    Ok(out)
}

/// Resolves per-Ingress configuration: target type, backend protocol, health
/// check overrides, the `actions.*`/`conditions.*` extended-matcher tables,
/// and the `auth-*` family (spec §4.4, §6). `cluster_index` resolves the
/// `auth-idp-oidc` secret ref to its client id/secret.
pub fn resolve_rule_config(ingress: &Ingress, cluster_index: &ClusterIndex) -> Result<ResolvedRuleConfig> {
    let target_type = ann(ingress, consts::TARGET_TYPE)
        .map(|v| match v.as_str() {
            "instance" => Ok(TargetType::Instance),
            "ip" => Ok(TargetType::Ip),
            other => Err(ReconcileError::Validation(format!("invalid target-type {other:?}"))),
        })
        .transpose()?;

    let backend_protocol = ann(ingress, consts::BACKEND_PROTOCOL)
        .map(|v| match v.to_uppercase().as_str() {
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            other => Err(ReconcileError::Validation(format!("invalid backend-protocol {other:?}"))),
        })
        .transpose()?;

    let backend_protocol_version = ann(ingress, consts::BACKEND_PROTOCOL_VERSION)
        .map(|v| match v.to_uppercase().as_str() {
            "HTTP1" => Ok(ProtocolVersion::Http1),
            "HTTP2" => Ok(ProtocolVersion::Http2),
            "GRPC" => Ok(ProtocolVersion::Grpc),
            other => Err(ReconcileError::Validation(format!("invalid backend-protocol-version {other:?}"))),
        })
        .transpose()?;

    let mut health_check = HealthCheckConfig::default();
    if let Some(v) = ann(ingress, consts::HEALTHCHECK_PROTOCOL) {
        health_check.protocol = match v.to_uppercase().as_str() {
            "HTTP" => Protocol::Http,
            "HTTPS" => Protocol::Https,
            other => return Err(ReconcileError::Validation(format!("invalid healthcheck-protocol {other:?}"))),
        };
    }
    if let Some(v) = ann(ingress, consts::HEALTHCHECK_PORT) {
        health_check.port = v.parse().ok();
    }
    if let Some(v) = ann(ingress, consts::HEALTHCHECK_PATH) {
        health_check.path = Some(v);
    }
    if let Some(v) = ann(ingress, consts::HEALTHCHECK_INTERVAL_SECONDS) {
        health_check.interval_seconds = v
            .parse()
            .map_err(|_| ReconcileError::Validation(format!("invalid {}", consts::HEALTHCHECK_INTERVAL_SECONDS)))?;
    }
    if let Some(v) = ann(ingress, consts::HEALTHCHECK_TIMEOUT_SECONDS) {
        health_check.timeout_seconds = v
            .parse()
            .map_err(|_| ReconcileError::Validation(format!("invalid {}", consts::HEALTHCHECK_TIMEOUT_SECONDS)))?;
    }
    if let Some(v) = ann(ingress, consts::HEALTHY_THRESHOLD_COUNT) {
        health_check.healthy_threshold_count = v
            .parse()
            .map_err(|_| ReconcileError::Validation(format!("invalid {}", consts::HEALTHY_THRESHOLD_COUNT)))?;
    }
    if let Some(v) = ann(ingress, consts::UNHEALTHY_THRESHOLD_COUNT) {
        health_check.unhealthy_threshold_count = v
            .parse()
            .map_err(|_| ReconcileError::Validation(format!("invalid {}", consts::UNHEALTHY_THRESHOLD_COUNT)))?;
    }
    let success_codes = ann(ingress, consts::SUCCESS_CODES);
    if let Some(codes) = &success_codes {
        health_check.matcher = Some(codes.clone());
    }

    let target_group_attributes = ann(ingress, consts::TARGET_GROUP_ATTRIBUTES)
        .map(|v| parse_kv_map(&v))
        .unwrap_or_default();
    let target_node_labels = ann(ingress, consts::TARGET_NODE_LABELS)
        .map(|v| parse_kv_map(&v))
        .unwrap_or_default();

    let mut named_actions = BTreeMap::new();
    let mut named_conditions = BTreeMap::new();
    for (key, value) in ingress.annotations() {
        let Some(rest) = key.strip_prefix(&format!("{}/", consts::ANNOTATION_PREFIX)) else { continue };
        if let Some(name) = rest.strip_prefix(consts::ACTIONS_PREFIX) {
            let action: RuleAction = parse_action_json(value)?;
            named_actions.insert(name.to_string(), action);
        } else if let Some(name) = rest.strip_prefix(consts::CONDITIONS_PREFIX) {
            let conditions = parse_conditions_json(value)?;
            named_conditions.insert(name.to_string(), conditions);
        }
    }

    let auth_action = resolve_auth_action(ingress, cluster_index)?;

    Ok(ResolvedRuleConfig {
        target_type,
        backend_protocol,
        backend_protocol_version,
        health_check,
        target_group_attributes,
        target_node_labels,
        success_codes,
        named_conditions,
        named_actions,
        auth_action,
    })
}

/// `auth-on-unauthenticated-request` (shared by both oidc and cognito).
fn parse_on_unauthenticated_request(v: &str) -> Result<OnUnauthenticatedRequest> {
    match v {
        "authenticate" => Ok(OnUnauthenticatedRequest::Authenticate),
        "deny" => Ok(OnUnauthenticatedRequest::Deny),
        "allow" => Ok(OnUnauthenticatedRequest::Allow),
        other => Err(ReconcileError::Validation(format!("invalid {}: {other:?}", consts::AUTH_ON_UNAUTHENTICATED_REQUEST))),
    }
}

/// Resolves the `auth-*` annotation family into a non-terminal authenticate
/// action (spec §4.4), or `None` when `auth-type` is absent/`none`. The
/// `auth-idp-oidc` secret ref is looked up through `cluster_index` rather
/// than taking the client secret inline, matching spec's "secret ref" wording.
fn resolve_auth_action(ingress: &Ingress, cluster_index: &ClusterIndex) -> Result<Option<RuleAction>> {
    let Some(auth_type) = ann(ingress, consts::AUTH_TYPE) else {
        return Ok(None);
    };
    if auth_type == "none" {
        return Ok(None);
    }

    let scope = ann(ingress, consts::AUTH_SCOPE);
    let session_cookie_name = ann(ingress, consts::AUTH_SESSION_COOKIE);
    let session_timeout_seconds = ann(ingress, consts::AUTH_SESSION_TIMEOUT)
        .map(|v| v.parse().map_err(|_| ReconcileError::Validation(format!("invalid {}", consts::AUTH_SESSION_TIMEOUT))))
        .transpose()?;
    let on_unauthenticated_request = ann(ingress, consts::AUTH_ON_UNAUTHENTICATED_REQUEST)
        .map(|v| parse_on_unauthenticated_request(&v))
        .transpose()?
        .unwrap_or(OnUnauthenticatedRequest::Authenticate);

    match auth_type.as_str() {
        "oidc" => {
            let raw = ann(ingress, consts::AUTH_IDP_OIDC)
                .ok_or_else(|| ReconcileError::Validation(format!("{} is oidc but {} is missing", consts::AUTH_TYPE, consts::AUTH_IDP_OIDC)))?;

            #[derive(serde::Deserialize)]
            struct OidcIdp {
                issuer: String,
                #[serde(rename = "authorizationEndpoint")]
                authorization_endpoint: String,
                #[serde(rename = "tokenEndpoint")]
                token_endpoint: String,
                #[serde(rename = "userInfoEndpoint")]
                user_info_endpoint: String,
                #[serde(rename = "secretName")]
                secret_name: String,
            }
            let idp: OidcIdp = serde_json::from_str(&raw)?;

            let namespace = ingress.namespace().unwrap_or_default();
            let client_id = cluster_index.secret_value(&namespace, &idp.secret_name, "clientID").ok_or_else(|| {
                ReconcileError::Validation(format!("secret {}/{} missing key clientID", namespace, idp.secret_name))
            })?;
            let client_secret = cluster_index.secret_value(&namespace, &idp.secret_name, "clientSecret").ok_or_else(|| {
                ReconcileError::Validation(format!("secret {}/{} missing key clientSecret", namespace, idp.secret_name))
            })?;

            Ok(Some(RuleAction::AuthenticateOidc(AuthenticateOidcAction {
                issuer: idp.issuer,
                authorization_endpoint: idp.authorization_endpoint,
                token_endpoint: idp.token_endpoint,
                user_info_endpoint: idp.user_info_endpoint,
                client_id,
                client_secret,
                scope,
                session_cookie_name,
                session_timeout_seconds,
                on_unauthenticated_request,
            })))
        }
        "cognito" => {
            let raw = ann(ingress, consts::AUTH_IDP_COGNITO).ok_or_else(|| {
                ReconcileError::Validation(format!("{} is cognito but {} is missing", consts::AUTH_TYPE, consts::AUTH_IDP_COGNITO))
            })?;

            #[derive(serde::Deserialize)]
            struct CognitoIdp {
                #[serde(rename = "userPoolArn")]
                user_pool_arn: String,
                #[serde(rename = "userPoolClientId")]
                user_pool_client_id: String,
                #[serde(rename = "userPoolDomain")]
                user_pool_domain: String,
            }
            let idp: CognitoIdp = serde_json::from_str(&raw)?;

            Ok(Some(RuleAction::AuthenticateCognito(AuthenticateCognitoAction {
                user_pool_arn: idp.user_pool_arn,
                user_pool_client_id: idp.user_pool_client_id,
                user_pool_domain: idp.user_pool_domain,
                scope,
                session_cookie_name,
                session_timeout_seconds,
                on_unauthenticated_request,
            })))
        }
        other => Err(ReconcileError::Validation(format!("invalid {}: {other:?}", consts::AUTH_TYPE))),
    }
}

/// `actions.<name>` carries one JSON object: `{"Type": "forward"|"redirect"|"fixed-response"|..., ...}`.
fn parse_action_json(value: &str) -> Result<RuleAction> {
    #[derive(serde::Deserialize)]
    #[serde(tag = "Type", rename_all = "kebab-case")]
    enum Wire {
        Forward {
            #[serde(rename = "ForwardConfig", default)]
            forward_config: ForwardConfigWire,
        },
        Redirect {
            #[serde(rename = "RedirectConfig")]
            redirect_config: RedirectAction,
        },
        FixedResponse {
            #[serde(rename = "FixedResponseConfig")]
            fixed_response_config: FixedResponseAction,
        },
    }

    #[derive(serde::Deserialize, Default)]
    struct ForwardConfigWire {
        #[serde(rename = "TargetGroups", default)]
        target_groups: Vec<WeightedTargetGroupWire>,
        #[serde(rename = "TargetGroupStickinessConfig", default)]
        stickiness_seconds: Option<u32>,
    }

    #[derive(serde::Deserialize)]
    struct WeightedTargetGroupWire {
        #[serde(rename = "ServiceName")]
        service_name: String,
        #[serde(rename = "ServicePort")]
        service_port: String,
        #[serde(rename = "Weight", default = "default_weight")]
        weight: u16,
    }

    fn default_weight() -> u16 {
        1
    }

    let wire: Wire = serde_json::from_str(value)?;
    Ok(match wire {
        Wire::Forward { forward_config } => RuleAction::Forward(ForwardAction {
            target_groups: forward_config
                .target_groups
                .into_iter()
                .map(|t| WeightedTargetGroup {
                    target_group_arn: None,
                    target_group_key: format!("{}/{}", t.service_name, t.service_port),
                    weight: t.weight,
                })
                .collect(),
            target_group_stickiness_seconds: forward_config.stickiness_seconds,
        }),
        Wire::Redirect { redirect_config } => RuleAction::Redirect(redirect_config),
        Wire::FixedResponse { fixed_response_config } => RuleAction::FixedResponse(fixed_response_config),
    })
}

/// `conditions.<name>` carries a JSON array of condition objects.
fn parse_conditions_json(value: &str) -> Result<Vec<RuleCondition>> {
    #[derive(serde::Deserialize)]
    #[serde(tag = "Field", rename_all = "kebab-case")]
    enum Wire {
        HostHeader {
            #[serde(rename = "HostHeaderConfig")]
            config: ListValues,
        },
        PathPattern {
            #[serde(rename = "PathPatternConfig")]
            config: ListValues,
        },
        HttpHeader {
            #[serde(rename = "HttpHeaderConfig")]
            config: HttpHeaderConfig,
        },
        QueryString {
            #[serde(rename = "QueryStringConfig")]
            config: QueryStringConfig,
        },
        HttpRequestMethod {
            #[serde(rename = "HttpRequestMethodConfig")]
            config: ListValues,
        },
        SourceIp {
            #[serde(rename = "SourceIpConfig")]
            config: ListValues,
        },
    }

    #[derive(serde::Deserialize)]
    struct ListValues {
        #[serde(rename = "Values")]
        values: Vec<String>,
    }

    #[derive(serde::Deserialize)]
    struct HttpHeaderConfig {
        #[serde(rename = "HttpHeaderName")]
        name: String,
        #[serde(rename = "Values")]
        values: Vec<String>,
    }

    #[derive(serde::Deserialize)]
    struct QueryStringConfig {
        #[serde(rename = "Values")]
        values: Vec<QueryStringKv>,
    }

    #[derive(serde::Deserialize)]
    struct QueryStringKv {
        #[serde(rename = "Key")]
        key: Option<String>,
        #[serde(rename = "Value")]
        value: String,
    }

    let wires: Vec<Wire> = serde_json::from_str(value)?;
    Ok(wires
        .into_iter()
        .map(|w| match w {
            Wire::HostHeader { config } => RuleCondition::HostHeader(config.values),
            Wire::PathPattern { config } => RuleCondition::PathPattern(config.values),
            Wire::HttpHeader { config } => RuleCondition::HttpHeader { name: config.name, values: config.values },
            Wire::QueryString { config } => {
                let first = config.values.into_iter().next().unwrap_or(QueryStringKv { key: None, value: String::new() });
                RuleCondition::QueryString { key: first.key, value: first.value }
            }
            Wire::HttpRequestMethod { config } => RuleCondition::HttpRequestMethod(config.values),
            Wire::SourceIp { config } => RuleCondition::SourceIp(config.values),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::Ingress;
    use kube::api::ObjectMeta;

    fn ingress_with(name: &str, annotations: &[(&str, &str)]) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (format!("{}/{k}", consts::ANNOTATION_PREFIX), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: None,
            status: None,
        }
    }

    #[test]
    fn agreeing_scheme_across_group_resolves() {
        let a = ingress_with("a", &[(consts::SCHEME, "internal")]);
        let b = ingress_with("b", &[(consts::SCHEME, "internal")]);
        let cfg = resolve_group_config("g", &[a, b], None).unwrap();
        assert_eq!(cfg.scheme, Scheme::Internal);
    }

    #[test]
    fn disagreeing_scheme_across_group_is_a_conflict() {
        let a = ingress_with("a", &[(consts::SCHEME, "internal")]);
        let b = ingress_with("b", &[(consts::SCHEME, "internet-facing")]);
        let err = resolve_group_config("g", &[a, b], None).unwrap_err();
        assert!(matches!(err, ReconcileError::ConfigConflict { .. }));
    }

    #[test]
    fn default_scheme_is_internet_facing() {
        let a = ingress_with("a", &[]);
        let cfg = resolve_group_config("g", &[a], None).unwrap();
        assert_eq!(cfg.scheme, Scheme::InternetFacing);
    }

    #[test]
    fn forward_action_json_parses_target_groups() {
        let json = r#"{"Type":"forward","ForwardConfig":{"TargetGroups":[{"ServiceName":"svc","ServicePort":"80","Weight":1}]}}"#;
        let action = parse_action_json(json).unwrap();
        match action {
            RuleAction::Forward(f) => assert_eq!(f.target_groups.len(), 1),
            _ => panic!("expected forward action"),
        }
    }

    #[test]
    fn canonical_cidrs_are_accepted() {
        assert!(validate_cidr("10.0.0.0/8").is_ok());
        assert!(validate_cidr("::/0").is_ok());
        assert!(validate_cidr("2001:db8::/64").is_ok());
    }

    #[test]
    fn bare_ip_is_rejected_with_prefix_guidance() {
        let err = validate_cidr("10.0.0.1").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/32"), "expected /32 guidance, got {msg:?}");

        let err = validate_cidr("::1").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/64"), "expected /64 guidance, got {msg:?}");
    }

    #[test]
    fn hostname_is_rejected() {
        assert!(validate_cidr("example.com").is_err());
    }

    #[test]
    fn prefix_exceeding_address_width_is_rejected() {
        assert!(validate_cidr("10.0.0.0/33").is_err());
    }

    #[test]
    fn invalid_inbound_cidr_fails_group_resolution() {
        let a = ingress_with("a", &[(consts::INBOUND_CIDRS, "10.0.0.1")]);
        let err = resolve_group_config("g", &[a], None).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    /// `ClusterIndex` whose `secrets` store is seeded in-process via the
    /// reflector writer, mirroring `builder.rs`'s `test_cluster_index`.
    fn cluster_index_with_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> ClusterIndex {
        use k8s_openapi::api::core::v1::Secret;
        use k8s_openapi::ByteString;
        use kube::runtime::reflector;
        use kube::runtime::watcher::Event;

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data.iter().map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec()))).collect()),
            ..Default::default()
        };

        let (secrets, mut writer) = reflector::store();
        writer.apply_watcher_event(&Event::Init);
        writer.apply_watcher_event(&Event::InitApply(secret));
        writer.apply_watcher_event(&Event::InitDone);

        ClusterIndex {
            ingresses: reflector::store().0,
            ingress_classes: reflector::store().0,
            ingress_class_params: reflector::store().0,
            services: reflector::store().0,
            endpoint_slices: reflector::store().0,
            nodes: reflector::store().0,
            namespaces: reflector::store().0,
            secrets,
            target_group_bindings: reflector::store().0,
        }
    }

    fn ingress_in_ns(ns: &str, name: &str, annotations: &[(&str, &str)]) -> Ingress {
        let mut i = ingress_with(name, annotations);
        i.metadata.namespace = Some(ns.to_string());
        i
    }

    #[test]
    fn auth_type_none_resolves_to_no_auth_action() {
        let i = ingress_in_ns("ns", "a", &[(consts::AUTH_TYPE, "none")]);
        let cluster_index = cluster_index_with_secret("ns", "idp-secret", &[]);
        let cfg = resolve_rule_config(&i, &cluster_index).unwrap();
        assert!(cfg.auth_action.is_none());
    }

    #[test]
    fn oidc_auth_resolves_client_secret_through_cluster_index() {
        let oidc_json = r#"{"issuer":"https://idp.example.com","authorizationEndpoint":"https://idp.example.com/authorize","tokenEndpoint":"https://idp.example.com/token","userInfoEndpoint":"https://idp.example.com/userinfo","secretName":"idp-secret"}"#;
        let i = ingress_in_ns(
            "ns",
            "a",
            &[
                (consts::AUTH_TYPE, "oidc"),
                (consts::AUTH_IDP_OIDC, oidc_json),
                (consts::AUTH_ON_UNAUTHENTICATED_REQUEST, "deny"),
            ],
        );
        let cluster_index = cluster_index_with_secret("ns", "idp-secret", &[("clientID", "abc"), ("clientSecret", "xyz")]);
        let cfg = resolve_rule_config(&i, &cluster_index).unwrap();
        match cfg.auth_action.unwrap() {
            RuleAction::AuthenticateOidc(action) => {
                assert_eq!(action.client_id, "abc");
                assert_eq!(action.client_secret, "xyz");
                assert_eq!(action.on_unauthenticated_request, OnUnauthenticatedRequest::Deny);
            }
            other => panic!("expected oidc action, got {other:?}"),
        }
    }

    #[test]
    fn oidc_auth_missing_secret_key_is_a_validation_error() {
        let oidc_json = r#"{"issuer":"https://idp.example.com","authorizationEndpoint":"https://idp.example.com/authorize","tokenEndpoint":"https://idp.example.com/token","userInfoEndpoint":"https://idp.example.com/userinfo","secretName":"idp-secret"}"#;
        let i = ingress_in_ns("ns", "a", &[(consts::AUTH_TYPE, "oidc"), (consts::AUTH_IDP_OIDC, oidc_json)]);
        let cluster_index = cluster_index_with_secret("ns", "idp-secret", &[("clientID", "abc")]);
        let err = resolve_rule_config(&i, &cluster_index).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[test]
    fn cognito_auth_parses_idp_json() {
        let cognito_json = r#"{"userPoolArn":"arn:aws:cognito-idp:us-east-1:123456789012:userpool/us-east-1_abc","userPoolClientId":"client-1","userPoolDomain":"my-domain"}"#;
        let i = ingress_in_ns("ns", "a", &[(consts::AUTH_TYPE, "cognito"), (consts::AUTH_IDP_COGNITO, cognito_json)]);
        let cluster_index = cluster_index_with_secret("ns", "unused", &[]);
        let cfg = resolve_rule_config(&i, &cluster_index).unwrap();
        match cfg.auth_action.unwrap() {
            RuleAction::AuthenticateCognito(action) => assert_eq!(action.user_pool_client_id, "client-1"),
            other => panic!("expected cognito action, got {other:?}"),
        }
    }
}
