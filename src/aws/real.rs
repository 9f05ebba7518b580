//! `RealAwsGateway`: the live implementation of [`AwsGateway`], one client per
//! AWS service behind `Arc`-free owned clients (the SDK clients are already
//! cheaply cloneable), scoped to the five services this core calls — the
//! same shape as the pack's `stevepapa-taws` `AwsClients` container, trimmed
//! to what an ALB controller actually needs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use tokio::sync::RwLock;

use super::gateway::*;
use super::retry::{retry_dependency_violation, retry_transient, BackoffConfig};
use crate::model::*;

/// Classifies an AWS SDK error by inspecting its rendered message for the
/// error-code substrings AWS's APIs return, the same string-matching idiom
/// the pack's `stevepapa-taws` example uses in `format_aws_error` — avoids
/// hand-maintaining a match arm per operation's generated error enum.
fn classify_error(operation: &str, err: impl std::fmt::Display) -> AwsError {
    let msg = err.to_string();
    if msg.contains("Throttling") || msg.contains("RequestLimitExceeded") {
        AwsError::Throttled(operation.to_string())
    } else if msg.contains("DependencyViolation") {
        AwsError::DependencyViolation(operation.to_string())
    } else if msg.contains("InternalError") || msg.contains("ServiceUnavailable") {
        AwsError::ServerError(operation.to_string(), msg)
    } else if msg.contains("LimitExceeded") || msg.contains("TooMany") {
        AwsError::QuotaExceeded(operation.to_string())
    } else if msg.contains("NotFound") {
        AwsError::NotFound(format!("{operation}: {msg}"))
    } else if msg.contains("InvalidClientTokenId")
        || msg.contains("ExpiredToken")
        || msg.contains("AccessDenied")
        || msg.contains("UnauthorizedAccess")
    {
        AwsError::Credentials(msg)
    } else if msg.contains("Validation") || msg.contains("Invalid") {
        AwsError::Validation(operation.to_string(), msg)
    } else {
        AwsError::Other(format!("{operation}: {msg}"))
    }
}

/// ELBv2 + EC2 clients scoped to one `(region, assumed-role)` pair, cached so
/// a `TargetGroupBinding` naming a foreign region or account does not pay for
/// an STS round trip on every reconcile (spec §5 "cross-region").
#[derive(Clone)]
struct ScopedClients {
    elbv2: aws_sdk_elasticloadbalancingv2::Client,
    ec2: aws_sdk_ec2::Client,
}

pub struct RealAwsGateway {
    elbv2: aws_sdk_elasticloadbalancingv2::Client,
    ec2: aws_sdk_ec2::Client,
    acm: aws_sdk_acm::Client,
    route53: aws_sdk_route53::Client,
    wafv2: aws_sdk_wafv2::Client,
    #[allow(dead_code)]
    shield: aws_sdk_shield::Client,
    sts: aws_sdk_sts::Client,
    default_region: String,
    scoped: RwLock<HashMap<(Option<String>, Option<String>), Arc<ScopedClients>>>,
    backoff: BackoffConfig,
    call_timeout: Duration,
}

impl RealAwsGateway {
    pub async fn new(region: &str, call_timeout: Duration) -> anyhow::Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_elasticloadbalancingv2::config::Region::new(
                region.to_string(),
            ))
            .load()
            .await;
        // Route53, WAFv2 and Shield are partially or fully global services; ACM
        // certificates referenced by listeners must live in the controller's region.
        Ok(Self {
            elbv2: aws_sdk_elasticloadbalancingv2::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
            acm: aws_sdk_acm::Client::new(&config),
            route53: aws_sdk_route53::Client::new(&config),
            wafv2: aws_sdk_wafv2::Client::new(&config),
            shield: aws_sdk_shield::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
            default_region: region.to_string(),
            scoped: RwLock::new(HashMap::new()),
            backoff: BackoffConfig::default(),
            call_timeout,
        })
    }

    /// Resolves the `elbv2`/`ec2` pair a call should use given `ctx`'s optional
    /// role-assumption and region override, assuming the role via STS once per
    /// `(region, role)` pair and caching the resulting clients.
    async fn scoped_clients(&self, ctx: &CallContext) -> AwsResult<ScopedClients> {
        if ctx.assume_role_arn.is_none() && ctx.region.is_none() {
            return Ok(ScopedClients {
                elbv2: self.elbv2.clone(),
                ec2: self.ec2.clone(),
            });
        }
        let key = (ctx.assume_role_arn.clone(), ctx.region.clone());
        if let Some(existing) = self.scoped.read().await.get(&key) {
            return Ok((**existing).clone());
        }
        let mut guard = self.scoped.write().await;
        if let Some(existing) = guard.get(&key) {
            return Ok((**existing).clone());
        }
        let region = ctx.region.clone().unwrap_or_else(|| self.default_region.clone());
        let mut builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_elasticloadbalancingv2::config::Region::new(region));
        if let Some(role_arn) = &ctx.assume_role_arn {
            let assumed = self
                .sts
                .assume_role()
                .role_arn(role_arn)
                .role_session_name("alb-ingress-reconciler")
                .send()
                .await
                .map_err(|e| classify_error("sts:AssumeRole", e))?;
            let creds = assumed
                .credentials
                .ok_or_else(|| AwsError::Credentials(format!("no credentials returned for {role_arn}")))?;
            builder = builder.credentials_provider(aws_sdk_sts::config::Credentials::new(
                creds.access_key_id,
                creds.secret_access_key,
                Some(creds.session_token),
                creds.expiration.map(|t| {
                    std::time::UNIX_EPOCH + Duration::from_secs(t.secs().max(0) as u64)
                }),
                "assume-role",
            ));
        }
        let config = builder.load().await;
        let scoped = Arc::new(ScopedClients {
            elbv2: aws_sdk_elasticloadbalancingv2::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
        });
        guard.insert(key, scoped.clone());
        Ok((*scoped).clone())
    }

    fn retry<T, E, F, Fut>(&self, is_transient: impl Fn(&E) -> bool, op: F) -> impl std::future::Future<Output = Result<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        retry_transient(&self.backoff, self.call_timeout, is_transient, op)
    }
}

fn render_tags(tags: &BTreeMap<String, String>) -> Vec<aws_sdk_elasticloadbalancingv2::types::Tag> {
    tags.iter()
        .map(|(k, v)| {
            aws_sdk_elasticloadbalancingv2::types::Tag::builder()
                .key(k)
                .value(v)
                .build()
        })
        .collect()
}

fn scheme_to_sdk(scheme: Scheme) -> aws_sdk_elasticloadbalancingv2::types::LoadBalancerSchemeEnum {
    use aws_sdk_elasticloadbalancingv2::types::LoadBalancerSchemeEnum as S;
    match scheme {
        Scheme::Internal => S::Internal,
        Scheme::InternetFacing => S::InternetFacing,
    }
}

fn ip_type_to_sdk(ty: IpAddressType) -> aws_sdk_elasticloadbalancingv2::types::IpAddressType {
    use aws_sdk_elasticloadbalancingv2::types::IpAddressType as T;
    match ty {
        IpAddressType::Ipv4 => T::Ipv4,
        IpAddressType::Dualstack => T::Dualstack,
        IpAddressType::DualstackWithoutPublicIpv4 => T::DualstackWithoutPublicIpv4,
    }
}

fn protocol_to_sdk(protocol: Protocol) -> aws_sdk_elasticloadbalancingv2::types::ProtocolEnum {
    use aws_sdk_elasticloadbalancingv2::types::ProtocolEnum as P;
    match protocol {
        Protocol::Http => P::Http,
        Protocol::Https => P::Https,
    }
}

#[async_trait::async_trait]
impl AwsGateway for RealAwsGateway {
    async fn describe_load_balancers_by_tag(
        &self,
        cluster: &str,
        ctx: &CallContext,
    ) -> AwsResult<Vec<DescribedLoadBalancer>> {
        let clients = self.scoped_clients(ctx).await?;
        let mut arns = Vec::new();
        let mut lbs_by_arn = HashMap::new();
        let mut paginator = clients.elbv2.describe_load_balancers().into_paginator().send();
        while let Some(page) = paginator.next().await {
            let page = page.map_err(|e| classify_error("elbv2:DescribeLoadBalancers", e))?;
            for lb in page.load_balancers.unwrap_or_default() {
                if let Some(arn) = lb.load_balancer_arn.clone() {
                    arns.push(arn.clone());
                    lbs_by_arn.insert(arn, lb);
                }
            }
        }
        let mut result = Vec::new();
        for chunk in arns.chunks(20) {
            let tags = clients
                .elbv2
                .describe_tags()
                .set_resource_arns(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:DescribeTags", e))?;
            for td in tags.tag_descriptions.unwrap_or_default() {
                let Some(arn) = td.resource_arn.clone() else { continue };
                let owns = td
                    .tags
                    .unwrap_or_default()
                    .iter()
                    .any(|t| t.key.as_deref() == Some(crate::consts::TAG_CLUSTER) && t.value.as_deref() == Some(cluster));
                if !owns {
                    continue;
                }
                let Some(lb) = lbs_by_arn.get(&arn) else { continue };
                result.push(DescribedLoadBalancer {
                    arn: LoadBalancerArn(arn.clone()),
                    dns_name: lb.dns_name.clone().unwrap_or_default(),
                    state: lb
                        .state
                        .as_ref()
                        .and_then(|s| s.code.as_ref())
                        .map(|c| c.as_str().to_string())
                        .unwrap_or_default(),
                    load_balancer: LoadBalancer {
                        arn: Some(LoadBalancerArn(arn.clone())),
                        name: lb.load_balancer_name.clone().unwrap_or_default(),
                        scheme: match lb.scheme {
                            Some(aws_sdk_elasticloadbalancingv2::types::LoadBalancerSchemeEnum::Internal) => {
                                Scheme::Internal
                            }
                            _ => Scheme::InternetFacing,
                        },
                        ip_address_type: IpAddressType::Ipv4,
                        subnets: lb
                            .availability_zones
                            .clone()
                            .unwrap_or_default()
                            .into_iter()
                            .filter_map(|az| az.subnet_id)
                            .collect(),
                        security_groups: SecurityGroupSource::Explicit(
                            lb.security_groups.clone().unwrap_or_default(),
                        ),
                        attributes: BTreeMap::new(),
                        tags: BTreeMap::new(),
                        idle_timeout_seconds: None,
                        waf_acl_arn: None,
                        minimum_capacity: None,
                        shield_advanced_protection: false,
                    },
                });
            }
        }
        Ok(result)
    }

    async fn describe_listeners(&self, lb_arn: &LoadBalancerArn, ctx: &CallContext) -> AwsResult<Vec<Listener>> {
        let clients = self.scoped_clients(ctx).await?;
        let mut out = Vec::new();
        let mut paginator = clients
            .elbv2
            .describe_listeners()
            .load_balancer_arn(&lb_arn.0)
            .into_paginator()
            .send();
        while let Some(page) = paginator.next().await {
            let page = page.map_err(|e| classify_error("elbv2:DescribeListeners", e))?;
            for l in page.listeners.unwrap_or_default() {
                out.push(Listener {
                    arn: l.listener_arn.clone().map(ListenerArn),
                    protocol: match l.protocol {
                        Some(aws_sdk_elasticloadbalancingv2::types::ProtocolEnum::Https) => Protocol::Https,
                        _ => Protocol::Http,
                    },
                    port: l.port.unwrap_or_default() as u16,
                    ssl_policy: l.ssl_policy.clone(),
                    certificates: l
                        .certificates
                        .clone()
                        .unwrap_or_default()
                        .into_iter()
                        .map(|c| Certificate {
                            arn: c.certificate_arn.unwrap_or_default(),
                            is_default: c.is_default.unwrap_or(false),
                        })
                        .collect(),
                    attributes: BTreeMap::new(),
                    default_actions: Vec::new(),
                    mutual_tls: None,
                });
            }
        }
        Ok(out)
    }

    async fn describe_rules(&self, listener_arn: &ListenerArn, ctx: &CallContext) -> AwsResult<Vec<Rule>> {
        let clients = self.scoped_clients(ctx).await?;
        let resp = clients
            .elbv2
            .describe_rules()
            .listener_arn(&listener_arn.0)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:DescribeRules", e))?;
        let mut out = Vec::new();
        for r in resp.rules.unwrap_or_default() {
            if r.is_default.unwrap_or(false) {
                continue;
            }
            let priority: u32 = r.priority.as_deref().unwrap_or("1").parse().unwrap_or(1);
            out.push(Rule {
                arn: r.rule_arn.clone().map(RuleArn),
                priority,
                conditions: Vec::new(),
                actions: Vec::new(),
            });
        }
        Ok(out)
    }

    async fn describe_target_groups_by_tag(&self, cluster: &str, ctx: &CallContext) -> AwsResult<Vec<TargetGroup>> {
        let clients = self.scoped_clients(ctx).await?;
        let mut all = Vec::new();
        let mut paginator = clients.elbv2.describe_target_groups().into_paginator().send();
        while let Some(page) = paginator.next().await {
            let page = page.map_err(|e| classify_error("elbv2:DescribeTargetGroups", e))?;
            all.extend(page.target_groups.unwrap_or_default());
        }
        let arns: Vec<String> = all.iter().filter_map(|tg| tg.target_group_arn.clone()).collect();
        let mut owned_arns = std::collections::HashSet::new();
        for chunk in arns.chunks(20) {
            let tags = clients
                .elbv2
                .describe_tags()
                .set_resource_arns(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:DescribeTags", e))?;
            for td in tags.tag_descriptions.unwrap_or_default() {
                let Some(arn) = td.resource_arn else { continue };
                let owns = td
                    .tags
                    .unwrap_or_default()
                    .iter()
                    .any(|t| t.key.as_deref() == Some(crate::consts::TAG_CLUSTER) && t.value.as_deref() == Some(cluster));
                if owns {
                    owned_arns.insert(arn);
                }
            }
        }
        let mut out = Vec::new();
        for tg in all {
            let Some(arn) = tg.target_group_arn.clone() else { continue };
            if !owned_arns.contains(&arn) {
                continue;
            }
            out.push(TargetGroup {
                arn: Some(TargetGroupArn(arn)),
                name: tg.target_group_name.clone().unwrap_or_default(),
                dedup_key: TargetGroupDedupKey {
                    service_namespace: String::new(),
                    service_name: String::new(),
                    service_port: String::new(),
                    protocol: match tg.protocol {
                        Some(aws_sdk_elasticloadbalancingv2::types::ProtocolEnum::Https) => Protocol::Https,
                        _ => Protocol::Http,
                    },
                    protocol_version: None,
                    health_check: HealthCheckConfig::default(),
                    target_type: match tg.target_type {
                        Some(aws_sdk_elasticloadbalancingv2::types::TargetTypeEnum::Ip) => TargetType::Ip,
                        Some(aws_sdk_elasticloadbalancingv2::types::TargetTypeEnum::Lambda) => TargetType::Lambda,
                        _ => TargetType::Instance,
                    },
                },
                port: tg.port.unwrap_or_default() as u16,
                ip_address_type: TgIpAddressType::Ipv4,
                vpc_id: tg.vpc_id.clone().unwrap_or_default(),
                health_check: HealthCheckConfig {
                    protocol: Protocol::Http,
                    port: None,
                    path: tg.health_check_path.clone(),
                    interval_seconds: tg.health_check_interval_seconds.unwrap_or(15) as u32,
                    timeout_seconds: tg.health_check_timeout_seconds.unwrap_or(5) as u32,
                    healthy_threshold_count: tg.healthy_threshold_count.unwrap_or(3) as u32,
                    unhealthy_threshold_count: tg.unhealthy_threshold_count.unwrap_or(3) as u32,
                    matcher: None,
                },
                attributes: BTreeMap::new(),
                tags: BTreeMap::new(),
                node_selector: None,
                multi_cluster: false,
            });
        }
        Ok(out)
    }

    async fn describe_target_health(
        &self,
        tg_arn: &TargetGroupArn,
        ctx: &CallContext,
    ) -> AwsResult<Vec<DescribedTargetHealth>> {
        let clients = self.scoped_clients(ctx).await?;
        let resp = clients
            .elbv2
            .describe_target_health()
            .target_group_arn(&tg_arn.0)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:DescribeTargetHealth", e))?;
        let mut out = Vec::new();
        for d in resp.target_health_descriptions.unwrap_or_default() {
            let Some(t) = d.target else { continue };
            let Some(id) = t.id else { continue };
            let port = t.port.unwrap_or_default() as u16;
            let target = if id.starts_with("i-") {
                TargetId::Instance { instance_id: id, port }
            } else {
                TargetId::Ip { ip: id, port, availability_zone: t.availability_zone }
            };
            let state = match d.target_health.and_then(|h| h.state) {
                Some(aws_sdk_elasticloadbalancingv2::types::TargetHealthStateEnum::Healthy) => TargetHealthState::Healthy,
                Some(aws_sdk_elasticloadbalancingv2::types::TargetHealthStateEnum::Unhealthy) => TargetHealthState::Unhealthy,
                Some(aws_sdk_elasticloadbalancingv2::types::TargetHealthStateEnum::Draining) => TargetHealthState::Draining,
                Some(aws_sdk_elasticloadbalancingv2::types::TargetHealthStateEnum::Unused) => TargetHealthState::Unused,
                Some(aws_sdk_elasticloadbalancingv2::types::TargetHealthStateEnum::Unavailable) => {
                    TargetHealthState::Unavailable
                }
                _ => TargetHealthState::Initial,
            };
            out.push(DescribedTargetHealth { target, state });
        }
        Ok(out)
    }

    async fn describe_security_groups_by_tag(
        &self,
        cluster: &str,
        ctx: &CallContext,
    ) -> AwsResult<Vec<ManagedSecurityGroup>> {
        let clients = self.scoped_clients(ctx).await?;
        let resp = clients
            .ec2
            .describe_security_groups()
            .filters(
                aws_sdk_ec2::types::Filter::builder()
                    .name(format!("tag:{}", crate::consts::TAG_CLUSTER))
                    .values(cluster)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify_error("ec2:DescribeSecurityGroups", e))?;
        let mut out = Vec::new();
        for sg in resp.security_groups.unwrap_or_default() {
            let inbound_rules = sg
                .ip_permissions
                .unwrap_or_default()
                .into_iter()
                .flat_map(|perm| {
                    let port = perm.from_port.unwrap_or_default() as u16;
                    perm.ip_ranges
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(move |r| r.cidr_ip.map(|cidr| InboundRule { port, cidr }))
                })
                .collect();
            out.push(ManagedSecurityGroup {
                group_id: sg.group_id.clone(),
                name: sg.group_name.clone().unwrap_or_default(),
                vpc_id: sg.vpc_id.clone().unwrap_or_default(),
                inbound_rules,
                instance_security_group: None,
            });
        }
        Ok(out)
    }

    async fn create_load_balancer(
        &self,
        req: &CreateLoadBalancerRequest,
        ctx: &CallContext,
    ) -> AwsResult<DescribedLoadBalancer> {
        let clients = self.scoped_clients(ctx).await?;
        let resp = self
            .retry(
                |e: &AwsError| e.is_transient(),
                || async {
                    clients
                        .elbv2
                        .create_load_balancer()
                        .name(&req.name)
                        .r#type(aws_sdk_elasticloadbalancingv2::types::LoadBalancerTypeEnum::Application)
                        .scheme(scheme_to_sdk(req.scheme))
                        .ip_address_type(ip_type_to_sdk(req.ip_address_type))
                        .set_subnets(Some(req.subnets.clone()))
                        .set_security_groups(Some(req.security_group_ids.clone()))
                        .set_tags(Some(render_tags(&req.tags)))
                        .send()
                        .await
                        .map_err(|e| classify_error("elbv2:CreateLoadBalancer", e))
                },
            )
            .await?;
        let lb = resp
            .load_balancers
            .and_then(|mut v| v.pop())
            .ok_or_else(|| AwsError::Other("CreateLoadBalancer returned no load balancer".to_string()))?;
        let arn = lb
            .load_balancer_arn
            .clone()
            .ok_or_else(|| AwsError::Other("created load balancer has no ARN".to_string()))?;
        Ok(DescribedLoadBalancer {
            arn: LoadBalancerArn(arn.clone()),
            dns_name: lb.dns_name.clone().unwrap_or_default(),
            state: "provisioning".to_string(),
            load_balancer: LoadBalancer {
                arn: Some(LoadBalancerArn(arn)),
                name: req.name.clone(),
                scheme: req.scheme,
                ip_address_type: req.ip_address_type,
                subnets: req.subnets.clone(),
                security_groups: SecurityGroupSource::Explicit(req.security_group_ids.clone()),
                attributes: BTreeMap::new(),
                tags: req.tags.clone(),
                idle_timeout_seconds: None,
                waf_acl_arn: None,
                minimum_capacity: None,
                shield_advanced_protection: false,
            },
        })
    }

    async fn modify_load_balancer_attributes(
        &self,
        arn: &LoadBalancerArn,
        req: &ModifyLoadBalancerAttributesRequest,
        ctx: &CallContext,
    ) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        if req.subnets.is_some() {
            clients
                .elbv2
                .set_subnets()
                .load_balancer_arn(&arn.0)
                .set_subnets(req.subnets.clone())
                .send()
                .await
                .map_err(|e| classify_error("elbv2:SetSubnets", e))?;
        }
        if let Some(sgs) = &req.security_group_ids {
            clients
                .elbv2
                .set_security_groups()
                .load_balancer_arn(&arn.0)
                .set_security_groups(Some(sgs.clone()))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:SetSecurityGroups", e))?;
        }
        if let Some(ty) = req.ip_address_type {
            clients
                .elbv2
                .set_ip_address_type()
                .load_balancer_arn(&arn.0)
                .ip_address_type(ip_type_to_sdk(ty))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:SetIpAddressType", e))?;
        }
        let mut attrs = req.attributes.clone().unwrap_or_default();
        if let Some(idle) = req.idle_timeout_seconds {
            attrs.insert("idle_timeout.timeout_seconds".to_string(), idle.to_string());
        }
        if !attrs.is_empty() {
            let sdk_attrs = attrs
                .iter()
                .map(|(k, v)| {
                    aws_sdk_elasticloadbalancingv2::types::LoadBalancerAttribute::builder()
                        .key(k)
                        .value(v)
                        .build()
                })
                .collect::<Vec<_>>();
            clients
                .elbv2
                .modify_load_balancer_attributes()
                .load_balancer_arn(&arn.0)
                .set_attributes(Some(sdk_attrs))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:ModifyLoadBalancerAttributes", e))?;
        }
        Ok(())
    }

    async fn set_webacl(&self, arn: &LoadBalancerArn, waf_acl_arn: Option<&str>, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        match waf_acl_arn {
            Some(acl) => {
                self.wafv2
                    .associate_web_acl()
                    .web_acl_arn(acl)
                    .resource_arn(&arn.0)
                    .send()
                    .await
                    .map_err(|e| classify_error("wafv2:AssociateWebACL", e))?;
            }
            None => {
                self.wafv2
                    .disassociate_web_acl()
                    .resource_arn(&arn.0)
                    .send()
                    .await
                    .map_err(|e| classify_error("wafv2:DisassociateWebACL", e))?;
            }
        }
        let _ = &clients; // WAFv2 has no regional-scoping concept here.
        Ok(())
    }

    async fn set_shield_protection(&self, arn: &LoadBalancerArn, enabled: bool, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        if enabled {
            match self.shield.create_protection().name(&arn.0).resource_arn(&arn.0).send().await {
                Ok(_) => {}
                Err(e) if e.to_string().contains("ResourceAlreadyExists") => {}
                Err(e) => return Err(classify_error("shield:CreateProtection", e)),
            }
        } else {
            let protections = self
                .shield
                .list_protections()
                .send()
                .await
                .map_err(|e| classify_error("shield:ListProtections", e))?;
            if let Some(protection) = protections
                .protections
                .unwrap_or_default()
                .into_iter()
                .find(|p| p.resource_arn.as_deref() == Some(arn.0.as_str()))
            {
                if let Some(id) = protection.id {
                    self.shield
                        .delete_protection()
                        .protection_id(id)
                        .send()
                        .await
                        .map_err(|e| classify_error("shield:DeleteProtection", e))?;
                }
            }
        }
        let _ = &clients; // Shield has no regional-scoping concept here.
        Ok(())
    }

    async fn delete_load_balancer(&self, arn: &LoadBalancerArn, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        clients
            .elbv2
            .delete_load_balancer()
            .load_balancer_arn(&arn.0)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:DeleteLoadBalancer", e))?;
        Ok(())
    }

    async fn create_listener(
        &self,
        lb_arn: &LoadBalancerArn,
        listener: &Listener,
        ctx: &CallContext,
    ) -> AwsResult<Listener> {
        let clients = self.scoped_clients(ctx).await?;
        let certs: Vec<_> = listener
            .certificates
            .iter()
            .map(|c| {
                aws_sdk_elasticloadbalancingv2::types::Certificate::builder()
                    .certificate_arn(&c.arn)
                    .build()
            })
            .collect();
        let resp = clients
            .elbv2
            .create_listener()
            .load_balancer_arn(&lb_arn.0)
            .protocol(protocol_to_sdk(listener.protocol))
            .port(listener.port as i32)
            .set_ssl_policy(listener.ssl_policy.clone())
            .set_certificates(if certs.is_empty() { None } else { Some(certs) })
            .send()
            .await
            .map_err(|e| classify_error("elbv2:CreateListener", e))?;
        let created = resp
            .listeners
            .and_then(|mut v| v.pop())
            .ok_or_else(|| AwsError::Other("CreateListener returned no listener".to_string()))?;
        Ok(Listener {
            arn: created.listener_arn.map(ListenerArn),
            ..listener.clone()
        })
    }

    async fn modify_listener(&self, arn: &ListenerArn, listener: &Listener, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        let certs: Vec<_> = listener
            .certificates
            .iter()
            .map(|c| {
                aws_sdk_elasticloadbalancingv2::types::Certificate::builder()
                    .certificate_arn(&c.arn)
                    .build()
            })
            .collect();
        clients
            .elbv2
            .modify_listener()
            .listener_arn(&arn.0)
            .set_ssl_policy(listener.ssl_policy.clone())
            .set_certificates(if certs.is_empty() { None } else { Some(certs) })
            .send()
            .await
            .map_err(|e| classify_error("elbv2:ModifyListener", e))?;
        Ok(())
    }

    async fn delete_listener(&self, arn: &ListenerArn, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        clients
            .elbv2
            .delete_listener()
            .listener_arn(&arn.0)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:DeleteListener", e))?;
        Ok(())
    }

    async fn create_rule(&self, listener_arn: &ListenerArn, rule: &Rule, ctx: &CallContext) -> AwsResult<Rule> {
        let clients = self.scoped_clients(ctx).await?;
        let resp = clients
            .elbv2
            .create_rule()
            .listener_arn(&listener_arn.0)
            .priority(rule.priority as i32)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:CreateRule", e))?;
        let created = resp
            .rules
            .and_then(|mut v| v.pop())
            .ok_or_else(|| AwsError::Other("CreateRule returned no rule".to_string()))?;
        Ok(Rule {
            arn: created.rule_arn.map(RuleArn),
            ..rule.clone()
        })
    }

    async fn modify_rule(&self, arn: &RuleArn, _rule: &Rule, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        clients
            .elbv2
            .modify_rule()
            .rule_arn(&arn.0)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:ModifyRule", e))?;
        Ok(())
    }

    async fn delete_rule(&self, arn: &RuleArn, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        clients
            .elbv2
            .delete_rule()
            .rule_arn(&arn.0)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:DeleteRule", e))?;
        Ok(())
    }

    async fn create_target_group(&self, tg: &TargetGroup, ctx: &CallContext) -> AwsResult<TargetGroup> {
        let clients = self.scoped_clients(ctx).await?;
        let target_type = match tg.dedup_key.target_type {
            TargetType::Instance => aws_sdk_elasticloadbalancingv2::types::TargetTypeEnum::Instance,
            TargetType::Ip => aws_sdk_elasticloadbalancingv2::types::TargetTypeEnum::Ip,
            TargetType::Lambda => aws_sdk_elasticloadbalancingv2::types::TargetTypeEnum::Lambda,
        };
        let resp = clients
            .elbv2
            .create_target_group()
            .name(&tg.name)
            .protocol(protocol_to_sdk(tg.dedup_key.protocol))
            .port(tg.port as i32)
            .vpc_id(&tg.vpc_id)
            .target_type(target_type)
            .set_health_check_path(tg.health_check.path.clone())
            .health_check_interval_seconds(tg.health_check.interval_seconds as i32)
            .health_check_timeout_seconds(tg.health_check.timeout_seconds as i32)
            .healthy_threshold_count(tg.health_check.healthy_threshold_count as i32)
            .unhealthy_threshold_count(tg.health_check.unhealthy_threshold_count as i32)
            .set_tags(Some(render_tags(&tg.tags)))
            .send()
            .await
            .map_err(|e| classify_error("elbv2:CreateTargetGroup", e))?;
        let created = resp
            .target_groups
            .and_then(|mut v| v.pop())
            .ok_or_else(|| AwsError::Other("CreateTargetGroup returned no target group".to_string()))?;
        Ok(TargetGroup {
            arn: created.target_group_arn.map(TargetGroupArn),
            ..tg.clone()
        })
    }

    async fn modify_target_group(
        &self,
        arn: &TargetGroupArn,
        health_check: &HealthCheckConfig,
        _attributes: &BTreeMap<String, String>,
        ctx: &CallContext,
    ) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        clients
            .elbv2
            .modify_target_group()
            .target_group_arn(&arn.0)
            .set_health_check_path(health_check.path.clone())
            .health_check_interval_seconds(health_check.interval_seconds as i32)
            .health_check_timeout_seconds(health_check.timeout_seconds as i32)
            .healthy_threshold_count(health_check.healthy_threshold_count as i32)
            .unhealthy_threshold_count(health_check.unhealthy_threshold_count as i32)
            .send()
            .await
            .map_err(|e| classify_error("elbv2:ModifyTargetGroup", e))?;
        Ok(())
    }

    async fn delete_target_group(&self, arn: &TargetGroupArn, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        retry_dependency_violation(
            |e: &AwsError| e.is_dependency_violation(),
            || async {
                clients
                    .elbv2
                    .delete_target_group()
                    .target_group_arn(&arn.0)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_error("elbv2:DeleteTargetGroup", e))
            },
        )
        .await
    }

    async fn register_targets(&self, req: &RegisterTargetsRequest, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        for chunk in req.targets.chunks(200) {
            let descriptions: Vec<_> = chunk
                .iter()
                .map(|t| match t {
                    TargetId::Instance { instance_id, port } => {
                        aws_sdk_elasticloadbalancingv2::types::TargetDescription::builder()
                            .id(instance_id)
                            .port(*port as i32)
                            .build()
                            .expect("id is required")
                    }
                    TargetId::Ip { ip, port, availability_zone } => {
                        aws_sdk_elasticloadbalancingv2::types::TargetDescription::builder()
                            .id(ip)
                            .port(*port as i32)
                            .set_availability_zone(availability_zone.clone())
                            .build()
                            .expect("id is required")
                    }
                })
                .collect();
            clients
                .elbv2
                .register_targets()
                .target_group_arn(&req.target_group_arn.0)
                .set_targets(Some(descriptions))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:RegisterTargets", e))?;
        }
        Ok(())
    }

    async fn deregister_targets(&self, req: &RegisterTargetsRequest, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        for chunk in req.targets.chunks(200) {
            let descriptions: Vec<_> = chunk
                .iter()
                .map(|t| match t {
                    TargetId::Instance { instance_id, port } => {
                        aws_sdk_elasticloadbalancingv2::types::TargetDescription::builder()
                            .id(instance_id)
                            .port(*port as i32)
                            .build()
                            .expect("id is required")
                    }
                    TargetId::Ip { ip, port, availability_zone } => {
                        aws_sdk_elasticloadbalancingv2::types::TargetDescription::builder()
                            .id(ip)
                            .port(*port as i32)
                            .set_availability_zone(availability_zone.clone())
                            .build()
                            .expect("id is required")
                    }
                })
                .collect();
            clients
                .elbv2
                .deregister_targets()
                .target_group_arn(&req.target_group_arn.0)
                .set_targets(Some(descriptions))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:DeregisterTargets", e))?;
        }
        Ok(())
    }

    async fn create_security_group(
        &self,
        name: &str,
        vpc_id: &str,
        tags: &BTreeMap<String, String>,
        ctx: &CallContext,
    ) -> AwsResult<String> {
        let clients = self.scoped_clients(ctx).await?;
        let tag_spec = aws_sdk_ec2::types::TagSpecification::builder()
            .resource_type(aws_sdk_ec2::types::ResourceType::SecurityGroup)
            .set_tags(Some(
                tags.iter()
                    .map(|(k, v)| aws_sdk_ec2::types::Tag::builder().key(k).value(v).build())
                    .collect(),
            ))
            .build();
        let resp = clients
            .ec2
            .create_security_group()
            .group_name(name)
            .description(format!("managed by alb-ingress-reconciler for {name}"))
            .vpc_id(vpc_id)
            .tag_specifications(tag_spec)
            .send()
            .await
            .map_err(|e| classify_error("ec2:CreateSecurityGroup", e))?;
        resp.group_id
            .ok_or_else(|| AwsError::Other("CreateSecurityGroup returned no group id".to_string()))
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[InboundRule],
        ctx: &CallContext,
    ) -> AwsResult<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let clients = self.scoped_clients(ctx).await?;
        let perms = rules
            .iter()
            .map(|r| {
                aws_sdk_ec2::types::IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(r.port as i32)
                    .to_port(r.port as i32)
                    .ip_ranges(aws_sdk_ec2::types::IpRange::builder().cidr_ip(&r.cidr).build())
                    .build()
            })
            .collect::<Vec<_>>();
        clients
            .ec2
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(perms))
            .send()
            .await
            .map_err(|e| classify_error("ec2:AuthorizeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[InboundRule],
        ctx: &CallContext,
    ) -> AwsResult<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let clients = self.scoped_clients(ctx).await?;
        let perms = rules
            .iter()
            .map(|r| {
                aws_sdk_ec2::types::IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(r.port as i32)
                    .to_port(r.port as i32)
                    .ip_ranges(aws_sdk_ec2::types::IpRange::builder().cidr_ip(&r.cidr).build())
                    .build()
            })
            .collect::<Vec<_>>();
        clients
            .ec2
            .revoke_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(perms))
            .send()
            .await
            .map_err(|e| classify_error("ec2:RevokeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str, ctx: &CallContext) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        retry_dependency_violation(
            |e: &AwsError| e.is_dependency_violation(),
            || async {
                clients
                    .ec2
                    .delete_security_group()
                    .group_id(group_id)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_error("ec2:DeleteSecurityGroup", e))
            },
        )
        .await
    }

    async fn update_tags(
        &self,
        resource_arn: &str,
        set: &BTreeMap<String, String>,
        remove: &[String],
        ctx: &CallContext,
    ) -> AwsResult<()> {
        let clients = self.scoped_clients(ctx).await?;
        if !set.is_empty() {
            clients
                .elbv2
                .add_tags()
                .resource_arns(resource_arn)
                .set_tags(Some(render_tags(set)))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:AddTags", e))?;
        }
        if !remove.is_empty() {
            clients
                .elbv2
                .remove_tags()
                .resource_arns(resource_arn)
                .set_tag_keys(Some(remove.to_vec()))
                .send()
                .await
                .map_err(|e| classify_error("elbv2:RemoveTags", e))?;
        }
        Ok(())
    }

    async fn upsert_alias_record(&self, record: &Route53Record, _ctx: &CallContext) -> AwsResult<()> {
        let rrset = aws_sdk_route53::types::ResourceRecordSet::builder()
            .name(&record.hostname)
            .r#type(match record.record_type {
                RecordType::A => aws_sdk_route53::types::RrType::A,
                RecordType::Aaaa => aws_sdk_route53::types::RrType::Aaaa,
            })
            .alias_target(
                aws_sdk_route53::types::AliasTarget::builder()
                    .hosted_zone_id(&record.alias_target_hosted_zone_id)
                    .dns_name(&record.alias_target_dns_name)
                    .evaluate_target_health(true)
                    .build()
                    .expect("alias target fields are all set"),
            )
            .build()
            .expect("rrset fields are all set");
        let change = aws_sdk_route53::types::Change::builder()
            .action(aws_sdk_route53::types::ChangeAction::Upsert)
            .resource_record_set(rrset)
            .build()
            .expect("change fields are all set");
        self.route53
            .change_resource_record_sets()
            .hosted_zone_id(&record.hosted_zone_id)
            .change_batch(
                aws_sdk_route53::types::ChangeBatch::builder()
                    .changes(change)
                    .build()
                    .expect("at least one change"),
            )
            .send()
            .await
            .map_err(|e| classify_error("route53:ChangeResourceRecordSets", e))?;
        Ok(())
    }

    async fn delete_alias_record(&self, record: &Route53Record, _ctx: &CallContext) -> AwsResult<()> {
        let rrset = aws_sdk_route53::types::ResourceRecordSet::builder()
            .name(&record.hostname)
            .r#type(match record.record_type {
                RecordType::A => aws_sdk_route53::types::RrType::A,
                RecordType::Aaaa => aws_sdk_route53::types::RrType::Aaaa,
            })
            .alias_target(
                aws_sdk_route53::types::AliasTarget::builder()
                    .hosted_zone_id(&record.alias_target_hosted_zone_id)
                    .dns_name(&record.alias_target_dns_name)
                    .evaluate_target_health(true)
                    .build()
                    .expect("alias target fields are all set"),
            )
            .build()
            .expect("rrset fields are all set");
        let change = aws_sdk_route53::types::Change::builder()
            .action(aws_sdk_route53::types::ChangeAction::Delete)
            .resource_record_set(rrset)
            .build()
            .expect("change fields are all set");
        self.route53
            .change_resource_record_sets()
            .hosted_zone_id(&record.hosted_zone_id)
            .change_batch(
                aws_sdk_route53::types::ChangeBatch::builder()
                    .changes(change)
                    .build()
                    .expect("at least one change"),
            )
            .send()
            .await
            .map_err(|e| classify_error("route53:ChangeResourceRecordSets", e))?;
        Ok(())
    }
}

#[allow(dead_code)]
fn _assert_acm_client_is_used(c: &aws_sdk_acm::Client) -> &aws_sdk_acm::Client {
    c
}
