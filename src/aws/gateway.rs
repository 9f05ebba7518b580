//! Typed wrapper over ELBv2/EC2/ACM/Route53/WAF (spec §4.1).
//!
//! `AwsGateway` is the seam between the reconcile core and the AWS SDKs: every
//! request is typed and addressed by ARN or stable name, pagination happens
//! inside the implementation, and the trait is what [`crate::reconcile`] and
//! [`crate::registrar`] actually call — so both can run against
//! [`FakeAwsGateway`] in tests without a live AWS account.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::model::{
    Certificate, HealthCheckConfig, IpAddressType, Listener, LoadBalancer, LoadBalancerArn,
    ManagedSecurityGroup, Protocol, ProtocolVersion, Rule, RuleArn, RuleAction, Scheme,
    TargetGroup, TargetGroupArn, TargetId, TgIpAddressType,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AwsError {
    #[error("throttled calling {0}")]
    Throttled(String),
    #[error("server error calling {0}: {1}")]
    ServerError(String, String),
    #[error("dependency violation deleting {0}")]
    DependencyViolation(String),
    #[error("validation error calling {0}: {1}")]
    Validation(String, String),
    #[error("quota exceeded calling {0}")]
    QuotaExceeded(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("{0}")]
    Other(String),
}

impl AwsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AwsError::Throttled(_) | AwsError::ServerError(_, _))
    }

    pub fn is_dependency_violation(&self) -> bool {
        matches!(self, AwsError::DependencyViolation(_))
    }
}

pub type AwsResult<T> = Result<T, AwsError>;

/// Per-call role-assumption + region override (spec §4.1, §5 cross-account/cross-region).
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub assume_role_arn: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub scheme: Scheme,
    pub ip_address_type: IpAddressType,
    pub subnets: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DescribedLoadBalancer {
    pub arn: LoadBalancerArn,
    pub dns_name: String,
    pub state: String,
    pub load_balancer: LoadBalancer,
}

#[derive(Debug, Clone, Default)]
pub struct ModifyLoadBalancerAttributesRequest {
    pub subnets: Option<Vec<String>>,
    pub security_group_ids: Option<Vec<String>>,
    pub ip_address_type: Option<IpAddressType>,
    pub attributes: Option<BTreeMap<String, String>>,
    pub idle_timeout_seconds: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RegisterTargetsRequest {
    pub target_group_arn: TargetGroupArn,
    pub targets: Vec<TargetId>,
}

#[derive(Debug, Clone)]
pub struct DescribedTargetHealth {
    pub target: TargetId,
    pub state: TargetHealthState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetHealthState {
    Initial,
    Healthy,
    Unhealthy,
    Draining,
    Unused,
    Unavailable,
}

#[async_trait]
pub trait AwsGateway: Send + Sync {
    // --- enumeration for the current-state loader (spec §4.6) ---
    async fn describe_load_balancers_by_tag(
        &self,
        cluster: &str,
        ctx: &CallContext,
    ) -> AwsResult<Vec<DescribedLoadBalancer>>;
    async fn describe_listeners(
        &self,
        lb_arn: &LoadBalancerArn,
        ctx: &CallContext,
    ) -> AwsResult<Vec<Listener>>;
    async fn describe_rules(
        &self,
        listener_arn: &crate::model::ListenerArn,
        ctx: &CallContext,
    ) -> AwsResult<Vec<Rule>>;
    async fn describe_target_groups_by_tag(
        &self,
        cluster: &str,
        ctx: &CallContext,
    ) -> AwsResult<Vec<TargetGroup>>;
    async fn describe_target_health(
        &self,
        tg_arn: &TargetGroupArn,
        ctx: &CallContext,
    ) -> AwsResult<Vec<DescribedTargetHealth>>;
    async fn describe_security_groups_by_tag(
        &self,
        cluster: &str,
        ctx: &CallContext,
    ) -> AwsResult<Vec<ManagedSecurityGroup>>;

    // --- LoadBalancer ---
    async fn create_load_balancer(
        &self,
        req: &CreateLoadBalancerRequest,
        ctx: &CallContext,
    ) -> AwsResult<DescribedLoadBalancer>;
    async fn modify_load_balancer_attributes(
        &self,
        arn: &LoadBalancerArn,
        req: &ModifyLoadBalancerAttributesRequest,
        ctx: &CallContext,
    ) -> AwsResult<()>;
    async fn set_webacl(&self, arn: &LoadBalancerArn, waf_acl_arn: Option<&str>, ctx: &CallContext) -> AwsResult<()>;
    async fn set_shield_protection(&self, arn: &LoadBalancerArn, enabled: bool, ctx: &CallContext) -> AwsResult<()>;
    async fn delete_load_balancer(&self, arn: &LoadBalancerArn, ctx: &CallContext) -> AwsResult<()>;

    // --- Listener ---
    async fn create_listener(
        &self,
        lb_arn: &LoadBalancerArn,
        listener: &Listener,
        ctx: &CallContext,
    ) -> AwsResult<Listener>;
    async fn modify_listener(
        &self,
        arn: &crate::model::ListenerArn,
        listener: &Listener,
        ctx: &CallContext,
    ) -> AwsResult<()>;
    async fn delete_listener(&self, arn: &crate::model::ListenerArn, ctx: &CallContext) -> AwsResult<()>;

    // --- Rule ---
    async fn create_rule(
        &self,
        listener_arn: &crate::model::ListenerArn,
        rule: &Rule,
        ctx: &CallContext,
    ) -> AwsResult<Rule>;
    async fn modify_rule(&self, arn: &RuleArn, rule: &Rule, ctx: &CallContext) -> AwsResult<()>;
    async fn delete_rule(&self, arn: &RuleArn, ctx: &CallContext) -> AwsResult<()>;

    // --- TargetGroup ---
    async fn create_target_group(&self, tg: &TargetGroup, ctx: &CallContext) -> AwsResult<TargetGroup>;
    async fn modify_target_group(
        &self,
        arn: &TargetGroupArn,
        health_check: &HealthCheckConfig,
        attributes: &BTreeMap<String, String>,
        ctx: &CallContext,
    ) -> AwsResult<()>;
    async fn delete_target_group(&self, arn: &TargetGroupArn, ctx: &CallContext) -> AwsResult<()>;

    // --- targets ---
    async fn register_targets(&self, req: &RegisterTargetsRequest, ctx: &CallContext) -> AwsResult<()>;
    async fn deregister_targets(&self, req: &RegisterTargetsRequest, ctx: &CallContext) -> AwsResult<()>;

    // --- security groups ---
    async fn create_security_group(
        &self,
        name: &str,
        vpc_id: &str,
        tags: &BTreeMap<String, String>,
        ctx: &CallContext,
    ) -> AwsResult<String>;
    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[crate::model::InboundRule],
        ctx: &CallContext,
    ) -> AwsResult<()>;
    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[crate::model::InboundRule],
        ctx: &CallContext,
    ) -> AwsResult<()>;
    async fn delete_security_group(&self, group_id: &str, ctx: &CallContext) -> AwsResult<()>;

    // --- tags ---
    async fn update_tags(
        &self,
        resource_arn: &str,
        set: &BTreeMap<String, String>,
        remove: &[String],
        ctx: &CallContext,
    ) -> AwsResult<()>;

    // --- Route53 ---
    async fn upsert_alias_record(&self, record: &crate::model::Route53Record, ctx: &CallContext) -> AwsResult<()>;
    async fn delete_alias_record(&self, record: &crate::model::Route53Record, ctx: &CallContext) -> AwsResult<()>;
}

/// Renders a `RuleAction` into the request shape AWS expects, resolving
/// forward-action target-group keys to ARNs via `resolve_tg_arn` (the builder
/// hands over dedup keys before ARNs exist; by reconcile time every key in the
/// tree has materialized).
pub fn render_actions_for_request(
    actions: &[RuleAction],
    resolve_tg_arn: impl Fn(&str) -> Option<TargetGroupArn>,
) -> Vec<RuleAction> {
    actions
        .iter()
        .map(|action| match action {
            RuleAction::Forward(f) => {
                let mut f = f.clone();
                for wtg in &mut f.target_groups {
                    if wtg.target_group_arn.is_none() {
                        wtg.target_group_arn = resolve_tg_arn(&wtg.target_group_key);
                    }
                }
                RuleAction::Forward(f)
            }
            other => other.clone(),
        })
        .collect()
}

#[allow(dead_code)]
fn _assert_protocol_version_is_used(_: ProtocolVersion) {}
#[allow(dead_code)]
fn _assert_protocol_is_used(_: Protocol) {}
#[allow(dead_code)]
fn _assert_certificate_is_used(_: Certificate) {}
#[allow(dead_code)]
fn _assert_tg_ip_is_used(_: TgIpAddressType) {}
