//! Diff & Reconcile Engine (spec §4.7): pairs desired against current by
//! stable identity, classifies each pairing as create/modify-in-place/replace/
//! delete, and drives [`AwsGateway`] calls in dependency order — security
//! group, then target groups, then the load balancer itself, then listeners
//! and their rules, then Route53.

use std::collections::{BTreeMap, HashMap};

use crate::aws::retry::retry_dependency_violation;
use crate::aws::{
    AwsGateway, CallContext, CreateLoadBalancerRequest, ModifyLoadBalancerAttributesRequest,
    render_actions_for_request,
};
use crate::err::{ReconcileError, Result};
use crate::loader::CurrentLb;
use crate::model::*;

/// What a reconcile pass actually changed, surfaced to the status publisher
/// and to metrics. `target_group_arns` is keyed by the builder's dedup-key
/// fragment so the registrar can resolve a desired `TargetGroup` straight to
/// the ARN the reconcile pass just created or confirmed.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub lb_arn: Option<LoadBalancerArn>,
    pub lb_dns_name: Option<String>,
    pub lifecycle: LbLifecycle,
    pub target_group_arns: BTreeMap<TargetGroupDedupKeyOrd, TargetGroupArn>,
    pub managed_security_group_id: Option<String>,
}

impl Default for LbLifecycle {
    fn default() -> Self {
        LbLifecycle::Absent
    }
}

/// Reconciles one group's desired [`ResourceTree`] against its current AWS
/// footprint (`None` when the loader never saw this LB, spec §4.6 "Absent").
/// `current.is_unknown()` short-circuits everything but read-only status
/// reporting, since acting on an unknown branch risks clobbering state the
/// loader failed to enumerate (spec §4.6).
pub async fn reconcile_tree(
    gateway: &dyn AwsGateway,
    cluster_name: &str,
    desired: &ResourceTree,
    current: &LoadResult<CurrentLb>,
    ctx: &CallContext,
) -> Result<ReconcileOutcome> {
    if let LoadResult::Unknown { reason } = current {
        return Err(ReconcileError::PartialSuccess(format!(
            "skipping reconcile: current state unknown ({reason})"
        )));
    }
    let current = current.clone().loaded();

    let mut outcome = ReconcileOutcome::default();

    reconcile_security_group(gateway, desired, current.as_ref(), ctx, &mut outcome).await?;
    reconcile_target_groups(gateway, desired, current.as_ref(), ctx, &mut outcome).await?;
    reconcile_load_balancer(gateway, cluster_name, desired, current.as_ref(), ctx, &mut outcome).await?;
    let lb_arn = outcome
        .lb_arn
        .clone()
        .ok_or_else(|| ReconcileError::PartialSuccess("load balancer has no ARN after reconcile".to_string()))?;
    reconcile_listeners(gateway, desired, current.as_ref(), &lb_arn, &outcome.target_group_arns, ctx).await?;
    reconcile_route53(gateway, desired, outcome.lb_dns_name.as_deref(), ctx).await?;

    Ok(outcome)
}

async fn reconcile_security_group(
    gateway: &dyn AwsGateway,
    desired: &ResourceTree,
    current: Option<&CurrentLb>,
    ctx: &CallContext,
    outcome: &mut ReconcileOutcome,
) -> Result<()> {
    let Some(desired_sg) = &desired.managed_security_group else {
        return Ok(());
    };

    // The loader nests referenced security groups by name, not by ARN, so the
    // previous cycle's group_id (if any) rides along on the LB's desired node
    // once the builder has seen it; absent that, the managed group is new.
    let existing = current.and_then(|c| {
        if c.load_balancer.security_groups == SecurityGroupSource::Managed {
            desired_sg.group_id.as_ref()
        } else {
            None
        }
    });

    let group_id = if let Some(id) = existing {
        id.clone()
    } else {
        let mut tags = BTreeMap::new();
        tags.insert(crate::consts::TAG_CLUSTER.to_string(), desired.load_balancer.tags
            .get(crate::consts::TAG_CLUSTER)
            .cloned()
            .unwrap_or_default());
        tags.insert(crate::consts::TAG_RESOURCE.to_string(), "security-group".to_string());
        gateway
            .create_security_group(&desired_sg.name, &desired_sg.vpc_id, &tags, ctx)
            .await
            .map_err(|e| ("create_security_group", e))?
    };

    let current_sg = ManagedSecurityGroup {
        group_id: Some(group_id.clone()),
        name: desired_sg.name.clone(),
        vpc_id: desired_sg.vpc_id.clone(),
        inbound_rules: Vec::new(),
        instance_security_group: desired_sg.instance_security_group.clone(),
    };
    let drift = desired_sg.drift(&current_sg);
    if !drift.to_add.is_empty() {
        gateway
            .authorize_security_group_ingress(&group_id, &drift.to_add, ctx)
            .await
            .map_err(|e| ("authorize_security_group_ingress", e))?;
    }
    if !drift.to_remove.is_empty() {
        gateway
            .revoke_security_group_ingress(&group_id, &drift.to_remove, ctx)
            .await
            .map_err(|e| ("revoke_security_group_ingress", e))?;
    }

    outcome.managed_security_group_id = Some(group_id);
    Ok(())
}

async fn reconcile_target_groups(
    gateway: &dyn AwsGateway,
    desired: &ResourceTree,
    current: Option<&CurrentLb>,
    ctx: &CallContext,
    outcome: &mut ReconcileOutcome,
) -> Result<()> {
    let empty = BTreeMap::new();
    let current_tgs = current.map(|c| &c.target_groups).unwrap_or(&empty);

    for (key, desired_tg) in &desired.target_groups {
        desired_tg.validate().map_err(ReconcileError::Validation)?;

        match current_tgs.get(key) {
            None => {
                let created = gateway
                    .create_target_group(desired_tg, ctx)
                    .await
                    .map_err(|e| ("create_target_group", e))?;
                if let Some(arn) = created.arn {
                    outcome.target_group_arns.insert(key.clone(), arn);
                }
            }
            Some(current_tg) => {
                let arn = current_tg
                    .arn
                    .clone()
                    .ok_or_else(|| ReconcileError::PartialSuccess(format!("target group {key:?} has no ARN")))?;
                if desired_tg.requires_replace(current_tg) {
                    retry_dependency_violation(
                        |e: &crate::aws::AwsError| e.is_dependency_violation(),
                        || gateway.delete_target_group(&arn, ctx),
                    )
                    .await
                    .map_err(|e| ("delete_target_group", e))?;
                    let created = gateway
                        .create_target_group(desired_tg, ctx)
                        .await
                        .map_err(|e| ("create_target_group", e))?;
                    if let Some(new_arn) = created.arn {
                        outcome.target_group_arns.insert(key.clone(), new_arn);
                    }
                } else {
                    let mask = desired_tg.dirty_mask(current_tg);
                    if !mask.is_empty() {
                        gateway
                            .modify_target_group(&arn, &desired_tg.health_check, &desired_tg.attributes, ctx)
                            .await
                            .map_err(|e| ("modify_target_group", e))?;
                    }
                    if mask.contains(TgDirtyMask::TAGS) {
                        let (set, remove) = crate::utils::diff_tags(&desired_tg.tags, &current_tg.tags);
                        gateway
                            .update_tags(arn.as_ref(), &set, &remove, ctx)
                            .await
                            .map_err(|e| ("update_tags", e))?;
                    }
                    outcome.target_group_arns.insert(key.clone(), arn);
                }
            }
        }
    }

    // Target groups AWS still has tagged for this cluster but the desired tree
    // no longer references are orphaned; best-effort delete, tolerating the
    // dependency-violation window while targets drain.
    for (key, current_tg) in current_tgs {
        if desired.target_groups.contains_key(key) {
            continue;
        }
        let Some(arn) = &current_tg.arn else { continue };
        let _ = retry_dependency_violation(
            |e: &crate::aws::AwsError| e.is_dependency_violation(),
            || gateway.delete_target_group(arn, ctx),
        )
        .await;
    }

    Ok(())
}

async fn reconcile_load_balancer(
    gateway: &dyn AwsGateway,
    cluster_name: &str,
    desired: &ResourceTree,
    current: Option<&CurrentLb>,
    ctx: &CallContext,
    outcome: &mut ReconcileOutcome,
) -> Result<()> {
    let security_group_ids: Vec<String> = match (&desired.load_balancer.security_groups, &outcome.managed_security_group_id) {
        (SecurityGroupSource::Explicit(ids), _) => ids.clone(),
        (SecurityGroupSource::Managed, Some(id)) => vec![id.clone()],
        (SecurityGroupSource::Managed, None) => Vec::new(),
    };

    let Some(current) = current else {
        let mut tags = desired.load_balancer.tags.clone();
        tags.insert(crate::consts::TAG_CLUSTER.to_string(), cluster_name.to_string());
        let created = gateway
            .create_load_balancer(
                &CreateLoadBalancerRequest {
                    name: desired.load_balancer.name.clone(),
                    scheme: desired.load_balancer.scheme,
                    ip_address_type: desired.load_balancer.ip_address_type,
                    subnets: desired.load_balancer.subnets.clone(),
                    security_group_ids,
                    tags,
                },
                ctx,
            )
            .await
            .map_err(|e| ("create_load_balancer", e))?;
        if let Some(waf) = &desired.load_balancer.waf_acl_arn {
            gateway
                .set_webacl(&created.arn, Some(waf.as_str()), ctx)
                .await
                .map_err(|e| ("set_webacl", e))?;
        }
        if desired.load_balancer.shield_advanced_protection {
            gateway
                .set_shield_protection(&created.arn, true, ctx)
                .await
                .map_err(|e| ("set_shield_protection", e))?;
        }
        outcome.lb_arn = Some(created.arn);
        outcome.lb_dns_name = Some(created.dns_name);
        outcome.lifecycle = LbLifecycle::Provisioning;
        return Ok(());
    };

    let arn = current
        .load_balancer
        .arn
        .clone()
        .ok_or_else(|| ReconcileError::PartialSuccess("current load balancer has no ARN".to_string()))?;

    if desired.load_balancer.requires_replace(&current.load_balancer) {
        delete_load_balancer(gateway, &arn, current, ctx).await?;
        let mut tags = desired.load_balancer.tags.clone();
        tags.insert(crate::consts::TAG_CLUSTER.to_string(), cluster_name.to_string());
        let created = gateway
            .create_load_balancer(
                &CreateLoadBalancerRequest {
                    name: desired.load_balancer.name.clone(),
                    scheme: desired.load_balancer.scheme,
                    ip_address_type: desired.load_balancer.ip_address_type,
                    subnets: desired.load_balancer.subnets.clone(),
                    security_group_ids,
                    tags,
                },
                ctx,
            )
            .await
            .map_err(|e| ("create_load_balancer", e))?;
        if let Some(waf) = &desired.load_balancer.waf_acl_arn {
            gateway
                .set_webacl(&created.arn, Some(waf.as_str()), ctx)
                .await
                .map_err(|e| ("set_webacl", e))?;
        }
        if desired.load_balancer.shield_advanced_protection {
            gateway
                .set_shield_protection(&created.arn, true, ctx)
                .await
                .map_err(|e| ("set_shield_protection", e))?;
        }
        outcome.lb_arn = Some(created.arn);
        outcome.lb_dns_name = Some(created.dns_name);
        outcome.lifecycle = LbLifecycle::Provisioning;
        return Ok(());
    }

    let mask = desired.load_balancer.dirty_mask(&current.load_balancer);
    if !mask.is_empty() {
        gateway
            .modify_load_balancer_attributes(
                &arn,
                &ModifyLoadBalancerAttributesRequest {
                    subnets: Some(desired.load_balancer.subnets.clone()),
                    security_group_ids: Some(security_group_ids),
                    ip_address_type: Some(desired.load_balancer.ip_address_type),
                    attributes: Some(desired.load_balancer.attributes.clone()),
                    idle_timeout_seconds: desired.load_balancer.idle_timeout_seconds,
                },
                ctx,
            )
            .await
            .map_err(|e| ("modify_load_balancer_attributes", e))?;
        if mask.contains(LbDirtyMask::WAF) {
            gateway
                .set_webacl(&arn, desired.load_balancer.waf_acl_arn.as_deref(), ctx)
                .await
                .map_err(|e| ("set_webacl", e))?;
        }
        if mask.contains(LbDirtyMask::TAGS) {
            let (set, remove) = crate::utils::diff_tags(&desired.load_balancer.tags, &current.load_balancer.tags);
            gateway
                .update_tags(arn.as_ref(), &set, &remove, ctx)
                .await
                .map_err(|e| ("update_tags", e))?;
        }
        if mask.contains(LbDirtyMask::SHIELD) {
            gateway
                .set_shield_protection(&arn, desired.load_balancer.shield_advanced_protection, ctx)
                .await
                .map_err(|e| ("set_shield_protection", e))?;
        }
    }

    outcome.lb_arn = Some(arn);
    outcome.lb_dns_name = Some(current.dns_name.clone());
    outcome.lifecycle = LbLifecycle::Active;
    Ok(())
}

/// LB-delete ordering (spec §4.7): listeners first, since AWS refuses to
/// delete a LoadBalancer that still has any.
async fn delete_load_balancer(
    gateway: &dyn AwsGateway,
    arn: &LoadBalancerArn,
    current: &CurrentLb,
    ctx: &CallContext,
) -> Result<()> {
    for node in &current.listeners {
        if let Some(listener_arn) = &node.listener.arn {
            gateway
                .delete_listener(listener_arn, ctx)
                .await
                .map_err(|e| ("delete_listener", e))?;
        }
    }
    gateway.set_webacl(arn, None, ctx).await.map_err(|e| ("set_webacl", e))?;
    gateway.delete_load_balancer(arn, ctx).await.map_err(|e| ("delete_load_balancer", e))?;
    Ok(())
}

async fn reconcile_listeners(
    gateway: &dyn AwsGateway,
    desired: &ResourceTree,
    current: Option<&CurrentLb>,
    lb_arn: &LoadBalancerArn,
    tg_arns: &BTreeMap<TargetGroupDedupKeyOrd, TargetGroupArn>,
    ctx: &CallContext,
) -> Result<()> {
    let resolve_arn = |key: &str| tg_arns.get(&TargetGroupDedupKeyOrd(key.to_string())).cloned();

    let empty: Vec<ListenerNode> = Vec::new();
    let current_nodes = current.map(|c| &c.listeners).unwrap_or(&empty);
    let mut current_by_key: HashMap<(Protocol, u16), &ListenerNode> =
        current_nodes.iter().map(|n| (n.listener.key(), n)).collect();

    for node in &desired.listeners {
        node.listener.validate().map_err(ReconcileError::Validation)?;
        let key = node.listener.key();
        let rendered_default_actions = render_actions_for_request(&node.listener.default_actions, &resolve_arn);

        match current_by_key.remove(&key) {
            None => {
                let mut to_create = node.listener.clone();
                to_create.default_actions = rendered_default_actions;
                let created = gateway
                    .create_listener(lb_arn, &to_create, ctx)
                    .await
                    .map_err(|e| ("create_listener", e))?;
                let listener_arn = created
                    .arn
                    .ok_or_else(|| ReconcileError::PartialSuccess("created listener has no ARN".to_string()))?;
                for rule in &node.rules {
                    rule.validate().map_err(ReconcileError::Validation)?;
                    let mut to_create = rule.clone();
                    to_create.actions = render_actions_for_request(&rule.actions, &resolve_arn);
                    gateway
                        .create_rule(&listener_arn, &to_create, ctx)
                        .await
                        .map_err(|e| ("create_rule", e))?;
                }
            }
            Some(current_node) => {
                let listener_arn = current_node
                    .listener
                    .arn
                    .clone()
                    .ok_or_else(|| ReconcileError::PartialSuccess("current listener has no ARN".to_string()))?;
                let mut desired_rendered = node.listener.clone();
                desired_rendered.default_actions = rendered_default_actions;
                if !desired_rendered.dirty_mask(&current_node.listener).is_empty() {
                    gateway
                        .modify_listener(&listener_arn, &desired_rendered, ctx)
                        .await
                        .map_err(|e| ("modify_listener", e))?;
                }
                reconcile_rules(gateway, &listener_arn, &node.rules, &current_node.rules, &resolve_arn, ctx).await?;
            }
        }
    }

    for (_, stale) in current_by_key {
        if let Some(arn) = &stale.listener.arn {
            gateway.delete_listener(arn, ctx).await.map_err(|e| ("delete_listener", e))?;
        }
    }

    Ok(())
}

async fn reconcile_rules(
    gateway: &dyn AwsGateway,
    listener_arn: &ListenerArn,
    desired_rules: &[Rule],
    current_rules: &[Rule],
    resolve_arn: &impl Fn(&str) -> Option<TargetGroupArn>,
    ctx: &CallContext,
) -> Result<()> {
    validate_unique_priorities(desired_rules).map_err(ReconcileError::Validation)?;
    let mut current_by_priority: BTreeMap<u32, &Rule> =
        current_rules.iter().map(|r| (r.key(), r)).collect();

    for rule in desired_rules {
        rule.validate().map_err(ReconcileError::Validation)?;
        let mut rendered = rule.clone();
        rendered.actions = render_actions_for_request(&rule.actions, resolve_arn);

        match current_by_priority.remove(&rule.key()) {
            None => {
                gateway
                    .create_rule(listener_arn, &rendered, ctx)
                    .await
                    .map_err(|e| ("create_rule", e))?;
            }
            Some(current_rule) => {
                let arn = current_rule
                    .arn
                    .clone()
                    .ok_or_else(|| ReconcileError::PartialSuccess("current rule has no ARN".to_string()))?;
                if !rendered.dirty_mask(current_rule).is_empty() {
                    gateway.modify_rule(&arn, &rendered, ctx).await.map_err(|e| ("modify_rule", e))?;
                }
            }
        }
    }

    for (_, stale) in current_by_priority {
        if let Some(arn) = &stale.arn {
            gateway.delete_rule(arn, ctx).await.map_err(|e| ("delete_rule", e))?;
        }
    }

    Ok(())
}

async fn reconcile_route53(
    gateway: &dyn AwsGateway,
    desired: &ResourceTree,
    lb_dns_name: Option<&str>,
    ctx: &CallContext,
) -> Result<()> {
    let Some(dns_name) = lb_dns_name else { return Ok(()) };
    for record in &desired.route53_records {
        let mut to_upsert = record.clone();
        to_upsert.alias_target_dns_name = dns_name.to_string();
        if to_upsert.alias_target_hosted_zone_id.is_empty() {
            to_upsert.alias_target_hosted_zone_id = alb_hosted_zone_id(ctx.region.as_deref()).to_string();
        }
        gateway
            .upsert_alias_record(&to_upsert, ctx)
            .await
            .map_err(|e| ("upsert_alias_record", e))?;
    }
    Ok(())
}

/// AWS's own hosted-zone ID for ALBs in each region (a fixed, publicly
/// documented constant per region, not derived from anything this controller
/// observes). Falls back to the us-east-1 value when the region is unset or
/// unrecognized, matching `CallContext::region`'s own "None means default
/// region" convention.
fn alb_hosted_zone_id(region: Option<&str>) -> &'static str {
    match region.unwrap_or("us-east-1") {
        "us-west-2" => "Z1H1FL5HABSF5",
        "eu-west-1" => "Z32O12XQLNTSW2",
        "ap-southeast-1" => "Z1LMS91P8CMLE5",
        _ => "Z35SXDOTRQ7X7K",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::FakeAwsGateway;

    fn ctx() -> CallContext {
        CallContext::default()
    }

    fn simple_tree(name: &str) -> ResourceTree {
        let lb = LoadBalancer {
            arn: None,
            name: name.to_string(),
            scheme: Scheme::InternetFacing,
            ip_address_type: IpAddressType::Ipv4,
            subnets: vec!["subnet-1".into()],
            security_groups: SecurityGroupSource::Explicit(vec!["sg-1".into()]),
            attributes: BTreeMap::new(),
            tags: BTreeMap::from([(crate::consts::TAG_CLUSTER.to_string(), "c1".to_string())]),
            idle_timeout_seconds: None,
            waf_acl_arn: None,
            minimum_capacity: None,
            shield_advanced_protection: false,
        };
        let mut tree = ResourceTree::empty(lb);
        tree.listeners.push(ListenerNode {
            listener: Listener {
                arn: None,
                protocol: Protocol::Http,
                port: 80,
                ssl_policy: None,
                certificates: Vec::new(),
                attributes: BTreeMap::new(),
                default_actions: vec![RuleAction::FixedResponse(FixedResponseAction {
                    status_code: 404,
                    content_type: None,
                    message_body: None,
                })],
                mutual_tls: None,
            },
            rules: Vec::new(),
        });
        tree
    }

    #[tokio::test]
    async fn first_reconcile_creates_lb_and_listener() {
        let gw = FakeAwsGateway::new();
        let desired = simple_tree("lb-1");
        let outcome = reconcile_tree(&gw, "c1", &desired, &LoadResult::Absent, &ctx()).await.unwrap();
        assert!(outcome.lb_arn.is_some());
        assert_eq!(outcome.lifecycle, LbLifecycle::Provisioning);

        let state = crate::loader::load_current_state(&gw, "c1", &ctx()).await;
        let loaded = state.load_balancers.get("lb-1").unwrap();
        let LoadResult::Loaded(current) = loaded else { panic!("expected loaded") };
        assert_eq!(current.listeners.len(), 1);
    }

    #[tokio::test]
    async fn unknown_current_state_is_never_acted_on() {
        let gw = FakeAwsGateway::new();
        let desired = simple_tree("lb-1");
        let err = reconcile_tree(
            &gw,
            "c1",
            &desired,
            &LoadResult::Unknown { reason: "describe_listeners timed out".to_string() },
            &ctx(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReconcileError::PartialSuccess(_)));
    }

    #[tokio::test]
    async fn second_reconcile_is_a_no_op_when_nothing_changed() {
        let gw = FakeAwsGateway::new();
        let desired = simple_tree("lb-1");
        reconcile_tree(&gw, "c1", &desired, &LoadResult::Absent, &ctx()).await.unwrap();
        let state = crate::loader::load_current_state(&gw, "c1", &ctx()).await;
        let current = state.load_balancers.get("lb-1").unwrap().clone();
        let outcome = reconcile_tree(&gw, "c1", &desired, &current, &ctx()).await.unwrap();
        assert_eq!(outcome.lifecycle, LbLifecycle::Active);
    }

    #[tokio::test]
    async fn tag_only_drift_is_applied_and_then_settles() {
        let gw = FakeAwsGateway::new();
        let mut desired = simple_tree("lb-1");
        reconcile_tree(&gw, "c1", &desired, &LoadResult::Absent, &ctx()).await.unwrap();
        let state = crate::loader::load_current_state(&gw, "c1", &ctx()).await;
        let current = state.load_balancers.get("lb-1").unwrap().clone();

        desired.load_balancer.tags.insert("team".to_string(), "payments".to_string());
        reconcile_tree(&gw, "c1", &desired, &current, &ctx()).await.unwrap();

        let state = crate::loader::load_current_state(&gw, "c1", &ctx()).await;
        let current = state.load_balancers.get("lb-1").unwrap().clone();
        let LoadResult::Loaded(loaded) = &current else { panic!("expected loaded") };
        assert_eq!(loaded.load_balancer.tags.get("team"), Some(&"payments".to_string()));

        let outcome = reconcile_tree(&gw, "c1", &desired, &current, &ctx()).await.unwrap();
        assert_eq!(outcome.lifecycle, LbLifecycle::Active);
    }
}
