//! Current-State Loader (spec §4.6): discovers the AWS resources this
//! controller owns for one cluster and mirrors them into a
//! [`CurrentLb`]/[`ResourceTree`]-shaped snapshot, tolerant of partial
//! enumeration failure (a failed sub-fetch marks that LB's branch
//! [`LoadResult::Unknown`] rather than treating it as deleted).
//!
//! Target groups and security groups aren't AWS-side children of a
//! LoadBalancer the way listeners are — a target group is only linked to one
//! via the rule actions that reference its ARN, and a security group only by
//! name convention — so this loader enumerates both cluster-wide once and
//! nests the ones each LB's rules actually reference into its [`CurrentLb`].

use std::collections::BTreeMap;

use crate::aws::{AwsGateway, CallContext};
use crate::model::*;

/// One LoadBalancer's current tree, loaded from AWS. Shaped like
/// [`ResourceTree`] minus the fields ([`ResourceTree::target_bindings`]) that
/// come from Kubernetes CRDs rather than AWS enumeration.
#[derive(Debug, Clone, Default)]
pub struct CurrentLb {
    pub load_balancer: LoadBalancer,
    pub dns_name: String,
    pub listeners: Vec<ListenerNode>,
    pub target_groups: BTreeMap<TargetGroupDedupKeyOrd, TargetGroup>,
}

/// Everything the diff engine needs about one cluster's current AWS footprint.
#[derive(Debug, Clone, Default)]
pub struct LoadedCurrentState {
    /// Keyed by LoadBalancer name, the stable pairing key (spec §4.7).
    pub load_balancers: BTreeMap<String, LoadResult<CurrentLb>>,
    /// Every tag-matched managed security group for the cluster, regardless of
    /// which LB (if any) still references it by name.
    pub security_groups: Vec<ManagedSecurityGroup>,
    /// Every tag-matched Route53 alias record for the cluster.
    pub route53_records: Vec<Route53Record>,
}

impl LoadedCurrentState {
    /// The managed SG matching `name`, the pairing key the builder and loader
    /// both derive from `naming::security_group_name`.
    pub fn security_group_named(&self, name: &str) -> Option<&ManagedSecurityGroup> {
        self.security_groups.iter().find(|sg| sg.name == name)
    }
}

/// Loads every tag-matched LoadBalancer's current tree for `cluster`, plus the
/// cluster's tag-matched security groups and Route53 records.
pub async fn load_current_state(
    gateway: &dyn AwsGateway,
    cluster: &str,
    ctx: &CallContext,
) -> LoadedCurrentState {
    let mut state = LoadedCurrentState::default();

    let described = match gateway.describe_load_balancers_by_tag(cluster, ctx).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(cluster, error = %e, "failed to enumerate load balancers");
            return state;
        }
    };

    let all_target_groups = match gateway.describe_target_groups_by_tag(cluster, ctx).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(cluster, error = %e, "failed to enumerate target groups; target-group branches will be unknown");
            Vec::new()
        }
    };
    let target_groups_by_arn: BTreeMap<String, TargetGroup> = all_target_groups
        .into_iter()
        .filter_map(|tg| tg.arn.clone().map(|arn| (arn.0, tg)))
        .collect();

    state.security_groups = gateway
        .describe_security_groups_by_tag(cluster, ctx)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(cluster, error = %e, "failed to enumerate security groups");
            Vec::new()
        });

    for lb in described {
        let name = lb.load_balancer.name.clone();
        match load_one(gateway, &lb, &target_groups_by_arn, ctx).await {
            Ok(tree) => {
                state.load_balancers.insert(name, LoadResult::Loaded(tree));
            }
            Err(reason) => {
                tracing::warn!(cluster, lb = %name, %reason, "load balancer branch marked unknown");
                state.load_balancers.insert(name, LoadResult::Unknown { reason });
            }
        }
    }

    state
}

async fn load_one(
    gateway: &dyn AwsGateway,
    lb: &crate::aws::DescribedLoadBalancer,
    target_groups_by_arn: &BTreeMap<String, TargetGroup>,
    ctx: &CallContext,
) -> Result<CurrentLb, String> {
    let listeners = gateway
        .describe_listeners(&lb.arn, ctx)
        .await
        .map_err(|e| format!("describe_listeners: {e}"))?;

    let mut nodes = Vec::with_capacity(listeners.len());
    let mut referenced_tg_arns: Vec<String> = Vec::new();
    for listener in listeners {
        let listener_arn = listener
            .arn
            .clone()
            .ok_or_else(|| "AWS returned a listener with no ARN".to_string())?;
        let rules = gateway
            .describe_rules(&listener_arn, ctx)
            .await
            .map_err(|e| format!("describe_rules({listener_arn}): {e}"))?;
        for rule in &rules {
            collect_forward_arns(&rule.actions, &mut referenced_tg_arns);
        }
        collect_forward_arns(&listener.default_actions, &mut referenced_tg_arns);
        nodes.push(ListenerNode { listener, rules });
    }

    let mut target_groups = BTreeMap::new();
    for arn in referenced_tg_arns {
        if let Some(tg) = target_groups_by_arn.get(&arn) {
            let key = TargetGroupDedupKeyOrd::from(&tg.dedup_key);
            target_groups.insert(key, tg.clone());
        }
    }

    Ok(CurrentLb {
        load_balancer: lb.load_balancer.clone(),
        dns_name: lb.dns_name.clone(),
        listeners: nodes,
        target_groups,
    })
}

fn collect_forward_arns(actions: &[RuleAction], out: &mut Vec<String>) {
    for action in actions {
        if let RuleAction::Forward(f) = action {
            for wtg in &f.target_groups {
                if let Some(arn) = &wtg.target_group_arn {
                    out.push(arn.0.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{CreateLoadBalancerRequest, FakeAwsGateway};
    use std::collections::BTreeMap as Map;

    fn ctx() -> CallContext {
        CallContext::default()
    }

    #[tokio::test]
    async fn loads_lb_with_no_listeners() {
        let gw = FakeAwsGateway::new();
        let tags = Map::from([(crate::consts::TAG_CLUSTER.to_string(), "c1".to_string())]);
        gw.create_load_balancer(
            &CreateLoadBalancerRequest {
                name: "lb-1".into(),
                scheme: Scheme::InternetFacing,
                ip_address_type: IpAddressType::Ipv4,
                subnets: vec!["subnet-1".into()],
                security_group_ids: vec![],
                tags,
            },
            &ctx(),
        )
        .await
        .unwrap();

        let state = load_current_state(&gw, "c1", &ctx()).await;
        assert_eq!(state.load_balancers.len(), 1);
        let loaded = state.load_balancers.get("lb-1").unwrap();
        assert!(matches!(loaded, LoadResult::Loaded(_)));
    }

    #[tokio::test]
    async fn other_cluster_lbs_are_invisible() {
        let gw = FakeAwsGateway::new();
        let tags = Map::from([(crate::consts::TAG_CLUSTER.to_string(), "other".to_string())]);
        gw.create_load_balancer(
            &CreateLoadBalancerRequest {
                name: "lb-1".into(),
                scheme: Scheme::InternetFacing,
                ip_address_type: IpAddressType::Ipv4,
                subnets: vec![],
                security_group_ids: vec![],
                tags,
            },
            &ctx(),
        )
        .await
        .unwrap();

        let state = load_current_state(&gw, "c1", &ctx()).await;
        assert!(state.load_balancers.is_empty());
    }
}
