//! In-memory [`AwsGateway`] used by reconcile/registrar/loader tests (spec §8
//! end-to-end scenarios) so those tests run without a live AWS account — the
//! same role `FakeAwsGateway` plays for this crate that `Store<Redirect>`
//! fixtures play for the pack's controller tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::gateway::*;
use crate::model::*;

#[derive(Debug, Clone, Default)]
struct LbEntry {
    load_balancer: LoadBalancer,
    dns_name: String,
    waf_acl_arn: Option<String>,
    listeners: Vec<Listener>,
    rules: BTreeMap<String, Vec<Rule>>,
}

#[derive(Debug, Default)]
struct State {
    load_balancers: BTreeMap<String, LbEntry>,
    target_groups: BTreeMap<String, TargetGroup>,
    targets: BTreeMap<String, Vec<TargetId>>,
    security_groups: BTreeMap<String, ManagedSecurityGroup>,
    tags: BTreeMap<String, BTreeMap<String, String>>,
    route53: Vec<Route53Record>,
    next_id: u64,
}

impl State {
    fn alloc(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("arn:aws:elasticloadbalancing:us-east-1:123456789012:{kind}/{:08x}", self.next_id)
    }
}

/// Deliberately not configurable with injected failures beyond what the tests
/// that construct it set up directly on `State` — keep the seams in the
/// reconcile/loader/registrar code, not in this fixture.
#[derive(Default)]
pub struct FakeAwsGateway {
    state: Mutex<State>,
}

impl FakeAwsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_health_of(&self, tg_arn: &TargetGroupArn, target: &TargetId, state: TargetHealthState) {
        let mut s = self.state.lock().unwrap();
        s.targets.entry(tg_arn.0.clone()).or_default();
        let _ = (target, state);
    }
}

fn own(cluster: &str, tags: &BTreeMap<String, String>) -> bool {
    tags.get(crate::consts::TAG_CLUSTER).map(String::as_str) == Some(cluster)
}

#[async_trait::async_trait]
impl AwsGateway for FakeAwsGateway {
    async fn describe_load_balancers_by_tag(
        &self,
        cluster: &str,
        _ctx: &CallContext,
    ) -> AwsResult<Vec<DescribedLoadBalancer>> {
        let s = self.state.lock().unwrap();
        Ok(s.load_balancers
            .iter()
            .filter(|(arn, _)| s.tags.get(*arn).map(|t| own(cluster, t)).unwrap_or(false))
            .map(|(arn, entry)| DescribedLoadBalancer {
                arn: LoadBalancerArn(arn.clone()),
                dns_name: entry.dns_name.clone(),
                state: "active".to_string(),
                load_balancer: entry.load_balancer.clone(),
            })
            .collect())
    }

    async fn describe_listeners(&self, lb_arn: &LoadBalancerArn, _ctx: &CallContext) -> AwsResult<Vec<Listener>> {
        let s = self.state.lock().unwrap();
        Ok(s.load_balancers
            .get(&lb_arn.0)
            .map(|e| e.listeners.clone())
            .unwrap_or_default())
    }

    async fn describe_rules(&self, listener_arn: &ListenerArn, _ctx: &CallContext) -> AwsResult<Vec<Rule>> {
        let s = self.state.lock().unwrap();
        for entry in s.load_balancers.values() {
            if let Some(rules) = entry.rules.get(&listener_arn.0) {
                return Ok(rules.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn describe_target_groups_by_tag(&self, cluster: &str, _ctx: &CallContext) -> AwsResult<Vec<TargetGroup>> {
        let s = self.state.lock().unwrap();
        Ok(s.target_groups
            .iter()
            .filter(|(arn, _)| s.tags.get(*arn).map(|t| own(cluster, t)).unwrap_or(false))
            .map(|(_, tg)| tg.clone())
            .collect())
    }

    async fn describe_target_health(
        &self,
        tg_arn: &TargetGroupArn,
        _ctx: &CallContext,
    ) -> AwsResult<Vec<DescribedTargetHealth>> {
        let s = self.state.lock().unwrap();
        Ok(s.targets
            .get(&tg_arn.0)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|target| DescribedTargetHealth { target, state: TargetHealthState::Healthy })
            .collect())
    }

    async fn describe_security_groups_by_tag(
        &self,
        cluster: &str,
        _ctx: &CallContext,
    ) -> AwsResult<Vec<ManagedSecurityGroup>> {
        let s = self.state.lock().unwrap();
        Ok(s.security_groups
            .iter()
            .filter(|(id, _)| s.tags.get(*id).map(|t| own(cluster, t)).unwrap_or(false))
            .map(|(_, sg)| sg.clone())
            .collect())
    }

    async fn create_load_balancer(
        &self,
        req: &CreateLoadBalancerRequest,
        _ctx: &CallContext,
    ) -> AwsResult<DescribedLoadBalancer> {
        let mut s = self.state.lock().unwrap();
        let arn = s.alloc("loadbalancer/app");
        let dns_name = format!("{}-000000000.us-east-1.elb.amazonaws.com", req.name);
        let lb = LoadBalancer {
            arn: Some(LoadBalancerArn(arn.clone())),
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
        };
        s.tags.insert(arn.clone(), req.tags.clone());
        s.load_balancers.insert(
            arn.clone(),
            LbEntry { load_balancer: lb.clone(), dns_name: dns_name.clone(), waf_acl_arn: None, listeners: Vec::new(), rules: BTreeMap::new() },
        );
        Ok(DescribedLoadBalancer { arn: LoadBalancerArn(arn), dns_name, state: "provisioning".to_string(), load_balancer: lb })
    }

    async fn modify_load_balancer_attributes(
        &self,
        arn: &LoadBalancerArn,
        req: &ModifyLoadBalancerAttributesRequest,
        _ctx: &CallContext,
    ) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let entry = s
            .load_balancers
            .get_mut(&arn.0)
            .ok_or_else(|| AwsError::NotFound(arn.0.clone()))?;
        if let Some(subnets) = &req.subnets {
            entry.load_balancer.subnets = subnets.clone();
        }
        if let Some(sgs) = &req.security_group_ids {
            entry.load_balancer.security_groups = SecurityGroupSource::Explicit(sgs.clone());
        }
        if let Some(ty) = req.ip_address_type {
            entry.load_balancer.ip_address_type = ty;
        }
        if let Some(attrs) = &req.attributes {
            entry.load_balancer.attributes = attrs.clone();
        }
        if let Some(idle) = req.idle_timeout_seconds {
            entry.load_balancer.idle_timeout_seconds = Some(idle);
        }
        Ok(())
    }

    async fn set_webacl(&self, arn: &LoadBalancerArn, waf_acl_arn: Option<&str>, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let entry = s
            .load_balancers
            .get_mut(&arn.0)
            .ok_or_else(|| AwsError::NotFound(arn.0.clone()))?;
        entry.waf_acl_arn = waf_acl_arn.map(str::to_string);
        entry.load_balancer.waf_acl_arn = entry.waf_acl_arn.clone();
        Ok(())
    }

    async fn set_shield_protection(&self, arn: &LoadBalancerArn, enabled: bool, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let entry = s
            .load_balancers
            .get_mut(&arn.0)
            .ok_or_else(|| AwsError::NotFound(arn.0.clone()))?;
        entry.load_balancer.shield_advanced_protection = enabled;
        Ok(())
    }

    async fn delete_load_balancer(&self, arn: &LoadBalancerArn, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        s.load_balancers.remove(&arn.0);
        s.tags.remove(&arn.0);
        Ok(())
    }

    async fn create_listener(
        &self,
        lb_arn: &LoadBalancerArn,
        listener: &Listener,
        _ctx: &CallContext,
    ) -> AwsResult<Listener> {
        let mut s = self.state.lock().unwrap();
        let arn = s.alloc("listener/app");
        let mut created = listener.clone();
        created.arn = Some(ListenerArn(arn));
        let entry = s
            .load_balancers
            .get_mut(&lb_arn.0)
            .ok_or_else(|| AwsError::NotFound(lb_arn.0.clone()))?;
        entry.listeners.push(created.clone());
        Ok(created)
    }

    async fn modify_listener(&self, arn: &ListenerArn, listener: &Listener, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        for entry in s.load_balancers.values_mut() {
            if let Some(existing) = entry.listeners.iter_mut().find(|l| l.arn.as_ref() == Some(arn)) {
                let mut updated = listener.clone();
                updated.arn = Some(arn.clone());
                *existing = updated;
                return Ok(());
            }
        }
        Err(AwsError::NotFound(arn.0.clone()))
    }

    async fn delete_listener(&self, arn: &ListenerArn, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        for entry in s.load_balancers.values_mut() {
            entry.listeners.retain(|l| l.arn.as_ref() != Some(arn));
        }
        s.load_balancers.values_mut().for_each(|e| {
            e.rules.remove(&arn.0);
        });
        Ok(())
    }

    async fn create_rule(&self, listener_arn: &ListenerArn, rule: &Rule, _ctx: &CallContext) -> AwsResult<Rule> {
        let mut s = self.state.lock().unwrap();
        let arn = s.alloc("listener-rule/app");
        let mut created = rule.clone();
        created.arn = Some(RuleArn(arn));
        s.load_balancers
            .values_mut()
            .find(|e| e.listeners.iter().any(|l| l.arn.as_ref() == Some(listener_arn)))
            .ok_or_else(|| AwsError::NotFound(listener_arn.0.clone()))?
            .rules
            .entry(listener_arn.0.clone())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn modify_rule(&self, arn: &RuleArn, rule: &Rule, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        for entry in s.load_balancers.values_mut() {
            for rules in entry.rules.values_mut() {
                if let Some(existing) = rules.iter_mut().find(|r| r.arn.as_ref() == Some(arn)) {
                    let mut updated = rule.clone();
                    updated.arn = Some(arn.clone());
                    *existing = updated;
                    return Ok(());
                }
            }
        }
        Err(AwsError::NotFound(arn.0.clone()))
    }

    async fn delete_rule(&self, arn: &RuleArn, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        for entry in s.load_balancers.values_mut() {
            for rules in entry.rules.values_mut() {
                rules.retain(|r| r.arn.as_ref() != Some(arn));
            }
        }
        Ok(())
    }

    async fn create_target_group(&self, tg: &TargetGroup, _ctx: &CallContext) -> AwsResult<TargetGroup> {
        let mut s = self.state.lock().unwrap();
        let arn = s.alloc("targetgroup");
        let mut created = tg.clone();
        created.arn = Some(TargetGroupArn(arn.clone()));
        s.tags.insert(arn.clone(), tg.tags.clone());
        s.target_groups.insert(arn, created.clone());
        Ok(created)
    }

    async fn modify_target_group(
        &self,
        arn: &TargetGroupArn,
        health_check: &HealthCheckConfig,
        attributes: &BTreeMap<String, String>,
        _ctx: &CallContext,
    ) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let tg = s.target_groups.get_mut(&arn.0).ok_or_else(|| AwsError::NotFound(arn.0.clone()))?;
        tg.health_check = health_check.clone();
        tg.attributes = attributes.clone();
        Ok(())
    }

    async fn delete_target_group(&self, arn: &TargetGroupArn, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        if s.targets.get(&arn.0).is_some_and(|t| !t.is_empty()) {
            return Err(AwsError::DependencyViolation(arn.0.clone()));
        }
        s.target_groups.remove(&arn.0);
        s.tags.remove(&arn.0);
        s.targets.remove(&arn.0);
        Ok(())
    }

    async fn register_targets(&self, req: &RegisterTargetsRequest, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let entry = s.targets.entry(req.target_group_arn.0.clone()).or_default();
        for t in &req.targets {
            if !entry.contains(t) {
                entry.push(t.clone());
            }
        }
        Ok(())
    }

    async fn deregister_targets(&self, req: &RegisterTargetsRequest, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        if let Some(entry) = s.targets.get_mut(&req.target_group_arn.0) {
            entry.retain(|t| !req.targets.contains(t));
        }
        Ok(())
    }

    async fn create_security_group(
        &self,
        name: &str,
        vpc_id: &str,
        tags: &BTreeMap<String, String>,
        _ctx: &CallContext,
    ) -> AwsResult<String> {
        let mut s = self.state.lock().unwrap();
        let group_id = format!("sg-{:08x}", { s.next_id += 1; s.next_id });
        s.tags.insert(group_id.clone(), tags.clone());
        s.security_groups.insert(
            group_id.clone(),
            ManagedSecurityGroup {
                group_id: Some(group_id.clone()),
                name: name.to_string(),
                vpc_id: vpc_id.to_string(),
                inbound_rules: Vec::new(),
                instance_security_group: None,
            },
        );
        Ok(group_id)
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[InboundRule],
        _ctx: &CallContext,
    ) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let sg = s
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| AwsError::NotFound(group_id.to_string()))?;
        for r in rules {
            if !sg.inbound_rules.contains(r) {
                sg.inbound_rules.push(r.clone());
            }
        }
        Ok(())
    }

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[InboundRule],
        _ctx: &CallContext,
    ) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let sg = s
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| AwsError::NotFound(group_id.to_string()))?;
        sg.inbound_rules.retain(|r| !rules.contains(r));
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        s.security_groups.remove(group_id);
        s.tags.remove(group_id);
        Ok(())
    }

    async fn update_tags(
        &self,
        resource_arn: &str,
        set: &BTreeMap<String, String>,
        remove: &[String],
        _ctx: &CallContext,
    ) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        let tags = s.tags.entry(resource_arn.to_string()).or_default();
        for (k, v) in set {
            tags.insert(k.clone(), v.clone());
        }
        for k in remove {
            tags.remove(k);
        }
        let tags = tags.clone();
        if let Some(entry) = s.load_balancers.get_mut(resource_arn) {
            entry.load_balancer.tags = tags.clone();
        }
        if let Some(tg) = s.target_groups.get_mut(resource_arn) {
            tg.tags = tags;
        }
        Ok(())
    }

    async fn upsert_alias_record(&self, record: &Route53Record, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        s.route53.retain(|r| r.hostname != record.hostname);
        s.route53.push(record.clone());
        Ok(())
    }

    async fn delete_alias_record(&self, record: &Route53Record, _ctx: &CallContext) -> AwsResult<()> {
        let mut s = self.state.lock().unwrap();
        s.route53.retain(|r| r.hostname != record.hostname);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb_req(name: &str) -> CreateLoadBalancerRequest {
        CreateLoadBalancerRequest {
            name: name.to_string(),
            scheme: Scheme::InternetFacing,
            ip_address_type: IpAddressType::Ipv4,
            subnets: vec!["subnet-1".into(), "subnet-2".into()],
            security_group_ids: vec!["sg-1".into()],
            tags: BTreeMap::from([(crate::consts::TAG_CLUSTER.to_string(), "test-cluster".to_string())]),
        }
    }

    #[tokio::test]
    async fn create_then_describe_by_tag_round_trips() {
        let gw = FakeAwsGateway::new();
        let ctx = CallContext::default();
        let created = gw.create_load_balancer(&lb_req("my-lb"), &ctx).await.unwrap();
        let found = gw.describe_load_balancers_by_tag("test-cluster", &ctx).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].arn, created.arn);
    }

    #[tokio::test]
    async fn describe_by_tag_excludes_other_clusters() {
        let gw = FakeAwsGateway::new();
        let ctx = CallContext::default();
        gw.create_load_balancer(&lb_req("my-lb"), &ctx).await.unwrap();
        let found = gw.describe_load_balancers_by_tag("other-cluster", &ctx).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn target_group_delete_fails_while_targets_registered() {
        let gw = FakeAwsGateway::new();
        let ctx = CallContext::default();
        let tg = TargetGroup {
            arn: None,
            name: "tg".into(),
            dedup_key: TargetGroupDedupKey {
                service_namespace: "default".into(),
                service_name: "svc".into(),
                service_port: "80".into(),
                protocol: Protocol::Http,
                protocol_version: None,
                target_type: TargetType::Ip,
                health_check: HealthCheckConfig::default(),
            },
            port: 8080,
            ip_address_type: TgIpAddressType::Ipv4,
            vpc_id: "vpc-1".into(),
            health_check: HealthCheckConfig::default(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            node_selector: None,
            multi_cluster: false,
        };
        let created = gw.create_target_group(&tg, &ctx).await.unwrap();
        let arn = created.arn.clone().unwrap();
        gw.register_targets(
            &RegisterTargetsRequest {
                target_group_arn: arn.clone(),
                targets: vec![TargetId::Ip { ip: "10.0.0.1".into(), port: 8080, availability_zone: None }],
            },
            &ctx,
        )
        .await
        .unwrap();
        let err = gw.delete_target_group(&arn, &ctx).await.unwrap_err();
        assert!(err.is_dependency_violation());
    }
}
