//! Target Registrar (spec §4.8): resolves each TargetGroup's concrete target
//! set from the cluster cache and converges AWS registrations via batched
//! register/deregister calls, tracking drift between reconciles.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::aws::{AwsGateway, CallContext, RegisterTargetsRequest};
use crate::cluster::ClusterIndex;
use crate::err::Result;
use crate::model::*;

/// AWS's per-call limit for RegisterTargets/DeregisterTargets (spec §4.8: "typically 200").
const TARGET_BATCH_LIMIT: usize = 200;

/// The label EndpointSlice controllers stamp with the owning Service's name.
const ENDPOINTSLICE_SERVICE_LABEL: &str = "kubernetes.io/service-name";

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

fn node_matches_selector(node: &Node, selector: &std::collections::BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| node.labels().get(k) == Some(v))
}

/// AWS instance id out of a node's `spec.providerID` (`aws:///<az>/<instance-id>`),
/// falling back to the node name when the provider id is absent or unrecognized
/// (e.g. in tests that don't fill it in).
fn instance_id_of(node: &Node) -> String {
    node.spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .and_then(|p| p.rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| node.name_any())
}

fn instance_targets(cluster_index: &ClusterIndex, tg: &TargetGroup) -> BTreeSet<TargetId> {
    if tg.port == 0 {
        return BTreeSet::new();
    }
    cluster_index
        .nodes
        .state()
        .iter()
        .filter(|n| node_is_ready(n))
        .filter(|n| {
            tg.node_selector
                .as_ref()
                .map(|sel| node_matches_selector(n, sel))
                .unwrap_or(true)
        })
        .map(|n| TargetId::Instance { instance_id: instance_id_of(n), port: tg.port })
        .collect()
}

fn matches_ip_family(ip: &str, family: TgIpAddressType) -> bool {
    let is_v6 = ip.contains(':');
    match family {
        TgIpAddressType::Ipv6 => is_v6,
        TgIpAddressType::Ipv4 => !is_v6,
    }
}

fn ip_targets(cluster_index: &ClusterIndex, tg: &TargetGroup) -> BTreeSet<TargetId> {
    let namespace = &tg.dedup_key.service_namespace;
    let service_name = &tg.dedup_key.service_name;
    let port_selector = &tg.dedup_key.service_port;

    let mut out = BTreeSet::new();
    for slice in cluster_index.endpoint_slices.state().iter() {
        if slice.namespace().as_deref() != Some(namespace.as_str()) {
            continue;
        }
        if slice.labels().get(ENDPOINTSLICE_SERVICE_LABEL).map(String::as_str) != Some(service_name.as_str()) {
            continue;
        }
        let Some(port) = slice.ports.as_ref().into_iter().flatten().find_map(|p| {
            let name_matches = p.name.as_deref() == Some(port_selector.as_str());
            let number_matches = p.port.map(|n| n.to_string()).as_deref() == Some(port_selector.as_str());
            (name_matches || number_matches).then_some(p.port).flatten()
        }) else {
            continue;
        };
        for ep in &slice.endpoints {
            let ready = ep.conditions.as_ref().and_then(|c| c.ready).unwrap_or(true);
            if !ready {
                continue;
            }
            for addr in &ep.addresses {
                if !matches_ip_family(addr, tg.ip_address_type) {
                    continue;
                }
                out.insert(TargetId::Ip {
                    ip: addr.clone(),
                    port: port as u16,
                    availability_zone: ep.zone.clone(),
                });
            }
        }
    }
    out
}

/// Resolves one TargetGroup's desired concrete target set from the cluster
/// cache (spec §4.8): instance targets union node-port-mapped Ready nodes
/// matching any configured node-selector; ip targets union Ready pod IPs from
/// the service's EndpointSlices, filtered by the target group's `ipAddressType`.
pub fn desired_targets(cluster_index: &ClusterIndex, tg: &TargetGroup) -> BTreeSet<TargetId> {
    match tg.dedup_key.target_type {
        TargetType::Instance => instance_targets(cluster_index, tg),
        TargetType::Ip => ip_targets(cluster_index, tg),
        TargetType::Lambda => BTreeSet::new(),
    }
}

/// Converges one TargetGroup's AWS registrations onto `desired`: registers
/// are issued before deregisters within the batch (spec §5: "registers issued
/// before deregisters to minimize downtime"), each batched to
/// [`TARGET_BATCH_LIMIT`]. The registrar does not wait on draining; it submits
/// and continues (spec §4.8).
pub async fn converge_target_group(
    gateway: &dyn AwsGateway,
    tg_arn: &TargetGroupArn,
    desired: &BTreeSet<TargetId>,
    ctx: &CallContext,
) -> Result<()> {
    let current: BTreeSet<TargetId> = gateway
        .describe_target_health(tg_arn, ctx)
        .await
        .map_err(|e| ("describe_target_health", e))?
        .into_iter()
        .map(|t| t.target)
        .collect();

    let to_register: Vec<TargetId> = desired.difference(&current).cloned().collect();
    let to_deregister: Vec<TargetId> = current.difference(desired).cloned().collect();

    for batch in to_register.chunks(TARGET_BATCH_LIMIT) {
        gateway
            .register_targets(
                &RegisterTargetsRequest { target_group_arn: tg_arn.clone(), targets: batch.to_vec() },
                ctx,
            )
            .await
            .map_err(|e| ("register_targets", e))?;
    }
    for batch in to_deregister.chunks(TARGET_BATCH_LIMIT) {
        gateway
            .deregister_targets(
                &RegisterTargetsRequest { target_group_arn: tg_arn.clone(), targets: batch.to_vec() },
                ctx,
            )
            .await
            .map_err(|e| ("deregister_targets", e))?;
    }
    Ok(())
}

/// Converges every TargetGroup in `desired` that reconcile just created or
/// confirmed (i.e. has a resolved ARN in `tg_arns`); a TargetGroup whose ARN
/// isn't resolved yet (the reconcile pass that would have created it failed)
/// is skipped for this cycle rather than registering against a stale ARN.
pub async fn reconcile_targets(
    gateway: &dyn AwsGateway,
    cluster_index: &ClusterIndex,
    desired: &ResourceTree,
    tg_arns: &std::collections::BTreeMap<TargetGroupDedupKeyOrd, TargetGroupArn>,
    ctx: &CallContext,
) -> Result<()> {
    for (key, tg) in &desired.target_groups {
        let Some(arn) = tg_arns.get(key) else { continue };
        let wanted = desired_targets(cluster_index, tg);
        converge_target_group(gateway, arn, &wanted, ctx).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::FakeAwsGateway;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeSpec, NodeStatus};
    use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice};
    use kube::runtime::reflector;
    use kube::runtime::watcher::Event;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn ctx() -> CallContext {
        CallContext::default()
    }

    fn ready_node(name: &str, labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some(format!("aws:///us-east-1a/i-{name}")),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn index_with_nodes(nodes: Vec<Node>) -> ClusterIndex {
        let (nodes_store, mut writer) = reflector::store();
        writer.apply_watcher_event(&Event::Init);
        for n in nodes {
            writer.apply_watcher_event(&Event::InitApply(n));
        }
        writer.apply_watcher_event(&Event::InitDone);
        ClusterIndex {
            ingresses: reflector::store().0,
            ingress_classes: reflector::store().0,
            ingress_class_params: reflector::store().0,
            services: reflector::store().0,
            endpoint_slices: reflector::store().0,
            nodes: nodes_store,
            namespaces: reflector::store().0,
            secrets: reflector::store().0,
            target_group_bindings: reflector::store().0,
        }
    }

    fn index_with_endpoint_slices(slices: Vec<EndpointSlice>) -> ClusterIndex {
        let (slices_store, mut writer) = reflector::store();
        writer.apply_watcher_event(&Event::Init);
        for s in slices {
            writer.apply_watcher_event(&Event::InitApply(s));
        }
        writer.apply_watcher_event(&Event::InitDone);
        ClusterIndex {
            ingresses: reflector::store().0,
            ingress_classes: reflector::store().0,
            ingress_class_params: reflector::store().0,
            services: reflector::store().0,
            endpoint_slices: slices_store,
            nodes: reflector::store().0,
            namespaces: reflector::store().0,
            secrets: reflector::store().0,
            target_group_bindings: reflector::store().0,
        }
    }

    fn instance_tg(port: u16, node_selector: Option<BTreeMap<String, String>>) -> TargetGroup {
        TargetGroup {
            arn: None,
            name: "tg".into(),
            dedup_key: TargetGroupDedupKey {
                service_namespace: "default".into(),
                service_name: "svc".into(),
                service_port: "80".into(),
                protocol: Protocol::Http,
                protocol_version: None,
                target_type: TargetType::Instance,
                health_check: HealthCheckConfig::default(),
            },
            port,
            ip_address_type: TgIpAddressType::Ipv4,
            vpc_id: "vpc-1".into(),
            health_check: HealthCheckConfig::default(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            node_selector,
            multi_cluster: false,
        }
    }

    #[test]
    fn instance_targets_exclude_not_ready_and_unselected_nodes() {
        let mut not_ready = ready_node("n2", &[]);
        not_ready.status = Some(NodeStatus { conditions: Some(vec![]), ..Default::default() });
        let index = index_with_nodes(vec![
            ready_node("n1", &[("zone", "a")]),
            not_ready,
            ready_node("n3", &[("zone", "b")]),
        ]);

        let tg = instance_tg(31234, Some(BTreeMap::from([("zone".to_string(), "a".to_string())])));
        let targets = desired_targets(&index, &tg);
        assert_eq!(targets.len(), 1);
        assert!(targets.contains(&TargetId::Instance { instance_id: "i-n1".into(), port: 31234 }));
    }

    #[test]
    fn instance_targets_empty_when_port_unresolved() {
        let index = index_with_nodes(vec![ready_node("n1", &[])]);
        let tg = instance_tg(0, None);
        assert!(desired_targets(&index, &tg).is_empty());
    }

    fn ip_tg(ip_address_type: TgIpAddressType) -> TargetGroup {
        TargetGroup {
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
            ip_address_type,
            vpc_id: "vpc-1".into(),
            health_check: HealthCheckConfig::default(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            node_selector: None,
            multi_cluster: false,
        }
    }

    fn endpoint_slice(ready_ips: &[&str], not_ready_ips: &[&str]) -> EndpointSlice {
        let mut endpoints: Vec<Endpoint> = ready_ips
            .iter()
            .map(|ip| Endpoint {
                addresses: vec![ip.to_string()],
                conditions: Some(EndpointConditions { ready: Some(true), ..Default::default() }),
                ..Default::default()
            })
            .collect();
        endpoints.extend(not_ready_ips.iter().map(|ip| Endpoint {
            addresses: vec![ip.to_string()],
            conditions: Some(EndpointConditions { ready: Some(false), ..Default::default() }),
            ..Default::default()
        }));
        EndpointSlice {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("svc-abcde".to_string()),
                labels: Some(BTreeMap::from([(
                    ENDPOINTSLICE_SERVICE_LABEL.to_string(),
                    "svc".to_string(),
                )])),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints,
            ports: Some(vec![EndpointPort {
                name: None,
                port: Some(80),
                ..Default::default()
            }]),
        }
    }

    #[test]
    fn ip_targets_exclude_not_ready_endpoints() {
        let index = index_with_endpoint_slices(vec![endpoint_slice(&["10.0.0.1", "10.0.0.2"], &["10.0.0.3"])]);
        let tg = ip_tg(TgIpAddressType::Ipv4);
        let targets = desired_targets(&index, &tg);
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&TargetId::Ip { ip: "10.0.0.1".into(), port: 80, availability_zone: None }));
        assert!(!targets.iter().any(|t| matches!(t, TargetId::Ip { ip, .. } if ip == "10.0.0.3")));
    }

    #[test]
    fn ip_targets_filtered_by_address_family() {
        let index = index_with_endpoint_slices(vec![endpoint_slice(&["10.0.0.1", "fe80::1"], &[])]);
        let tg = ip_tg(TgIpAddressType::Ipv6);
        let targets = desired_targets(&index, &tg);
        assert_eq!(targets.len(), 1);
        assert!(targets.iter().any(|t| matches!(t, TargetId::Ip { ip, .. } if ip == "fe80::1")));
    }

    #[tokio::test]
    async fn converge_registers_before_deregistering_stale_targets() {
        let gw = FakeAwsGateway::new();
        let tg = gw
            .create_target_group(&instance_tg(31234, None), &ctx())
            .await
            .unwrap();
        let arn = tg.arn.clone().unwrap();

        let initial = BTreeSet::from([TargetId::Instance { instance_id: "n1".into(), port: 31234 }]);
        converge_target_group(&gw, &arn, &initial, &ctx()).await.unwrap();

        let next = BTreeSet::from([TargetId::Instance { instance_id: "n2".into(), port: 31234 }]);
        converge_target_group(&gw, &arn, &next, &ctx()).await.unwrap();

        let registered: Vec<_> = gw.describe_target_health(&arn, &ctx()).await.unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].target, TargetId::Instance { instance_id: "n2".into(), port: 31234 });
    }
}
