//! Desired-State Model Builder: turns one [`IngressGroup`] plus its resolved
//! configuration into a [`ResourceTree`] with no ARNs populated yet.
//!
//! Grounded on the teacher's `create_match_rulesets` (`examples/Intreecom-i2g-operator/src/main.rs`):
//! independent matcher axes (there: header/query matcher alternatives for a Gateway
//! API route; here: a rule's own conditions plus whatever `conditions.<name>` group
//! its action opts into) are expanded with `permutator::cartesian_product` rather
//! than nested loops, so adding a third axis never means adding another loop level.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{HTTPIngressPath, Ingress, IngressRule as K8sIngressRule};
use kube::ResourceExt;

use crate::cluster::ClusterIndex;
use crate::config::{ResolvedGroupConfig, ResolvedRuleConfig};
use crate::err::{ReconcileError, Result};
use crate::group::IngressGroup;
use crate::model::*;
use crate::naming;

/// Everything the builder needs about one admitted Ingress besides the raw object.
pub struct BuilderInput<'a> {
    pub cluster_name: &'a str,
    pub vpc_id: &'a str,
    pub enable_route53: bool,
}

/// Builds the full desired [`ResourceTree`] for one group. Pure aside from the
/// read-only `services` snapshot (a `ClusterIndex::services.state()` call)
/// needed to translate a Service port into a node port / container port
/// (spec §4.5's "TargetGroup port resolution").
pub fn build_resource_tree(
    input: &BuilderInput,
    group: &IngressGroup,
    group_config: &ResolvedGroupConfig,
    rule_configs: &BTreeMap<String, ResolvedRuleConfig>,
    cluster_index: &ClusterIndex,
) -> Result<ResourceTree> {
    let (namespace, short_name) = split_group_name(&group.name)?;

    let lb_name = naming::load_balancer_name(input.cluster_name, &namespace, &short_name);
    let mut lb_tags = group_config.tags.clone();
    lb_tags.insert(crate::consts::TAG_CLUSTER.to_string(), input.cluster_name.to_string());
    lb_tags.insert(crate::consts::TAG_RESOURCE.to_string(), "load-balancer".to_string());

    let load_balancer = LoadBalancer {
        arn: None,
        name: lb_name,
        scheme: group_config.scheme,
        ip_address_type: group_config.ip_address_type,
        subnets: group_config.subnets.clone(),
        security_groups: group_config.security_groups.clone(),
        attributes: group_config.load_balancer_attributes.clone(),
        tags: lb_tags,
        idle_timeout_seconds: group_config.idle_timeout_seconds,
        waf_acl_arn: group_config.waf_acl_arn.clone(),
        minimum_capacity: group_config.minimum_capacity,
        shield_advanced_protection: group_config.shield_advanced_protection,
    };

    let mut tree = ResourceTree::empty(load_balancer);
    let mut priorities: BTreeMap<(Protocol, u16), u32> = BTreeMap::new();
    let mut host_headers: BTreeSet<String> = BTreeSet::new();
    let mut uses_instance_targets = false;

    for (protocol, port) in &group_config.listen_ports {
        let certificates = if *protocol == Protocol::Https {
            if group_config.certificate_arns.is_empty() {
                return Err(ReconcileError::Validation(format!(
                    "group {}: HTTPS listener on port {port} has no certificate-arn configured",
                    group.name
                )));
            }
            group_config
                .certificate_arns
                .iter()
                .enumerate()
                .map(|(i, arn)| Certificate { arn: arn.clone(), is_default: i == 0 })
                .collect()
        } else {
            Vec::new()
        };

        let listener = Listener {
            arn: None,
            protocol: *protocol,
            port: *port,
            ssl_policy: if *protocol == Protocol::Https { group_config.ssl_policy.clone() } else { None },
            certificates,
            attributes: group_config.listener_attributes.clone(),
            default_actions: vec![RuleAction::FixedResponse(FixedResponseAction {
                status_code: 404,
                content_type: Some("text/plain".to_string()),
                message_body: Some("default backend - 404".to_string()),
            })],
            mutual_tls: None,
        };
        listener.validate().map_err(ReconcileError::Validation)?;
        tree.listeners.push(ListenerNode { listener, rules: Vec::new() });
    }

    for ingress in &group.members {
        let ingress_name = ingress.name_any();
        let ingress_ns = ingress.namespace().unwrap_or_default();
        let rule_config = rule_configs.get(&ingress_name).ok_or_else(|| {
            ReconcileError::Validation(format!("no resolved rule config for Ingress {ingress_name}"))
        })?;

        for k8s_rule in ingress.spec.as_ref().and_then(|s| s.rules.as_ref()).into_iter().flatten() {
            let Some(http) = &k8s_rule.http else { continue };
            for path in &http.paths {
                let base_conditions = base_conditions(k8s_rule, path)?;
                if let RuleCondition::HostHeader(hosts) = &base_conditions[0] {
                    host_headers.extend(hosts.iter().cloned());
                } else if let Some(RuleCondition::HostHeader(hosts)) =
                    base_conditions.iter().find(|c| matches!(c, RuleCondition::HostHeader(_)))
                {
                    host_headers.extend(hosts.iter().cloned());
                }

                let action_name = path
                    .backend
                    .service
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_default();

                let mut action = if let Some(named) = rule_config.named_actions.get(&action_name) {
                    named.clone()
                } else {
                    implicit_forward_action(path, &ingress_ns, &ingress_name)?
                };

                canonicalize_forward_action(
                    &mut action,
                    input,
                    &ingress_ns,
                    &ingress_name,
                    rule_config,
                    cluster_index,
                    &mut tree,
                    &mut uses_instance_targets,
                )?;

                let mut conditions = base_conditions;
                if let Some(extra) = rule_config.named_conditions.get(&action_name) {
                    conditions.extend(extra.iter().cloned());
                }

                let mut actions = Vec::new();
                if let Some(auth) = &rule_config.auth_action {
                    actions.push(auth.clone());
                }
                actions.push(action.clone());

                for (protocol, port) in &group_config.listen_ports {
                    let entry = priorities.entry((*protocol, *port)).or_insert(0);
                    *entry += 1;
                    let priority = *entry;
                    let rule = Rule {
                        arn: None,
                        priority,
                        conditions: conditions.clone(),
                        actions: actions.clone(),
                    };
                    rule.validate().map_err(ReconcileError::Validation)?;
                    let node = tree
                        .listeners
                        .iter_mut()
                        .find(|n| n.listener.key() == (*protocol, *port))
                        .expect("every configured listen port has a ListenerNode");
                    node.rules.push(rule);
                }
            }
        }
    }

    for node in &tree.listeners {
        validate_unique_priorities(&node.rules).map_err(ReconcileError::Validation)?;
    }

    if !matches!(group_config.security_groups, SecurityGroupSource::Explicit(_)) {
        let ports: Vec<u16> = group_config.listen_ports.iter().map(|(_, p)| *p).collect();
        let sg_name = naming::security_group_name(input.cluster_name, &namespace, &short_name, false);
        let mut sg_tags = group_config.tags.clone();
        sg_tags.insert(crate::consts::TAG_CLUSTER.to_string(), input.cluster_name.to_string());
        let instance_security_group = if uses_instance_targets {
            let instance_sg_name =
                naming::security_group_name(input.cluster_name, &namespace, &short_name, true);
            Some(InstanceSecurityGroup {
                group_id: None,
                name: instance_sg_name,
                allowed_ports: group_config.listen_ports.iter().map(|(_, p)| *p).collect(),
            })
        } else {
            None
        };
        tree.managed_security_group = Some(ManagedSecurityGroup {
            group_id: None,
            name: sg_name,
            vpc_id: input.vpc_id.to_string(),
            inbound_rules: ManagedSecurityGroup::build_inbound_rules(&ports, &group_config.inbound_cidrs),
            instance_security_group,
        });
    }

    if input.enable_route53 && !host_headers.is_empty() {
        let hosted_zone_id = group_config.route53_hosted_zone_id.clone().ok_or_else(|| {
            ReconcileError::Validation(format!(
                "group {}: Route53 is enabled but no {} annotation is set",
                group.name,
                crate::consts::ROUTE53_HOSTED_ZONE_ID
            ))
        })?;
        for hostname in host_headers {
            tree.route53_records.push(Route53Record {
                hosted_zone_id: hosted_zone_id.clone(),
                hostname,
                record_type: RecordType::A,
                // Filled in with the real DNS name once the LoadBalancer has been
                // created; the loader/reconcile pass owns that substitution.
                alias_target_dns_name: String::new(),
                alias_target_hosted_zone_id: String::new(),
            });
        }
    }

    Ok(tree)
}

fn split_group_name(group_name: &str) -> Result<(String, String)> {
    group_name
        .split_once('/')
        .map(|(ns, name)| (ns.to_string(), name.to_string()))
        .ok_or_else(|| ReconcileError::Validation(format!("malformed group name {group_name:?}")))
}

/// Host-header (if any) + path-pattern conditions for one Ingress path, the
/// two axes that always apply regardless of what a named condition group adds.
fn base_conditions(k8s_rule: &K8sIngressRule, path: &HTTPIngressPath) -> Result<Vec<RuleCondition>> {
    let mut conditions = Vec::new();
    if let Some(host) = &k8s_rule.host {
        conditions.push(RuleCondition::HostHeader(vec![host.clone()]));
    }
    let raw_path = path.path.clone().unwrap_or_else(|| "/".to_string());
    let pattern = match path.path_type.as_str() {
        "Exact" => raw_path,
        "Prefix" => {
            if raw_path == "/" {
                "/*".to_string()
            } else {
                format!("{}/*", raw_path.trim_end_matches('/'))
            }
        }
        _ => raw_path,
    };
    conditions.push(RuleCondition::PathPattern(vec![pattern]));
    Ok(conditions)
}

/// A path with no matching `actions.<name>` falls back to a plain forward to
/// its own backend service (the common case; spec §4.5).
fn implicit_forward_action(path: &HTTPIngressPath, ingress_ns: &str, ingress_name: &str) -> Result<RuleAction> {
    let service = path.backend.service.as_ref().ok_or_else(|| {
        ReconcileError::Validation(format!(
            "Ingress {ingress_ns}/{ingress_name}: path backend has no Service (resource backends unsupported)"
        ))
    })?;
    let port_fragment = service_port_fragment(service);
    Ok(RuleAction::Forward(ForwardAction {
        target_groups: vec![WeightedTargetGroup {
            target_group_arn: None,
            target_group_key: format!("{}/{}", service.name, port_fragment),
            weight: 1,
        }],
        target_group_stickiness_seconds: None,
    }))
}

fn service_port_fragment(service: &k8s_openapi::api::networking::v1::IngressServiceBackend) -> String {
    match &service.port {
        Some(p) => p.name.clone().unwrap_or_else(|| p.number.unwrap_or_default().to_string()),
        None => String::new(),
    }
}

/// Rewrites every `WeightedTargetGroup.target_group_key` in a Forward action
/// from its wire form (`serviceName/servicePort`) to the canonical dedup-key
/// fragment, registering a `TargetGroup` node in the tree the first time a
/// given dedup key is seen (spec §4.5 "emit exactly one TargetGroup node").
fn canonicalize_forward_action(
    action: &mut RuleAction,
    input: &BuilderInput,
    ingress_ns: &str,
    ingress_name: &str,
    rule_config: &ResolvedRuleConfig,
    cluster_index: &ClusterIndex,
    tree: &mut ResourceTree,
    uses_instance_targets: &mut bool,
) -> Result<()> {
    let RuleAction::Forward(forward) = action else { return Ok(()) };
    for wtg in &mut forward.target_groups {
        let Some((service_name, service_port)) = wtg.target_group_key.split_once('/') else {
            return Err(ReconcileError::Validation(format!(
                "malformed target group reference {:?}",
                wtg.target_group_key
            )));
        };
        let target_type = rule_config.target_type.unwrap_or(TargetType::Instance);
        let protocol = rule_config.backend_protocol.unwrap_or(Protocol::Http);
        let dedup_key = TargetGroupDedupKey {
            service_namespace: ingress_ns.to_string(),
            service_name: service_name.to_string(),
            service_port: service_port.to_string(),
            protocol,
            protocol_version: rule_config.backend_protocol_version,
            target_type,
            health_check: rule_config.health_check.clone(),
        };
        if target_type == TargetType::Instance {
            *uses_instance_targets = true;
        }

        let port = resolve_port(cluster_index, ingress_ns, service_name, service_port, target_type);
        let namespace = ingress_ns.to_string();
        let service_name_owned = service_name.to_string();
        let ingress_name_owned = ingress_name.to_string();
        let cluster_name = input.cluster_name.to_string();
        let vpc_id = input.vpc_id.to_string();
        let fragment = dedup_key.as_name_fragment();
        let tg = tree.target_group_or_insert_with(&dedup_key, || {
            let name = naming::target_group_name(&cluster_name, &namespace, &fragment);
            TargetGroup {
                arn: None,
                name,
                dedup_key: dedup_key.clone(),
                port,
                ip_address_type: TgIpAddressType::Ipv4,
                vpc_id,
                health_check: rule_config.health_check.clone(),
                attributes: rule_config.target_group_attributes.clone(),
                tags: TargetGroup::ownership_tags(
                    &cluster_name,
                    &ingress_name_owned,
                    &service_name_owned,
                    service_port,
                ),
                node_selector: if rule_config.target_node_labels.is_empty() {
                    None
                } else {
                    Some(rule_config.target_node_labels.clone())
                },
                multi_cluster: false,
            }
        });
        tg.validate().map_err(ReconcileError::Validation)?;
        wtg.target_group_key = TargetGroupDedupKeyOrd::from(&dedup_key).0;
    }
    Ok(())
}

/// Best-effort port resolution from the cached `Service` (spec §4.5): instance
/// targets register against the Service's node port, ip targets against its
/// container port. A Service the cluster index hasn't seen yet (or a named
/// port it can't find) resolves to `0`; `TargetGroup::validate` surfaces that
/// as a build error rather than silently shipping a broken health check.
fn resolve_port(
    cluster_index: &ClusterIndex,
    namespace: &str,
    service_name: &str,
    service_port: &str,
    target_type: TargetType,
) -> u16 {
    let Some(service) = find_service(cluster_index, namespace, service_name) else { return 0 };
    let Some(ports) = service.spec.as_ref().and_then(|s| s.ports.as_ref()) else { return 0 };
    let matched = ports.iter().find(|p| {
        p.name.as_deref() == Some(service_port) || p.port.to_string() == service_port
    });
    let Some(matched) = matched else { return 0 };
    match target_type {
        TargetType::Instance => matched.node_port.unwrap_or(0) as u16,
        TargetType::Ip | TargetType::Lambda => match &matched.target_port {
            Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(v)) => *v as u16,
            _ => matched.port as u16,
        },
    }
}

fn find_service(cluster_index: &ClusterIndex, namespace: &str, name: &str) -> Option<std::sync::Arc<Service>> {
    cluster_index
        .services
        .state()
        .into_iter()
        .find(|s| s.namespace().as_deref() == Some(namespace) && s.name_any() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressRuleValue, IngressBackend, IngressServiceBackend, IngressSpec, ServiceBackendPort,
    };
    use kube::api::ObjectMeta;

    fn path(service: &str, port: i32) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some("/".to_string()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: service.to_string(),
                    port: Some(ServiceBackendPort { name: None, number: Some(port) }),
                }),
                resource: None,
            },
        }
    }

    fn ingress(name: &str, host: &str, service: &str, port: i32) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                annotations: Some(BTreeMap::new()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: Some("alb".to_string()),
                rules: Some(vec![K8sIngressRule {
                    host: Some(host.to_string()),
                    http: Some(HTTPIngressRuleValue { paths: vec![path(service, port)] }),
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn empty_rule_configs(names: &[&str]) -> BTreeMap<String, ResolvedRuleConfig> {
        names.iter().map(|n| (n.to_string(), ResolvedRuleConfig::default())).collect()
    }

    /// Builds a `ClusterIndex` whose stores are populated in-process via the
    /// reflector writer, never touching a real API server — `ClusterIndex::spawn`
    /// needs a live cluster to reach `wait_until_ready`, which a unit test can't
    /// provide.
    fn test_cluster_index(services: Vec<Service>) -> ClusterIndex {
        use kube::runtime::reflector;
        use kube::runtime::watcher::Event;

        let (services_store, mut writer) = reflector::store();
        writer.apply_watcher_event(&Event::Init);
        for svc in services {
            writer.apply_watcher_event(&Event::InitApply(svc));
        }
        writer.apply_watcher_event(&Event::InitDone);

        ClusterIndex {
            ingresses: reflector::store().0,
            ingress_classes: reflector::store().0,
            ingress_class_params: reflector::store().0,
            services: services_store,
            endpoint_slices: reflector::store().0,
            nodes: reflector::store().0,
            namespaces: reflector::store().0,
            secrets: reflector::store().0,
            target_group_bindings: reflector::store().0,
        }
    }

    fn service_with_node_port(ns: &str, name: &str, port: i32, node_port: i32) -> Service {
        use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
        Service {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port,
                    node_port: Some(node_port),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn single_ingress_path_produces_one_rule_per_listener() {
        let cluster_index =
            test_cluster_index(vec![service_with_node_port("default", "svc", 80, 31234)]);
        let group = IngressGroup { name: "default/web".into(), members: vec![ingress("web", "a.example.com", "svc", 80)] };
        let group_config = ResolvedGroupConfig { listen_ports: vec![(Protocol::Http, 80)], ..Default::default() };
        let input = BuilderInput { cluster_name: "test-cluster", vpc_id: "vpc-1", enable_route53: false };
        let tree = build_resource_tree(&input, &group, &group_config, &empty_rule_configs(&["web"]), &cluster_index)
            .unwrap();
        assert_eq!(tree.listeners.len(), 1);
        assert_eq!(tree.listeners[0].rules.len(), 1);
        assert_eq!(tree.target_groups.len(), 1);
        let tg = tree.target_groups.values().next().unwrap();
        assert_eq!(tg.port, 31234);
    }
}
