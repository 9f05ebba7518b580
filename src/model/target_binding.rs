use serde::{Deserialize, Serialize};

use super::arn::TargetGroupArn;
use super::target_group::TgIpAddressType;

/// Materialized link between a TargetGroup and a Kubernetes Service endpoint
/// (spec §3 TargetBinding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetBinding {
    pub target_group_arn: TargetGroupArn,
    pub service_namespace: String,
    pub service_name: String,
    pub service_port: String,
    pub node_selector: Option<std::collections::BTreeMap<String, String>>,
    pub cross_account_role_arn: Option<String>,
    pub multi_cluster_target_group: bool,
    pub ip_address_type: Option<TgIpAddressType>,
}

/// A single concrete target AWS actually registers: an instance+port or an IP+port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetId {
    Instance { instance_id: String, port: u16 },
    Ip { ip: String, port: u16, availability_zone: Option<String> },
}

impl TargetId {
    /// `(id, port, availabilityZone?)` pairing key (spec §4.7).
    pub fn pairing_key(&self) -> (String, u16, Option<String>) {
        match self {
            TargetId::Instance { instance_id, port } => (instance_id.clone(), *port, None),
            TargetId::Ip { ip, port, availability_zone } => {
                (ip.clone(), *port, availability_zone.clone())
            }
        }
    }
}

/// Validates the cross-cluster co-ownership invariant (spec §3 TargetBinding,
/// §5, §8): at most one binding per ARN unless every binding on that ARN opts
/// into multi-cluster mode.
pub fn validate_coownership(bindings: &[&TargetBinding]) -> Result<(), String> {
    use std::collections::HashMap;
    let mut by_arn: HashMap<&TargetGroupArn, Vec<&TargetBinding>> = HashMap::new();
    for b in bindings {
        by_arn.entry(&b.target_group_arn).or_default().push(b);
    }
    for (arn, group) in by_arn {
        if group.len() > 1 && !group.iter().all(|b| b.multi_cluster_target_group) {
            let offenders: Vec<String> = group
                .iter()
                .map(|b| format!("{}/{}", b.service_namespace, b.service_name))
                .collect();
            return Err(format!(
                "TargetGroup {arn} is already bound to following TargetGroupBindings {:?}. \
                 Please enable MultiCluster mode on every binding referencing this ARN.",
                offenders
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(ns: &str, multi_cluster: bool) -> TargetBinding {
        TargetBinding {
            target_group_arn: TargetGroupArn("arn:aws:elasticloadbalancing:..:targetgroup/tg-1/abc".into()),
            service_namespace: ns.into(),
            service_name: "svc".into(),
            service_port: "80".into(),
            node_selector: None,
            cross_account_role_arn: None,
            multi_cluster_target_group: multi_cluster,
            ip_address_type: None,
        }
    }

    #[test]
    fn second_binding_without_multi_cluster_flag_is_rejected() {
        let a = binding("ns1", false);
        let b = binding("ns2", false);
        assert!(validate_coownership(&[&a, &b]).is_err());
    }

    #[test]
    fn second_binding_with_multi_cluster_flag_is_accepted() {
        let a = binding("ns1", true);
        let b = binding("ns2", true);
        assert!(validate_coownership(&[&a, &b]).is_ok());
    }

    #[test]
    fn single_binding_never_needs_the_flag() {
        let a = binding("ns1", false);
        assert!(validate_coownership(&[&a]).is_ok());
    }
}
