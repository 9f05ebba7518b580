use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRule {
    pub port: u16,
    pub cidr: String,
}

/// Synthesized when the user does not specify `securityGroups` for the LB
/// (spec §3 ManagedSecurityGroup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedSecurityGroup {
    pub group_id: Option<String>,
    pub name: String,
    pub vpc_id: String,
    pub inbound_rules: Vec<InboundRule>,
    /// Attached to worker instances when any target group is `targetType=instance`.
    pub instance_security_group: Option<InstanceSecurityGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSecurityGroup {
    pub group_id: Option<String>,
    pub name: String,
    /// Allows traffic from the LB's security group to each target group's node port.
    pub allowed_ports: Vec<u16>,
}

impl ManagedSecurityGroup {
    /// Cross-product of listener ports and inbound CIDRs (spec §4.5). Default
    /// CIDRs are `0.0.0.0/0` + `::/0` when the user sets none.
    ///
    /// Uses the same `permutator::cartesian_product` the teacher reaches for to
    /// expand independent matcher axes, here crossing ports against CIDRs instead
    /// of header/query matchers.
    pub fn build_inbound_rules(ports: &[u16], cidrs: &[String]) -> Vec<InboundRule> {
        let cidrs: Vec<String> = if cidrs.is_empty() {
            vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
        } else {
            cidrs.to_vec()
        };
        if ports.is_empty() || cidrs.is_empty() {
            return Vec::new();
        }
        // permutator::cartesian_product needs one element type per axis, so ports
        // and cidrs are lifted into a common enum before crossing them.
        #[derive(Clone)]
        enum Axis {
            Port(u16),
            Cidr(String),
        }
        let port_axis: Vec<Axis> = ports.iter().map(|p| Axis::Port(*p)).collect();
        let cidr_axis: Vec<Axis> = cidrs.iter().map(|c| Axis::Cidr(c.clone())).collect();

        let mut rules = Vec::with_capacity(ports.len() * cidrs.len());
        permutator::cartesian_product(&[&port_axis, &cidr_axis], |combo| {
            let (Axis::Port(port), Axis::Cidr(cidr)) = (combo[0], combo[1]) else {
                unreachable!("axes are fixed to Port then Cidr")
            };
            rules.push(InboundRule { port: *port, cidr: cidr.clone() });
        });
        rules
    }

    pub fn drift(&self, current: &ManagedSecurityGroup) -> SgDrift {
        let to_add: Vec<InboundRule> = self
            .inbound_rules
            .iter()
            .filter(|r| !current.inbound_rules.contains(r))
            .cloned()
            .collect();
        let to_remove: Vec<InboundRule> = current
            .inbound_rules
            .iter()
            .filter(|r| !self.inbound_rules.contains(r))
            .cloned()
            .collect();
        SgDrift { to_add, to_remove }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgDrift {
    pub to_add: Vec<InboundRule>,
    pub to_remove: Vec<InboundRule>,
}

impl SgDrift {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_cidr_drift_adds_new_cidr_without_touching_existing() {
        let mut sg = ManagedSecurityGroup {
            group_id: Some("sg-1".into()),
            name: "lb-sg".into(),
            vpc_id: "vpc-1".into(),
            inbound_rules: ManagedSecurityGroup::build_inbound_rules(&[80], &["10.0.0.0/8".into()]),
            instance_security_group: None,
        };
        let current = sg.clone();
        sg.inbound_rules = ManagedSecurityGroup::build_inbound_rules(
            &[80],
            &["10.0.0.0/8".into(), "192.168.0.0/16".into()],
        );
        let drift = sg.drift(&current);
        assert_eq!(drift.to_add.len(), 1);
        assert_eq!(drift.to_add[0].cidr, "192.168.0.0/16");
        assert!(drift.to_remove.is_empty());
    }

    #[test]
    fn default_cidrs_used_when_none_configured() {
        let rules = ManagedSecurityGroup::build_inbound_rules(&[443], &[]);
        assert_eq!(rules.len(), 2);
    }
}
