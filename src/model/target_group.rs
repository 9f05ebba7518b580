use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::arn::TargetGroupArn;
use super::listener::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    Http1,
    Http2,
    Grpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    Instance,
    Ip,
    Lambda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TgIpAddressType {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub protocol: Protocol,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub healthy_threshold_count: u32,
    pub unhealthy_threshold_count: u32,
    pub matcher: Option<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            port: None,
            path: Some("/".to_string()),
            interval_seconds: 15,
            timeout_seconds: 5,
            healthy_threshold_count: 3,
            unhealthy_threshold_count: 3,
            matcher: Some("200".to_string()),
        }
    }
}

/// The dedup tuple spec §4.5 keys TargetGroup emission on:
/// `(serviceName, servicePort, protocol, protocolVersion, targetType, healthCheckConfig)`.
/// Two rules sharing everything but a `healthcheck-*` annotation are deliberately
/// distinct target groups, since AWS target groups carry exactly one health check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetGroupDedupKey {
    pub service_namespace: String,
    pub service_name: String,
    pub service_port: String,
    pub protocol: Protocol,
    pub protocol_version: Option<ProtocolVersion>,
    pub target_type: TargetType,
    pub health_check: HealthCheckConfig,
}

impl TargetGroupDedupKey {
    pub fn as_name_fragment(&self) -> String {
        format!(
            "{}/{}/{}/{:?}/{:?}/{:?}/{:?}",
            self.service_namespace,
            self.service_name,
            self.service_port,
            self.protocol,
            self.protocol_version,
            self.target_type,
            self.health_check,
        )
    }
}

/// Pool of backend endpoints sharing one health check (spec §3 TargetGroup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub arn: Option<TargetGroupArn>,
    pub name: String,
    pub dedup_key: TargetGroupDedupKey,
    pub port: u16,
    pub ip_address_type: TgIpAddressType,
    pub vpc_id: String,
    pub health_check: HealthCheckConfig,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub multi_cluster: bool,
}

impl TargetGroup {
    /// `targetType=instance` forbids lambda/ip semantics and requires node-port
    /// endpoints; `targetType=ip` forbids a node-selector (spec §3 invariant).
    pub fn validate(&self) -> Result<(), String> {
        match self.dedup_key.target_type {
            TargetType::Instance => {
                if self.port == 0 {
                    return Err("instance target group requires a resolved node port".to_string());
                }
            }
            TargetType::Ip => {
                if self.node_selector.is_some() {
                    return Err("targetType=ip forbids a node-selector".to_string());
                }
            }
            TargetType::Lambda => {}
        }
        Ok(())
    }

    pub fn dirty_mask(&self, current: &TargetGroup) -> TgDirtyMask {
        let mut mask = TgDirtyMask::empty();
        if self.attributes != current.attributes {
            mask |= TgDirtyMask::ATTRIBUTES;
        }
        if self.health_check != current.health_check {
            mask |= TgDirtyMask::HEALTH_CHECK;
        }
        if self.tags != current.tags {
            mask |= TgDirtyMask::TAGS;
        }
        mask
    }

    /// protocol, port, targetType, protocolVersion, vpc, ipAddressType force a
    /// full replace (spec §4.7).
    pub fn requires_replace(&self, current: &TargetGroup) -> bool {
        self.dedup_key.protocol != current.dedup_key.protocol
            || self.port != current.port
            || self.dedup_key.target_type != current.dedup_key.target_type
            || self.dedup_key.protocol_version != current.dedup_key.protocol_version
            || self.vpc_id != current.vpc_id
            || self.ip_address_type != current.ip_address_type
    }

    /// Ownership tags carried by every target group this controller creates
    /// (spec §3 TargetGroup: "cluster=..., ingress=..., service=..., port=...").
    pub fn ownership_tags(
        cluster: &str,
        ingress: &str,
        service: &str,
        port: &str,
    ) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert(crate::consts::TAG_CLUSTER.to_string(), cluster.to_string());
        tags.insert(
            crate::consts::TAG_RESOURCE.to_string(),
            "target-group".to_string(),
        );
        tags.insert(crate::consts::TAG_INGRESS.to_string(), ingress.to_string());
        tags.insert(crate::consts::TAG_SERVICE.to_string(), service.to_string());
        tags.insert(crate::consts::TAG_SERVICE_PORT.to_string(), port.to_string());
        tags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TgDirtyMask(u8);

impl TgDirtyMask {
    pub const ATTRIBUTES: Self = Self(1 << 0);
    pub const HEALTH_CHECK: Self = Self(1 << 1);
    pub const TAGS: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOrAssign for TgDirtyMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitOr for TgDirtyMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TargetGroupDedupKey {
        TargetGroupDedupKey {
            service_namespace: "default".into(),
            service_name: "svc".into(),
            service_port: "80".into(),
            protocol: Protocol::Http,
            protocol_version: Some(ProtocolVersion::Http1),
            target_type: TargetType::Instance,
            health_check: HealthCheckConfig::default(),
        }
    }

    #[test]
    fn differing_health_check_splits_the_dedup_key() {
        let k1 = key();
        let mut k2 = key();
        k2.health_check.path = Some("/healthz".into());
        assert_ne!(k1.as_name_fragment(), k2.as_name_fragment());
        assert_ne!(k1, k2);
    }

    #[test]
    fn instance_target_with_zero_port_is_rejected_even_with_protocol_version_set() {
        let tg = TargetGroup {
            arn: None,
            name: "tg".into(),
            dedup_key: TargetGroupDedupKey { target_type: TargetType::Instance, protocol_version: Some(ProtocolVersion::Http1), ..key() },
            port: 0,
            ip_address_type: TgIpAddressType::Ipv4,
            vpc_id: "vpc-1".into(),
            health_check: HealthCheckConfig::default(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            node_selector: None,
            multi_cluster: false,
        };
        assert!(tg.validate().is_err());
    }

    #[test]
    fn ip_target_type_rejects_node_selector() {
        let mut tg = TargetGroup {
            arn: None,
            name: "tg".into(),
            dedup_key: TargetGroupDedupKey {
                target_type: TargetType::Ip,
                ..key()
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
        assert!(tg.validate().is_ok());
        tg.node_selector = Some(BTreeMap::new());
        assert!(tg.validate().is_err());
    }

    #[test]
    fn two_rules_sharing_dedup_key_collapse_to_one_name() {
        let k1 = key();
        let k2 = key();
        assert_eq!(k1.as_name_fragment(), k2.as_name_fragment());
    }
}
