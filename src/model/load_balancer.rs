use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::arn::LoadBalancerArn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    Internal,
    InternetFacing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpAddressType {
    Ipv4,
    Dualstack,
    DualstackWithoutPublicIpv4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityGroupSource {
    /// Explicit security-group IDs supplied by the user.
    Explicit(Vec<String>),
    /// The builder should synthesize a `ManagedSecurityGroup` node.
    Managed,
}

/// Desired attributes for one ALB (spec §3 LoadBalancer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub arn: Option<LoadBalancerArn>,
    pub name: String,
    pub scheme: Scheme,
    pub ip_address_type: IpAddressType,
    pub subnets: Vec<String>,
    pub security_groups: SecurityGroupSource,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub idle_timeout_seconds: Option<u32>,
    pub waf_acl_arn: Option<String>,
    pub minimum_capacity: Option<u32>,
    pub shield_advanced_protection: bool,
}

impl LoadBalancer {
    /// Fields whose change can be applied in place without recreating the LB
    /// (spec §4.7 mutable-fields table).
    pub fn dirty_mask(&self, current: &LoadBalancer) -> LbDirtyMask {
        let mut mask = LbDirtyMask::empty();
        if self.subnets != current.subnets {
            mask |= LbDirtyMask::SUBNETS;
        }
        if self.security_groups != current.security_groups {
            mask |= LbDirtyMask::SECURITY_GROUPS;
        }
        if self.ip_address_type != current.ip_address_type {
            mask |= LbDirtyMask::IP_ADDRESS_TYPE;
        }
        if self.attributes != current.attributes {
            mask |= LbDirtyMask::ATTRIBUTES;
        }
        if self.tags != current.tags {
            mask |= LbDirtyMask::TAGS;
        }
        if self.idle_timeout_seconds != current.idle_timeout_seconds {
            mask |= LbDirtyMask::IDLE_TIMEOUT;
        }
        if self.waf_acl_arn != current.waf_acl_arn {
            mask |= LbDirtyMask::WAF;
        }
        if self.minimum_capacity != current.minimum_capacity {
            mask |= LbDirtyMask::MINIMUM_CAPACITY;
        }
        if self.shield_advanced_protection != current.shield_advanced_protection {
            mask |= LbDirtyMask::SHIELD;
        }
        mask
    }

    /// Only `scheme` forces a full replace (spec §4.7).
    pub fn requires_replace(&self, current: &LoadBalancer) -> bool {
        self.scheme != current.scheme
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbDirtyMask(u16);

impl LbDirtyMask {
    pub const SUBNETS: Self = Self(1 << 0);
    pub const SECURITY_GROUPS: Self = Self(1 << 1);
    pub const IP_ADDRESS_TYPE: Self = Self(1 << 2);
    pub const ATTRIBUTES: Self = Self(1 << 3);
    pub const TAGS: Self = Self(1 << 4);
    pub const IDLE_TIMEOUT: Self = Self(1 << 5);
    pub const WAF: Self = Self(1 << 6);
    pub const MINIMUM_CAPACITY: Self = Self(1 << 7);
    pub const SHIELD: Self = Self(1 << 8);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for LbDirtyMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LbDirtyMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// State machine driven by the reconcile engine for one LoadBalancer node
/// (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LbLifecycle {
    Absent,
    Creating,
    Provisioning,
    Active,
    Modifying,
    Deleting,
    Deleted,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LoadBalancer {
        LoadBalancer {
            arn: None,
            name: "cluster-defaultweb-abcd".into(),
            scheme: Scheme::InternetFacing,
            ip_address_type: IpAddressType::Ipv4,
            subnets: vec!["subnet-1".into(), "subnet-2".into()],
            security_groups: SecurityGroupSource::Managed,
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            idle_timeout_seconds: Some(60),
            waf_acl_arn: None,
            minimum_capacity: None,
            shield_advanced_protection: false,
        }
    }

    #[test]
    fn single_mutable_field_change_is_never_a_replace() {
        let current = sample();
        let mut desired = sample();
        desired.idle_timeout_seconds = Some(120);
        assert!(!desired.requires_replace(&current));
        assert!(desired.dirty_mask(&current).contains(LbDirtyMask::IDLE_TIMEOUT));
    }

    #[test]
    fn scheme_change_forces_replace() {
        let current = sample();
        let mut desired = sample();
        desired.scheme = Scheme::Internal;
        assert!(desired.requires_replace(&current));
    }

    #[test]
    fn identical_trees_produce_empty_dirty_mask() {
        let a = sample();
        let b = sample();
        assert!(a.dirty_mask(&b).is_empty());
    }
}
