use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::actions::RuleAction;
use super::arn::ListenerArn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Https,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub arn: String,
    /// `true` for the listener's single primary certificate, `false` for SNI entries.
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutualTls {
    pub mode: MutualTlsMode,
    pub trust_store_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutualTlsMode {
    Off,
    Verify,
    PassThrough,
}

/// One `(protocol, port)` listener on an ALB (spec §3 Listener).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub arn: Option<ListenerArn>,
    pub protocol: Protocol,
    pub port: u16,
    pub ssl_policy: Option<String>,
    pub certificates: Vec<Certificate>,
    pub attributes: BTreeMap<String, String>,
    pub default_actions: Vec<RuleAction>,
    pub mutual_tls: Option<MutualTls>,
}

impl Listener {
    /// `(protocol, port)` is the stable pairing key (spec §4.7).
    pub fn key(&self) -> (Protocol, u16) {
        (self.protocol, self.port)
    }

    /// Validates the TLS invariant: HTTPS listeners need at least one certificate
    /// (spec §3 Listener invariant).
    pub fn validate(&self) -> Result<(), String> {
        if self.protocol == Protocol::Https && self.certificates.is_empty() {
            return Err(format!(
                "listener on port {} is HTTPS but has no certificates",
                self.port
            ));
        }
        Ok(())
    }

    pub fn dirty_mask(&self, current: &Listener) -> ListenerDirtyMask {
        let mut mask = ListenerDirtyMask::empty();
        if self.certificates != current.certificates {
            mask |= ListenerDirtyMask::CERTIFICATES;
        }
        if self.ssl_policy != current.ssl_policy {
            mask |= ListenerDirtyMask::SSL_POLICY;
        }
        if self.attributes != current.attributes {
            mask |= ListenerDirtyMask::ATTRIBUTES;
        }
        if !actions_equal(&self.default_actions, &current.default_actions) {
            mask |= ListenerDirtyMask::DEFAULT_ACTIONS;
        }
        if self.mutual_tls != current.mutual_tls {
            mask |= ListenerDirtyMask::MUTUAL_TLS;
        }
        mask
    }

    /// `protocol`/`port` are the only replace-forcing fields, and changing either
    /// changes the pairing key itself, so in practice a "replace" here always
    /// manifests as delete-of-old-key + create-of-new-key (spec §4.7).
    pub fn requires_replace(&self, current: &Listener) -> bool {
        self.key() != current.key()
    }
}

fn actions_equal(a: &[RuleAction], b: &[RuleAction]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal(y))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerDirtyMask(u8);

impl ListenerDirtyMask {
    pub const CERTIFICATES: Self = Self(1 << 0);
    pub const SSL_POLICY: Self = Self(1 << 1);
    pub const ATTRIBUTES: Self = Self(1 << 2);
    pub const DEFAULT_ACTIONS: Self = Self(1 << 3);
    pub const MUTUAL_TLS: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOrAssign for ListenerDirtyMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitOr for ListenerDirtyMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
