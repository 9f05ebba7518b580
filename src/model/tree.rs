use std::collections::BTreeMap;

use super::load_balancer::LoadBalancer;
use super::listener::Listener;
use super::route53::Route53Record;
use super::rule::Rule;
use super::security_group::ManagedSecurityGroup;
use super::target_binding::TargetBinding;
use super::target_group::TargetGroupDedupKey;
use super::target_group::TargetGroup;

/// One listener plus its ordered rules; the builder keeps rules sorted by
/// priority so the diff engine's pairing walk and the "no default action twin"
/// invariant are easy to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerNode {
    pub listener: Listener,
    pub rules: Vec<Rule>,
}

/// The full typed tree the Desired-State Model Builder emits for one
/// IngressGroup (spec §4.5), and the shape the Current-State Loader mirrors
/// (spec §4.6). ARNs are `None` everywhere in a freshly built DesiredTree;
/// the CurrentTree always has them populated for resources AWS returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTree {
    pub load_balancer: LoadBalancer,
    pub listeners: Vec<ListenerNode>,
    /// Keyed by dedup key so multiple rules can reference one node (spec §4.5).
    pub target_groups: BTreeMap<TargetGroupDedupKeyOrd, TargetGroup>,
    pub target_bindings: Vec<TargetBinding>,
    pub managed_security_group: Option<ManagedSecurityGroup>,
    pub route53_records: Vec<Route53Record>,
}

/// `TargetGroupDedupKey` isn't `Ord` (it embeds no ordering-sensitive floats, but
/// we keep tree iteration deterministic by sorting on its string rendering
/// rather than deriving `Ord` on every nested enum).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TargetGroupDedupKeyOrd(pub String);

impl From<&TargetGroupDedupKey> for TargetGroupDedupKeyOrd {
    fn from(key: &TargetGroupDedupKey) -> Self {
        Self(key.as_name_fragment())
    }
}

impl ResourceTree {
    pub fn empty(load_balancer: LoadBalancer) -> Self {
        Self {
            load_balancer,
            listeners: Vec::new(),
            target_groups: BTreeMap::new(),
            target_bindings: Vec::new(),
            managed_security_group: None,
            route53_records: Vec::new(),
        }
    }

    /// Returns the existing node for `key`, or inserts `make()`'s result and
    /// returns that — the single insertion point spec §4.5's dedup rule requires
    /// ("emit exactly one TargetGroup node and reuse it from multiple rules").
    pub fn target_group_or_insert_with(
        &mut self,
        key: &TargetGroupDedupKey,
        make: impl FnOnce() -> TargetGroup,
    ) -> &mut TargetGroup {
        let ord_key = TargetGroupDedupKeyOrd::from(key);
        self.target_groups.entry(ord_key).or_insert_with(make)
    }

    pub fn all_rules(&self) -> impl Iterator<Item = (&Listener, &Rule)> {
        self.listeners
            .iter()
            .flat_map(|node| node.rules.iter().map(move |r| (&node.listener, r)))
    }
}

/// Tri-state result the Current-State Loader returns per LB branch (spec §4.6):
/// a partial enumeration failure marks that branch "unknown" rather than
/// "absent", so the engine skips modifications to it this cycle instead of
/// deleting.
#[derive(Debug, Clone)]
pub enum LoadResult<T> {
    Loaded(T),
    Unknown { reason: String },
    Absent,
}

impl<T> LoadResult<T> {
    pub fn loaded(self) -> Option<T> {
        match self {
            LoadResult::Loaded(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, LoadResult::Unknown { .. })
    }
}
