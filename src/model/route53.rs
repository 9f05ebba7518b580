use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    A,
    Aaaa,
}

/// `A`/`AAAA` alias to the ALB DNS name, keyed by hostname (spec §3 Route53Record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route53Record {
    pub hosted_zone_id: String,
    pub hostname: String,
    pub record_type: RecordType,
    pub alias_target_dns_name: String,
    pub alias_target_hosted_zone_id: String,
}

/// Reconciled to match the set of hostnames advertised by group rules (spec §4.5):
/// every rule host-header becomes a record, and hostnames no longer advertised
/// are dropped.
pub fn desired_hostnames(rule_host_headers: &[String]) -> std::collections::BTreeSet<String> {
    rule_host_headers.iter().cloned().collect()
}
