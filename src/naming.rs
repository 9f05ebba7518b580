//! Deterministic AWS resource naming (spec §3, §6, §8).
//!
//! Every name the controller hands to AWS is a pure function of inputs that are
//! already part of the desired state, so re-running the builder on an unchanged
//! group never produces a different name (spec §8: "Determinism of naming").

use md5::{Digest, Md5};

const MAX_NAME_LEN: usize = 32;
const HASH_SUFFIX_LEN: usize = 4;

/// Strips everything but ASCII alphanumerics, matching spec §6's "Sanitization
/// removes non-alphanumeric".
fn sanitize(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn hex4(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let full = format!("{digest:x}");
    full[..HASH_SUFFIX_LEN].to_string()
}

fn trim_hyphens(s: &str) -> String {
    s.trim_matches('-').to_string()
}

/// Builds a name of the form `<sanitized-prefix><truncated>-<4hex>`, total length
/// at most 32, alphanumeric + `-`, no leading/trailing hyphen, matching spec §6.
fn build_name(prefix: &str, hash_input: &str) -> String {
    let suffix = format!("-{}", hex4(hash_input));
    let budget = MAX_NAME_LEN - suffix.len();
    let sanitized = sanitize(prefix);
    let truncated: String = sanitized.chars().take(budget).collect();
    let name = format!("{truncated}{suffix}");
    let name = trim_hyphens(&name);
    // Trimming can only shorten the hash suffix if `truncated` was empty; guard
    // against handing AWS an empty or hyphen-only name.
    if name.is_empty() {
        format!("x{}", hex4(hash_input))
    } else {
        name
    }
}

/// Deterministic ALB name for an IngressGroup: `<cluster>-<ns><name>-<4hex>`.
pub fn load_balancer_name(cluster: &str, namespace: &str, name: &str) -> String {
    let prefix = format!("{cluster}-{namespace}{name}");
    let hash_input = format!("{cluster}/{namespace}/{name}");
    build_name(&prefix, &hash_input)
}

/// Deterministic TargetGroup name for a dedup tuple
/// `(service, port, protocol, protocolVersion, targetType, healthCheck)`.
pub fn target_group_name(cluster: &str, namespace: &str, dedup_key: &str) -> String {
    let prefix = format!("{cluster}-{namespace}");
    let hash_input = format!("{cluster}/{namespace}/{dedup_key}");
    build_name(&prefix, &hash_input)
}

/// Deterministic managed-security-group name, distinguished from the LB name by a
/// `-sg`/`-instance-sg` suffix baked into the hash input so the two never collide.
pub fn security_group_name(cluster: &str, namespace: &str, name: &str, instance_sg: bool) -> String {
    let kind = if instance_sg { "instance-sg" } else { "sg" };
    let prefix = format!("{cluster}-{namespace}{name}");
    let hash_input = format!("{cluster}/{namespace}/{name}/{kind}");
    build_name(&prefix, &hash_input)
}

/// `^[A-Za-z0-9][A-Za-z0-9-]{0,30}[A-Za-z0-9]$` (spec §8).
pub fn is_valid_aws_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let bytes = name.as_bytes();
    let first_ok = bytes[0].is_ascii_alphanumeric();
    let last_ok = bytes[bytes.len() - 1].is_ascii_alphanumeric();
    let body_ok = bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'-');
    first_ok && last_ok && body_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn load_balancer_name_is_deterministic() {
        let a = load_balancer_name("prod-cluster", "default", "web");
        let b = load_balancer_name("prod-cluster", "default", "web");
        assert_eq!(a, b);
    }

    #[test]
    fn load_balancer_name_respects_length_and_charset() {
        let name = load_balancer_name(
            "a-very-long-cluster-identifier",
            "a-rather-long-namespace",
            "an-even-longer-ingress-name-than-that",
        );
        assert!(name.len() <= 32, "name too long: {name}");
        assert!(is_valid_aws_name(&name), "invalid name: {name}");
    }

    #[test]
    fn different_inputs_yield_different_names() {
        let a = load_balancer_name("cluster", "default", "web");
        let b = load_balancer_name("cluster", "default", "web2");
        assert_ne!(a, b);
    }

    #[rstest]
    #[case("prod", "default", "web")]
    #[case("c", "ns", "n")]
    #[case("cluster-1", "kube-system", "ingress-with-dashes")]
    fn target_group_name_matches_aws_charset(
        #[case] cluster: &str,
        #[case] ns: &str,
        #[case] key: &str,
    ) {
        let name = target_group_name(cluster, ns, key);
        assert!(is_valid_aws_name(&name));
    }
}
