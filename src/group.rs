//! Group Assembler (spec §4.3): partitions admitted Ingresses into
//! IngressGroups — either the single-Ingress default group, or the named
//! group every member opts into via `group.name` — and orders members within
//! a group by `group.order` (ties broken by `(namespace, name)`).

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use md5::{Digest, Md5};

use crate::consts;
use crate::err::Result;
use crate::utils::label_selector_matches;

#[derive(Debug, Clone)]
pub struct IngressGroup {
    pub name: String,
    pub members: Vec<Ingress>,
}

impl IngressGroup {
    /// Stable hash of every member's generation + resourceVersion, letting the
    /// event pump skip a reconcile when nothing about the group actually
    /// changed since the last successful pass (spec §4.10 short-circuit).
    pub fn content_hash(&self) -> String {
        let mut hasher = Md5::new();
        let mut members: Vec<&Ingress> = self.members.iter().collect();
        members.sort_by_key(|i| (i.namespace().unwrap_or_default(), i.name_any()));
        for m in members {
            hasher.update(m.namespace().unwrap_or_default().as_bytes());
            hasher.update(m.name_any().as_bytes());
            hasher.update(m.generation().unwrap_or_default().to_be_bytes());
            hasher.update(m.resource_version().unwrap_or_default().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

fn admitted_class_name(ingress: &Ingress, annotation_disabled: bool) -> Option<String> {
    if let Some(name) = ingress.spec.as_ref().and_then(|s| s.ingress_class_name.clone()) {
        return Some(name);
    }
    if annotation_disabled {
        return None;
    }
    ingress.annotations().get(consts::INGRESS_CLASS_ANNOTATION).cloned()
}

/// Implicit (ungrouped) Ingresses each get their own singleton group keyed by
/// their own name, so two unrelated Ingresses in one namespace never merge
/// (spec §3: "missing -> implicit group `<namespace>/<name>`").
fn group_key(ingress: &Ingress) -> (String, String) {
    let namespace = ingress.namespace().unwrap_or_default();
    let explicit = ingress
        .annotations()
        .get(&format!("{}/{}", consts::ANNOTATION_PREFIX, consts::GROUP_NAME))
        .cloned();
    (namespace, explicit.unwrap_or_else(|| ingress.name_any()))
}

fn group_order(ingress: &Ingress) -> i32 {
    ingress
        .annotations()
        .get(&format!("{}/{}", consts::ANNOTATION_PREFIX, consts::GROUP_ORDER))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Admits ingresses whose class matches `controller` (by IngressClass's
/// `spec.controller`, resolved via the set the cluster index precomputes) and
/// partitions the admitted set into groups (spec §4.2, §4.3).
///
/// `class_namespace_selector` resolves an admitted class name to its
/// `IngressClassParams.spec.namespaceSelector` (if any), and `namespace_labels`
/// resolves a namespace name to its labels; an Ingress whose namespace the
/// selector rejects is excluded from every group (spec §4.3 supplement).
pub fn assemble_groups(
    ingresses: &[Ingress],
    matching_class_names: &std::collections::HashSet<String>,
    annotation_disabled: bool,
    class_namespace_selector: impl Fn(&str) -> Option<LabelSelector>,
    namespace_labels: impl Fn(&str) -> BTreeMap<String, String>,
) -> Result<Vec<IngressGroup>> {
    let mut buckets: BTreeMap<(String, String), Vec<Ingress>> = BTreeMap::new();
    for ingress in ingresses {
        let Some(class) = admitted_class_name(ingress, annotation_disabled) else { continue };
        if !matching_class_names.contains(&class) {
            continue;
        }
        if let Some(selector) = class_namespace_selector(&class) {
            let namespace = ingress.namespace().unwrap_or_default();
            if !label_selector_matches(&selector, &namespace_labels(&namespace)) {
                continue;
            }
        }
        buckets.entry(group_key(ingress)).or_default().push(ingress.clone());
    }

    let mut groups = Vec::new();
    for ((namespace, short_name), mut members) in buckets {
        members.sort_by_key(|i| (group_order(i), i.name_any()));
        let name = format!("{namespace}/{short_name}");
        groups.push(IngressGroup { name, members });
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use k8s_openapi::api::networking::v1::IngressSpec;

    fn ingress(ns: &str, name: &str, class: &str, group_name: Option<&str>, order: Option<i32>) -> Ingress {
        let mut annotations = BTreeMap::new();
        if let Some(g) = group_name {
            annotations.insert(format!("{}/{}", consts::ANNOTATION_PREFIX, consts::GROUP_NAME), g.to_string());
        }
        if let Some(o) = order {
            annotations.insert(format!("{}/{}", consts::ANNOTATION_PREFIX, consts::GROUP_ORDER), o.to_string());
        }
        Ingress {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                annotations: Some(annotations),
                generation: Some(1),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: Some(class.to_string()),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn no_selector(_class: &str) -> Option<LabelSelector> {
        None
    }

    fn no_labels(_ns: &str) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn ingresses_sharing_group_name_are_merged_and_ordered() {
        let classes = std::collections::HashSet::from(["alb".to_string()]);
        let a = ingress("default", "a", "alb", Some("web"), Some(20));
        let b = ingress("default", "b", "alb", Some("web"), Some(10));
        let groups = assemble_groups(&[a, b], &classes, false, no_selector, no_labels).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members[0].name_any(), "b");
        assert_eq!(groups[0].members[1].name_any(), "a");
    }

    #[test]
    fn ingresses_with_mismatched_class_are_not_admitted() {
        let classes = std::collections::HashSet::from(["alb".to_string()]);
        let a = ingress("default", "a", "nginx", None, None);
        let groups = assemble_groups(&[a], &classes, false, no_selector, no_labels).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn multiple_implicit_groups_in_one_namespace_stay_separate() {
        let classes = std::collections::HashSet::from(["alb".to_string()]);
        let a = ingress("default", "a", "alb", None, None);
        let b = ingress("default", "b", "alb", None, None);
        let groups = assemble_groups(&[a, b], &classes, false, no_selector, no_labels).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn namespace_selector_excludes_non_matching_namespace() {
        let classes = std::collections::HashSet::from(["alb".to_string()]);
        let a = ingress("default", "a", "alb", None, None);
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("team".to_string(), "platform".to_string())])),
            match_expressions: None,
        };
        let groups = assemble_groups(
            &[a],
            &classes,
            false,
            |_| Some(selector.clone()),
            no_labels,
        )
        .unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn content_hash_is_stable_across_calls() {
        let a = ingress("default", "a", "alb", None, None);
        let group = IngressGroup { name: "default/a".into(), members: vec![a] };
        assert_eq!(group.content_hash(), group.content_hash());
    }
}
