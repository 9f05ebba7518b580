use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::{ResourceExt, api::ObjectMeta};

/// Adds owner references the way the status publisher links CRD objects back to
/// the Ingress that produced them, so cascading delete can clean them up.
pub trait ObjectMetaExt: Default {
    fn add_owner<T>(&mut self, owner: &T)
    where
        T: kube::Resource<DynamicType = ()>,
        T::DynamicType: Eq + std::hash::Hash + Clone;
}

impl ObjectMetaExt for ObjectMeta {
    fn add_owner<T>(&mut self, owner: &T)
    where
        T: kube::Resource<DynamicType = ()>,
        T::DynamicType: Eq + std::hash::Hash + Clone,
    {
        let mut owners = self.owner_references.take().unwrap_or_default();

        let owner_ref = OwnerReference {
            api_version: String::from(T::api_version(&())),
            kind: String::from(T::kind(&())),
            name: owner.name_any(),
            uid: String::from(owner.meta().uid.as_ref().cloned().unwrap_or_default()),
            controller: None,
            block_owner_deletion: Some(false),
        };
        if owners.iter().any(|o| o.uid == owner_ref.uid) {
            self.owner_references = Some(owners);
            return;
        }
        owners.push(owner_ref);
        self.owner_references = Some(owners);
    }
}

/// Stable `(namespace, name)` tuple used as a dictionary key across the crate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Diffs two tag maps into adds/updates (merged, since the AWS tagging APIs this
/// controller calls accept a single "set" request) and removals, per spec §4.1.
pub fn diff_tags(
    desired: &std::collections::BTreeMap<String, String>,
    current: &std::collections::BTreeMap<String, String>,
) -> (
    std::collections::BTreeMap<String, String>,
    Vec<String>,
) {
    let mut set = std::collections::BTreeMap::new();
    for (k, v) in desired {
        if current.get(k) != Some(v) {
            set.insert(k.clone(), v.clone());
        }
    }
    let remove = current
        .keys()
        .filter(|k| !desired.contains_key(*k))
        .cloned()
        .collect();
    (set, remove)
}

/// Evaluates a core/v1 `LabelSelector` (`matchLabels` + `matchExpressions`)
/// against a label map, the same semantics the API server applies to list
/// requests (spec §4.3 supplement: `IngressClassParams.namespaceSelector`).
pub fn label_selector_matches(
    selector: &LabelSelector,
    labels: &std::collections::BTreeMap<String, String>,
) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        if !match_labels.iter().all(|(k, v)| labels.get(k) == Some(v)) {
            return false;
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let ok = match expr.operator.as_str() {
                "In" => expr
                    .values
                    .as_ref()
                    .map(|vs| labels.get(&expr.key).is_some_and(|v| vs.contains(v)))
                    .unwrap_or(false),
                "NotIn" => expr
                    .values
                    .as_ref()
                    .map(|vs| !labels.get(&expr.key).is_some_and(|v| vs.contains(v)))
                    .unwrap_or(true),
                "Exists" => labels.contains_key(&expr.key),
                "DoesNotExist" => !labels.contains_key(&expr.key),
                _ => true,
            };
            if !ok {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn label_selector_match_labels_requires_every_pair() {
        let mut selector = LabelSelector::default();
        selector.match_labels =
            Some(BTreeMap::from([("team".to_string(), "platform".to_string())]));
        let mut labels = BTreeMap::new();
        assert!(!label_selector_matches(&selector, &labels));
        labels.insert("team".to_string(), "platform".to_string());
        assert!(label_selector_matches(&selector, &labels));
    }

    #[test]
    fn label_selector_in_expression() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement {
                    key: "env".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["prod".to_string(), "staging".to_string()]),
                },
            ]),
        };
        let labels = BTreeMap::from([("env".to_string(), "prod".to_string())]);
        assert!(label_selector_matches(&selector, &labels));
        let labels = BTreeMap::from([("env".to_string(), "dev".to_string())]);
        assert!(!label_selector_matches(&selector, &labels));
    }

    #[test]
    fn diff_tags_detects_adds_updates_and_removes() {
        let mut desired = BTreeMap::new();
        desired.insert("a".to_string(), "1".to_string());
        desired.insert("b".to_string(), "2".to_string());

        let mut current = BTreeMap::new();
        current.insert("a".to_string(), "1".to_string());
        current.insert("c".to_string(), "3".to_string());

        let (set, remove) = diff_tags(&desired, &current);
        assert_eq!(set.get("b"), Some(&"2".to_string()));
        assert!(!set.contains_key("a"));
        assert_eq!(remove, vec!["c".to_string()]);
    }
}
