//! Cluster Index: reflector-backed, read-only snapshots of every Kubernetes
//! resource the rest of the reconciler needs, kept warm by background watchers
//! so a reconcile never blocks on an API list call.
//!
//! Grounded on the pack's cloudflare-controller-rs `IngressController::start`:
//! `reflector::store()` per resource, a `watcher(...).default_backoff().reflect(writer)`
//! task per store, and `store.wait_until_ready()` before the controller is allowed
//! to run its first reconcile.

use std::future::ready;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client};

use crate::crds::{IngressClassParams, TargetGroupBinding};

pub type Store<K> = reflector::Store<K>;

/// Warm reflector stores for every resource kind this controller reads.
/// Nothing here is mutated by the reconcile loop; writes go through the
/// `kube::Client` directly and the next watch event refreshes the store.
#[derive(Clone)]
pub struct ClusterIndex {
    pub ingresses: Store<Ingress>,
    pub ingress_classes: Store<IngressClass>,
    pub ingress_class_params: Store<IngressClassParams>,
    pub services: Store<Service>,
    pub endpoint_slices: Store<EndpointSlice>,
    pub nodes: Store<Node>,
    pub namespaces: Store<Namespace>,
    pub secrets: Store<Secret>,
    pub target_group_bindings: Store<TargetGroupBinding>,
}

impl ClusterIndex {
    /// Spawns one watcher task per resource kind and blocks until every store
    /// has received its initial listing, so the first group reconcile never
    /// races an empty cache.
    pub async fn spawn(client: Client) -> anyhow::Result<(Self, tokio::task::JoinSet<()>)> {
        let wc = watcher::Config::default();
        let mut tasks = tokio::task::JoinSet::new();

        let (ingresses, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<Ingress>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (ingress_classes, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<IngressClass>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (ingress_class_params, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<IngressClassParams>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (services, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<Service>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (endpoint_slices, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<EndpointSlice>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (nodes, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<Node>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (namespaces, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<Namespace>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (secrets, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<Secret>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        let (target_group_bindings, w) = reflector::store();
        tasks.spawn(
            watcher(Api::<TargetGroupBinding>::all(client.clone()), wc.clone())
                .default_backoff()
                .reflect(w)
                .touched_objects()
                .for_each(|_| ready(())),
        );

        ingresses.wait_until_ready().await?;
        ingress_classes.wait_until_ready().await?;
        ingress_class_params.wait_until_ready().await?;
        services.wait_until_ready().await?;
        endpoint_slices.wait_until_ready().await?;
        nodes.wait_until_ready().await?;
        namespaces.wait_until_ready().await?;
        secrets.wait_until_ready().await?;
        target_group_bindings.wait_until_ready().await?;

        Ok((
            Self {
                ingresses,
                ingress_classes,
                ingress_class_params,
                services,
                endpoint_slices,
                nodes,
                namespaces,
                secrets,
                target_group_bindings,
            },
            tasks,
        ))
    }

    /// Decodes one key out of a namespaced `Secret`'s `data` map (spec §4.4:
    /// `auth-idp-oidc`'s client secret is a secret ref, not an inline value).
    pub fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        use kube::ResourceExt;
        self.secrets
            .state()
            .iter()
            .find(|s| s.namespace().as_deref() == Some(namespace) && s.name_any() == name)
            .and_then(|s| s.data.as_ref())
            .and_then(|data| data.get(key))
            .and_then(|v| String::from_utf8(v.0.clone()).ok())
    }

    /// Labels of `namespace`, or an empty map if the cache hasn't seen it yet.
    pub fn namespace_labels(&self, namespace: &str) -> std::collections::BTreeMap<String, String> {
        use kube::ResourceExt;
        self.namespaces
            .state()
            .iter()
            .find(|ns| ns.name_any() == namespace)
            .map(|ns| ns.labels().clone())
            .unwrap_or_default()
    }

    /// Ingress-class names whose `spec.controller` matches this instance, the
    /// set the Group Assembler admits Ingresses against.
    pub fn matching_class_names(&self, controller: &str) -> std::collections::HashSet<String> {
        use kube::ResourceExt;
        self.ingress_classes
            .state()
            .iter()
            .filter(|ic| {
                ic.spec
                    .as_ref()
                    .and_then(|s| s.controller.as_deref())
                    .map(|c| c == controller)
                    .unwrap_or(false)
            })
            .map(|ic| ic.name_any())
            .collect()
    }
}
