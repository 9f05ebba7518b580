//! Status Publisher (spec §4.9): writes the observed ALB DNS name back onto
//! every member Ingress, bumps CRD `status.observedGeneration`, and surfaces
//! human-readable outcomes as Kubernetes events. Status writes are
//! conflict-tolerant the same way `tembo-io-tembo`'s controller threads a
//! single retry through `patch_status` — re-read isn't needed explicitly
//! since a second `Patch::Apply` against the same field manager simply wins.

use k8s_openapi::api::core::v1::{Event as K8sEvent, EventSource, ObjectReference};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;

use crate::consts::FIELD_MANAGER;
use crate::err::{ReconcileError, Result};
use crate::group::IngressGroup;

/// The three outcome buckets spec §4.9 asks the status publisher to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Provisioned,
    TargetHealth,
    ConfigurationInvalid,
}

impl ConditionKind {
    fn as_str(self) -> &'static str {
        match self {
            ConditionKind::Provisioned => "Provisioned",
            ConditionKind::TargetHealth => "TargetHealth",
            ConditionKind::ConfigurationInvalid => "ConfigurationInvalid",
        }
    }
}

const RETRY_ATTEMPTS: u32 = 2;

/// Applies `patch` against `name`'s status subresource, retrying once on any
/// error before giving up — a conflicting concurrent writer is the only
/// failure mode worth a retry here (spec §4.9: "on version mismatch, re-read
/// and retry once"); everything else will fail the same way twice.
async fn apply_status_patch<K>(api: &Api<K>, name: &str, patch: serde_json::Value) -> Result<()>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    let pp = PatchParams::apply(FIELD_MANAGER).force();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match api.patch_status(name, &pp, &Patch::Apply(patch.clone())).await {
            Ok(_) => return Ok(()),
            Err(e) if attempt < RETRY_ATTEMPTS => {
                tracing::warn!(error = %e, %name, attempt, "status patch failed, retrying once");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Patches `ingress.status.loadBalancer.ingress[0].hostname` to the ALB's
/// DNS name (spec §4.9).
pub async fn publish_lb_hostname(api: &Api<Ingress>, name: &str, hostname: &str) -> Result<()> {
    let patch = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "status": {
            "loadBalancer": {
                "ingress": [{ "hostname": hostname }]
            }
        }
    });
    apply_status_patch(api, name, patch).await
}

/// Bumps a CRD's `status.observedGeneration` to `generation` (spec §4.9).
/// `api_version`/`kind` are passed explicitly since this is generic over any
/// CRD carrying that field, not just one concrete type.
pub async fn publish_observed_generation<K>(
    api: &Api<K>,
    name: &str,
    api_version: &str,
    kind: &str,
    generation: i64,
) -> Result<()>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    let patch = json!({
        "apiVersion": api_version,
        "kind": kind,
        "status": { "observedGeneration": generation }
    });
    apply_status_patch(api, name, patch).await
}

/// Builds a plain Kubernetes `Event` pointing at `involved`. Timestamps are
/// left unset; the API server stamps `metadata.creationTimestamp` on create,
/// which is all `kubectl describe`'s event table needs to order them.
fn build_event(involved: ObjectReference, namespace: &str, kind: ConditionKind, type_: &str, message: String, action: &str) -> K8sEvent {
    K8sEvent {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-", kind.as_str().to_lowercase())),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        involved_object: involved,
        reason: Some(kind.as_str().to_string()),
        message: Some(message),
        type_: Some(type_.to_string()),
        source: Some(EventSource { component: Some(FIELD_MANAGER.to_string()), host: None }),
        count: Some(1),
        action: Some(action.to_string()),
        ..Default::default()
    }
}

async fn publish_event(client: &Client, namespace: &str, event: K8sEvent) {
    let api: Api<K8sEvent> = Api::namespaced(client.clone(), namespace);
    if let Err(e) = api.create(&PostParams::default(), &event).await {
        tracing::warn!(error = %e, %namespace, "failed to publish event");
    }
}

/// Records one `Provisioned`/`ConfigurationInvalid` event per group member
/// summarizing the reconcile's outcome, and — when it succeeded — patches the
/// ALB hostname onto each member's status (spec §4.9). Best-effort: a failure
/// publishing status or an event is logged and does not fail the reconcile
/// that's already completed.
pub async fn publish_group_status(
    client: &Client,
    group: &IngressGroup,
    hostname: Option<&str>,
    outcome: &std::result::Result<(), ReconcileError>,
) {
    for member in &group.members {
        let ns = member.namespace().unwrap_or_default();
        let name = member.name_any();
        let api: Api<Ingress> = Api::namespaced(client.clone(), &ns);

        if let Some(hostname) = hostname {
            if let Err(e) = publish_lb_hostname(&api, &name, hostname).await {
                tracing::warn!(error = %e, namespace = %ns, %name, "failed to publish load balancer hostname");
            }
        }

        let (kind, type_, message) = match outcome {
            Ok(()) => (ConditionKind::Provisioned, "Normal", "reconcile succeeded".to_string()),
            Err(e) => {
                let kind = if matches!(e, ReconcileError::Validation(_) | ReconcileError::ConfigConflict { .. }) {
                    ConditionKind::ConfigurationInvalid
                } else {
                    ConditionKind::Provisioned
                };
                (kind, "Warning", e.to_string())
            }
        };
        let event = build_event(member.object_ref(&()), &ns, kind, type_, message, "Reconcile");
        publish_event(client, &ns, event).await;
    }
}

/// Emits a `TargetHealth` event per group member summarizing live target
/// counts across the group's target groups, gathered after the registrar
/// converges (spec §4.9).
pub async fn publish_target_health(client: &Client, group: &IngressGroup, healthy: usize, total: usize) {
    let type_ = if total == 0 || healthy == total { "Normal" } else { "Warning" };
    let message = format!("{healthy}/{total} targets healthy");
    for member in &group.members {
        let ns = member.namespace().unwrap_or_default();
        let event = build_event(member.object_ref(&()), &ns, ConditionKind::TargetHealth, type_, message.clone(), "TargetHealthCheck");
        publish_event(client, &ns, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ObjectReference {
        ObjectReference { kind: Some("Ingress".into()), name: Some("web".into()), namespace: Some("default".into()), ..Default::default() }
    }

    #[test]
    fn build_event_carries_reason_and_message() {
        let event = build_event(reference(), "default", ConditionKind::ConfigurationInvalid, "Warning", "bad annotation".to_string(), "Reconcile");
        assert_eq!(event.reason.as_deref(), Some("ConfigurationInvalid"));
        assert_eq!(event.message.as_deref(), Some("bad annotation"));
        assert_eq!(event.type_.as_deref(), Some("Warning"));
        assert_eq!(event.involved_object.name.as_deref(), Some("web"));
        assert_eq!(event.metadata.generate_name.as_deref(), Some("configurationinvalid-"));
    }

    #[test]
    fn lb_hostname_patch_merge_is_well_formed_json() {
        let patch = json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "status": { "loadBalancer": { "ingress": [{ "hostname": "lb.example.com" }] } }
        });
        assert_eq!(patch["status"]["loadBalancer"]["ingress"][0]["hostname"], "lb.example.com");
    }
}
